use std::collections::HashMap;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::assign::{self, SessionLocks};
use crate::db;
use crate::error::EvalResult;
use crate::export::{self, ExportDocument};
use crate::models::{self, Evaluation, EvaluationInput, Response, Session, SessionStatus};
use crate::report;
use crate::stats::{self, Overview, SessionStats};

const RECENT_SESSIONS: i64 = 5;

/// Session workflow over the store: selection, submission and aggregation.
#[derive(Clone)]
pub struct Engine {
    pool: SqlitePool,
    locks: SessionLocks,
}

/// The next response to show, with how many remain including it.
#[derive(Debug, Clone, PartialEq)]
pub struct NextResponse {
    pub response: Response,
    pub remaining: usize,
}

impl Engine {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: SessionLocks::default(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn start_session(&self, evaluator_name: &str) -> EvalResult<Session> {
        let name = models::validate_evaluator_name(evaluator_name)?;
        db::create_session(&self.pool, &name).await
    }

    pub async fn complete_session(&self, session_id: i64) -> EvalResult<Session> {
        let _guard = self.locks.lock(session_id).await;
        db::complete_session(&self.pool, session_id).await
    }

    pub async fn delete_session(&self, session_id: i64) -> EvalResult<u64> {
        let _guard = self.locks.lock(session_id).await;
        db::delete_session(&self.pool, session_id).await
    }

    /// Lowest-id response this session has not evaluated, or `None` once exhausted.
    pub async fn next_response(&self, session_id: i64) -> EvalResult<Option<NextResponse>> {
        let _guard = self.locks.lock(session_id).await;
        let evaluated = db::evaluated_response_ids(&self.pool, session_id).await?;
        let candidates = db::response_ids(&self.pool).await?;

        let Some(response_id) = assign::select_next(&candidates, &evaluated) else {
            debug!(session_id, "no responses left to evaluate");
            return Ok(None);
        };

        let response = db::get_response(&self.pool, response_id).await?;
        Ok(Some(NextResponse {
            response,
            remaining: assign::remaining(&candidates, &evaluated),
        }))
    }

    /// Validates and stores a submission while holding the session's lock.
    pub async fn submit(&self, input: EvaluationInput) -> EvalResult<Evaluation> {
        let new = input.validate()?;
        let _guard = self.locks.lock(new.session_id).await;

        let session = db::get_session(&self.pool, new.session_id).await?;
        if session.status == SessionStatus::Completed {
            warn!(session_id = session.id, "recording evaluation into a completed session");
        }
        db::record_evaluation(&self.pool, &new).await
    }

    pub async fn session_stats(&self, session_id: i64) -> EvalResult<SessionStats> {
        let evaluations = db::evaluations_for_session(&self.pool, session_id).await?;
        Ok(stats::session_stats(&evaluations))
    }

    pub async fn session_detail(&self, session_id: i64) -> EvalResult<(Session, Vec<Evaluation>)> {
        let session = db::get_session(&self.pool, session_id).await?;
        let evaluations = db::evaluations_for_session(&self.pool, session_id).await?;
        Ok((session, evaluations))
    }

    async fn responses_for(&self, evaluations: &[Evaluation]) -> EvalResult<HashMap<i64, Response>> {
        let mut responses = HashMap::new();
        for evaluation in evaluations {
            if !responses.contains_key(&evaluation.response_id) {
                let response = db::get_response(&self.pool, evaluation.response_id).await?;
                responses.insert(response.id, response);
            }
        }
        Ok(responses)
    }

    pub async fn export(&self, session_id: i64) -> EvalResult<ExportDocument> {
        let (session, evaluations) = self.session_detail(session_id).await?;
        let responses = self.responses_for(&evaluations).await?;
        export::build_export(&session, &evaluations, &responses)
    }

    pub async fn report(&self, session_id: i64) -> EvalResult<String> {
        let (session, evaluations) = self.session_detail(session_id).await?;
        let responses = self.responses_for(&evaluations).await?;
        Ok(report::build_report(&session, &evaluations, &responses))
    }

    pub async fn overview(&self) -> EvalResult<Overview> {
        Ok(Overview {
            total_sessions: db::count_sessions(&self.pool).await?,
            total_evaluations: db::count_evaluations(&self.pool).await?,
            total_responses: db::count_responses(&self.pool).await?,
            recent_sessions: db::recent_sessions(&self.pool, Some(RECENT_SESSIONS)).await?,
        })
    }
}

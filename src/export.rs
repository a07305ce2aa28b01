use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};
use crate::models::{Evaluation, Feedback, Ratings, Response, Session, SessionStatus};
use crate::rubric::RiskLevel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub session: SessionExport,
    pub evaluations: Vec<EvaluationExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub id: i64,
    pub evaluator_name: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseExport {
    pub id: i64,
    pub prompt: String,
    pub response: String,
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackExport {
    #[serde(flatten)]
    pub text: Feedback,
    pub requires_revision: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub average_rating: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationExport {
    pub id: i64,
    pub response: ResponseExport,
    pub ratings: Ratings,
    pub feedback: FeedbackExport,
    pub metrics: Metrics,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionExport {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            evaluator_name: session.evaluator_name.clone(),
            created_at: session.created_at,
            completed_at: session.completed_at,
            status: session.status,
        }
    }
}

/// Read-only projection of a session and everything recorded in it.
pub fn build_export(
    session: &Session,
    evaluations: &[Evaluation],
    responses: &HashMap<i64, Response>,
) -> EvalResult<ExportDocument> {
    let mut exported = Vec::with_capacity(evaluations.len());

    for evaluation in evaluations {
        let response = responses
            .get(&evaluation.response_id)
            .ok_or_else(|| EvalError::response_not_found(evaluation.response_id))?;

        exported.push(EvaluationExport {
            id: evaluation.id,
            response: ResponseExport {
                id: response.id,
                prompt: response.prompt.clone(),
                response: response.response.clone(),
                model_name: response.model_name.clone(),
            },
            ratings: evaluation.ratings,
            feedback: FeedbackExport {
                text: evaluation.feedback.clone(),
                requires_revision: evaluation.requires_revision,
            },
            metrics: Metrics {
                average_rating: evaluation.average_rating(),
                risk_level: evaluation.risk_level(),
            },
            created_at: evaluation.created_at,
        });
    }

    Ok(ExportDocument {
        session: SessionExport::from(session),
        evaluations: exported,
    })
}

pub fn default_file_name(session_id: i64) -> String {
    format!("evaluation_session_{session_id}.json")
}

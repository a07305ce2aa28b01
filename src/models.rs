use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};
use crate::rubric::{require_rating, Dimension, Rating, RiskLevel};

pub const EVALUATOR_NAME_MIN_CHARS: usize = 2;
pub const EVALUATOR_NAME_MAX_CHARS: usize = 100;
pub const FEEDBACK_MAX_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub evaluator_name: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    pub prompt: String,
    pub response: String,
    pub model_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Stored scores. Columns are nullable, so every field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
    pub helpfulness: Option<Rating>,
    pub correctness: Option<Rating>,
    pub coherence: Option<Rating>,
    pub empathy_tone: Option<Rating>,
    pub safety: Option<Rating>,
    pub overall_rating: Option<Rating>,
}

impl Ratings {
    pub fn get(&self, dimension: Dimension) -> Option<Rating> {
        match dimension {
            Dimension::Helpfulness => self.helpfulness,
            Dimension::Correctness => self.correctness,
            Dimension::Coherence => self.coherence,
            Dimension::EmpathyTone => self.empathy_tone,
            Dimension::Safety => self.safety,
            Dimension::Overall => self.overall_rating,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub evaluator_notes: Option<String>,
    pub improvement_suggestions: Option<String>,
    pub safety_concerns: Option<String>,
    pub hallucination_flags: Option<String>,
}

impl Feedback {
    fn fields(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("evaluator_notes", self.evaluator_notes.as_deref()),
            ("improvement_suggestions", self.improvement_suggestions.as_deref()),
            ("safety_concerns", self.safety_concerns.as_deref()),
            ("hallucination_flags", self.hallucination_flags.as_deref()),
        ]
    }

    fn validate(&self) -> EvalResult<()> {
        for (field, value) in self.fields() {
            if let Some(text) = value {
                let chars = text.chars().count();
                if chars > FEEDBACK_MAX_CHARS {
                    return Err(EvalError::validation(
                        field,
                        format!("must be at most {FEEDBACK_MAX_CHARS} characters, got {chars}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: i64,
    pub session_id: i64,
    pub response_id: i64,
    pub ratings: Ratings,
    pub feedback: Feedback,
    pub requires_revision: bool,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    /// Mean of the five scored dimensions, skipping absent ones. Zero when none are rated.
    pub fn average_rating(&self) -> f64 {
        let values: Vec<i64> = Dimension::SCORED
            .iter()
            .filter_map(|dimension| self.ratings.get(*dimension))
            .map(Rating::value)
            .collect();

        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<i64>() as f64 / values.len() as f64
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_safety(self.ratings.safety)
    }
}

/// Raw scores as submitted, before range checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingInput {
    pub helpfulness: Option<i64>,
    pub correctness: Option<i64>,
    pub coherence: Option<i64>,
    pub empathy_tone: Option<i64>,
    pub safety: Option<i64>,
    pub overall: Option<i64>,
}

impl RatingInput {
    #[cfg(test)]
    pub fn uniform(value: i64) -> Self {
        Self {
            helpfulness: Some(value),
            correctness: Some(value),
            coherence: Some(value),
            empathy_tone: Some(value),
            safety: Some(value),
            overall: Some(value),
        }
    }

    fn validate(&self) -> EvalResult<Ratings> {
        Ok(Ratings {
            helpfulness: Some(require_rating(Dimension::Helpfulness, self.helpfulness)?),
            correctness: Some(require_rating(Dimension::Correctness, self.correctness)?),
            coherence: Some(require_rating(Dimension::Coherence, self.coherence)?),
            empathy_tone: Some(require_rating(Dimension::EmpathyTone, self.empathy_tone)?),
            safety: Some(require_rating(Dimension::Safety, self.safety)?),
            overall_rating: Some(require_rating(Dimension::Overall, self.overall)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub session_id: i64,
    pub response_id: i64,
    pub ratings: RatingInput,
    #[serde(default)]
    pub feedback: Feedback,
    #[serde(default)]
    pub requires_revision: bool,
}

impl EvaluationInput {
    /// Checks every rating and feedback field. Nothing is persisted on failure.
    pub fn validate(self) -> EvalResult<NewEvaluation> {
        let ratings = self.ratings.validate()?;
        self.feedback.validate()?;

        Ok(NewEvaluation {
            session_id: self.session_id,
            response_id: self.response_id,
            ratings,
            feedback: self.feedback,
            requires_revision: self.requires_revision,
        })
    }
}

/// A submission that passed validation; all six ratings are present.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvaluation {
    pub session_id: i64,
    pub response_id: i64,
    pub ratings: Ratings,
    pub feedback: Feedback,
    pub requires_revision: bool,
}

/// Externally supplied prompt/response pair awaiting insertion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewResponse {
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub model_name: Option<String>,
}

impl NewResponse {
    pub fn validate(&self) -> EvalResult<()> {
        if self.prompt.trim().is_empty() {
            return Err(EvalError::validation("prompt", "must not be empty"));
        }
        if self.response.trim().is_empty() {
            return Err(EvalError::validation("response", "must not be empty"));
        }
        if let Some(model) = &self.model_name {
            if model.chars().count() > 100 {
                return Err(EvalError::validation(
                    "model_name",
                    "must be at most 100 characters",
                ));
            }
        }
        Ok(())
    }
}

pub fn validate_evaluator_name(name: &str) -> EvalResult<String> {
    let name = name.trim();
    let chars = name.chars().count();
    if chars == 0 {
        return Err(EvalError::validation("evaluator_name", "is required"));
    }
    if !(EVALUATOR_NAME_MIN_CHARS..=EVALUATOR_NAME_MAX_CHARS).contains(&chars) {
        return Err(EvalError::validation(
            "evaluator_name",
            format!(
                "must be between {EVALUATOR_NAME_MIN_CHARS} and {EVALUATOR_NAME_MAX_CHARS} characters"
            ),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluation_with(ratings: Ratings) -> Evaluation {
        Evaluation {
            id: 1,
            session_id: 1,
            response_id: 1,
            ratings,
            feedback: Feedback::default(),
            requires_revision: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn average_ignores_missing_scores_and_overall() {
        let evaluation = evaluation_with(Ratings {
            helpfulness: Rating::new(4),
            correctness: Rating::new(2),
            safety: None,
            overall_rating: Rating::new(1),
            ..Ratings::default()
        });
        assert!((evaluation.average_rating() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn average_is_zero_without_scores() {
        let evaluation = evaluation_with(Ratings {
            overall_rating: Rating::new(5),
            ..Ratings::default()
        });
        assert_eq!(evaluation.average_rating(), 0.0);
        assert_eq!(evaluation.risk_level(), RiskLevel::Unknown);
    }

    #[test]
    fn average_stays_within_scale() {
        for value in 1..=5 {
            let ratings = RatingInput::uniform(value).validate().unwrap();
            let average = evaluation_with(ratings).average_rating();
            assert!((1.0..=5.0).contains(&average));
            assert_eq!(average, value as f64);
        }
    }

    #[test]
    fn submission_requires_all_six_ratings() {
        let input = EvaluationInput {
            session_id: 1,
            response_id: 1,
            ratings: RatingInput {
                overall: None,
                ..RatingInput::uniform(4)
            },
            feedback: Feedback::default(),
            requires_revision: false,
        };
        let err = input.validate().unwrap_err();
        assert!(matches!(err, EvalError::Validation { field: "overall", .. }));
    }

    #[test]
    fn submission_rejects_long_feedback() {
        let input = EvaluationInput {
            session_id: 1,
            response_id: 1,
            ratings: RatingInput::uniform(3),
            feedback: Feedback {
                safety_concerns: Some("x".repeat(FEEDBACK_MAX_CHARS + 1)),
                ..Feedback::default()
            },
            requires_revision: true,
        };
        let err = input.validate().unwrap_err();
        assert!(matches!(err, EvalError::Validation { field: "safety_concerns", .. }));
    }

    #[test]
    fn feedback_at_the_limit_is_accepted() {
        let input = EvaluationInput {
            session_id: 1,
            response_id: 2,
            ratings: RatingInput::uniform(3),
            feedback: Feedback {
                evaluator_notes: Some("é".repeat(FEEDBACK_MAX_CHARS)),
                ..Feedback::default()
            },
            requires_revision: false,
        };
        let evaluation = input.validate().unwrap();
        assert_eq!(evaluation.ratings.overall_rating, Rating::new(3));
    }

    #[test]
    fn evaluator_name_is_trimmed_and_bounded() {
        assert_eq!(validate_evaluator_name("  Dr. Chen ").unwrap(), "Dr. Chen");
        assert!(validate_evaluator_name("").is_err());
        assert!(validate_evaluator_name("A").is_err());
        assert!(validate_evaluator_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn session_status_round_trips_through_text() {
        for status in [SessionStatus::InProgress, SessionStatus::Completed] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("paused"), None);
    }
}

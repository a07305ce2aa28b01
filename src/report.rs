use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{Evaluation, Response, Session};
use crate::rubric::{Dimension, RiskLevel};
use crate::stats;

const NOTE_PREVIEW_CHARS: usize = 160;

fn preview(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= NOTE_PREVIEW_CHARS {
        flattened
    } else {
        let cut: String = flattened.chars().take(NOTE_PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}

pub fn build_report(
    session: &Session,
    evaluations: &[Evaluation],
    responses: &HashMap<i64, Response>,
) -> String {
    let stats = stats::session_stats(evaluations);
    let mut output = String::new();

    let _ = writeln!(output, "# Evaluation Session {}", session.id);
    let _ = writeln!(
        output,
        "Evaluator {} ({}), started {}",
        session.evaluator_name,
        session.status.as_str(),
        session.created_at.to_rfc3339()
    );
    if let Some(completed_at) = session.completed_at {
        let _ = writeln!(output, "Completed {}", completed_at.to_rfc3339());
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Ratings");

    if evaluations.is_empty() {
        let _ = writeln!(output, "No evaluations recorded in this session.");
        return output;
    }

    let _ = writeln!(
        output,
        "{} evaluations, mean rating {:.2}",
        stats.total_evaluations, stats.mean_average_rating
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "| Dimension | Average |");
    let _ = writeln!(output, "|---|---|");
    for dimension in Dimension::ALL {
        let _ = writeln!(
            output,
            "| {} | {:.2} |",
            dimension.title(),
            stats.average(dimension)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk");
    for level in [
        RiskLevel::High,
        RiskLevel::Medium,
        RiskLevel::Low,
        RiskLevel::Unknown,
    ] {
        let _ = writeln!(
            output,
            "- {}: {}",
            level,
            stats.risk_distribution.count(level)
        );
    }
    if let Some(lowest) = stats::lowest_safety(evaluations) {
        let _ = writeln!(
            output,
            "Lowest safety score: {} ({})",
            lowest,
            Dimension::Safety.label(lowest)
        );
    }
    let _ = writeln!(output, "Flagged for revision: {}", stats.requires_revision);

    let attention = stats::needs_attention(evaluations);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");

    if attention.is_empty() {
        let _ = writeln!(output, "Nothing flagged in this session.");
    } else {
        for evaluation in attention {
            let prompt = responses
                .get(&evaluation.response_id)
                .map(|response| preview(&response.prompt))
                .unwrap_or_else(|| format!("response {}", evaluation.response_id));
            let _ = writeln!(
                output,
                "- {} (risk {}, average {:.1}{})",
                prompt,
                evaluation.risk_level(),
                evaluation.average_rating(),
                if evaluation.requires_revision {
                    ", needs revision"
                } else {
                    ""
                }
            );

            let notes = [
                ("Safety concerns", &evaluation.feedback.safety_concerns),
                ("Hallucinations", &evaluation.feedback.hallucination_flags),
                ("Suggestions", &evaluation.feedback.improvement_suggestions),
                ("Notes", &evaluation.feedback.evaluator_notes),
            ];
            for (label, text) in notes {
                if let Some(text) = text.as_deref().filter(|text| !text.trim().is_empty()) {
                    let _ = writeln!(output, "  - {}: {}", label, preview(text));
                }
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feedback, Ratings, SessionStatus};
    use crate::rubric::Rating;
    use chrono::Utc;

    fn session() -> Session {
        Session {
            id: 4,
            evaluator_name: "Dr. Chen".to_string(),
            created_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::InProgress,
        }
    }

    #[test]
    fn empty_session_report_says_so() {
        let report = build_report(&session(), &[], &HashMap::new());
        assert!(report.starts_with("# Evaluation Session 4"));
        assert!(report.contains("No evaluations recorded in this session."));
    }

    #[test]
    fn flagged_evaluations_are_listed_with_feedback() {
        let now = Utc::now();
        let rating = Rating::new(4);
        let evaluation = Evaluation {
            id: 1,
            session_id: 4,
            response_id: 9,
            ratings: Ratings {
                helpfulness: rating,
                correctness: rating,
                coherence: rating,
                empathy_tone: rating,
                safety: Rating::new(1),
                overall_rating: rating,
            },
            feedback: Feedback {
                safety_concerns: Some("Encourages   risky\nbehaviour".to_string()),
                ..Feedback::default()
            },
            requires_revision: true,
            created_at: now,
        };
        let response = Response {
            id: 9,
            prompt: "Give me advice on investing all my money in cryptocurrency.".to_string(),
            response: "Sure, go all in.".to_string(),
            model_name: None,
            created_at: now,
        };

        let report = build_report(
            &session(),
            &[evaluation],
            &HashMap::from([(9, response)]),
        );
        assert!(report.contains("| Helpfulness | 4.00 |"));
        assert!(report.contains("- high: 1"));
        assert!(report.contains("Lowest safety score: 1 (High risk)"));
        assert!(report.contains("investing all my money"));
        assert!(report.contains("needs revision"));
        assert!(report.contains("  - Safety concerns: Encourages risky behaviour"));
    }

    #[test]
    fn long_notes_are_truncated() {
        let long = "word ".repeat(100);
        let shortened = preview(&long);
        assert!(shortened.ends_with("..."));
        assert_eq!(shortened.chars().count(), NOTE_PREVIEW_CHARS + 3);
    }
}

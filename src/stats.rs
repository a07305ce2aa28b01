use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Evaluation, Session};
use crate::rubric::{Dimension, Rating, RiskLevel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub unknown: usize,
}

impl RiskDistribution {
    pub fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::High => self.high += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::Low => self.low += 1,
            RiskLevel::Unknown => self.unknown += 1,
        }
    }

    pub fn count(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::High => self.high,
            RiskLevel::Medium => self.medium,
            RiskLevel::Low => self.low,
            RiskLevel::Unknown => self.unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_evaluations: usize,
    pub average_ratings: BTreeMap<Dimension, f64>,
    pub risk_distribution: RiskDistribution,
    pub requires_revision: usize,
    pub mean_average_rating: f64,
}

impl SessionStats {
    pub fn average(&self, dimension: Dimension) -> f64 {
        self.average_ratings.get(&dimension).copied().unwrap_or(0.0)
    }
}

/// Mean score per dimension over the evaluations that carry it; 0.0 when none do.
pub fn dimension_averages(evaluations: &[Evaluation]) -> BTreeMap<Dimension, f64> {
    let mut totals: BTreeMap<Dimension, (usize, i64)> =
        Dimension::ALL.iter().map(|dimension| (*dimension, (0, 0))).collect();

    for evaluation in evaluations {
        for dimension in Dimension::ALL {
            if let Some(rating) = evaluation.ratings.get(dimension) {
                let entry = totals.entry(dimension).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += rating.value();
            }
        }
    }

    totals
        .into_iter()
        .map(|(dimension, (count, total))| {
            let mean = if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            };
            (dimension, mean)
        })
        .collect()
}

pub fn risk_distribution(evaluations: &[Evaluation]) -> RiskDistribution {
    let mut distribution = RiskDistribution::default();
    for evaluation in evaluations {
        distribution.record(evaluation.risk_level());
    }
    distribution
}

/// Aggregates one session. An empty slice yields zeros rather than an error.
pub fn session_stats(evaluations: &[Evaluation]) -> SessionStats {
    let total = evaluations.len();
    let mean_average_rating = if total == 0 {
        0.0
    } else {
        evaluations
            .iter()
            .map(Evaluation::average_rating)
            .sum::<f64>()
            / total as f64
    };

    SessionStats {
        total_evaluations: total,
        average_ratings: dimension_averages(evaluations),
        risk_distribution: risk_distribution(evaluations),
        requires_revision: evaluations
            .iter()
            .filter(|evaluation| evaluation.requires_revision)
            .count(),
        mean_average_rating,
    }
}

/// Evaluations worth a second look: flagged for revision or rated high risk.
pub fn needs_attention(evaluations: &[Evaluation]) -> Vec<&Evaluation> {
    evaluations
        .iter()
        .filter(|evaluation| {
            evaluation.requires_revision || evaluation.risk_level() == RiskLevel::High
        })
        .collect()
}

pub fn lowest_safety(evaluations: &[Evaluation]) -> Option<Rating> {
    evaluations
        .iter()
        .filter_map(|evaluation| evaluation.ratings.safety)
        .min()
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub total_sessions: i64,
    pub total_evaluations: i64,
    pub total_responses: i64,
    pub recent_sessions: Vec<Session>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feedback, Ratings};
    use chrono::Utc;

    fn evaluation(id: i64, ratings: Ratings, requires_revision: bool) -> Evaluation {
        Evaluation {
            id,
            session_id: 1,
            response_id: id,
            ratings,
            feedback: Feedback::default(),
            requires_revision,
            created_at: Utc::now(),
        }
    }

    fn all(value: i64) -> Ratings {
        let rating = Rating::new(value);
        Ratings {
            helpfulness: rating,
            correctness: rating,
            coherence: rating,
            empathy_tone: rating,
            safety: rating,
            overall_rating: rating,
        }
    }

    #[test]
    fn empty_session_yields_zeros() {
        let stats = session_stats(&[]);
        assert_eq!(stats.total_evaluations, 0);
        assert_eq!(stats.requires_revision, 0);
        assert_eq!(stats.risk_distribution, RiskDistribution::default());
        assert_eq!(stats.mean_average_rating, 0.0);
        assert_eq!(stats.average_ratings.len(), Dimension::ALL.len());
        assert!(stats.average_ratings.values().all(|mean| *mean == 0.0));
    }

    #[test]
    fn averages_skip_missing_scores_per_dimension() {
        let partial = Ratings {
            helpfulness: Rating::new(2),
            ..Ratings::default()
        };
        let evaluations = vec![evaluation(1, all(4), false), evaluation(2, partial, false)];
        let stats = session_stats(&evaluations);

        assert!((stats.average(Dimension::Helpfulness) - 3.0).abs() < f64::EPSILON);
        assert!((stats.average(Dimension::Safety) - 4.0).abs() < f64::EPSILON);
        assert!((stats.average(Dimension::Overall) - 4.0).abs() < f64::EPSILON);
        assert_eq!(stats.risk_distribution.low, 1);
        assert_eq!(stats.risk_distribution.unknown, 1);
    }

    #[test]
    fn high_risk_and_revisions_are_counted() {
        let risky = Ratings {
            safety: Rating::new(2),
            ..all(4)
        };
        let evaluations = vec![
            evaluation(1, risky, true),
            evaluation(2, all(3), false),
            evaluation(3, all(5), false),
        ];
        let stats = session_stats(&evaluations);

        assert_eq!(stats.requires_revision, 1);
        assert_eq!(stats.risk_distribution.count(RiskLevel::High), 1);
        assert_eq!(stats.risk_distribution.count(RiskLevel::Medium), 1);
        assert_eq!(stats.risk_distribution.count(RiskLevel::Low), 1);
        assert_eq!(needs_attention(&evaluations).len(), 1);
        assert_eq!(lowest_safety(&evaluations), Rating::new(2));
    }

    #[test]
    fn stats_serialize_with_dimension_keys() {
        let stats = session_stats(&[evaluation(1, all(5), false)]);
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["average_ratings"]["empathy_tone"], 5.0);
        assert_eq!(value["average_ratings"]["overall"], 5.0);
        assert_eq!(value["risk_distribution"]["low"], 1);
        assert_eq!(value["total_evaluations"], 1);
    }
}

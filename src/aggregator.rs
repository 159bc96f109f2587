//! Index aggregation
//!
//! Scores are averaged in log space per (time, unit, category), so each
//! category sub-index is a geometric mean. The composite `atlas_index` is the
//! weighted sum of category log-scores, exponentiated:
//! `exp(sum_c weight_c * ln(score_c))`.

use crate::error::IndexError;
use crate::types::{IndexRow, ScoredRow};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Combines scored rows into index rows
pub struct IndexAggregator<'a> {
    weights: &'a BTreeMap<String, f64>,
    score_floor: f64,
    fingerprint: &'a str,
}

impl<'a> IndexAggregator<'a> {
    /// `score_floor` replaces lower scores (including 0) before the log
    pub fn new(weights: &'a BTreeMap<String, f64>, score_floor: f64, fingerprint: &'a str) -> Self {
        Self {
            weights,
            score_floor,
            fingerprint,
        }
    }

    fn log_score(&self, score: f64) -> f64 {
        score.max(self.score_floor).ln()
    }

    /// One index row per (time, unit), ordered by time then unit.
    ///
    /// Fails if a category present in the data has no weight.
    pub fn aggregate(&self, scored: &[ScoredRow]) -> Result<Vec<IndexRow>, IndexError> {
        let mut sums: BTreeMap<(DateTime<Utc>, &str, &str), (f64, usize)> = BTreeMap::new();
        for row in scored {
            let key = (
                row.measurement.time,
                row.unit_number.as_str(),
                row.category.as_str(),
            );
            let entry = sums.entry(key).or_insert((0.0, 0));
            entry.0 += self.log_score(row.score);
            entry.1 += 1;
        }

        let mut pivot: BTreeMap<(DateTime<Utc>, &str), BTreeMap<&str, f64>> = BTreeMap::new();
        for ((time, unit, category), (sum, count)) in sums {
            if !self.weights.contains_key(category) {
                return Err(IndexError::MissingWeight(category.to_string()));
            }
            pivot
                .entry((time, unit))
                .or_default()
                .insert(category, sum / count as f64);
        }

        Ok(pivot
            .into_iter()
            .map(|((time, unit), log_scores)| IndexRow {
                time,
                unit_number: unit.to_string(),
                atlas_index: self.composite(&log_scores),
                categories: log_scores
                    .iter()
                    .map(|(category, log_score)| (category.to_string(), log_score.exp()))
                    .collect(),
                fingerprint: self.fingerprint.to_string(),
            })
            .collect())
    }

    /// Weighted composite; `None` if a category with non-zero weight is absent
    fn composite(&self, log_scores: &BTreeMap<&str, f64>) -> Option<f64> {
        let mut total = 0.0;
        for (category, weight) in self.weights {
            if *weight == 0.0 {
                continue;
            }
            total += weight * log_scores.get(category.as_str())?;
        }
        Some(total.exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeasurementRow;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()
    }

    fn scored(h: u32, unit: &str, category: &str, score: f64) -> ScoredRow {
        ScoredRow {
            measurement: MeasurementRow::new(at(h), "uhoo", "d", "f", 0.0),
            unit_number: unit.to_string(),
            category: category.to_string(),
            score,
        }
    }

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(c, w)| (c.to_string(), *w)).collect()
    }

    #[test]
    fn test_two_equal_weights_give_geometric_mean() {
        let weights = weights(&[("air", 0.5), ("thermal", 0.5)]);
        let aggregator = IndexAggregator::new(&weights, 1.0, "abc1234");

        let rows = aggregator
            .aggregate(&[scored(10, "101", "air", 100.0), scored(10, "101", "thermal", 50.0)])
            .unwrap();

        assert_eq!(rows.len(), 1);
        let index = rows[0].atlas_index.unwrap();
        assert!((index - (0.5 * 100f64.ln() + 0.5 * 50f64.ln()).exp()).abs() < 1e-9);
        assert!((index - 70.71).abs() < 0.01);
        assert!((rows[0].categories["air"] - 100.0).abs() < 1e-9);
        assert_eq!(rows[0].fingerprint, "abc1234");
    }

    #[test]
    fn test_category_is_geometric_mean_of_scores() {
        let weights = weights(&[("air", 1.0)]);
        let aggregator = IndexAggregator::new(&weights, 1.0, "abc1234");

        let rows = aggregator
            .aggregate(&[scored(10, "101", "air", 100.0), scored(10, "101", "air", 25.0)])
            .unwrap();

        assert!((rows[0].categories["air"] - 50.0).abs() < 1e-9);
        assert!((rows[0].atlas_index.unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_removes_influence() {
        let weights = weights(&[("air", 1.0), ("thermal", 0.0)]);
        let aggregator = IndexAggregator::new(&weights, 1.0, "abc1234");

        let low = aggregator
            .aggregate(&[scored(10, "101", "air", 80.0), scored(10, "101", "thermal", 5.0)])
            .unwrap();
        let high = aggregator
            .aggregate(&[scored(10, "101", "air", 80.0), scored(10, "101", "thermal", 95.0)])
            .unwrap();
        let absent = aggregator.aggregate(&[scored(10, "101", "air", 80.0)]).unwrap();

        assert!((low[0].atlas_index.unwrap() - 80.0).abs() < 1e-9);
        assert!((high[0].atlas_index.unwrap() - 80.0).abs() < 1e-9);
        assert!((absent[0].atlas_index.unwrap() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_weighted_category_leaves_composite_empty() {
        let weights = weights(&[("air", 0.5), ("thermal", 0.5)]);
        let aggregator = IndexAggregator::new(&weights, 1.0, "abc1234");

        let rows = aggregator.aggregate(&[scored(10, "101", "air", 80.0)]).unwrap();
        assert_eq!(rows[0].atlas_index, None);
        assert_eq!(rows[0].categories.len(), 1);
    }

    #[test]
    fn test_zero_score_is_floored() {
        let weights = weights(&[("air", 1.0)]);
        let aggregator = IndexAggregator::new(&weights, 1.0, "abc1234");

        let rows = aggregator
            .aggregate(&[scored(10, "101", "air", 0.0), scored(10, "101", "air", 100.0)])
            .unwrap();
        let value = rows[0].categories["air"];
        assert!(value.is_finite());
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_unweighted_category_fails() {
        let weights = weights(&[("air", 1.0)]);
        let aggregator = IndexAggregator::new(&weights, 1.0, "abc1234");

        let err = aggregator
            .aggregate(&[scored(10, "101", "noise", 80.0)])
            .unwrap_err();
        assert!(matches!(err, IndexError::MissingWeight(ref c) if c == "noise"));
    }

    #[test]
    fn test_groups_by_time_and_unit() {
        let weights = weights(&[("air", 1.0)]);
        let aggregator = IndexAggregator::new(&weights, 1.0, "abc1234");

        let rows = aggregator
            .aggregate(&[
                scored(11, "101", "air", 60.0),
                scored(10, "102", "air", 70.0),
                scored(10, "101", "air", 80.0),
            ])
            .unwrap();

        let keys: Vec<(DateTime<Utc>, &str)> = rows
            .iter()
            .map(|r| (r.time, r.unit_number.as_str()))
            .collect();
        assert_eq!(keys, vec![(at(10), "101"), (at(10), "102"), (at(11), "101")]);
    }
}

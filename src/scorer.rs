//! Threshold scoring
//!
//! Maps a raw field value to a 0-100 score along a piecewise-linear curve.
//! Every curve anchors 100 at its "high" breakpoints, 50 at "mid" and 0 at
//! "low", interpolating linearly in between.

use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const HIGH_SCORE: f64 = 100.0;
pub const MID_SCORE: f64 = 50.0;
pub const LOW_SCORE: f64 = 0.0;

/// Threshold curve of a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ThresholdCurve {
    /// Lower is better: `high_score < mid_score < low_score`
    Smaller {
        high_score: f64,
        mid_score: f64,
        low_score: f64,
    },
    /// Higher is better: `high_score > mid_score > low_score`
    Greater {
        high_score: f64,
        mid_score: f64,
        low_score: f64,
    },
    /// Optimal interval with tolerance bands on both sides
    Range {
        low_score_lower: f64,
        mid_score_lower: f64,
        high_score_lower: f64,
        high_score_upper: f64,
        mid_score_upper: f64,
        low_score_upper: f64,
    },
}

impl ThresholdCurve {
    /// Reject curves whose breakpoints are unordered, coincide, or are not finite
    pub fn validate(&self, field: &str) -> Result<(), IndexError> {
        let (points, allow_flat_top): (Vec<f64>, bool) = match *self {
            ThresholdCurve::Smaller {
                high_score,
                mid_score,
                low_score,
            } => (vec![high_score, mid_score, low_score], false),
            ThresholdCurve::Greater {
                high_score,
                mid_score,
                low_score,
            } => (vec![low_score, mid_score, high_score], false),
            ThresholdCurve::Range {
                low_score_lower,
                mid_score_lower,
                high_score_lower,
                high_score_upper,
                mid_score_upper,
                low_score_upper,
            } => (
                vec![
                    low_score_lower,
                    mid_score_lower,
                    high_score_lower,
                    high_score_upper,
                    mid_score_upper,
                    low_score_upper,
                ],
                true,
            ),
        };

        if points.iter().any(|p| !p.is_finite()) {
            return Err(IndexError::threshold(field, "breakpoints must be finite"));
        }

        for (i, pair) in points.windows(2).enumerate() {
            // The optimal interval of a range curve may collapse to one point
            let flat_top = allow_flat_top && i == 2;
            let ordered = if flat_top {
                pair[0] <= pair[1]
            } else {
                pair[0] < pair[1]
            };
            if !ordered {
                return Err(IndexError::threshold(
                    field,
                    format!(
                        "breakpoints out of order or coinciding ({} vs {})",
                        pair[0], pair[1]
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Score `value` along this curve. The curve must have passed `validate`.
    pub fn score(&self, value: f64) -> f64 {
        match *self {
            ThresholdCurve::Smaller {
                high_score,
                mid_score,
                low_score,
            } => {
                if value <= high_score {
                    HIGH_SCORE
                } else if value <= mid_score {
                    interpolate(value, high_score, HIGH_SCORE, mid_score, MID_SCORE)
                } else if value < low_score {
                    interpolate(value, mid_score, MID_SCORE, low_score, LOW_SCORE)
                } else {
                    LOW_SCORE
                }
            }
            ThresholdCurve::Greater {
                high_score,
                mid_score,
                low_score,
            } => {
                if value >= high_score {
                    HIGH_SCORE
                } else if value >= mid_score {
                    interpolate(value, mid_score, MID_SCORE, high_score, HIGH_SCORE)
                } else if value > low_score {
                    interpolate(value, low_score, LOW_SCORE, mid_score, MID_SCORE)
                } else {
                    LOW_SCORE
                }
            }
            ThresholdCurve::Range {
                low_score_lower,
                mid_score_lower,
                high_score_lower,
                high_score_upper,
                mid_score_upper,
                low_score_upper,
            } => {
                if value <= low_score_lower || value >= low_score_upper {
                    LOW_SCORE
                } else if value < mid_score_lower {
                    interpolate(value, low_score_lower, LOW_SCORE, mid_score_lower, MID_SCORE)
                } else if value < high_score_lower {
                    interpolate(
                        value,
                        mid_score_lower,
                        MID_SCORE,
                        high_score_lower,
                        HIGH_SCORE,
                    )
                } else if value <= high_score_upper {
                    HIGH_SCORE
                } else if value <= mid_score_upper {
                    interpolate(
                        value,
                        high_score_upper,
                        HIGH_SCORE,
                        mid_score_upper,
                        MID_SCORE,
                    )
                } else {
                    interpolate(value, mid_score_upper, MID_SCORE, low_score_upper, LOW_SCORE)
                }
            }
        }
    }
}

/// Linear interpolation between `(x0, y0)` and `(x1, y1)`; requires `x0 != x1`
fn interpolate(x: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    y0 + (x - x0) / (x1 - x0) * (y1 - y0)
}

/// Validated threshold curves keyed by field name
#[derive(Debug, Clone)]
pub struct ScoreTable {
    curves: HashMap<String, ThresholdCurve>,
}

impl ScoreTable {
    /// Validate every curve once and index them by field
    pub fn build(thresholds: &BTreeMap<String, ThresholdCurve>) -> Result<Self, IndexError> {
        let mut curves = HashMap::with_capacity(thresholds.len());
        for (field, curve) in thresholds {
            curve.validate(field)?;
            curves.insert(field.clone(), curve.clone());
        }
        Ok(Self { curves })
    }

    /// Score a value of `field`, or `None` when the field has no curve
    pub fn score(&self, field: &str, value: f64) -> Option<f64> {
        self.curves.get(field).map(|curve| curve.score(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smaller() -> ThresholdCurve {
        ThresholdCurve::Smaller {
            high_score: 800.0,
            mid_score: 1200.0,
            low_score: 1600.0,
        }
    }

    fn greater() -> ThresholdCurve {
        ThresholdCurve::Greater {
            high_score: 100.0,
            mid_score: 50.0,
            low_score: 0.0,
        }
    }

    fn range() -> ThresholdCurve {
        ThresholdCurve::Range {
            low_score_lower: 16.0,
            mid_score_lower: 18.0,
            high_score_lower: 20.0,
            high_score_upper: 22.0,
            mid_score_upper: 24.0,
            low_score_upper: 26.0,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_anchors_hit_exact_scores() {
        let curve = smaller();
        assert_close(curve.score(800.0), 100.0);
        assert_close(curve.score(1200.0), 50.0);
        assert_close(curve.score(1600.0), 0.0);

        let curve = greater();
        assert_close(curve.score(100.0), 100.0);
        assert_close(curve.score(50.0), 50.0);
        assert_close(curve.score(0.0), 0.0);

        let curve = range();
        for (value, expected) in [
            (16.0, 0.0),
            (18.0, 50.0),
            (20.0, 100.0),
            (22.0, 100.0),
            (24.0, 50.0),
            (26.0, 0.0),
        ] {
            assert_close(curve.score(value), expected);
        }
    }

    #[test]
    fn test_greater_interpolates() {
        assert_close(greater().score(75.0), 75.0);
        assert_close(greater().score(25.0), 25.0);
    }

    #[test]
    fn test_smaller_interpolates_and_clamps() {
        let curve = smaller();
        assert_close(curve.score(1000.0), 75.0);
        assert_close(curve.score(1400.0), 25.0);
        assert_close(curve.score(400.0), 100.0);
        assert_close(curve.score(5000.0), 0.0);
    }

    #[test]
    fn test_smaller_non_increasing_greater_non_decreasing() {
        let values: Vec<f64> = (0..=400).map(|i| f64::from(i) * 5.0).collect();

        let down: Vec<f64> = values.iter().map(|v| smaller().score(*v)).collect();
        assert!(down.windows(2).all(|w| w[1] <= w[0]));

        let up: Vec<f64> = values.iter().map(|v| greater().score(*v / 10.0)).collect();
        assert!(up.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_range_plateau_and_bands() {
        let curve = range();
        let values: Vec<f64> = (100..=300).map(|i| f64::from(i) / 10.0).collect();

        for value in &values {
            let score = curve.score(*value);
            if (20.0..=22.0).contains(value) {
                assert_close(score, 100.0);
            }
            if *value <= 16.0 || *value >= 26.0 {
                assert_close(score, 0.0);
            }
        }

        let rising: Vec<f64> = values
            .iter()
            .filter(|v| **v <= 20.0)
            .map(|v| curve.score(*v))
            .collect();
        assert!(rising.windows(2).all(|w| w[1] >= w[0]));

        let falling: Vec<f64> = values
            .iter()
            .filter(|v| **v >= 22.0)
            .map(|v| curve.score(*v))
            .collect();
        assert!(falling.windows(2).all(|w| w[1] <= w[0]));

        assert_close(curve.score(19.0), 75.0);
        assert_close(curve.score(25.0), 25.0);
    }

    #[test]
    fn test_range_with_point_optimum() {
        let curve = ThresholdCurve::Range {
            low_score_lower: 0.0,
            mid_score_lower: 1.0,
            high_score_lower: 2.0,
            high_score_upper: 2.0,
            mid_score_upper: 3.0,
            low_score_upper: 4.0,
        };
        assert!(curve.validate("x").is_ok());
        assert_close(curve.score(2.0), 100.0);
        assert_close(curve.score(2.5), 75.0);
    }

    #[test]
    fn test_degenerate_curves_rejected() {
        let curve = ThresholdCurve::Smaller {
            high_score: 10.0,
            mid_score: 10.0,
            low_score: 20.0,
        };
        assert!(matches!(
            curve.validate("co2"),
            Err(IndexError::InvalidThreshold { .. })
        ));

        let curve = ThresholdCurve::Greater {
            high_score: 10.0,
            mid_score: 5.0,
            low_score: 5.0,
        };
        assert!(curve.validate("light").is_err());

        let curve = ThresholdCurve::Greater {
            high_score: 1.0,
            mid_score: 5.0,
            low_score: 10.0,
        };
        assert!(curve.validate("light").is_err());

        let curve = ThresholdCurve::Smaller {
            high_score: f64::NAN,
            mid_score: 5.0,
            low_score: 10.0,
        };
        assert!(curve.validate("pm25").is_err());
    }

    #[test]
    fn test_score_table_lookup() {
        let mut thresholds = BTreeMap::new();
        thresholds.insert("co2".to_string(), smaller());
        thresholds.insert("light_percent_day".to_string(), greater());

        let table = ScoreTable::build(&thresholds).unwrap();
        assert_eq!(table.score("co2", 800.0), Some(100.0));
        assert!((table.score("light_percent_day", 75.0).unwrap() - 75.0).abs() < 1e-9);
        assert_eq!(table.score("humidity", 40.0), None);
    }

    #[test]
    fn test_score_table_rejects_degenerate_curve() {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "pm25".to_string(),
            ThresholdCurve::Smaller {
                high_score: 5.0,
                mid_score: 15.0,
                low_score: 15.0,
            },
        );

        let err = ScoreTable::build(&thresholds).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_curve_deserializes_from_tagged_yaml() {
        let curve: ThresholdCurve =
            serde_yaml::from_str("type: greater\nhigh_score: 100\nmid_score: 50\nlow_score: 0\n")
                .unwrap();
        assert_eq!(curve, greater());
    }
}

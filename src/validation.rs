//! k-fold accuracy evaluation of the seasonal model.
//!
//! Folds are contiguous slices of the series in row order and every other
//! row is used for training, so a fold's training rows may lie after its test
//! rows in time. Metrics are reported with that partition unchanged.

use std::ops::Range;

use tracing::{debug, info};

use crate::error::{ForecastError, Result};
use crate::holt_winters::HoltWinters;
use crate::models::{EvaluationMetrics, ProductionRecord};

/// Contiguous, non-overlapping folds; the first `len % k` folds take one extra row.
pub fn fold_ranges(len: usize, folds: usize) -> Result<Vec<Range<usize>>> {
    if folds < 2 {
        return Err(ForecastError::FoldFit {
            fold: 0,
            message: format!("need at least 2 folds, got {folds}"),
        });
    }
    if folds > len {
        return Err(ForecastError::FoldFit {
            fold: 0,
            message: format!("cannot split {len} points into {folds} folds"),
        });
    }

    let base = len / folds;
    let extra = len % folds;
    let mut ranges = Vec::with_capacity(folds);
    let mut start = 0;
    for fold in 0..folds {
        let size = base + usize::from(fold < extra);
        ranges.push(start..start + size);
        start += size;
    }
    Ok(ranges)
}

pub fn error_metrics(actual: &[f64], predicted: &[f64]) -> EvaluationMetrics {
    let n = actual.len().min(predicted.len()).max(1) as f64;
    let (abs_sum, sq_sum) = actual
        .iter()
        .zip(predicted)
        .fold((0.0, 0.0), |(abs_sum, sq_sum), (a, p)| {
            let diff = a - p;
            (abs_sum + diff.abs(), sq_sum + diff * diff)
        });
    let mse = sq_sum / n;
    EvaluationMetrics {
        mae: abs_sum / n,
        mse,
        rmse: mse.sqrt(),
    }
}

pub fn evaluate(series: &[ProductionRecord], folds: usize) -> Result<EvaluationMetrics> {
    if series.is_empty() {
        return Err(ForecastError::NoData);
    }
    let values: Vec<f64> = series.iter().map(|record| record.value).collect();
    let ranges = fold_ranges(values.len(), folds)?;

    let mut per_fold = Vec::with_capacity(ranges.len());
    for (fold, test) in ranges.iter().enumerate() {
        let training: Vec<f64> = values[..test.start]
            .iter()
            .chain(&values[test.end..])
            .copied()
            .collect();
        let actual = &values[test.clone()];

        let model = HoltWinters::fit(&training).map_err(|err| ForecastError::FoldFit {
            fold,
            message: err.to_string(),
        })?;
        let metrics = error_metrics(actual, &model.forecast(actual.len()));
        debug!(fold, train = training.len(), test = actual.len(), mae = metrics.mae, "fold evaluated");
        per_fold.push(metrics);
    }

    let count = per_fold.len() as f64;
    let averaged = EvaluationMetrics {
        mae: per_fold.iter().map(|m| m.mae).sum::<f64>() / count,
        mse: per_fold.iter().map(|m| m.mse).sum::<f64>() / count,
        rmse: per_fold.iter().map(|m| m.rmse).sum::<f64>() / count,
    };
    info!(
        folds,
        mae = averaged.mae,
        rmse = averaged.rmse,
        "cross-validation complete"
    );
    Ok(averaged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Months, NaiveDate};

    fn quarterly(values: &[f64]) -> Vec<ProductionRecord> {
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| ProductionRecord {
                date: start.checked_add_months(Months::new(3 * i as u32)).unwrap(),
                value,
            })
            .collect()
    }

    fn seasonal(points: usize) -> Vec<f64> {
        let pattern = [100.0, 120.0, 90.0, 110.0];
        (0..points).map(|i| pattern[i % 4]).collect()
    }

    #[test]
    fn twenty_points_split_into_five_folds_of_four() {
        let ranges = fold_ranges(20, 5).unwrap();
        assert_eq!(ranges.len(), 5);
        assert!(ranges.iter().all(|r| r.len() == 4));
        assert_eq!(ranges.iter().map(|r| r.len()).sum::<usize>(), 20);
        assert_eq!(ranges[0], 0..4);
        assert_eq!(ranges[4], 16..20);
    }

    #[test]
    fn uneven_split_front_loads_remainder() {
        let sizes: Vec<usize> = fold_ranges(22, 5).unwrap().iter().map(|r| r.len()).collect();
        assert_eq!(sizes, vec![5, 5, 4, 4, 4]);
    }

    #[test]
    fn too_many_folds_fail() {
        let series = quarterly(&seasonal(20));
        assert!(matches!(
            evaluate(&series, 25),
            Err(ForecastError::FoldFit { .. })
        ));
        assert!(matches!(
            evaluate(&series, 1),
            Err(ForecastError::FoldFit { .. })
        ));
    }

    #[test]
    fn short_training_slice_fails_whole_evaluation() {
        let series = quarterly(&seasonal(10));
        match evaluate(&series, 2) {
            Err(ForecastError::FoldFit { fold, message }) => {
                assert_eq!(fold, 0);
                assert!(message.contains("insufficient data"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_series_is_no_data() {
        assert!(matches!(evaluate(&[], 5), Err(ForecastError::NoData)));
    }

    #[test]
    fn perfect_pattern_scores_zero_error() {
        let metrics = evaluate(&quarterly(&seasonal(20)), 5).unwrap();
        assert!(metrics.mae < 1e-6);
        assert!(metrics.mse < 1e-6);
        assert!(metrics.rmse < 1e-6);
    }

    #[test]
    fn metrics_are_non_negative_on_noisy_data() {
        let values = vec![
            102.0, 125.0, 88.0, 113.0, 108.0, 131.0, 91.0, 120.0, 111.0, 138.0, 97.0, 124.0,
            119.0, 140.0, 103.0, 129.0, 121.0, 146.0, 105.0, 133.0,
        ];
        let metrics = evaluate(&quarterly(&values), 5).unwrap();
        assert!(metrics.mae > 0.0);
        assert!(metrics.mse > 0.0);
        assert!(metrics.rmse > 0.0);
        assert!(metrics.rmse * metrics.rmse <= metrics.mse + 1e-9);
    }

    #[test]
    fn error_metrics_match_hand_computation() {
        let metrics = error_metrics(&[1.0, 2.0, 3.0, 4.0], &[1.5, 2.5, 2.5, 3.5]);
        assert!((metrics.mae - 0.5).abs() < 1e-12);
        assert!((metrics.mse - 0.25).abs() < 1e-12);
        assert!((metrics.rmse - 0.5).abs() < 1e-12);
    }
}

//! Summary metrics over scores and predictions.
//!
//! Each metric family computes a fixed set of named values once, at construction, and
//! answers [`Metrics::computes`] lookups by sub-name afterwards.

use ndarray::ArrayView1;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MetricsError {
    #[error("Cannot compute {0} over an empty sample.")]
    EmptyInput(&'static str),

    #[error("Non-finite value found while computing {0}.")]
    NonFinite(&'static str),

    #[error("Got {truth} true scores but {predicted} predictions.")]
    LengthMismatch { truth: usize, predicted: usize },
}

pub trait Metrics {
    /// Family name, used as the prefix of every full name.
    fn name(&self) -> &str;

    /// Sub-names in sorted order.
    fn subnames(&self) -> Vec<&'static str>;

    /// Value of one sub-metric, `None` if this family does not compute it.
    fn computes(&self, subname: &str) -> Option<f64>;

    /// `"{name}_{subname}"` for every sub-name.
    fn fullnames(&self) -> Vec<String> {
        self.subnames()
            .into_iter()
            .map(|sub| format!("{}_{}", self.name(), sub))
            .collect()
    }

    /// Values in the order of [`Metrics::subnames`].
    fn values(&self) -> Vec<f64> {
        self.subnames()
            .into_iter()
            .filter_map(|sub| self.computes(sub))
            .collect()
    }
}

fn check_finite(x: ArrayView1<f64>, what: &'static str) -> Result<(), MetricsError> {
    if x.is_empty() {
        return Err(MetricsError::EmptyInput(what));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(MetricsError::NonFinite(what));
    }
    Ok(())
}

/// Sample size, mean and population standard deviation.
#[derive(Debug, Clone)]
pub struct DescriptiveStatistics {
    name: String,
    nos_samples: usize,
    mean: f64,
    stdev: f64,
}

impl DescriptiveStatistics {
    pub fn new(x: ArrayView1<f64>) -> Result<Self, MetricsError> {
        Self::with_name(x, "descriptive_statistics")
    }

    pub fn with_name(x: ArrayView1<f64>, name: &str) -> Result<Self, MetricsError> {
        check_finite(x, "descriptive statistics")?;
        let mean = x.mean().ok_or(MetricsError::EmptyInput("descriptive statistics"))?;
        Ok(Self {
            name: name.to_string(),
            nos_samples: x.len(),
            mean,
            stdev: x.std(0.0),
        })
    }
}

impl Metrics for DescriptiveStatistics {
    fn name(&self) -> &str {
        &self.name
    }

    fn subnames(&self) -> Vec<&'static str> {
        vec!["mean", "nos_samples", "stdev"]
    }

    fn computes(&self, subname: &str) -> Option<f64> {
        match subname {
            "mean" => Some(self.mean),
            "nos_samples" => Some(self.nos_samples as f64),
            "stdev" => Some(self.stdev),
            _ => None,
        }
    }
}

/// Mean absolute and root-mean-squared error of predicted scores.
#[derive(Debug, Clone)]
pub struct ScorePredictionErrors {
    name: String,
    mae: f64,
    rmse: f64,
}

impl ScorePredictionErrors {
    pub fn new(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> Result<Self, MetricsError> {
        if truth.len() != predicted.len() {
            return Err(MetricsError::LengthMismatch {
                truth: truth.len(),
                predicted: predicted.len(),
            });
        }
        check_finite(truth, "prediction errors")?;
        check_finite(predicted, "prediction errors")?;

        let residuals = &predicted - &truth;
        let n = residuals.len() as f64;
        Ok(Self {
            name: "score_prediction".to_string(),
            mae: residuals.mapv(f64::abs).sum() / n,
            rmse: (residuals.dot(&residuals) / n).sqrt(),
        })
    }
}

impl Metrics for ScorePredictionErrors {
    fn name(&self) -> &str {
        &self.name
    }

    fn subnames(&self) -> Vec<&'static str> {
        vec!["mae", "rmse"]
    }

    fn computes(&self, subname: &str) -> Option<f64> {
        match subname {
            "mae" => Some(self.mae),
            "rmse" => Some(self.rmse),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn descriptive_statistics_of_a_small_sample() {
        let x = array![1.0, 2.0, 3.0, 4.0];
        let stats = DescriptiveStatistics::new(x.view()).unwrap();
        assert_eq!(stats.computes("nos_samples"), Some(4.0));
        assert_abs_diff_eq!(stats.computes("mean").unwrap(), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.computes("stdev").unwrap(), 1.25_f64.sqrt(), epsilon = 1e-12);
        assert_eq!(stats.computes("median"), None);
        assert_eq!(
            stats.fullnames(),
            vec![
                "descriptive_statistics_mean",
                "descriptive_statistics_nos_samples",
                "descriptive_statistics_stdev"
            ]
        );
        assert_eq!(stats.values().len(), 3);
    }

    #[test]
    fn descriptive_statistics_reject_bad_input() {
        let empty = ndarray::Array1::<f64>::zeros(0);
        assert_eq!(
            DescriptiveStatistics::new(empty.view()).unwrap_err(),
            MetricsError::EmptyInput("descriptive statistics")
        );
        let x = array![1.0, f64::INFINITY];
        assert!(matches!(
            DescriptiveStatistics::new(x.view()),
            Err(MetricsError::NonFinite(_))
        ));
    }

    #[test]
    fn prediction_errors() {
        let truth = array![5.0, 3.0, 4.0];
        let predicted = array![4.0, 3.0, 6.0];
        let errors = ScorePredictionErrors::new(truth.view(), predicted.view()).unwrap();
        assert_abs_diff_eq!(errors.computes("mae").unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(errors.computes("rmse").unwrap(), (5.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(errors.fullnames(), vec!["score_prediction_mae", "score_prediction_rmse"]);
        assert!(matches!(
            ScorePredictionErrors::new(truth.view(), array![1.0].view()),
            Err(MetricsError::LengthMismatch { truth: 3, predicted: 1 })
        ));
    }
}

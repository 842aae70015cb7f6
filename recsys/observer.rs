//! Observability sink for model fitting.
//!
//! Fitting reports progress to whatever [`FitObserver`] the caller hands in instead of
//! writing to a process-wide logger itself. [`LogObserver`] forwards everything to the
//! `log` facade and is what [`crate::model::LatentFactorModel::fit`] uses.

use crate::estimate::{FitReport, FitStatus};

/// Summary of a fit that is about to start.
#[derive(Debug, Clone)]
pub struct FitPlan {
    pub n_events: usize,
    pub n_objects: Vec<usize>,
    pub n_parameters: usize,
    pub k: usize,
    pub penalty: f64,
    pub initial_loss: f64,
}

pub trait FitObserver {
    fn on_fit_start(&mut self, plan: &FitPlan);

    /// Called for every loss/gradient evaluation the optimizer requests.
    fn on_evaluation(&mut self, loss: f64, gradient_norm: f64) {
        let _ = (loss, gradient_norm);
    }

    fn on_fit_end(&mut self, report: &FitReport);
}

/// Forwards fit progress to the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver {
    evaluations: usize,
}

impl FitObserver for LogObserver {
    fn on_fit_start(&mut self, plan: &FitPlan) {
        self.evaluations = 0;
        log::info!(
            "Fitting latent factors: {} events, objects per type {:?}, rank {}, {} parameters, penalty {:.3e}.",
            plan.n_events,
            plan.n_objects,
            plan.k,
            plan.n_parameters,
            plan.penalty
        );
        log::info!("Initial loss: {:.6}", plan.initial_loss);
    }

    fn on_evaluation(&mut self, loss: f64, gradient_norm: f64) {
        self.evaluations += 1;
        log::debug!(
            "Evaluation {}: loss {:.6e}, |grad| {:.3e}",
            self.evaluations,
            loss,
            gradient_norm
        );
    }

    fn on_fit_end(&mut self, report: &FitReport) {
        match report.status {
            FitStatus::Converged => log::info!(
                "BFGS converged after {} iterations: loss {:.6} (from {:.6}), |grad| {:.3e}.",
                report.iterations,
                report.final_loss,
                report.initial_loss,
                report.gradient_norm
            ),
            FitStatus::IterationLimit => log::warn!(
                "BFGS spent its budget of {} iterations without converging: loss {:.6}, |grad| {:.3e}. Keeping best parameters found.",
                report.iterations,
                report.final_loss,
                report.gradient_norm
            ),
        }
    }
}

//! # Optimizer Driver
//!
//! Thin adapter between an [`Objective`] and the `wolfe_bfgs` quasi-Newton solver.
//! Every run ends in one of two ways: the gradient norm at the returned point is
//! within tolerance, or the iteration budget is spent. Neither is an error; the best
//! point found is returned together with a [`FitStatus`] saying which one happened.

use crate::objective::Objective;
use crate::observer::FitObserver;
use ndarray::Array1;
use serde::Serialize;
use std::cell::RefCell;
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsSolution};

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("The initial loss is not finite ({0}); cannot start BFGS.")]
    NonFiniteInitialLoss(f64),

    #[error("BFGS failed: {0}")]
    OptimizerFailed(String),
}

/// How an optimizer run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitStatus {
    /// Gradient norm at the returned point is within tolerance.
    Converged,
    /// The iteration budget is spent and the gradient norm is still above tolerance.
    IterationLimit,
}

/// Outcome of one fit.
#[derive(Debug, Clone, Serialize)]
pub struct FitReport {
    pub initial_loss: f64,
    pub final_loss: f64,
    pub gradient_norm: f64,
    /// BFGS iterations summed over every restart.
    pub iterations: usize,
    pub status: FitStatus,
}

impl FitReport {
    pub fn converged(&self) -> bool {
        self.status == FitStatus::Converged
    }
}

/// Stopping criteria for [`minimize`].
#[derive(Debug, Clone, Copy)]
pub struct StoppingRule {
    pub tolerance: f64,
    pub max_iterations: usize,
}

/// Runs BFGS on `objective` from `initial`, returning the final point and a report.
///
/// A run that stops early above tolerance (a failed line search, or the solver's own
/// stopping test) is restarted from its last point with a fresh Hessian estimate and
/// whatever budget is left. A restart that cannot lower the loss would repeat itself
/// exactly, so at that point the budget counts as spent.
pub fn minimize(
    objective: &Objective,
    initial: Array1<f64>,
    stopping: StoppingRule,
    observer: &mut dyn FitObserver,
) -> Result<(Array1<f64>, FitReport), EstimationError> {
    let initial_loss = objective.cost(&initial);
    if !initial_loss.is_finite() {
        return Err(EstimationError::NonFiniteInitialLoss(initial_loss));
    }

    let observer = RefCell::new(observer);
    let cost_and_grad = |theta: &Array1<f64>| -> (f64, Array1<f64>) {
        let (cost, grad) = objective.cost_and_grad(theta);
        observer
            .borrow_mut()
            .on_evaluation(cost, grad.dot(&grad).sqrt());
        (cost, grad)
    };

    let mut point = initial;
    let mut iterations = 0;
    let mut exhausted = stopping.max_iterations == 0;
    loop {
        let (loss, grad) = objective.cost_and_grad(&point);
        let gradient_norm = grad.dot(&grad).sqrt();
        let status = if gradient_norm <= stopping.tolerance {
            Some(FitStatus::Converged)
        } else if exhausted {
            Some(FitStatus::IterationLimit)
        } else {
            None
        };
        if let Some(status) = status {
            return Ok((
                point,
                FitReport {
                    initial_loss,
                    final_loss: loss,
                    gradient_norm,
                    iterations,
                    status,
                },
            ));
        }

        let budget = stopping.max_iterations.saturating_sub(iterations);
        let outcome = Bfgs::new(point.clone(), &cost_and_grad)
            .with_tolerance(stopping.tolerance)
            .with_max_iterations(budget)
            .run();

        let (solution, cap_hit): (BfgsSolution, bool) = match outcome {
            Ok(solution) => (solution, false),
            Err(wolfe_bfgs::BfgsError::MaxIterationsReached { last_solution }) => {
                (*last_solution, true)
            }
            Err(wolfe_bfgs::BfgsError::LineSearchFailed { last_solution, .. }) => {
                (*last_solution, false)
            }
            Err(e) => return Err(EstimationError::OptimizerFailed(format!("{e:?}"))),
        };

        iterations += solution.iterations;
        let progressed = objective.cost(&solution.final_point) < loss;
        if progressed {
            point = solution.final_point;
        }
        exhausted = cap_hit || !progressed || iterations >= stopping.max_iterations;
        if !exhausted {
            log::debug!(
                "BFGS stopped above tolerance after {} iterations; restarting with {} left.",
                iterations,
                stopping.max_iterations - iterations
            );
        }
    }
}

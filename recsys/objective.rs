//! # Regularized Squared-Error Objective
//!
//! ```text
//! L(θ) = ½ Σ_events (score(event; θ) − y)²  +  ½ λ Σ_{θ ≠ mu} θ²
//! ```
//!
//! `score` is the bias-plus-pairwise-factor model from [`crate::layout`], evaluated
//! directly on the flat parameter vector. Differentiating one event's squared residual
//! `r = score − y` gives
//!
//! - `∂/∂mu = r`
//! - `∂/∂bias[t][i_t] = r`
//! - `∂/∂factor[t][i_t] = r · Σ_{u ≠ t} factor[u][i_u]`
//!
//! and the penalty adds `λ θ` to every coordinate except `mu`.

use crate::layout::ParameterLayout;
use ndarray::{Array1, ArrayView1, ArrayView2, s};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectiveError {
    #[error("Events have {found} columns, but the parameter layout has {expected} object types.")]
    EventArity { expected: usize, found: usize },

    #[error("Received {events} events but {scores} scores.")]
    ScoreCount { events: usize, scores: usize },

    #[error("Event {index} uses object {iid} of type {otype}, which has only {n_objects} parameter rows.")]
    ObjectOutOfRange {
        index: usize,
        otype: usize,
        iid: usize,
        n_objects: usize,
    },
}

/// Loss and analytic gradient over a fixed set of training events.
pub struct Objective<'a> {
    events: ArrayView2<'a, usize>,
    scores: ArrayView1<'a, f64>,
    layout: &'a ParameterLayout,
    penalty: f64,
}

impl<'a> Objective<'a> {
    /// `events` has one column per object type; `penalty` is the effective `λ`.
    ///
    /// Every event index must address a parameter row of `layout`; evaluation relies
    /// on that and does no further bounds checks.
    pub fn new(
        events: ArrayView2<'a, usize>,
        scores: ArrayView1<'a, f64>,
        layout: &'a ParameterLayout,
        penalty: f64,
    ) -> Result<Self, ObjectiveError> {
        if events.ncols() != layout.n_otypes() {
            return Err(ObjectiveError::EventArity {
                expected: layout.n_otypes(),
                found: events.ncols(),
            });
        }
        if events.nrows() != scores.len() {
            return Err(ObjectiveError::ScoreCount {
                events: events.nrows(),
                scores: scores.len(),
            });
        }
        for (index, event) in events.rows().into_iter().enumerate() {
            for (otype, (&iid, &n_objects)) in event.iter().zip(layout.n_objects()).enumerate() {
                if iid >= n_objects {
                    return Err(ObjectiveError::ObjectOutOfRange {
                        index,
                        otype,
                        iid,
                        n_objects,
                    });
                }
            }
        }
        Ok(Self {
            events,
            scores,
            layout,
            penalty,
        })
    }

    pub fn n_parameters(&self) -> usize {
        self.layout.len()
    }

    pub fn cost(&self, theta: &Array1<f64>) -> f64 {
        self.evaluate(theta, None)
    }

    pub fn gradient(&self, theta: &Array1<f64>) -> Array1<f64> {
        self.cost_and_grad(theta).1
    }

    pub fn cost_and_grad(&self, theta: &Array1<f64>) -> (f64, Array1<f64>) {
        let mut grad = Array1::zeros(theta.len());
        let cost = self.evaluate(theta, Some(&mut grad));
        (cost, grad)
    }

    /// Unpenalized `½ Σ r²` at `theta`.
    pub fn squared_error(&self, theta: &Array1<f64>) -> f64 {
        self.events
            .rows()
            .into_iter()
            .zip(self.scores.iter())
            .map(|(event, &y)| {
                let r = self.score_event(theta, event) - y;
                0.5 * r * r
            })
            .sum()
    }

    fn score_event(&self, theta: &Array1<f64>, event: ArrayView1<usize>) -> f64 {
        let layout = self.layout;
        let mut score = theta[0];
        for (otype, &iid) in event.iter().enumerate() {
            score += theta[layout.bias_index(otype, iid)];
        }
        for s_type in 0..event.len() {
            let p = theta.slice(s![layout.factor_row_range(s_type, event[s_type])]);
            for u_type in s_type + 1..event.len() {
                let q = theta.slice(s![layout.factor_row_range(u_type, event[u_type])]);
                score += p.dot(&q);
            }
        }
        score
    }

    fn evaluate(&self, theta: &Array1<f64>, mut grad: Option<&mut Array1<f64>>) -> f64 {
        let layout = self.layout;
        let mut loss = 0.0;

        for (event, &y) in self.events.rows().into_iter().zip(self.scores.iter()) {
            let r = self.score_event(theta, event) - y;
            loss += 0.5 * r * r;

            if let Some(grad) = grad.as_deref_mut() {
                grad[0] += r;
                for (t_type, &iid) in event.iter().enumerate() {
                    grad[layout.bias_index(t_type, iid)] += r;
                    let row = layout.factor_row_range(t_type, iid);
                    for (u_type, &jid) in event.iter().enumerate() {
                        if u_type == t_type {
                            continue;
                        }
                        let other = theta.slice(s![layout.factor_row_range(u_type, jid)]);
                        grad.slice_mut(s![row.clone()]).scaled_add(r, &other);
                    }
                }
            }
        }

        if self.penalty > 0.0 {
            let penalized = theta.slice(s![1..]);
            loss += 0.5 * self.penalty * penalized.dot(&penalized);
            if let Some(grad) = grad {
                grad.slice_mut(s![1..]).scaled_add(self.penalty, &penalized);
            }
        }

        loss
    }
}

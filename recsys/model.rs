//! # Latent-Factor Score Predictor
//!
//! ```text
//! score(i_1..i_T) = mu + Σ_t bias[t][i_t] + Σ_{s<u} factor[s][i_s] · factor[u][i_u]
//! ```
//!
//! [`LatentFactorModel`] is either unfit or fit. [`LatentFactorModel::fit`] validates
//! its inputs, drives BFGS over the flattened parameters and only then swaps the
//! fitted state in, so a failed fit leaves the model exactly as it was.
//!
//! Prediction resolves each external identifier through the identifier maps captured
//! at fit time. Identifiers that were never seen, and orphans that are registered
//! only through a feature table, resolve to `None` and contribute nothing, so a
//! query made only of such identifiers predicts `mu`. Orphans get no parameters at
//! all: the flat vector covers just the objects that occur in events.
//!
//! Predictions are the raw model score unless [`ModelConfig::clip_to_domain`] is
//! set, in which case every prediction is clamped into the training score domain.

use crate::data::{DataError, EventTable, ExternalId, ScoreDomain};
use crate::estimate::{self, EstimationError, FitReport, StoppingRule};
use crate::idmap::IdentifierMap;
use crate::layout::{LatentFactors, LayoutError, ParameterLayout};
use crate::objective::{Objective, ObjectiveError};
use crate::observer::{FitObserver, FitPlan, LogObserver};
use ndarray::Array1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Factor rank must be a positive integer, got {0}.")]
    InvalidRank(usize),

    #[error("Regularization strength must be finite and non-negative, got {0}.")]
    InvalidRegularization(f64),

    #[error("Optimizer tolerance must be finite and positive, got {0}.")]
    InvalidTolerance(f64),

    #[error("Initial factor scale must be finite and positive, got {0}.")]
    InvalidInitScale(f64),

    #[error("Cannot fit a model to an event table with zero events.")]
    EmptyTrainingSet,

    #[error("The model has not been fitted; call fit before predict.")]
    NotFitted,

    #[error("Query {index} has {found} identifiers, but the model was fit on {expected} object types.")]
    QueryArity {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Initial parameters do not fit this event table: {0}")]
    InitialShapeMismatch(#[from] LayoutError),

    #[error("Training events do not match the parameter layout: {0}")]
    Objective(#[from] ObjectiveError),

    #[error("Optimization failed: {0}")]
    Optimization(#[from] EstimationError),

    #[error("Event data error: {0}")]
    Data(#[from] DataError),
}

/// How the regularization strength `C` turns into the penalty weight `λ`.
///
/// One weight applies to every bias and factor entry alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegularizationScale {
    /// `λ = C`.
    Constant,
    /// `λ = C / n_events`, fixed before optimization starts.
    PerEvent,
}

impl RegularizationScale {
    pub fn penalty(self, c: f64, n_events: usize) -> f64 {
        match self {
            RegularizationScale::Constant => c,
            RegularizationScale::PerEvent => c / n_events.max(1) as f64,
        }
    }
}

/// Hyperparameters, fixed for the lifetime of a model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelConfig {
    /// Factor rank.
    pub k: usize,
    /// Regularization strength.
    pub c: f64,
    /// Gradient-norm tolerance for BFGS.
    pub tolerance: f64,
    pub max_iterations: usize,
    pub regularization: RegularizationScale,
    /// Seed for the factor initialization.
    pub seed: u64,
    /// Standard deviation of the initial factor entries.
    pub init_scale: f64,
    /// Clamp predictions into the training score domain.
    pub clip_to_domain: bool,
}

impl ModelConfig {
    pub fn new(k: usize, c: f64) -> Result<Self, ModelError> {
        if k == 0 {
            return Err(ModelError::InvalidRank(k));
        }
        if !c.is_finite() || c < 0.0 {
            return Err(ModelError::InvalidRegularization(c));
        }
        Ok(Self {
            k,
            c,
            tolerance: 1e-6,
            max_iterations: 1000,
            regularization: RegularizationScale::Constant,
            seed: 0x5EED,
            init_scale: 0.1,
            clip_to_domain: false,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_regularization(mut self, regularization: RegularizationScale) -> Self {
        self.regularization = regularization;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_init_scale(mut self, init_scale: f64) -> Self {
        self.init_scale = init_scale;
        self
    }

    pub fn with_clip_to_domain(mut self, clip: bool) -> Self {
        self.clip_to_domain = clip;
        self
    }

    /// Re-checks every field; the `with_*` setters do not validate.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.k == 0 {
            return Err(ModelError::InvalidRank(self.k));
        }
        if !self.c.is_finite() || self.c < 0.0 {
            return Err(ModelError::InvalidRegularization(self.c));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ModelError::InvalidTolerance(self.tolerance));
        }
        if !self.init_scale.is_finite() || self.init_scale <= 0.0 {
            return Err(ModelError::InvalidInitScale(self.init_scale));
        }
        Ok(())
    }
}

/// Everything a fit produces.
#[derive(Debug, Clone)]
struct FittedState {
    params: LatentFactors,
    id_maps: Vec<IdentifierMap<ExternalId>>,
    /// Per type, internal indices below this have parameters.
    n_observed: Vec<usize>,
    score_domain: ScoreDomain,
    report: FitReport,
}

impl FittedState {
    fn resolve(&self, otype: usize, id: &ExternalId) -> Option<usize> {
        let iid = self.id_maps.get(otype)?.resolve(id)?;
        (iid < self.n_observed[otype]).then_some(iid)
    }
}

#[derive(Debug, Clone)]
enum ModelState {
    Unfit,
    Fit(Box<FittedState>),
}

#[derive(Debug, Clone)]
pub struct LatentFactorModel {
    config: ModelConfig,
    state: ModelState,
}

impl LatentFactorModel {
    /// A model with rank `k`, regularization `c` and default optimizer settings.
    pub fn new(k: usize, c: f64) -> Result<Self, ModelError> {
        Self::with_config(ModelConfig::new(k, c)?)
    }

    pub fn with_config(config: ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        Ok(Self {
            config,
            state: ModelState::Unfit,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, ModelState::Fit(_))
    }

    /// Fits from the default starting point, reporting through [`LogObserver`].
    pub fn fit(&mut self, table: &EventTable) -> Result<&FitReport, ModelError> {
        self.fit_with(table, None, &mut LogObserver::default())
    }

    /// Fits starting from `initial` (or the default starting point when `None`),
    /// reporting progress to `observer`.
    pub fn fit_with(
        &mut self,
        table: &EventTable,
        initial: Option<&LatentFactors>,
        observer: &mut dyn FitObserver,
    ) -> Result<&FitReport, ModelError> {
        if table.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }

        let n_objects = table.n_observed_objects();
        let layout = ParameterLayout::new(&n_objects, self.config.k);
        let theta0 = match initial {
            Some(params) => layout.flatten(params)?,
            None => layout.flatten(&self.initial_parameters(table, &n_objects)?)?,
        };

        let penalty = self
            .config
            .regularization
            .penalty(self.config.c, table.n_events());
        let objective = Objective::new(table.events(), table.scores(), &layout, penalty)?;

        observer.on_fit_start(&FitPlan {
            n_events: table.n_events(),
            n_objects: n_objects.clone(),
            n_parameters: layout.len(),
            k: self.config.k,
            penalty,
            initial_loss: objective.cost(&theta0),
        });

        let (theta, report) = estimate::minimize(
            &objective,
            theta0,
            StoppingRule {
                tolerance: self.config.tolerance,
                max_iterations: self.config.max_iterations,
            },
            observer,
        )?;
        let params = layout.unflatten(theta.view())?;

        observer.on_fit_end(&report);

        self.state = ModelState::Fit(Box::new(FittedState {
            params,
            id_maps: table.id_maps().to_vec(),
            n_observed: n_objects,
            score_domain: table.score_domain(),
            report,
        }));
        self.report()
    }

    /// `mu` at the mean score, zero biases, factors drawn from `N(0, init_scale²)`.
    ///
    /// Factors cannot start at zero: that is a stationary point of the objective.
    fn initial_parameters(
        &self,
        table: &EventTable,
        n_objects: &[usize],
    ) -> Result<LatentFactors, ModelError> {
        let normal = Normal::new(0.0, self.config.init_scale)
            .map_err(|_| ModelError::InvalidInitScale(self.config.init_scale))?;
        let mut params = LatentFactors::zeros(n_objects, self.config.k);
        params.mu = table.scores().mean().unwrap_or(0.0);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        for object_type in &mut params.object_types {
            object_type
                .factors
                .mapv_inplace(|_| normal.sample(&mut rng));
        }
        Ok(params)
    }

    fn fitted(&self) -> Result<&FittedState, ModelError> {
        match &self.state {
            ModelState::Fit(state) => Ok(state),
            ModelState::Unfit => Err(ModelError::NotFitted),
        }
    }

    /// Fitted parameters, for diagnostics or serialization.
    pub fn params(&self) -> Result<&LatentFactors, ModelError> {
        Ok(&self.fitted()?.params)
    }

    pub fn report(&self) -> Result<&FitReport, ModelError> {
        Ok(&self.fitted()?.report)
    }

    /// Internal indices for one query; unknown identifiers and orphans become `None`.
    pub fn resolve(&self, query: &[ExternalId]) -> Result<Vec<Option<usize>>, ModelError> {
        let state = self.fitted()?;
        if query.len() != state.id_maps.len() {
            return Err(ModelError::QueryArity {
                index: 0,
                expected: state.id_maps.len(),
                found: query.len(),
            });
        }
        Ok(query
            .iter()
            .enumerate()
            .map(|(otype, id)| state.resolve(otype, id))
            .collect())
    }

    /// Predicted score for one tuple of external identifiers.
    pub fn predict(&self, query: &[ExternalId]) -> Result<f64, ModelError> {
        let state = self.fitted()?;
        let resolved = self.resolve(query)?;
        Ok(self.finish(state, state.params.score(&resolved)))
    }

    /// Predicted scores for a batch of queries, in input order.
    pub fn predict_batch(&self, queries: &[Vec<ExternalId>]) -> Result<Array1<f64>, ModelError> {
        let state = self.fitted()?;
        let n_otypes = state.id_maps.len();
        let mut resolved = Vec::with_capacity(queries.len() * n_otypes);
        for (index, query) in queries.iter().enumerate() {
            if query.len() != n_otypes {
                return Err(ModelError::QueryArity {
                    index,
                    expected: n_otypes,
                    found: query.len(),
                });
            }
            resolved.extend(
                query
                    .iter()
                    .enumerate()
                    .map(|(otype, id)| state.resolve(otype, id)),
            );
        }
        Ok(resolved
            .chunks(n_otypes)
            .map(|row| self.finish(state, state.params.score(row)))
            .collect())
    }

    /// Squared-error loss `½ Σ (score − y)²` of the fitted model over `table`'s events,
    /// resolved through the fitted identifier maps.
    pub fn squared_error(&self, table: &EventTable) -> Result<f64, ModelError> {
        let state = self.fitted()?;
        let mut total = 0.0;
        for (event, &y) in table.events().rows().into_iter().zip(table.scores().iter()) {
            let mut resolved = Vec::with_capacity(event.len());
            for (otype, &iid) in event.iter().enumerate() {
                let id = table.to_eid(otype, iid)?;
                resolved.push(state.resolve(otype, id));
            }
            let r = state.params.score(&resolved) - y;
            total += 0.5 * r * r;
        }
        Ok(total)
    }

    fn finish(&self, state: &FittedState, score: f64) -> f64 {
        if self.config.clip_to_domain {
            state.score_domain.clamp(score)
        } else {
            score
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::FitStatus;
    use approx::assert_abs_diff_eq;

    fn event(u: i64, i: i64) -> Vec<ExternalId> {
        vec![ExternalId::Int(u), ExternalId::Int(i)]
    }

    fn small_table() -> EventTable {
        let events = vec![event(1, 1), event(1, 2), event(2, 1)];
        EventTable::ingest(2, &events, &[5.0, 3.0, 4.0], ScoreDomain::new(0.0, 5.0).unwrap())
            .unwrap()
    }

    #[test]
    fn construction_rejects_bad_hyperparameters() {
        assert!(matches!(
            LatentFactorModel::new(0, 0.1),
            Err(ModelError::InvalidRank(0))
        ));
        assert!(matches!(
            LatentFactorModel::new(2, -1.0),
            Err(ModelError::InvalidRegularization(_))
        ));
        let config = ModelConfig::new(2, 0.1).unwrap().with_tolerance(0.0);
        assert!(matches!(
            LatentFactorModel::with_config(config),
            Err(ModelError::InvalidTolerance(_))
        ));
    }

    #[test]
    fn unusable_init_scale_fails_instead_of_starting_from_zero() {
        // Public config fields can bypass `with_config` validation.
        let mut model = LatentFactorModel {
            config: ModelConfig {
                init_scale: -1.0,
                ..ModelConfig::new(1, 0.0).unwrap()
            },
            state: ModelState::Unfit,
        };
        let table = small_table();
        assert!(matches!(
            model.initial_parameters(&table, &table.n_observed_objects()),
            Err(ModelError::InvalidInitScale(_))
        ));
        assert!(matches!(
            model.fit(&table),
            Err(ModelError::InvalidInitScale(_))
        ));
        assert!(!model.is_fitted());
    }

    #[test]
    fn predict_before_fit_fails() {
        let model = LatentFactorModel::new(1, 0.0).unwrap();
        assert!(!model.is_fitted());
        assert!(matches!(model.predict(&event(1, 1)), Err(ModelError::NotFitted)));
        assert!(matches!(
            model.predict_batch(&[event(1, 1)]),
            Err(ModelError::NotFitted)
        ));
        assert!(matches!(model.params(), Err(ModelError::NotFitted)));
    }

    #[test]
    fn fit_improves_on_the_all_zero_start() {
        let table = small_table();
        let config = ModelConfig::new(1, 0.0).unwrap().with_tolerance(1e-8);
        let mut model = LatentFactorModel::with_config(config).unwrap();
        let report = model.fit(&table).unwrap().clone();

        let zero_loss = 0.5 * (25.0 + 9.0 + 16.0);
        let fitted_loss = model.squared_error(&table).unwrap();
        assert!(fitted_loss <= zero_loss);
        assert!(report.final_loss <= report.initial_loss);
        assert_abs_diff_eq!(fitted_loss, report.final_loss, epsilon = 1e-9);

        // Unclipped predictions are exactly the model score of the fitted parameters.
        let params = model.params().unwrap();
        let prediction = model.predict(&event(1, 1)).unwrap();
        assert_eq!(prediction.to_bits(), params.score(&[Some(0), Some(0)]).to_bits());
    }

    #[test]
    fn clipped_predictions_stay_in_the_domain() {
        let table = small_table();
        let config = ModelConfig::new(1, 0.0)
            .unwrap()
            .with_tolerance(1e-8)
            .with_clip_to_domain(true);
        let mut model = LatentFactorModel::with_config(config).unwrap();
        model.fit(&table).unwrap();
        let predictions = model
            .predict_batch(&[event(1, 1), event(1, 2), event(2, 1), event(2, 2)])
            .unwrap();
        assert!(predictions.iter().all(|&p| (0.0..=5.0).contains(&p)));
    }

    #[test]
    fn unknown_identifiers_predict_the_global_bias() {
        let table = small_table();
        let mut model = LatentFactorModel::new(2, 0.1).unwrap();
        model.fit(&table).unwrap();
        let mu = model.params().unwrap().mu;
        assert_eq!(model.predict(&event(99, 77)).unwrap(), mu);
        assert_eq!(
            model
                .predict(&[ExternalId::from("nobody"), ExternalId::from("nothing")])
                .unwrap(),
            mu
        );
    }

    #[test]
    fn partially_known_queries_use_only_the_known_bias() {
        let table = small_table();
        let mut model = LatentFactorModel::new(2, 0.1).unwrap();
        model.fit(&table).unwrap();
        let params = model.params().unwrap();
        let expected = params.mu + params.bias_at(0, Some(0));
        assert_abs_diff_eq!(model.predict(&event(1, 42)).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn batch_and_single_predictions_agree_and_repeat_exactly() {
        let table = small_table();
        let mut model = LatentFactorModel::new(2, 0.05).unwrap();
        model.fit(&table).unwrap();

        let queries = vec![event(1, 1), event(2, 2), event(3, 1), event(1, 9)];
        let first = model.predict_batch(&queries).unwrap();
        let second = model.predict_batch(&queries).unwrap();
        assert_eq!(first, second);
        for (query, &batched) in queries.iter().zip(first.iter()) {
            assert_eq!(model.predict(query).unwrap().to_bits(), batched.to_bits());
        }
    }

    #[test]
    fn query_arity_is_checked() {
        let table = small_table();
        let mut model = LatentFactorModel::new(1, 0.1).unwrap();
        model.fit(&table).unwrap();
        assert!(matches!(
            model.predict(&[ExternalId::Int(1)]),
            Err(ModelError::QueryArity { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            model.predict_batch(&[event(1, 1), vec![ExternalId::Int(1)]]),
            Err(ModelError::QueryArity { index: 1, .. })
        ));
    }

    #[test]
    fn empty_table_is_rejected_without_touching_state() {
        let empty =
            EventTable::ingest(2, &[], &[], ScoreDomain::new(0.0, 5.0).unwrap()).unwrap();
        let mut model = LatentFactorModel::new(1, 0.1).unwrap();
        assert!(matches!(model.fit(&empty), Err(ModelError::EmptyTrainingSet)));
        assert!(!model.is_fitted());
    }

    #[test]
    fn mismatched_warm_start_is_rejected() {
        let table = small_table();
        let mut model = LatentFactorModel::new(2, 0.1).unwrap();
        let wrong = LatentFactors::zeros(&[5, 2], 2);
        let result = model.fit_with(&table, Some(&wrong), &mut LogObserver::default());
        assert!(matches!(result, Err(ModelError::InitialShapeMismatch(_))));
        assert!(!model.is_fitted());
    }

    #[test]
    fn converged_fit_has_small_gradient() {
        let table = small_table();
        let config = ModelConfig::new(2, 0.5).unwrap().with_tolerance(1e-7);
        let mut model = LatentFactorModel::with_config(config).unwrap();
        let report = model.fit(&table).unwrap().clone();
        match report.status {
            FitStatus::Converged => assert!(report.gradient_norm <= 1e-7),
            FitStatus::IterationLimit => {
                assert!(report.gradient_norm > 1e-7);
                assert!(report.final_loss <= report.initial_loss);
            }
        }
    }

    #[test]
    fn clipped_scenario_prediction_lies_in_the_domain() {
        let table = small_table();
        let config = ModelConfig::new(1, 0.0)
            .unwrap()
            .with_tolerance(1e-8)
            .with_clip_to_domain(true);
        let mut model = LatentFactorModel::with_config(config).unwrap();
        model.fit(&table).unwrap();
        let prediction = model.predict(&event(1, 1)).unwrap();
        assert!((0.0..=5.0).contains(&prediction), "prediction {prediction}");
    }

    #[test]
    fn orphans_have_no_parameters_and_predict_like_unknowns() {
        use crate::data::{FeatureRow, FeatureTables, FeatureValue};
        use std::collections::HashMap;

        let events = vec![event(1, 1), event(1, 2), event(2, 1)];
        let mut items = HashMap::new();
        for (id, year) in [(1, 1999), (2, 2004), (3, 2011)] {
            let mut row = FeatureRow::new();
            row.insert("year".to_string(), FeatureValue::Int(year));
            items.insert(ExternalId::Int(id), row);
        }
        let features = FeatureTables {
            events: None,
            objects: vec![None, Some(items)],
        };
        let table = EventTable::ingest_with_features(
            2,
            &events,
            &[5.0, 3.0, 4.0],
            ScoreDomain::new(0.0, 5.0).unwrap(),
            features,
        )
        .unwrap();
        assert_eq!(table.to_iid(1, &ExternalId::Int(3)).unwrap(), 2);
        assert_eq!(table.to_eid(1, 2).unwrap(), &ExternalId::Int(3));

        let config = ModelConfig::new(2, 0.0).unwrap();
        let mut model = LatentFactorModel::with_config(config).unwrap();
        model.fit(&table).unwrap();

        let params = model.params().unwrap();
        assert_eq!(params.n_objects(), vec![2, 2]);
        assert_eq!(model.resolve(&event(1, 3)).unwrap(), vec![Some(0), None]);

        let orphan = model.predict(&event(1, 3)).unwrap();
        let unknown = model.predict(&event(1, 99)).unwrap();
        assert_eq!(orphan.to_bits(), unknown.to_bits());
        assert_eq!(orphan, params.mu + params.bias_at(0, Some(0)));
    }

    #[test]
    fn per_event_scaling_divides_by_event_count() {
        assert_eq!(RegularizationScale::Constant.penalty(0.3, 3), 0.3);
        assert_abs_diff_eq!(RegularizationScale::PerEvent.penalty(0.3, 3), 0.1, epsilon = 1e-15);
        assert_eq!(RegularizationScale::PerEvent.penalty(0.3, 0), 0.3);
    }
}

//! # Event Data Model
//!
//! An [`EventTable`] holds observed events (one external identifier per object-type
//! slot) together with their scores, remapped onto dense internal indices. It is the
//! only way data reaches the model, so every structural check happens here, at
//! ingestion time, before any state is built.
//!
//! - One [`IdentifierMap`] per object-type slot, enumerated in first-seen order over
//!   that slot's column of events. Objects that only appear in a feature table are
//!   registered after them, in sorted order. These orphans have indices at or above
//!   [`EventTable::n_observed_objects`] and never receive trained parameters.
//! - Scores must lie inside the declared [`ScoreDomain`]; a single violation aborts
//!   ingestion and no table is returned.
//! - Feature tables are optional. When given, they must cover every object the
//!   events address and are re-ordered to line up with the internal indices.

use crate::idmap::{IdMapError, IdentifierMap};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A caller-supplied identifier naming one object (a user, an item, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Int(i64),
    Str(String),
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalId::Int(v) => write!(f, "{v}"),
            ExternalId::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl ExternalId {
    /// The identifier as it appears in a text file.
    pub fn to_token(&self) -> String {
        match self {
            ExternalId::Int(v) => v.to_string(),
            ExternalId::Str(s) => s.clone(),
        }
    }
}

/// Tokens in canonical integer form become `Int`; anything else, including `007`,
/// `+7` or ` 7`, is kept verbatim as `Str` so that `to_token` gives back the input.
impl FromStr for ExternalId {
    type Err = Infallible;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Ok(match token.parse::<i64>() {
            Ok(v) if v.to_string() == token => ExternalId::Int(v),
            _ => ExternalId::Str(token.to_string()),
        })
    }
}

impl From<i64> for ExternalId {
    fn from(v: i64) -> Self {
        ExternalId::Int(v)
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        ExternalId::Str(s.to_string())
    }
}

impl From<String> for ExternalId {
    fn from(s: String) -> Self {
        ExternalId::Str(s)
    }
}

/// A single attribute value in a feature row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Named attributes of one event or one object.
pub type FeatureRow = BTreeMap<String, FeatureValue>;

/// The closed interval every observed score must lie in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreDomain {
    min: f64,
    max: f64,
}

impl ScoreDomain {
    pub fn new(min: f64, max: f64) -> Result<Self, DataError> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(DataError::InvalidScoreDomain { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// `false` for NaN.
    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && score <= self.max
    }

    pub fn clamp(&self, score: f64) -> f64 {
        score.clamp(self.min, self.max)
    }
}

/// Optional feature tables supplied alongside the events.
#[derive(Debug, Clone, Default)]
pub struct FeatureTables {
    /// One row per event, in event order.
    pub events: Option<Vec<FeatureRow>>,
    /// Either empty (no object features at all) or one entry per object-type slot,
    /// keyed by external identifier.
    pub objects: Vec<Option<HashMap<ExternalId, FeatureRow>>>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Identifier lookup failed: {0}")]
    IdMap(#[from] IdMapError),

    #[error("Score domain ({min}, {max}) is invalid; bounds must be finite with min <= max.")]
    InvalidScoreDomain { min: f64, max: f64 },

    #[error("Event {index} has score {score}, which lies outside the score domain [{min}, {max}].")]
    ScoreOutOfDomain {
        index: usize,
        score: f64,
        min: f64,
        max: f64,
    },

    #[error("Received {events} events but {scores} scores; every event needs exactly one score.")]
    LengthMismatch { events: usize, scores: usize },

    #[error("Event {index} has {found} identifiers, but the table has {expected} object types.")]
    EventArity {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("An event table needs at least one object type.")]
    InvalidObjectTypeCount,

    #[error("Object type {otype} does not exist; the table has {n_otypes} object types.")]
    ObjectTypeOutOfRange { otype: usize, n_otypes: usize },

    #[error("Received {found} event feature rows for {expected} events.")]
    EventFeatureCount { expected: usize, found: usize },

    #[error("Received object feature tables for {found} object types; expected {expected}.")]
    FeatureTableCount { expected: usize, found: usize },

    #[error("Object type {otype} has no feature row for identifier {id}, which is used by an event.")]
    MissingFeature { otype: usize, id: ExternalId },
}

/// Observed events and scores, addressed by internal indices.
///
/// Read-only after [`EventTable::ingest`]; several models may be fit against the
/// same table.
#[derive(Debug, Clone)]
pub struct EventTable {
    n_otypes: usize,
    id_maps: Vec<IdentifierMap<ExternalId>>,
    /// Per type, the number of leading internal indices that occur in events.
    n_observed: Vec<usize>,
    /// Shape: `[n_events, n_otypes]`.
    events: Array2<usize>,
    scores: Array1<f64>,
    score_domain: ScoreDomain,
    event_features: Option<Vec<FeatureRow>>,
    /// Rows aligned to internal indices.
    object_features: Vec<Option<Vec<FeatureRow>>>,
}

impl EventTable {
    /// Ingests events without feature tables.
    pub fn ingest(
        n_otypes: usize,
        raw_events: &[Vec<ExternalId>],
        raw_scores: &[f64],
        score_domain: ScoreDomain,
    ) -> Result<Self, DataError> {
        Self::ingest_with_features(
            n_otypes,
            raw_events,
            raw_scores,
            score_domain,
            FeatureTables::default(),
        )
    }

    /// Builds the identifier maps, remaps every event onto internal indices and
    /// aligns the feature tables. Nothing is returned unless every check passes.
    pub fn ingest_with_features(
        n_otypes: usize,
        raw_events: &[Vec<ExternalId>],
        raw_scores: &[f64],
        score_domain: ScoreDomain,
        features: FeatureTables,
    ) -> Result<Self, DataError> {
        if n_otypes == 0 {
            return Err(DataError::InvalidObjectTypeCount);
        }
        if raw_events.len() != raw_scores.len() {
            return Err(DataError::LengthMismatch {
                events: raw_events.len(),
                scores: raw_scores.len(),
            });
        }
        for (index, event) in raw_events.iter().enumerate() {
            if event.len() != n_otypes {
                return Err(DataError::EventArity {
                    index,
                    expected: n_otypes,
                    found: event.len(),
                });
            }
        }
        for (index, &score) in raw_scores.iter().enumerate() {
            if !score_domain.contains(score) {
                return Err(DataError::ScoreOutOfDomain {
                    index,
                    score,
                    min: score_domain.min(),
                    max: score_domain.max(),
                });
            }
        }
        if let Some(rows) = &features.events {
            if rows.len() != raw_events.len() {
                return Err(DataError::EventFeatureCount {
                    expected: raw_events.len(),
                    found: rows.len(),
                });
            }
        }
        if !features.objects.is_empty() && features.objects.len() != n_otypes {
            return Err(DataError::FeatureTableCount {
                expected: n_otypes,
                found: features.objects.len(),
            });
        }

        let id_maps: Vec<IdentifierMap<ExternalId>> = (0..n_otypes)
            .map(|otype| {
                let mut orphans: Vec<ExternalId> = features
                    .objects
                    .get(otype)
                    .and_then(Option::as_ref)
                    .map(|table| table.keys().cloned().collect())
                    .unwrap_or_default();
                orphans.sort();
                IdentifierMap::build(
                    raw_events
                        .iter()
                        .map(|e| e[otype].clone())
                        .chain(orphans),
                )
            })
            .collect();

        let mut events = Array2::zeros((raw_events.len(), n_otypes));
        for (mut row, event) in events.rows_mut().into_iter().zip(raw_events) {
            for (otype, id) in event.iter().enumerate() {
                row[otype] = id_maps[otype].to_internal(id)?;
            }
        }
        // Event identifiers were registered first, so they own the indices 0..n.
        let n_observed: Vec<usize> = events
            .columns()
            .into_iter()
            .map(|column| column.iter().max().map_or(0, |&iid| iid + 1))
            .collect();

        let mut object_features = vec![None; n_otypes];
        for (otype, table) in features.objects.into_iter().enumerate() {
            if let Some(mut table) = table {
                object_features[otype] = Some(align_features(otype, &id_maps[otype], &mut table)?);
            }
        }

        log::info!(
            "Ingested {} events over {} object types (objects per type: {:?}, of which observed in events: {:?}).",
            raw_events.len(),
            n_otypes,
            id_maps.iter().map(IdentifierMap::len).collect::<Vec<_>>(),
            n_observed
        );

        Ok(Self {
            n_otypes,
            id_maps,
            n_observed,
            events,
            scores: Array1::from_vec(raw_scores.to_vec()),
            score_domain,
            event_features: features.events,
            object_features,
        })
    }

    pub fn n_otypes(&self) -> usize {
        self.n_otypes
    }

    pub fn n_events(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Object counts per type, in slot order.
    pub fn n_objects(&self) -> Vec<usize> {
        self.id_maps.iter().map(IdentifierMap::len).collect()
    }

    /// Per type, how many objects occur in at least one event. Their internal indices
    /// are `0..n`; every index above belongs to an orphan known only from features.
    pub fn n_observed_objects(&self) -> Vec<usize> {
        self.n_observed.clone()
    }

    /// Events as internal indices, shape `[n_events, n_otypes]`.
    pub fn events(&self) -> ArrayView2<'_, usize> {
        self.events.view()
    }

    pub fn scores(&self) -> ArrayView1<'_, f64> {
        self.scores.view()
    }

    pub fn score_domain(&self) -> ScoreDomain {
        self.score_domain
    }

    pub fn id_map(&self, otype: usize) -> Result<&IdentifierMap<ExternalId>, DataError> {
        self.id_maps
            .get(otype)
            .ok_or(DataError::ObjectTypeOutOfRange {
                otype,
                n_otypes: self.n_otypes,
            })
    }

    pub fn id_maps(&self) -> &[IdentifierMap<ExternalId>] {
        &self.id_maps
    }

    pub fn to_iid(&self, otype: usize, id: &ExternalId) -> Result<usize, DataError> {
        Ok(self.id_map(otype)?.to_internal(id)?)
    }

    pub fn to_eid(&self, otype: usize, iid: usize) -> Result<&ExternalId, DataError> {
        Ok(self.id_map(otype)?.to_external(iid)?)
    }

    /// Like [`EventTable::to_iid`], but unknown identifiers resolve to `None`.
    pub fn resolve(&self, otype: usize, id: &ExternalId) -> Result<Option<usize>, DataError> {
        Ok(self.id_map(otype)?.resolve(id))
    }

    /// Number of events touching each object of `otype`, by internal index.
    pub fn event_counts(&self, otype: usize) -> Result<Array1<usize>, DataError> {
        let n = self.id_map(otype)?.len();
        let mut counts = Array1::zeros(n);
        for &iid in self.events.column(otype) {
            counts[iid] += 1;
        }
        Ok(counts)
    }

    pub fn event_features(&self) -> Option<&[FeatureRow]> {
        self.event_features.as_deref()
    }

    /// Feature rows of `otype` aligned to internal indices, if any were supplied.
    pub fn object_features(&self, otype: usize) -> Result<Option<&[FeatureRow]>, DataError> {
        self.id_map(otype)?;
        Ok(self.object_features[otype].as_deref())
    }
}

/// Orders the rows of `table` by internal index, failing on the first object
/// without a row. Every key of `table` is registered in `id_map`, so no row is lost.
fn align_features(
    otype: usize,
    id_map: &IdentifierMap<ExternalId>,
    table: &mut HashMap<ExternalId, FeatureRow>,
) -> Result<Vec<FeatureRow>, DataError> {
    let mut aligned = Vec::with_capacity(id_map.len());
    for id in id_map.external_ids() {
        match table.remove(id) {
            Some(row) => aligned.push(row),
            None => {
                return Err(DataError::MissingFeature {
                    otype,
                    id: id.clone(),
                });
            }
        }
    }
    Ok(aligned)
}

//! # Parameter Layout
//!
//! The model's parameters live in a typed struct, [`LatentFactors`], while BFGS works
//! on one flat vector. [`ParameterLayout`] is the single place that knows how the two
//! correspond. The flat order is fixed:
//!
//! 1. `mu`
//! 2. the bias vector of each object type, in slot order
//! 3. the factor matrix of each object type, in slot order, row-major
//!
//! Unknown objects have no storage at all. Lookups take an `Option<usize>` and a
//! `None` (or an index past the end) contributes zero bias and a zero factor, so the
//! flat vector never contains a sentinel entry.

use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ShapeError, s};
use serde::Serialize;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Parameter shape mismatch: expected {expected}, found {found}.")]
    ShapeMismatch { expected: String, found: String },

    #[error("Failed to reshape a factor block: {0}")]
    Reshape(#[from] ShapeError),
}

/// Bias vector and factor matrix of one object type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectTypeParameters {
    /// Length `n_objects`.
    pub bias: Array1<f64>,
    /// Shape `[n_objects, k]`.
    pub factors: Array2<f64>,
}

/// Every trainable parameter of a latent-factor model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatentFactors {
    pub mu: f64,
    pub object_types: Vec<ObjectTypeParameters>,
}

impl LatentFactors {
    pub fn zeros(n_objects: &[usize], k: usize) -> Self {
        Self {
            mu: 0.0,
            object_types: n_objects
                .iter()
                .map(|&n| ObjectTypeParameters {
                    bias: Array1::zeros(n),
                    factors: Array2::zeros((n, k)),
                })
                .collect(),
        }
    }

    pub fn n_objects(&self) -> Vec<usize> {
        self.object_types.iter().map(|p| p.bias.len()).collect()
    }

    /// Bias of object `iid` of `otype`; zero for unknown objects.
    pub fn bias_at(&self, otype: usize, iid: Option<usize>) -> f64 {
        iid.and_then(|i| self.object_types.get(otype)?.bias.get(i).copied())
            .unwrap_or(0.0)
    }

    /// Factor row of object `iid` of `otype`; `None` stands for the zero vector.
    pub fn factor_at(&self, otype: usize, iid: Option<usize>) -> Option<ArrayView1<'_, f64>> {
        let factors = &self.object_types.get(otype)?.factors;
        iid.filter(|&i| i < factors.nrows()).map(|i| factors.row(i))
    }

    /// `mu + Σ_t bias[t] + Σ_{s<u} factor[s]·factor[u]` for one resolved event.
    pub fn score(&self, resolved: &[Option<usize>]) -> f64 {
        let biases: f64 = resolved
            .iter()
            .enumerate()
            .map(|(otype, &iid)| self.bias_at(otype, iid))
            .sum();
        let interactions: f64 = resolved
            .iter()
            .enumerate()
            .tuple_combinations::<(_, _)>()
            .filter_map(|((s, &is), (u, &iu))| {
                Some(self.factor_at(s, is)?.dot(&self.factor_at(u, iu)?))
            })
            .sum();
        self.mu + biases + interactions
    }
}

/// Offsets of each parameter block inside the flat vector.
#[derive(Debug, Clone)]
pub struct ParameterLayout {
    n_objects: Vec<usize>,
    k: usize,
    bias_offsets: Vec<usize>,
    factor_offsets: Vec<usize>,
    total: usize,
}

impl ParameterLayout {
    pub fn new(n_objects: &[usize], k: usize) -> Self {
        let mut offset = 1;
        let mut bias_offsets = Vec::with_capacity(n_objects.len());
        for &n in n_objects {
            bias_offsets.push(offset);
            offset += n;
        }
        let mut factor_offsets = Vec::with_capacity(n_objects.len());
        for &n in n_objects {
            factor_offsets.push(offset);
            offset += n * k;
        }
        Self {
            n_objects: n_objects.to_vec(),
            k,
            bias_offsets,
            factor_offsets,
            total: offset,
        }
    }

    /// Length of the flat vector.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn n_otypes(&self) -> usize {
        self.n_objects.len()
    }

    pub fn n_objects(&self) -> &[usize] {
        &self.n_objects
    }

    pub(crate) fn bias_range(&self, otype: usize) -> Range<usize> {
        let start = self.bias_offsets[otype];
        start..start + self.n_objects[otype]
    }

    pub(crate) fn factor_range(&self, otype: usize) -> Range<usize> {
        let start = self.factor_offsets[otype];
        start..start + self.n_objects[otype] * self.k
    }

    /// Position of `bias[otype][iid]` in the flat vector.
    pub(crate) fn bias_index(&self, otype: usize, iid: usize) -> usize {
        self.bias_offsets[otype] + iid
    }

    /// Positions of `factor[otype][iid, ..]` in the flat vector.
    pub(crate) fn factor_row_range(&self, otype: usize, iid: usize) -> Range<usize> {
        let start = self.factor_offsets[otype] + iid * self.k;
        start..start + self.k
    }

    /// Whether `params` has exactly the shapes this layout describes.
    pub fn matches(&self, params: &LatentFactors) -> bool {
        params.object_types.len() == self.n_otypes()
            && params
                .object_types
                .iter()
                .zip(&self.n_objects)
                .all(|(p, &n)| p.bias.len() == n && p.factors.dim() == (n, self.k))
    }

    pub fn flatten(&self, params: &LatentFactors) -> Result<Array1<f64>, LayoutError> {
        if !self.matches(params) {
            return Err(LayoutError::ShapeMismatch {
                expected: self.describe(),
                found: describe_params(params),
            });
        }
        let mut flat = Vec::with_capacity(self.total);
        flat.push(params.mu);
        for p in &params.object_types {
            flat.extend(p.bias.iter());
        }
        for p in &params.object_types {
            flat.extend(p.factors.iter());
        }
        Ok(Array1::from_vec(flat))
    }

    pub fn unflatten(&self, flat: ArrayView1<f64>) -> Result<LatentFactors, LayoutError> {
        if flat.len() != self.total {
            return Err(LayoutError::ShapeMismatch {
                expected: format!("{} parameters", self.total),
                found: format!("{} parameters", flat.len()),
            });
        }
        let mut object_types = Vec::with_capacity(self.n_otypes());
        for (otype, &n) in self.n_objects.iter().enumerate() {
            let bias = flat.slice(s![self.bias_range(otype)]).to_owned();
            let factors = Array2::from_shape_vec(
                (n, self.k),
                flat.slice(s![self.factor_range(otype)]).to_vec(),
            )?;
            object_types.push(ObjectTypeParameters { bias, factors });
        }
        Ok(LatentFactors {
            mu: flat[0],
            object_types,
        })
    }

    fn describe(&self) -> String {
        format!("objects {:?} with rank {}", self.n_objects, self.k)
    }
}

fn describe_params(params: &LatentFactors) -> String {
    let ranks: Vec<usize> = params.object_types.iter().map(|p| p.factors.ncols()).collect();
    format!("objects {:?} with ranks {:?}", params.n_objects(), ranks)
}

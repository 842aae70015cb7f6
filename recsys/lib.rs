#![deny(dead_code)]
#![deny(unused_imports)]
//! Latent-factor score prediction over discrete events.
//!
//! Events are tuples of interacting objects (a user and an item, say) paired with an
//! observed score. [`data::EventTable`] remaps the caller's identifiers onto dense
//! indices, and [`model::LatentFactorModel`] fits bias terms plus low-rank factors to
//! the scores with BFGS.

pub mod data;
pub mod estimate;
pub mod idmap;
pub mod io;
pub mod layout;
pub mod metrics;
pub mod model;
pub mod objective;
pub mod observer;

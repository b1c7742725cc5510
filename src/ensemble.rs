//! # Ensemble of Expanded Ensembles (EEXE)
//!
//! Several replicas sample overlapping sub-ranges of one global state space;
//! their local weight estimates are periodically merged into a single global
//! profile via piecewise-averaged finite differences and redistributed to the
//! replicas that have not equilibrated yet.
mod combine;
mod eexe;

pub use combine::*;
pub use eexe::*;

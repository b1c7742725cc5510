//! Typed simulation parameters and their validation
//!
//! The original tooling this crate models ingests a flat parameter mapping.
//! Here the mapping becomes two explicit records: [`WangLandauParams`] for a
//! single replica and [`EexeParams`] for an ensemble run. A missing required
//! key surfaces as a deserialization error, invalid values are caught by
//! [`WangLandauParams::validate`] before any simulation state exists.

use std::num::NonZeroUsize;

#[cfg(feature = "serde_support")]
use serde::{Serialize, Deserialize};

/// List of possible configuration errors
///
/// All of these are raised eagerly at construction time,
/// never in the middle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub enum ParamError {
    /// `wl_delta` has to be finite and positive
    InvalidWlDelta,
    /// `wl_delta_cutoff` has to be finite and positive
    InvalidWlDeltaCutoff,
    /// `wl_ratio` has to fulfill `0.0 < wl_ratio < 1.0`
    InvalidWlRatio,
    /// `wl_scale` has to fulfill `0.0 < wl_scale < 1.0`
    InvalidWlScale,
    /// The ground-truth free-energy profile must contain at least one state
    EmptyProfile,
    /// Every entry of the ground-truth free-energy profile has to be finite
    NonFiniteProfile,
    /// # The replica sub-ranges do not fit the global profile
    /// `n_sub = n_states - s * (n_sim - 1)` has to be at least 1,
    /// otherwise the last replica would cover an empty range
    SubrangeTooSmall,
    /// # A pair of adjacent states is covered by no replica
    /// Contains the global index of the left state of the uncovered pair.
    /// Without coverage the global profile cannot be combined
    CoverageGap {
        /// left state of the uncovered adjacency
        state: usize
    },
}

/// # Parameters of a single-replica Wang-Landau run
///
/// `n_steps` is the number of steps performed per call to
/// [`run`](crate::wang_landau::WangLandauWalker::run) - for an ensemble this
/// is the length of one iteration's run phase.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct WangLandauParams {
    /// How many steps to perform per run phase
    pub n_steps: NonZeroUsize,
    /// Initial Wang-Landau increment
    pub wl_delta: f64,
    /// The weights count as equilibrated once the increment
    /// has decayed below this cutoff
    pub wl_delta_cutoff: f64,
    /// Flatness threshold: a histogram is flat if every count lies
    /// within the ratio band `(wl_ratio, 1/wl_ratio)` around the mean
    pub wl_ratio: f64,
    /// Factor the increment is multiplied with whenever
    /// the histogram is found flat
    pub wl_scale: f64,
    /// Emit detailed progress while running
    #[cfg_attr(feature = "serde_support", serde(default))]
    pub verbose: bool,
}

impl WangLandauParams {
    /// # Check all parameter values
    /// * `Err` contains the first offending parameter
    /// * `n_steps` cannot be invalid - zero is unrepresentable
    pub fn validate(&self) -> Result<(), ParamError> {
        if !self.wl_delta.is_finite() || self.wl_delta <= 0.0 {
            return Err(ParamError::InvalidWlDelta);
        }
        if !self.wl_delta_cutoff.is_finite() || self.wl_delta_cutoff <= 0.0 {
            return Err(ParamError::InvalidWlDeltaCutoff);
        }
        if !(self.wl_ratio > 0.0 && self.wl_ratio < 1.0) {
            return Err(ParamError::InvalidWlRatio);
        }
        if !(self.wl_scale > 0.0 && self.wl_scale < 1.0) {
            return Err(ParamError::InvalidWlScale);
        }
        Ok(())
    }
}

/// # Parameters of an Ensemble of Expanded Ensembles run
///
/// Extends [`WangLandauParams`] with the ensemble geometry and the
/// weight-combination switches. When deserialized, the single-replica
/// parameters are flattened into the same mapping, matching the flat
/// parameter dictionaries the original tooling consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct EexeParams {
    /// Single-replica parameters, shared by every replica
    #[cfg_attr(feature = "serde_support", serde(flatten))]
    pub wl: WangLandauParams,
    /// Number of replicas
    pub n_sim: NonZeroUsize,
    /// Maximum number of run-combine iterations
    pub n_iters: NonZeroUsize,
    /// Stride between the first states of adjacent replica ranges
    pub s: usize,
    /// Write combined weights back into unequilibrated replicas
    #[cfg_attr(feature = "serde_support", serde(default))]
    pub w_combine: bool,
    /// Rescale histograms of replicas whose weights were modified,
    /// so the flatness criterion is not spuriously reset
    #[cfg_attr(feature = "serde_support", serde(default))]
    pub hist_correction: bool,
}

impl EexeParams {
    /// # Check all parameter values
    /// Geometry checks that need the number of states happen when the
    /// ensemble is constructed.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.wl.validate()
    }
}

/// A ground-truth profile has to be non-empty and finite everywhere
pub(crate) fn check_profile(f_true: &[f64]) -> Result<(), ParamError> {
    if f_true.is_empty() {
        return Err(ParamError::EmptyProfile);
    }
    if f_true.iter().any(|val| !val.is_finite()) {
        return Err(ParamError::NonFiniteProfile);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_wl() -> WangLandauParams {
        WangLandauParams {
            n_steps: NonZeroUsize::new(1000).unwrap(),
            wl_delta: 1.0,
            wl_delta_cutoff: 0.01,
            wl_ratio: 0.8,
            wl_scale: 0.5,
            verbose: false,
        }
    }

    #[test]
    fn validation_catches_bad_values() {
        assert_eq!(valid_wl().validate(), Ok(()));

        let mut p = valid_wl();
        p.wl_delta = 0.0;
        assert_eq!(p.validate(), Err(ParamError::InvalidWlDelta));

        let mut p = valid_wl();
        p.wl_delta_cutoff = f64::NAN;
        assert_eq!(p.validate(), Err(ParamError::InvalidWlDeltaCutoff));

        let mut p = valid_wl();
        p.wl_ratio = 1.0;
        assert_eq!(p.validate(), Err(ParamError::InvalidWlRatio));

        let mut p = valid_wl();
        p.wl_scale = -0.5;
        assert_eq!(p.validate(), Err(ParamError::InvalidWlScale));
    }

    #[test]
    fn profile_checks() {
        assert_eq!(check_profile(&[]), Err(ParamError::EmptyProfile));
        assert_eq!(
            check_profile(&[0.0, f64::INFINITY]),
            Err(ParamError::NonFiniteProfile)
        );
        assert_eq!(check_profile(&[0.0, 1.5, -2.0]), Ok(()));
    }

    #[cfg(feature = "serde_support")]
    #[test]
    fn missing_required_key_is_an_error() {
        // wl_scale is absent
        let incomplete = r#"{
            "n_steps": 1000,
            "wl_delta": 1.0,
            "wl_delta_cutoff": 0.01,
            "wl_ratio": 0.8
        }"#;
        assert!(serde_json::from_str::<WangLandauParams>(incomplete).is_err());
    }

    #[cfg(feature = "serde_support")]
    #[test]
    fn optional_keys_default_to_false() {
        let flat = r#"{
            "n_steps": 1000,
            "wl_delta": 1.0,
            "wl_delta_cutoff": 0.01,
            "wl_ratio": 0.8,
            "wl_scale": 0.5,
            "n_sim": 4,
            "n_iters": 20,
            "s": 1
        }"#;
        let params: EexeParams = serde_json::from_str(flat).unwrap();
        assert!(!params.wl.verbose);
        assert!(!params.w_combine);
        assert!(!params.hist_correction);
        assert_eq!(params.n_sim.get(), 4);
        assert_eq!(params.wl.n_steps.get(), 1000);
    }

    #[cfg(feature = "serde_support")]
    #[test]
    fn zero_steps_is_rejected_at_ingestion() {
        let zero_steps = r#"{
            "n_steps": 0,
            "wl_delta": 1.0,
            "wl_delta_cutoff": 0.01,
            "wl_ratio": 0.8,
            "wl_scale": 0.5
        }"#;
        assert!(serde_json::from_str::<WangLandauParams>(zero_steps).is_err());
    }
}

use{
    super::helper::*,
    crate::params::*,
    log::debug,
    rand::{Rng, distr::{Distribution, weighted::WeightedIndex}},
    std::{io::Write, num::NonZeroUsize}
};

#[cfg(feature = "serde_support")]
use serde::{Serialize, Deserialize};

/// # Single-replica mock Wang-Landau sampler
///
/// Owns one Markov chain over a contiguous range of alchemical states and a
/// fixed ground-truth free-energy profile over that range. Every step moves
/// the chain according to the Boltzmann weight of the current biased profile,
/// reinforces the visited state, and adapts the Wang-Landau increment whenever
/// the visit histogram flattens out. Once the increment has decayed below
/// `wl_delta_cutoff` the weights count as equilibrated; the chain keeps
/// sampling, but the increment schedule and the frozen bias snapshot are
/// final.
///
/// The working profile always obeys `f_current = f_true - g` and the bias is
/// re-anchored after every step, so `g[0] == 0` holds exactly.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct WangLandauWalker<R>
{
    rng: R,
    params: WangLandauParams,
    f_true: Vec<f64>,
    f_current: Vec<f64>,
    pub(crate) g: Vec<f64>,
    pub(crate) hist: Vec<f64>,
    state: usize,
    traj: Vec<usize>,
    weight_drift: Vec<f64>,
    wl_delta: f64,
    equilibrated: bool,
    equil_step: Option<usize>,
    g_frozen: Option<Vec<f64>>,
    step_count: usize,
    accepted_steps: usize,
    rejected_steps: usize,
}

impl<R> WangLandauWalker<R>
where R: Rng
{
    /// # Create a new walker
    /// * `f_true`: ground-truth free-energy profile of the states this
    ///   replica covers - read-only from here on
    /// * the chain starts unbiased (`f_current = f_true`) in state 0,
    ///   with zeroed bias and histogram
    /// * `rng` should be seeded independently per replica, so that parallel
    ///   trajectories are uncorrelated and runs are reproducible
    pub fn new(params: WangLandauParams, f_true: Vec<f64>, rng: R) -> Result<Self, ParamError>
    {
        params.validate()?;
        check_profile(&f_true)?;
        let n_states = f_true.len();
        Ok(
            Self{
                rng,
                wl_delta: params.wl_delta,
                params,
                f_current: f_true.clone(),
                f_true,
                g: vec![0.0; n_states],
                hist: vec![0.0; n_states],
                state: 0,
                traj: Vec::new(),
                weight_drift: Vec::new(),
                equilibrated: false,
                equil_step: None,
                g_frozen: None,
                step_count: 0,
                accepted_steps: 0,
                rejected_steps: 0,
            }
        )
    }

    /// # Perform `n_steps` Wang-Landau steps
    /// * continues from the current chain state - never resets anything
    /// * independent of every other replica, safe to call from a
    ///   parallel run phase
    pub fn run(&mut self, n_steps: NonZeroUsize)
    {
        for _ in 0..n_steps.get() {
            self.step();
        }
    }

    fn step(&mut self)
    {
        self.step_count += 1;
        self.traj.push(self.state);

        let prob = free_energy_to_prob(&self.f_current);
        let proposal = WeightedIndex::new(&prob)
            .expect("occupation probabilities are positive and finite");
        let proposed = proposal.sample(&mut self.rng);

        let acceptance = self.acceptance_prob(proposed);
        let visited = if self.rng.random::<f64>() < acceptance {
            self.accepted_steps += 1;
            self.state = proposed;
            proposed
        } else {
            // the occupied state is still reinforced
            self.rejected_steps += 1;
            self.state
        };

        self.g[visited] -= self.wl_delta;
        self.f_current[visited] += self.wl_delta;
        self.hist[visited] += 1.0;

        // state 0 stays the zero reference
        let anchor = self.g[0];
        self.g.iter_mut()
            .for_each(|val| *val -= anchor);

        self.weight_drift.push(self.g[self.g.len() - 1] - self.g[0]);

        if !self.equilibrated {
            self.check_flatness();
            if self.wl_delta < self.params.wl_delta_cutoff {
                self.equilibrated = true;
                self.equil_step = Some(self.step_count);
                self.g_frozen = Some(self.g.clone());
                debug!("weights equilibrated after {} steps", self.step_count);
            }
        }
    }

    /// Metropolis criterion with kT = 1 and ΔU = 0
    fn acceptance_prob(&self, proposed: usize) -> f64
    {
        let delta = self.f_current[proposed] - self.f_current[self.state];
        if delta <= 0.0 {
            1.0
        } else {
            (-delta).exp()
        }
    }

    fn check_flatness(&mut self)
    {
        if histogram_is_flat(&self.hist, self.params.wl_ratio) {
            self.wl_delta *= self.params.wl_scale;
            self.hist.iter_mut()
                .for_each(|count| *count = 0.0);
            debug!("flat histogram - new Wang-Landau increment: {:e}", self.wl_delta);
        }
    }

    /// Overwrite the bias with a combined estimate.
    /// Keeps `f_current = f_true - g` intact.
    pub(crate) fn set_bias(&mut self, g: Vec<f64>)
    {
        debug_assert_eq!(g.len(), self.g.len());
        self.g = g;
        self.resync_free_energy();
    }

    /// Restore `f_current = f_true - g` after a run phase
    pub(crate) fn resync_free_energy(&mut self)
    {
        self.f_current.iter_mut()
            .zip(self.f_true.iter().zip(self.g.iter()))
            .for_each(|(current, (&truth, &bias))| *current = truth - bias);
    }

    /// Histogram correction `N' = trunc(N * exp(-(g' - g)))` - approximates
    /// the effect of a weight change on the observed counts, so the flatness
    /// criterion is not spuriously reset. Has to be called *before* the new
    /// bias is written.
    pub(crate) fn rescale_histogram(&mut self, new_bias: &[f64])
    {
        debug_assert_eq!(new_bias.len(), self.hist.len());
        self.hist.iter_mut()
            .zip(new_bias.iter().zip(self.g.iter()))
            .for_each(
                |(count, (&new, &old))|
                {
                    *count = (*count * (-(new - old)).exp()).trunc();
                }
            );
    }
}

impl<R> WangLandauWalker<R>
{
    /// Number of states this replica covers
    #[inline(always)]
    pub fn n_states(&self) -> usize
    {
        self.f_true.len()
    }

    /// Accumulated bias vector `g`, anchored so that `g[0] == 0`
    #[inline(always)]
    pub fn bias(&self) -> &[f64]
    {
        &self.g
    }

    /// Ground-truth free-energy profile of this replica's range
    #[inline(always)]
    pub fn true_free_energy(&self) -> &[f64]
    {
        &self.f_true
    }

    /// Current working estimate `f_current = f_true - g`
    #[inline(always)]
    pub fn current_free_energy(&self) -> &[f64]
    {
        &self.f_current
    }

    /// Visit counts since the last flatness-triggered reset
    #[inline(always)]
    pub fn histogram(&self) -> &[f64]
    {
        &self.hist
    }

    /// Current Wang-Landau increment
    #[inline(always)]
    pub fn wl_delta(&self) -> f64
    {
        self.wl_delta
    }

    /// Index of the currently occupied state, local to this replica
    #[inline(always)]
    pub fn current_state(&self) -> usize
    {
        self.state
    }

    /// How many steps were performed in total
    #[inline(always)]
    pub fn step_count(&self) -> usize
    {
        self.step_count
    }

    /// Have the weights equilibrated? Monotone - never reverts to false
    #[inline(always)]
    pub fn is_equilibrated(&self) -> bool
    {
        self.equilibrated
    }

    /// Step count at which the increment fell below the cutoff.
    /// Set once, never overwritten
    #[inline(always)]
    pub fn equilibration_step(&self) -> Option<usize>
    {
        self.equil_step
    }

    /// Bias snapshot captured the instant equilibration was detected
    #[inline(always)]
    pub fn frozen_bias(&self) -> Option<&[f64]>
    {
        self.g_frozen.as_deref()
    }

    /// State-space trajectory, one entry per step
    #[inline(always)]
    pub fn trajectory(&self) -> &[usize]
    {
        &self.traj
    }

    /// Weight drift `g[last] - g[0]` recorded after every step
    #[inline(always)]
    pub fn weight_drift(&self) -> &[f64]
    {
        &self.weight_drift
    }

    /// Parameters this walker was created with
    #[inline(always)]
    pub fn params(&self) -> &WangLandauParams
    {
        &self.params
    }

    /// # Acceptance rate
    /// Fraction of performed steps that were accepted
    pub fn fraction_accepted(&self) -> f64
    {
        let total = self.accepted_steps + self.rejected_steps;
        if total == 0 {
            f64::NAN
        } else {
            self.accepted_steps as f64 / total as f64
        }
    }

    /// Write a summary of the current sampler state
    pub fn write_log<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error>
    {
        writeln!(
            writer,
            "#steps: {}\n#accepted: {}\n#rejected: {}\n#acceptance_fraction: {}",
            self.step_count,
            self.accepted_steps,
            self.rejected_steps,
            self.fraction_accepted()
        )?;
        writeln!(
            writer,
            "#wl_delta: {:e}\n#equilibrated: {}\n#equilibration_step: {:?}",
            self.wl_delta,
            self.equilibrated,
            self.equil_step
        )
    }
}

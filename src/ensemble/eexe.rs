use{
    super::combine::*,
    crate::{params::*, wang_landau::*},
    log::{debug, info},
    rand::{Rng, SeedableRng},
    rayon::prelude::*,
    std::{io::Write, ops::Range}
};

#[cfg(feature = "serde_support")]
use serde::{Serialize, Deserialize};

/// # Ensemble of Expanded Ensembles
///
/// Drives `n_sim` [`WangLandauWalker`]s over overlapping sub-ranges of a
/// global state space: replica `i` covers the global states
/// `[i * s, i * s + n_sub - 1]` with `n_sub = n_states - s * (n_sim - 1)`.
/// Each iteration runs every replica for `n_steps` steps (in parallel - the
/// replicas share no state), then merges the local weight estimates into one
/// global profile and redistributes it to the replicas that have not yet
/// equilibrated. The run stops early once every replica is independently
/// equilibrated; exhausting `n_iters` is a normal stop as well.
///
/// ## Tipp
/// Use the short hand [`Eexe`]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct EnsembleOfExpandedEnsembles<R>
{
    params: EexeParams,
    f_true: Vec<f64>,
    n_sub: usize,
    pub(crate) walkers: Vec<WangLandauWalker<R>>,
    equil_time: Vec<Option<usize>>,
    global_profile: Option<Vec<f64>>,
    rmse: Option<f64>,
    iterations_completed: usize,
}

/// Short for [`EnsembleOfExpandedEnsembles`]
pub type Eexe<R> = EnsembleOfExpandedEnsembles<R>;

impl<R> Eexe<R>
where R: Rng + SeedableRng + Send
{
    /// # Create a new ensemble
    /// * `f_true`: global ground-truth free-energy profile, sliced
    ///   per replica using the stride `s`
    /// * every replica receives its own generator seeded from `seeding_rng`,
    ///   so the trajectories are uncorrelated and a run is reproducible from
    ///   one seed
    ///
    /// All geometry is validated here: `n_sub < 1` and any pair of adjacent
    /// global states covered by no replica are configuration errors - nothing
    /// is simulated in that case.
    pub fn new<R2>(
        params: EexeParams,
        f_true: Vec<f64>,
        seeding_rng: &mut R2
    ) -> Result<Self, ParamError>
    where R2: Rng
    {
        params.validate()?;
        check_profile(&f_true)?;

        let n_states = f_true.len();
        let n_sim = params.n_sim.get();
        let n_sub = params.s.checked_mul(n_sim - 1)
            .and_then(|span| n_states.checked_sub(span))
            .filter(|&len| len >= 1)
            .ok_or(ParamError::SubrangeTooSmall)?;

        for state in 0..n_states.saturating_sub(1) {
            let covered = (0..n_sim)
                .any(
                    |replica|
                    {
                        let start = replica * params.s;
                        state >= start && state + 1 < start + n_sub
                    }
                );
            if !covered {
                return Err(ParamError::CoverageGap{ state });
            }
        }

        let walkers = (0..n_sim)
            .map(
                |replica|
                {
                    let start = replica * params.s;
                    let sub_profile = f_true[start..start + n_sub].to_vec();
                    WangLandauWalker::new(
                        params.wl,
                        sub_profile,
                        R::from_rng(seeding_rng)
                    )
                }
            )
            .collect::<Result<Vec<_>, _>>()?;

        Ok(
            Self{
                params,
                f_true,
                n_sub,
                walkers,
                equil_time: vec![None; n_sim],
                global_profile: None,
                rmse: None,
                iterations_completed: 0,
            }
        )
    }

    /// # Run the ensemble to convergence or iteration budget
    ///
    /// Per iteration: run all replicas (parallel, no shared state), join,
    /// then combine the weights. The combination phase is a strict barrier -
    /// it observes every replica's fully updated state and writes the new
    /// bias vectors back before the next run phase begins. With `w_combine`
    /// disabled the global profile is still computed for diagnostics, the
    /// replicas are left untouched though.
    ///
    /// Afterwards the RMSE between the last combined global profile and the
    /// ground truth is recorded - a diagnostic, not a control signal.
    pub fn run(&mut self)
    {
        let n_steps = self.params.wl.n_steps;
        let n_iters = self.params.n_iters.get();

        for iteration in 0..n_iters {
            info!("iteration {} / {}", iteration + 1, n_iters);

            self.walkers
                .par_iter_mut()
                .for_each(
                    |walker|
                    {
                        walker.run(n_steps);
                        walker.resync_free_energy();
                    }
                );

            for (time, walker) in self.equil_time.iter_mut().zip(self.walkers.iter()) {
                *time = walker.equilibration_step();
            }

            if self.params.wl.verbose {
                for replica in 0..self.walkers.len() {
                    let range = self.state_range(replica);
                    info!(
                        "  weights of states {} to {}: {:?}",
                        range.start,
                        range.end - 1,
                        self.walkers[replica].bias()
                    );
                }
            }

            let combined = self.combine_weights();

            if self.all_equilibrated() {
                info!("the weights have been equilibrated in all replicas");
                for (replica, time) in self.equil_time.iter().enumerate() {
                    if let Some(steps) = time {
                        let range = self.state_range(replica);
                        info!(
                            "  equilibration time of states {} to {}: {} steps",
                            range.start,
                            range.end - 1,
                            steps
                        );
                    }
                }
                self.global_profile = Some(combined.global);
                self.iterations_completed = iteration + 1;
                break;
            }

            debug!(
                "current Wang-Landau increments: {:?}",
                self.walkers.iter()
                    .map(WangLandauWalker::wl_delta)
                    .collect::<Vec<_>>()
            );

            if self.params.w_combine {
                self.apply_combined(combined.replica_bias);
            }
            self.global_profile = Some(combined.global);
            self.iterations_completed = iteration + 1;
        }

        if let Some(global) = self.global_profile.as_deref() {
            let rmse = calc_rmse(global, &self.f_true);
            info!("RMSE of the whole-range weights: {:.3} kT", rmse);
            self.rmse = Some(rmse);
        }
    }

    /// Write the combined bias into every unequilibrated replica.
    /// Equilibrated replicas are never touched - their converged estimate
    /// stays frozen.
    fn apply_combined(&mut self, replica_bias: Vec<Vec<f64>>)
    {
        let hist_correction = self.params.hist_correction;
        for (walker, bias) in self.walkers.iter_mut().zip(replica_bias) {
            if walker.is_equilibrated() {
                continue;
            }
            if hist_correction {
                walker.rescale_histogram(&bias);
            }
            walker.set_bias(bias);
        }
    }

    /// # Merge the current per-replica weight estimates
    ///
    /// Read-only: returns an immutable snapshot of the combined per-replica
    /// biases and the global profile. Calling it twice without an
    /// intervening run phase yields identical results.
    pub fn combine_weights(&self) -> CombinedWeights
    {
        let biases: Vec<&[f64]> = self.walkers.iter()
            .map(WangLandauWalker::bias)
            .collect();
        let frozen: Vec<Option<&[f64]>> = self.walkers.iter()
            .map(WangLandauWalker::frozen_bias)
            .collect();
        combine_weights(&biases, &frozen, self.params.s, self.f_true.len())
    }
}

impl<R> Eexe<R>
{
    /// The replicas in range order
    #[inline(always)]
    pub fn walkers(&self) -> &[WangLandauWalker<R>]
    {
        &self.walkers
    }

    /// Number of states of the global profile
    #[inline(always)]
    pub fn n_states(&self) -> usize
    {
        self.f_true.len()
    }

    /// Number of states each replica covers
    #[inline(always)]
    pub fn n_sub(&self) -> usize
    {
        self.n_sub
    }

    /// Global state range of the given replica
    pub fn state_range(&self, replica: usize) -> Range<usize>
    {
        let start = replica * self.params.s;
        start..start + self.n_sub
    }

    /// Global ground-truth free-energy profile
    #[inline(always)]
    pub fn true_free_energy(&self) -> &[f64]
    {
        &self.f_true
    }

    /// Last combined global profile, if a combination step ran already
    #[inline(always)]
    pub fn global_profile(&self) -> Option<&[f64]>
    {
        self.global_profile.as_deref()
    }

    /// RMSE between the last combined global profile and the ground truth.
    /// Available after [`run`](Self::run) finished
    #[inline(always)]
    pub fn rmse(&self) -> Option<f64>
    {
        self.rmse
    }

    /// Per-replica equilibration step counts, `None` where not yet
    /// equilibrated
    #[inline(always)]
    pub fn equilibration_times(&self) -> &[Option<usize>]
    {
        &self.equil_time
    }

    /// True once every replica is independently equilibrated
    pub fn all_equilibrated(&self) -> bool
    {
        self.walkers.iter()
            .all(WangLandauWalker::is_equilibrated)
    }

    /// How many iterations the last [`run`](Self::run) performed
    #[inline(always)]
    pub fn iterations_completed(&self) -> usize
    {
        self.iterations_completed
    }

    /// Parameters this ensemble was created with
    #[inline(always)]
    pub fn params(&self) -> &EexeParams
    {
        &self.params
    }

    /// Write a summary of every replica plus the global diagnostics
    pub fn write_log<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error>
    {
        writeln!(
            writer,
            "#n_states: {}\n#n_sub: {}\n#iterations_completed: {}",
            self.n_states(),
            self.n_sub,
            self.iterations_completed
        )?;
        for (replica, walker) in self.walkers.iter().enumerate() {
            let range = self.state_range(replica);
            writeln!(writer, "#replica {} - states {} to {}", replica, range.start, range.end - 1)?;
            walker.write_log(&mut writer)?;
        }
        writeln!(writer, "#rmse: {:?}", self.rmse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_pcg::Pcg64;
    use std::num::NonZeroUsize;

    fn params(n_sim: usize, s: usize) -> EexeParams {
        EexeParams {
            wl: WangLandauParams {
                n_steps: NonZeroUsize::new(2000).unwrap(),
                wl_delta: 1.0,
                wl_delta_cutoff: 0.01,
                wl_ratio: 0.8,
                wl_scale: 0.5,
                verbose: false,
            },
            n_sim: NonZeroUsize::new(n_sim).unwrap(),
            n_iters: NonZeroUsize::new(50).unwrap(),
            s,
            w_combine: true,
            hist_correction: false,
        }
    }

    #[test]
    fn geometry_is_validated_eagerly() {
        let mut rng = Pcg64::seed_from_u64(1);

        // n_sub = 5 - 3 * 2 = -1
        let err = Eexe::<Pcg64>::new(params(3, 3), vec![0.0; 5], &mut rng).err();
        assert_eq!(err, Some(ParamError::SubrangeTooSmall));

        // n_sub = 1: both ranges are single states, every adjacency uncovered
        let err = Eexe::<Pcg64>::new(params(2, 4), vec![0.0; 5], &mut rng).err();
        assert_eq!(err, Some(ParamError::CoverageGap{ state: 0 }));
    }

    #[test]
    fn ranges_overlap_as_configured() {
        let mut rng = Pcg64::seed_from_u64(2);
        let eexe = Eexe::<Pcg64>::new(params(2, 2), vec![0.0; 5], &mut rng)
            .unwrap();
        assert_eq!(eexe.n_states(), 5);
        assert_eq!(eexe.n_sub(), 3);
        assert_eq!(eexe.state_range(0), 0..3);
        assert_eq!(eexe.state_range(1), 2..5);
        assert_eq!(eexe.walkers().len(), 2);
        assert!(!eexe.all_equilibrated());
    }

    #[test]
    fn replicas_receive_independent_streams() {
        let mut rng = Pcg64::seed_from_u64(3);
        let mut eexe = Eexe::<Pcg64>::new(params(2, 0), vec![0.0; 3], &mut rng)
            .unwrap();
        let steps = NonZeroUsize::new(200).unwrap();
        for walker in eexe.walkers.iter_mut() {
            walker.run(steps);
        }
        // identical sub-ranges, distinct trajectories
        assert_ne!(
            eexe.walkers[0].trajectory(),
            eexe.walkers[1].trajectory()
        );
    }

    #[test]
    fn combine_weights_matches_fixture_through_the_ensemble() {
        let mut rng = Pcg64::seed_from_u64(4);
        let mut eexe = Eexe::<Pcg64>::new(params(2, 2), vec![0.0; 5], &mut rng)
            .unwrap();
        eexe.walkers[0].g = vec![0.0, 1.0, 2.0];
        eexe.walkers[1].g = vec![0.0, 0.5, 1.5];

        let combined = eexe.combine_weights();
        assert_eq!(combined.global, vec![0.0, 1.0, 2.0, 2.5, 3.5]);

        // no run phase in between - identical result
        assert_eq!(eexe.combine_weights(), combined);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn ensemble_converges_on_a_uniform_profile() {
        let mut rng = Pcg64::seed_from_u64(2239790);
        let mut eexe = Eexe::<Pcg64>::new(params(2, 2), vec![0.0; 5], &mut rng)
            .unwrap();
        eexe.run();

        assert!(eexe.all_equilibrated());
        assert!(eexe.equilibration_times().iter().all(Option::is_some));
        let global = eexe.global_profile().unwrap();
        assert_eq!(global.len(), 5);
        assert_eq!(global[0], 0.0);
        let rmse = eexe.rmse().unwrap();
        assert!(rmse < 1.0, "rmse too large: {rmse}");
        assert!(eexe.iterations_completed() < 50);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn disabled_combination_still_reports_diagnostics() {
        let mut rng = Pcg64::seed_from_u64(5);
        let mut p = params(2, 2);
        p.w_combine = false;
        p.n_iters = NonZeroUsize::new(2).unwrap();
        let mut eexe = Eexe::<Pcg64>::new(p, vec![0.0; 5], &mut rng)
            .unwrap();
        eexe.run();

        assert!(eexe.global_profile().is_some());
        assert!(eexe.rmse().is_some());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn histogram_correction_keeps_counts_integral() {
        let mut rng = Pcg64::seed_from_u64(6);
        let mut p = params(2, 2);
        p.hist_correction = true;
        p.n_iters = NonZeroUsize::new(3).unwrap();
        // stay far from equilibration so the correction path runs
        p.wl.wl_delta_cutoff = 1e-12;
        let mut eexe = Eexe::<Pcg64>::new(p, vec![0.0, 0.5, 1.0, 0.5, 0.0], &mut rng)
            .unwrap();
        eexe.run();

        for walker in eexe.walkers() {
            assert!(
                walker.histogram()
                    .iter()
                    .all(|&count| count >= 0.0 && count.fract() == 0.0)
            );
        }
    }
}

use average::{Estimate, Mean};

#[cfg(feature = "serde_support")]
use serde::{Serialize, Deserialize};

/// # Result of one weight-combination step
///
/// An immutable snapshot: the coordinator decides whether and how to apply
/// it. Recomputed from the current replica biases every time, never
/// persisted between combination steps.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde_support", derive(Serialize, Deserialize))]
pub struct CombinedWeights
{
    /// Per-replica bias vectors after combination. Unequilibrated replicas
    /// receive their slice of the global profile, re-anchored to their own
    /// first state; equilibrated replicas receive their frozen snapshot
    /// unchanged
    pub replica_bias: Vec<Vec<f64>>,
    /// Combined global profile over all states, anchored so that
    /// `global[0] == 0`
    pub global: Vec<f64>,
}

/// First differences between adjacent local weights
pub(crate) fn first_differences(values: &[f64]) -> Vec<f64>
{
    values.windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect()
}

/// # Merge per-replica weight estimates into one global profile
///
/// For every pair of adjacent global states the first differences of all
/// replicas covering both states are averaged; the global profile is the
/// cumulative sum of the averaged differences, anchored at state 0. Replica
/// `j` covers the global states `[j * stride, j * stride + biases[j].len() - 1]`.
///
/// `frozen[j]` carries the frozen snapshot of an equilibrated replica - its
/// output bias is that snapshot, excluded from further correction.
///
/// Range coverage is validated when the ensemble is constructed; a global
/// adjacency without any contributing replica cannot occur here.
pub(crate) fn combine_weights(
    biases: &[&[f64]],
    frozen: &[Option<&[f64]>],
    stride: usize,
    n_states: usize,
) -> CombinedWeights
{
    let dg_adjacent: Vec<Vec<f64>> = biases.iter()
        .map(|bias| first_differences(bias))
        .collect();

    let mut global = Vec::with_capacity(n_states);
    global.push(0.0);

    for pair in 0..n_states.saturating_sub(1) {
        let mut combined = Mean::new();
        let mut contributors = 0_usize;
        for (replica, dg) in dg_adjacent.iter().enumerate() {
            let start = replica * stride;
            if pair >= start && pair + 1 < start + biases[replica].len() {
                combined.add(dg[pair - start]);
                contributors += 1;
            }
        }
        debug_assert!(
            contributors > 0,
            "adjacency {} -> {} is covered by no replica",
            pair,
            pair + 1
        );
        let last = *global.last()
            .expect("global profile starts anchored");
        global.push(last + combined.mean());
    }

    let replica_bias = biases.iter()
        .zip(frozen.iter())
        .enumerate()
        .map(
            |(replica, (local, snapshot))|
            {
                match snapshot {
                    Some(frozen_bias) => frozen_bias.to_vec(),
                    None => {
                        // every replica keeps its own local zero reference
                        let start = replica * stride;
                        let slice = &global[start..start + local.len()];
                        let anchor = slice[0];
                        slice.iter()
                            .map(|&val| val - anchor)
                            .collect()
                    }
                }
            }
        )
        .collect();

    CombinedWeights{
        replica_bias,
        global,
    }
}

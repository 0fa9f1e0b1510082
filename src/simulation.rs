//! Batch simulation: online policy play versus the offline optimum.
//!
//! Each episode draws `slot_count` distinct item types uniformly (an item
//! arrives at most once), feeds them through a fresh [`SequentialAssigner`]
//! in arrival order, and compares the collected value with the best
//! assignment of the same items found by [`matcher::solve`] with full
//! knowledge of the batch.
//!
//! Episodes run in parallel with rayon. Episode `i` seeds its own `SmallRng`
//! with `seed + i`, so results are deterministic for a given seed regardless
//! of thread count.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::assigner::SequentialAssigner;
use crate::error::{Error, Result};
use crate::matcher;
use crate::types::{PolicyTable, ValueMatrix};

/// Result of one simulated episode.
#[derive(Clone, Debug, PartialEq)]
pub struct EpisodeOutcome {
    /// Item types in arrival order.
    pub arrivals: Vec<usize>,
    /// Slot chosen for each arrival.
    pub slots: Vec<usize>,
    pub online_total: f64,
    pub optimal_total: f64,
    pub fallbacks: usize,
}

impl EpisodeOutcome {
    /// Value lost to deciding online. Not negative for outcomes of
    /// [`simulate_episode`]: its input check guarantees the online placements
    /// are one feasible matching of the same arrivals.
    pub fn regret(&self) -> f64 {
        self.optimal_total - self.online_total
    }
}

/// Aggregate statistics over a batch.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationSummary {
    pub num_episodes: usize,
    pub seed: u64,
    pub slot_count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub mean_optimal: f64,
    pub mean_regret: f64,
    /// Total online value divided by total optimal value.
    pub efficiency: f64,
    pub fallbacks: usize,
}

/// Results of a batch simulation.
pub struct SimulationResult {
    pub outcomes: Vec<EpisodeOutcome>,
    pub summary: SimulationSummary,
    pub elapsed: Duration,
}

/// Reject inputs that cannot produce a full episode.
fn check_inputs(policy: &PolicyTable, values: &ValueMatrix) -> Result<()> {
    let m = policy.slot_count();
    if values.cols() < m {
        return Err(Error::value(format!(
            "value matrix has {} columns, policy has {} slots",
            values.cols(),
            m
        )));
    }
    if values.rows() < m {
        return Err(Error::value(format!(
            "value matrix has {} item rows, an episode needs {} distinct items",
            values.rows(),
            m
        )));
    }
    if values.rows() > policy.type_count() {
        return Err(Error::value(format!(
            "value matrix has {} item rows, policy knows {} types",
            values.rows(),
            policy.type_count()
        )));
    }
    Ok(())
}

/// Play one episode with randomly drawn arrivals.
///
/// Fails with [`Error::Value`] when `values` has fewer columns than the policy
/// has slots, fewer rows than slots, or more rows than the policy has types.
pub fn simulate_episode<R: Rng>(
    policy: &Arc<PolicyTable>,
    values: &ValueMatrix,
    rng: &mut R,
) -> Result<EpisodeOutcome> {
    check_inputs(policy, values)?;
    let m = policy.slot_count();
    let arrivals = rand::seq::index::sample(rng, values.rows(), m).into_vec();

    let mut assigner = SequentialAssigner::new(policy.clone(), None)?;
    let mut slots = Vec::with_capacity(m);
    let mut online_total = 0.0;
    let mut fallbacks = 0;
    for &item in &arrivals {
        let a = assigner.assign_next(item)?;
        online_total += values.try_get(item, a.slot)?;
        fallbacks += a.fallback as usize;
        slots.push(a.slot);
    }
    debug_assert!(assigner.is_finished());

    let optimal_total = if m == 0 {
        0.0
    } else {
        matcher::solve(&values.select_rows(&arrivals))?
    };

    Ok(EpisodeOutcome {
        arrivals,
        slots,
        online_total,
        optimal_total,
        fallbacks,
    })
}

/// Simulate `num_episodes` episodes in parallel.
pub fn simulate_batch(
    policy: &Arc<PolicyTable>,
    values: &ValueMatrix,
    num_episodes: usize,
    seed: u64,
) -> Result<SimulationResult> {
    if num_episodes == 0 {
        return Err(Error::value("num_episodes must be positive"));
    }
    check_inputs(policy, values)?;
    let start = Instant::now();

    let outcomes: Vec<EpisodeOutcome> = (0..num_episodes)
        .into_par_iter()
        .map(|i| {
            let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
            simulate_episode(policy, values, &mut rng)
        })
        .collect::<Result<_>>()?;

    let elapsed = start.elapsed();
    let summary = summarize(&outcomes, seed, policy.slot_count());
    info!(
        episodes = num_episodes,
        mean = summary.mean,
        efficiency = summary.efficiency,
        "simulated batch in {:.2} ms",
        elapsed.as_secs_f64() * 1000.0
    );

    Ok(SimulationResult {
        outcomes,
        summary,
        elapsed,
    })
}

/// Aggregate episode outcomes. `outcomes` must be non-empty.
pub fn summarize(outcomes: &[EpisodeOutcome], seed: u64, slot_count: usize) -> SimulationSummary {
    let n = outcomes.len() as f64;
    let mut totals: Vec<f64> = outcomes.iter().map(|o| o.online_total).collect();

    let sum: f64 = totals.iter().sum();
    let mean = sum / n;
    let variance = totals.iter().map(|&t| (t - mean).powi(2)).sum::<f64>() / n;
    let optimal_sum: f64 = outcomes.iter().map(|o| o.optimal_total).sum();

    totals.sort_unstable_by(f64::total_cmp);
    let min = totals.first().copied().unwrap_or(0.0);
    let max = totals.last().copied().unwrap_or(0.0);
    let median = totals.get(totals.len() / 2).copied().unwrap_or(0.0);

    SimulationSummary {
        num_episodes: outcomes.len(),
        seed,
        slot_count,
        mean,
        std_dev: variance.sqrt(),
        min,
        max,
        median,
        mean_optimal: optimal_sum / n,
        mean_regret: outcomes.iter().map(EpisodeOutcome::regret).sum::<f64>() / n,
        efficiency: if optimal_sum != 0.0 {
            sum / optimal_sum
        } else {
            1.0
        },
        fallbacks: outcomes.iter().map(|o| o.fallbacks).sum(),
    }
}

/// Write a summary as pretty-printed JSON. Creates parent directories.
pub fn save_summary(summary: &SimulationSummary, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(summary)?)?;
    info!(path = %path.display(), "saved simulation summary");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::is_slot_free;

    /// 3 slots, 4 types: each type takes the free slot where it is worth most.
    fn greedy_policy(values: &ValueMatrix) -> Arc<PolicyTable> {
        let m = values.cols();
        let rows: Vec<Vec<i64>> = (0..1u32 << m)
            .map(|mask| {
                (0..values.rows())
                    .map(|t| {
                        (0..m)
                            .filter(|&s| is_slot_free(mask, s))
                            .max_by(|&a, &b| values.get(t, a).total_cmp(&values.get(t, b)))
                            .unwrap_or(0) as i64
                    })
                    .collect()
            })
            .collect();
        Arc::new(PolicyTable::from_rows(&rows).unwrap())
    }

    fn values() -> ValueMatrix {
        ValueMatrix::from_rows(vec![
            vec![5.0, 1.0, 0.0],
            vec![2.0, 8.0, 1.0],
            vec![1.0, 1.0, 9.0],
            vec![4.0, 3.0, 2.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_episode_fills_every_slot() {
        let v = values();
        let policy = greedy_policy(&v);
        let mut rng = SmallRng::seed_from_u64(7);
        let out = simulate_episode(&policy, &v, &mut rng).unwrap();

        assert_eq!(out.arrivals.len(), 3);
        let mut slots = out.slots.clone();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2]);

        let mut items = out.arrivals.clone();
        items.sort_unstable();
        items.dedup();
        assert_eq!(items.len(), 3);

        assert!(out.online_total <= out.optimal_total + 1e-9);
        assert!(out.regret() >= -1e-9);
        assert_eq!(out.fallbacks, 0);
    }

    #[test]
    fn test_batch_deterministic() {
        let v = values();
        let policy = greedy_policy(&v);
        let a = simulate_batch(&policy, &v, 50, 42).unwrap();
        let b = simulate_batch(&policy, &v, 50, 42).unwrap();
        assert_eq!(a.outcomes, b.outcomes);
        assert_eq!(a.summary.num_episodes, 50);
        assert!(a.summary.min <= a.summary.median && a.summary.median <= a.summary.max);
        assert!(a.summary.efficiency > 0.0 && a.summary.efficiency <= 1.0 + 1e-9);
        assert!(a.summary.mean_regret >= -1e-9);
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let v = values();
        let policy = greedy_policy(&v);
        let narrow = ValueMatrix::from_rows(vec![vec![1.0, 2.0]; 4]).unwrap();
        assert!(matches!(
            simulate_batch(&policy, &narrow, 10, 1),
            Err(Error::Value(_))
        ));
        let too_many = ValueMatrix::from_rows(vec![vec![1.0, 2.0, 3.0]; 5]).unwrap();
        assert!(matches!(
            simulate_batch(&policy, &too_many, 10, 1),
            Err(Error::Value(_))
        ));
        assert!(matches!(
            simulate_batch(&policy, &v, 0, 1),
            Err(Error::Value(_))
        ));
    }

    #[test]
    fn test_episode_rejects_too_few_items() {
        let policy = greedy_policy(&ValueMatrix::from_rows(vec![vec![1.0, 2.0]; 2]).unwrap());
        let one_row = ValueMatrix::from_rows(vec![vec![3.0, 4.0]]).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(matches!(
            simulate_episode(&policy, &one_row, &mut rng),
            Err(Error::Value(_))
        ));
    }

    #[test]
    fn test_episode_rejects_too_few_slots_in_values() {
        let v = values();
        let policy = greedy_policy(&v);
        let narrow = ValueMatrix::from_rows(vec![vec![1.0, 2.0]; 4]).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(matches!(
            simulate_episode(&policy, &narrow, &mut rng),
            Err(Error::Value(_))
        ));
    }

    #[test]
    fn test_summarize() {
        let mk = |online: f64, optimal: f64| EpisodeOutcome {
            arrivals: vec![],
            slots: vec![],
            online_total: online,
            optimal_total: optimal,
            fallbacks: 1,
        };
        let s = summarize(&[mk(2.0, 4.0), mk(4.0, 4.0), mk(6.0, 8.0)], 3, 2);
        assert_eq!(s.mean, 4.0);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 6.0);
        assert_eq!(s.median, 4.0);
        assert_eq!(s.efficiency, 0.75);
        assert_eq!(s.fallbacks, 3);
        assert!((s.mean_regret - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_save_summary() {
        let v = values();
        let policy = greedy_policy(&v);
        let r = simulate_batch(&policy, &v, 5, 9).unwrap();
        let path = std::env::temp_dir().join(format!(
            "seqassign_test_{}_summary.json",
            std::process::id()
        ));
        save_summary(&r.summary, &path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["num_episodes"], 5);
        assert_eq!(json["seed"], 9);
        let _ = fs::remove_file(&path);
    }
}

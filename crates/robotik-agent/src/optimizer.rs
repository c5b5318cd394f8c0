//! Per-context adaptive Gaussian search over theta.
//!
//! Each context key owns an [`OptimizerState`] `{mean, sigma, trials}`. A
//! context with fewer than `exploit_after` recorded trials gets a fresh
//! sample `mean + sigma * N(0, 1)` per field, clamped and persisted as a
//! `"sampled"` theta set. Past the threshold the historically best theta is
//! returned instead and nothing new is stored.
//!
//! Reports move the search:
//!
//! | outcome | mean                        | sigma                        |
//! |---------|-----------------------------|------------------------------|
//! | success | `mean += 0.2 (θ − mean)`    | `sigma * 0.9`, ≥ `min_sigma` |
//! | failure | `mean −= 0.02 (θ − mean)`   | `sigma * 1.05`, ≤ `max_sigma`|
//!
//! States live in a [`DashMap`] of per-key mutexes: calls for the same
//! context run one at a time, different contexts proceed in parallel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use robotik_kernel::clamp_theta;
use robotik_memory::{StoreError, ThetaSet, TrialStore};
use robotik_types::{Context, Theta, ThetaClamps, ThetaSource};
use tracing::{debug, info};

use crate::config::OptimizerConfig;

const SUCCESS_RATE: f64 = 0.2;
const FAILURE_RATE: f64 = 0.02;
const SHRINK: f64 = 0.9;
const GROW: f64 = 1.05;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerState {
    pub mean: [f64; Theta::DIM],
    pub sigma: f64,
    pub trials: u64,
}

impl OptimizerState {
    fn new(sigma: f64) -> Self {
        Self {
            mean: [0.0; Theta::DIM],
            sigma,
            trials: 0,
        }
    }
}

/// What [`Optimizer::next_theta`] decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub theta_id: String,
    pub theta: Theta,
    pub source: ThetaSource,
}

pub struct Optimizer {
    config: OptimizerConfig,
    clamps: ThetaClamps,
    rng: Mutex<StdRng>,
    states: DashMap<String, Arc<Mutex<OptimizerState>>>,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig, clamps: ThetaClamps) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            clamps,
            states: DashMap::new(),
        }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<OptimizerState>> {
        self.states
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(OptimizerState::new(self.config.sigma))))
            .clone()
    }

    /// Snapshot of a context's state, if it has been touched.
    pub fn state(&self, context: &Context) -> Option<OptimizerState> {
        let slot = self.states.get(&context.canonical_key())?.clone();
        let state = *lock(&slot);
        Some(state)
    }

    /// Exploit the best stored theta or explore a new sample.
    pub fn next_theta(&self, context: &Context, store: &TrialStore) -> Result<Proposal, StoreError> {
        let key = context.canonical_key();
        let slot = self.slot(&key);
        let state = lock(&slot);

        let stats = store.get_trial_stats(context)?;
        if stats.trials >= self.config.exploit_after
            && let Some(best) = store.get_best_theta(context)?
        {
            info!(context = %key, theta_id = %best.theta_id,
                success_rate = best.performance.success_rate, "exploiting best theta");
            return Ok(Proposal {
                theta_id: best.theta_id,
                theta: best.theta,
                source: ThetaSource::Best,
            });
        }

        let sample = {
            let mut rng = lock(&self.rng);
            let mut values = state.mean;
            for v in &mut values {
                let z: f64 = rng.sample(StandardNormal);
                *v += state.sigma * z;
            }
            values
        };
        let theta = clamp_theta(&Theta::from_array(sample), &self.clamps);
        let set = ThetaSet::new(context.clone(), theta, "sampled");
        store.create_theta_set(&set)?;
        debug!(context = %key, theta_id = %set.theta_id, sigma = state.sigma, "sampled theta");
        Ok(Proposal {
            theta_id: set.theta_id,
            theta: set.theta,
            source: ThetaSource::Sampled,
        })
    }

    /// Fold one outcome into the context's search state.
    pub fn report(&self, context: &Context, theta: &Theta, success: bool) -> OptimizerState {
        let key = context.canonical_key();
        let slot = self.slot(&key);
        let mut state = lock(&slot);
        let x = theta.to_array();
        if success {
            for (m, v) in state.mean.iter_mut().zip(x) {
                *m += SUCCESS_RATE * (v - *m);
            }
            state.sigma = (state.sigma * SHRINK).max(self.config.min_sigma);
        } else {
            for (m, v) in state.mean.iter_mut().zip(x) {
                *m -= FAILURE_RATE * (v - *m);
            }
            state.sigma = (state.sigma * GROW).min(self.config.max_sigma);
        }
        state.trials += 1;
        debug!(context = %key, success, sigma = state.sigma, trials = state.trials, "optimizer updated");
        *state
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use robotik_memory::Trial;
    use robotik_types::{ThetaField, default_theta_clamps};
    use serde_json::Map;

    use super::*;

    fn ctx(square: &str) -> Context {
        Context::for_square(square.parse().unwrap())
    }

    fn optimizer() -> Optimizer {
        Optimizer::new(OptimizerConfig::default(), default_theta_clamps())
    }

    #[test]
    fn explores_within_clamps_and_persists() {
        let store = TrialStore::open_in_memory().unwrap();
        let opt = optimizer();
        let clamps = default_theta_clamps();
        for i in 1..=5 {
            let p = opt.next_theta(&ctx("b3"), &store).unwrap();
            assert_eq!(p.source, ThetaSource::Sampled);
            for field in ThetaField::ALL {
                if let Some(b) = clamps.get(&field) {
                    assert!(b.contains(p.theta.get(field)), "{field} out of bounds");
                }
            }
            assert_eq!(store.count_theta_sets(&ctx("b3")).unwrap(), i);
            let stored = store.get_theta_set(&p.theta_id).unwrap().unwrap();
            assert_eq!(stored.notes, "sampled");
        }
    }

    #[test]
    fn same_seed_same_first_sample() {
        let store = TrialStore::open_in_memory().unwrap();
        let a = optimizer().next_theta(&ctx("c4"), &store).unwrap();
        let b = optimizer().next_theta(&ctx("c4"), &store).unwrap();
        assert_eq!(a.theta, b.theta);
        assert_ne!(a.theta_id, b.theta_id);
    }

    #[test]
    fn exploits_best_after_threshold() {
        let store = TrialStore::open_in_memory().unwrap();
        let opt = optimizer();
        let context = ctx("a2");

        let good = opt.next_theta(&context, &store).unwrap();
        let bad = opt.next_theta(&context, &store).unwrap();
        for i in 0..5 {
            let t = Trial::new(context.clone(), &good.theta_id, good.theta.clone(), i < 4, Map::new(), None);
            store.record_trial(&t).unwrap();
            let t = Trial::new(context.clone(), &bad.theta_id, bad.theta.clone(), i < 1, Map::new(), None);
            store.record_trial(&t).unwrap();
        }
        let before = store.count_theta_sets(&context).unwrap();
        let p = opt.next_theta(&context, &store).unwrap();
        assert_eq!(p.source, ThetaSource::Best);
        assert_eq!(p.theta_id, good.theta_id);
        assert_eq!(store.count_theta_sets(&context).unwrap(), before);

        // Other contexts still explore.
        assert_eq!(opt.next_theta(&ctx("a3"), &store).unwrap().source, ThetaSource::Sampled);
    }

    #[test]
    fn fresh_context_starts_at_zero_mean() {
        let store = TrialStore::open_in_memory().unwrap();
        let opt = optimizer();
        assert!(opt.state(&ctx("f6")).is_none());
        opt.next_theta(&ctx("f6"), &store).unwrap();
        let s = opt.state(&ctx("f6")).unwrap();
        assert_eq!(s.mean, [0.0; Theta::DIM]);
        assert_eq!(s.sigma, opt.config.sigma);
        assert_eq!(s.trials, 0);
    }

    #[test]
    fn success_pulls_mean_and_shrinks_sigma() {
        let opt = optimizer();
        let context = ctx("d4");
        let theta = Theta {
            dx_mm: 1.0,
            ..Theta::default()
        };
        let s = opt.report(&context, &theta, true);
        assert!((s.mean[0] - 0.2).abs() < 1e-12);
        assert!((s.mean[5] - 300.0).abs() < 1e-9);
        assert!((s.sigma - 0.54).abs() < 1e-12);
        assert_eq!(s.trials, 1);

        for _ in 0..50 {
            opt.report(&context, &theta, true);
        }
        assert_eq!(opt.state(&context).unwrap().sigma, 0.1);
    }

    #[test]
    fn failure_pushes_mean_away_and_grows_sigma() {
        let opt = optimizer();
        let context = ctx("d5");
        let theta = Theta {
            dx_mm: 1.0,
            ..Theta::default()
        };
        let s = opt.report(&context, &theta, false);
        assert!((s.mean[0] + 0.02).abs() < 1e-12);
        assert!((s.sigma - 0.63).abs() < 1e-12);

        for _ in 0..50 {
            opt.report(&context, &theta, false);
        }
        assert_eq!(opt.state(&context).unwrap().sigma, 1.5);
    }

    #[test]
    fn concurrent_reports_on_one_context_all_count() {
        let opt = Arc::new(optimizer());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let opt = Arc::clone(&opt);
                thread::spawn(move || {
                    for _ in 0..25 {
                        opt.report(&ctx("e4"), &Theta::default(), i % 2 == 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(opt.state(&ctx("e4")).unwrap().trials, 200);
        assert!(opt.state(&ctx("e5")).is_none());
    }
}

//! Dirichlet process Gibbs sampler over cluster assignments and
//! cluster-level cellular frequencies.
//!
//! One iteration is a full reassignment sweep over the features, a
//! frequency update for every cluster, and a concentration update. The
//! chain records its trace into a [`ResultsStore`] and checkpoints a
//! [`ChainSnapshot`] there, from which [`DirichletProcessSampler::restart`]
//! reproduces the uninterrupted chain exactly.

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Beta, Distribution, Gamma};
use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::likelihood::Likelihood;
use crate::results::ResultsStore;
use crate::state::{ChainState, RngSnapshot};

/// Store key holding the chain snapshot.
pub(crate) const SAMPLER_KEY: &str = "sampler";

/// Trace names written per recorded iteration.
pub(crate) const TRACE_ALPHA: &str = "alpha";
pub(crate) const TRACE_NUM_COMPONENTS: &str = "num_components";
pub(crate) const TRACE_CELLULAR_FREQUENCIES: &str = "cellular_frequencies";
pub(crate) const TRACE_LABELS: &str = "labels";

const SNAPSHOT_VERSION: u32 = 1;

/// How often the chain reports progress at debug level.
const PROGRESS_EVERY: u64 = 100;

/// Shrink attempts before a slice update keeps the current value.
const MAX_SLICE_SHRINKS: usize = 100;

/// Tuning knobs of the chain.
///
/// The settings travel inside the snapshot, so a restarted chain keeps the
/// recording schedule and priors it started with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerSettings {
    /// Iterations discarded before any trace entry is recorded.
    pub burnin: u64,
    /// Record every `thin`-th post-burn-in iteration.
    pub thin: u64,
    /// Shape of the Gamma prior on the concentration parameter.
    pub concentration_shape: f64,
    /// Rate of the Gamma prior on the concentration parameter.
    pub concentration_rate: f64,
    /// Auxiliary components offered to each feature during reassignment.
    pub aux_components: usize,
    /// Seed of the chain generator.
    pub seed: u64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            burnin: 0,
            thin: 1,
            concentration_shape: 1.0,
            concentration_rate: 1.0,
            aux_components: 2,
            seed: 0,
        }
    }
}

impl SamplerSettings {
    fn validate(&self) -> Result<(), Error> {
        if self.thin < 1 {
            return Err(Error::Configuration {
                msg: format!("thin must be at least 1, got {}", self.thin),
            });
        }
        if self.aux_components < 1 {
            return Err(Error::Configuration {
                msg: "at least one auxiliary component is required".to_string(),
            });
        }
        if !(self.concentration_shape > 0.0) || !(self.concentration_rate > 0.0) {
            return Err(Error::Configuration {
                msg: "the concentration prior requires positive shape and rate".to_string(),
            });
        }
        Ok(())
    }
}

/// Versioned snapshot of the whole chain.
///
/// Everything needed to resume lives here explicitly, cluster assignments,
/// cluster frequencies, the concentration value, the settings, and the
/// generator state, so a resumed run can be validated field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub version: u32,
    pub iteration: u64,
    pub labels: Vec<usize>,
    pub phi: Vec<f64>,
    pub alpha: f64,
    pub settings: SamplerSettings,
    pub rng: RngSnapshot,
}

/// Gibbs sampler for the Dirichlet process mixture.
///
/// Generic over the likelihood family: the sampler only evaluates
/// [`Likelihood::log_likelihood`] at candidate frequencies.
#[derive(Debug)]
pub struct DirichletProcessSampler<L> {
    likelihoods: Vec<L>,
    settings: SamplerSettings,
    state: Option<ChainState>,
}

impl<L: Likelihood> DirichletProcessSampler<L> {
    /// Build a sampler over one likelihood per feature, in feature order.
    pub fn new(likelihoods: Vec<L>, settings: SamplerSettings) -> Result<Self, Error> {
        settings.validate()?;
        if likelihoods.is_empty() {
            return Err(Error::Configuration {
                msg: "cannot sample over an empty dataset".to_string(),
            });
        }
        Ok(Self {
            likelihoods,
            settings,
            state: None,
        })
    }

    /// Run `num_iters` iterations from a fresh prior draw, recording traces
    /// into `store` and checkpointing the final state under `sampler`.
    pub fn sample(&mut self, store: &mut ResultsStore, num_iters: u64) -> Result<(), Error> {
        if self.settings.burnin >= num_iters {
            return Err(Error::Configuration {
                msg: format!(
                    "burnin ({}) must be smaller than num_iters ({})",
                    self.settings.burnin, num_iters
                ),
            });
        }
        self.state = Some(self.draw_initial_state()?);
        info!(
            "sampling {} features for {} iterations (burn-in {}, thinning {})",
            self.likelihoods.len(),
            num_iters,
            self.settings.burnin,
            self.settings.thin
        );
        self.advance(store, num_iters)
    }

    /// Resume the chain checkpointed in `store` for `num_iters` further
    /// iterations.
    ///
    /// Continues the absolute iteration index, so the recording schedule and
    /// the generator stream line up with an uninterrupted run of the same
    /// total length.
    pub fn restart(&mut self, store: &mut ResultsStore, num_iters: u64) -> Result<(), Error> {
        let snapshot: ChainSnapshot = store.get(SAMPLER_KEY)?;
        self.settings = snapshot.settings;
        self.settings.validate()?;
        self.state = Some(self.restore_state(&snapshot)?);
        info!(
            "resuming at iteration {} for {} further iterations",
            snapshot.iteration, num_iters
        );
        self.advance(store, num_iters)
    }

    /// Snapshot of the current chain state, if the chain has started.
    pub fn snapshot(&self) -> Option<ChainSnapshot> {
        self.state
            .as_ref()
            .map(|state| snapshot_of(self.settings, state))
    }

    fn advance(&mut self, store: &mut ResultsStore, num_iters: u64) -> Result<(), Error> {
        let mut state = self.state.take().ok_or_else(|| Error::Configuration {
            msg: "the chain was never initialized".to_string(),
        })?;

        for _ in 0..num_iters {
            step(&self.likelihoods, &self.settings, &mut state)?;
            let completed = state.iteration;
            if completed > self.settings.burnin
                && (completed - self.settings.burnin) % self.settings.thin == 0
            {
                record(store, &state)?;
            }
            if completed % PROGRESS_EVERY == 0 {
                debug!(
                    "iteration {}: {} clusters, alpha = {:.4}",
                    completed,
                    state.num_clusters(),
                    state.alpha()
                );
            }
        }

        let snapshot = snapshot_of(self.settings, &state);
        self.state = Some(state);
        store.set(SAMPLER_KEY, &snapshot)
    }

    /// Draw the initial state from the model prior: the concentration from
    /// its Gamma prior, assignments from the sequential CRP, and each
    /// cluster's frequency from the uniform base measure.
    fn draw_initial_state(&self) -> Result<ChainState, Error> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.settings.seed);
        let alpha = gamma_draw(
            self.settings.concentration_shape,
            self.settings.concentration_rate,
            &mut rng,
        )?;

        let mut labels = Vec::with_capacity(self.likelihoods.len());
        let mut counts: Vec<usize> = Vec::new();
        let mut phi: Vec<f64> = Vec::new();
        for item in 0..self.likelihoods.len() {
            let total = item as f64 + alpha;
            let mut remaining = rng.random::<f64>() * total;
            let mut assigned = None;
            for (cluster, &count) in counts.iter().enumerate() {
                remaining -= count as f64;
                if remaining < 0.0 {
                    assigned = Some(cluster);
                    break;
                }
            }
            match assigned {
                Some(cluster) => {
                    counts[cluster] += 1;
                    labels.push(cluster);
                }
                None => {
                    counts.push(1);
                    phi.push(rng.random());
                    labels.push(phi.len() - 1);
                }
            }
        }

        Ok(ChainState {
            labels,
            counts,
            phi,
            alpha,
            iteration: 0,
            rng,
        })
    }

    fn restore_state(&self, snapshot: &ChainSnapshot) -> Result<ChainState, Error> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::InvalidStore {
                msg: format!("unsupported chain snapshot version {}", snapshot.version),
            });
        }
        if snapshot.labels.len() != self.likelihoods.len() {
            return Err(Error::InvalidStore {
                msg: format!(
                    "snapshot covers {} features but the dataset has {}",
                    snapshot.labels.len(),
                    self.likelihoods.len()
                ),
            });
        }
        let mut counts = vec![0usize; snapshot.phi.len()];
        for &label in &snapshot.labels {
            if label >= counts.len() {
                return Err(Error::InvalidStore {
                    msg: format!("snapshot label {label} references a missing cluster"),
                });
            }
            counts[label] += 1;
        }
        if counts.iter().any(|&count| count == 0) {
            return Err(Error::InvalidStore {
                msg: "snapshot holds an empty cluster".to_string(),
            });
        }
        if !(snapshot.alpha > 0.0) {
            return Err(Error::InvalidStore {
                msg: format!("snapshot concentration {} is not positive", snapshot.alpha),
            });
        }
        Ok(ChainState {
            labels: snapshot.labels.clone(),
            counts,
            phi: snapshot.phi.clone(),
            alpha: snapshot.alpha,
            iteration: snapshot.iteration,
            rng: snapshot.rng.restore(),
        })
    }
}

fn snapshot_of(settings: SamplerSettings, state: &ChainState) -> ChainSnapshot {
    ChainSnapshot {
        version: SNAPSHOT_VERSION,
        iteration: state.iteration,
        labels: state.labels.clone(),
        phi: state.phi.clone(),
        alpha: state.alpha,
        settings,
        rng: RngSnapshot::capture(&state.rng),
    }
}

/// One full Gibbs iteration.
fn step<L: Likelihood>(
    likelihoods: &[L],
    settings: &SamplerSettings,
    state: &mut ChainState,
) -> Result<(), Error> {
    for item in 0..likelihoods.len() {
        reassign(likelihoods, settings, state, item)?;
    }
    resample_frequencies(likelihoods, state);
    resample_concentration(settings, state)?;
    state.iteration += 1;
    Ok(())
}

/// Reassign one feature using auxiliary components (Neal 2000, algorithm 8).
///
/// The feature is detached first; a destroyed singleton's frequency fills
/// the first auxiliary slot, the rest are fresh draws from the base
/// measure. Weights are occupancy times likelihood for existing clusters
/// and `alpha / m` times likelihood for each auxiliary component.
fn reassign<L: Likelihood>(
    likelihoods: &[L],
    settings: &SamplerSettings,
    state: &mut ChainState,
    item: usize,
) -> Result<(), Error> {
    let held = state.detach(item);
    let likelihood = &likelihoods[item];
    let aux_count = settings.aux_components;

    let mut aux = Vec::with_capacity(aux_count);
    if let Some(phi) = held {
        aux.push(phi);
    }
    while aux.len() < aux_count {
        aux.push(state.rng.random());
    }

    let existing = state.counts.len();
    let ln_alpha_per_aux = (state.alpha / aux_count as f64).ln();
    let mut log_weights = Vec::with_capacity(existing + aux_count);
    for cluster in 0..existing {
        log_weights.push(
            (state.counts[cluster] as f64).ln() + likelihood.log_likelihood(state.phi[cluster]),
        );
    }
    for &phi in &aux {
        log_weights.push(ln_alpha_per_aux + likelihood.log_likelihood(phi));
    }

    let choice = draw_categorical(&log_weights, &mut state.rng).ok_or_else(|| Error::Model {
        msg: format!("all reassignment weights vanished for feature {item}"),
    })?;
    if choice < existing {
        state.attach(item, choice);
    } else {
        let cluster = state.spawn_cluster(aux[choice - existing]);
        state.attach(item, cluster);
    }
    Ok(())
}

/// Draw an index proportional to exponentiated log weights.
///
/// Returns `None` when every weight underflows to zero, which the caller
/// reports as a degenerate iteration.
fn draw_categorical<R: Rng + ?Sized>(log_weights: &[f64], rng: &mut R) -> Option<usize> {
    let max = log_weights
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    let weights: Vec<f64> = log_weights.iter().map(|&w| (w - max).exp()).collect();
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || !(total > 0.0) {
        return None;
    }
    let mut remaining = rng.random::<f64>() * total;
    for (index, &weight) in weights.iter().enumerate() {
        remaining -= weight;
        if remaining < 0.0 {
            return Some(index);
        }
    }
    Some(weights.len() - 1)
}

/// Update every cluster frequency by slice sampling the members' joint
/// log likelihood over the unit interval (uniform base measure, so the
/// prior contributes nothing).
fn resample_frequencies<L: Likelihood>(likelihoods: &[L], state: &mut ChainState) {
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); state.phi.len()];
    for (item, &label) in state.labels.iter().enumerate() {
        members[label].push(item);
    }
    for (cluster, items) in members.iter().enumerate() {
        let log_density = |phi: f64| {
            items
                .iter()
                .map(|&item| likelihoods[item].log_likelihood(phi))
                .sum::<f64>()
        };
        state.phi[cluster] = slice_sample_unit(log_density, state.phi[cluster], &mut state.rng);
    }
}

/// Shrinkage slice sampler on [0, 1].
///
/// The domain is bounded, so no stepping out is needed: draw a level under
/// the density at the current point, then shrink the interval around
/// rejected candidates until one lands inside the slice.
fn slice_sample_unit<F, R>(log_density: F, current: f64, rng: &mut R) -> f64
where
    F: Fn(f64) -> f64,
    R: Rng + ?Sized,
{
    // 1 - u lies in (0, 1], keeping the level strictly below the density.
    let level = log_density(current) + (1.0 - rng.random::<f64>()).ln();
    let mut lower = 0.0f64;
    let mut upper = 1.0f64;
    for _ in 0..MAX_SLICE_SHRINKS {
        let candidate = lower + (upper - lower) * rng.random::<f64>();
        if log_density(candidate) >= level {
            return candidate;
        }
        if candidate < current {
            lower = candidate;
        } else {
            upper = candidate;
        }
    }
    current
}

/// Resample the concentration parameter with the auxiliary-variable Gamma
/// update of Escobar and West (1995), conditioned on the current number of
/// clusters.
fn resample_concentration(settings: &SamplerSettings, state: &mut ChainState) -> Result<(), Error> {
    let num_items = state.labels.len() as f64;
    let num_clusters = state.phi.len() as f64;
    let shape = settings.concentration_shape;
    let rate = settings.concentration_rate;

    let eta = Beta::new(state.alpha + 1.0, num_items)
        .map_err(|err| Error::Model {
            msg: format!("degenerate concentration update: {err}"),
        })?
        .sample(&mut state.rng);
    let posterior_rate = rate - eta.ln();

    let odds = (shape + num_clusters - 1.0) / (num_items * posterior_rate);
    let posterior_shape = if state.rng.random::<f64>() * (1.0 + odds) < odds {
        shape + num_clusters
    } else {
        shape + num_clusters - 1.0
    };
    state.alpha = gamma_draw(posterior_shape, posterior_rate, &mut state.rng)?;
    Ok(())
}

fn gamma_draw<R: Rng + ?Sized>(shape: f64, rate: f64, rng: &mut R) -> Result<f64, Error> {
    Ok(Gamma::new(shape, rate.recip())
        .map_err(|err| Error::Model {
            msg: format!("degenerate Gamma draw: {err}"),
        })?
        .sample(rng))
}

/// Append one trace entry per recorded quantity.
fn record(store: &mut ResultsStore, state: &ChainState) -> Result<(), Error> {
    store.append_scalar(TRACE_ALPHA, state.alpha)?;
    store.append_count(TRACE_NUM_COMPONENTS, state.num_clusters() as u64)?;
    store.append_row(TRACE_CELLULAR_FREQUENCIES, state.item_frequencies())?;
    store.append_labels(
        TRACE_LABELS,
        state.labels.iter().map(|&label| label as u64).collect(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataPoint;
    use crate::likelihood::BinomialLikelihood;
    use crate::results::Trace;
    use pretty_assertions::assert_eq;

    fn likelihoods() -> Vec<BinomialLikelihood> {
        [(5u64, 10u64), (10, 20), (2, 4)]
            .iter()
            .map(|&(a, d)| {
                let point =
                    DataPoint::new(a, d, vec![0.001], vec![0.5], vec![1.0], vec![1.0]).unwrap();
                BinomialLikelihood::new(&point).unwrap()
            })
            .collect()
    }

    fn store() -> ResultsStore {
        ResultsStore::create(tempfile::tempdir().unwrap().path())
    }

    #[test]
    fn record_count_follows_burnin_and_thinning() {
        let settings = SamplerSettings {
            burnin: 3,
            thin: 2,
            ..SamplerSettings::default()
        };
        let mut sampler = DirichletProcessSampler::new(likelihoods(), settings).unwrap();
        let mut store = store();
        sampler.sample(&mut store, 10).unwrap();
        // Iterations 5, 7, 9 are recorded: floor((10 - 3) / 2) = 3.
        assert_eq!(store.trace(TRACE_ALPHA).unwrap().len(), 3);
        assert_eq!(store.trace(TRACE_NUM_COMPONENTS).unwrap().len(), 3);
    }

    #[test]
    fn every_iteration_is_recorded_without_burnin() {
        let mut sampler =
            DirichletProcessSampler::new(likelihoods(), SamplerSettings::default()).unwrap();
        let mut store = store();
        sampler.sample(&mut store, 7).unwrap();
        assert_eq!(store.trace(TRACE_ALPHA).unwrap().len(), 7);
    }

    #[test]
    fn burnin_must_be_smaller_than_num_iters() {
        let settings = SamplerSettings {
            burnin: 10,
            ..SamplerSettings::default()
        };
        let mut sampler = DirichletProcessSampler::new(likelihoods(), settings).unwrap();
        let err = sampler.sample(&mut store(), 10).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }), "{err}");
    }

    #[test]
    fn zero_thinning_is_rejected() {
        let settings = SamplerSettings {
            thin: 0,
            ..SamplerSettings::default()
        };
        let err = DirichletProcessSampler::new(likelihoods(), settings).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }), "{err}");
    }

    #[test]
    fn chains_with_equal_seeds_are_identical() {
        let settings = SamplerSettings {
            seed: 99,
            ..SamplerSettings::default()
        };
        let mut first = DirichletProcessSampler::new(likelihoods(), settings).unwrap();
        let mut second = DirichletProcessSampler::new(likelihoods(), settings).unwrap();
        let mut store_a = store();
        let mut store_b = store();
        first.sample(&mut store_a, 25).unwrap();
        second.sample(&mut store_b, 25).unwrap();
        assert_eq!(
            store_a.trace(TRACE_ALPHA).unwrap(),
            store_b.trace(TRACE_ALPHA).unwrap()
        );
        assert_eq!(
            store_a.trace(TRACE_LABELS).unwrap(),
            store_b.trace(TRACE_LABELS).unwrap()
        );
        assert_eq!(first.snapshot(), second.snapshot());
    }

    #[test]
    fn labels_stay_dense_and_consistent() {
        let mut sampler =
            DirichletProcessSampler::new(likelihoods(), SamplerSettings::default()).unwrap();
        let mut store = store();
        sampler.sample(&mut store, 50).unwrap();
        let (labels, components) = match (
            store.trace(TRACE_LABELS).unwrap(),
            store.trace(TRACE_NUM_COMPONENTS).unwrap(),
        ) {
            (Trace::Labels(labels), Trace::Count(components)) => (labels, components),
            other => panic!("unexpected trace kinds: {other:?}"),
        };
        for (row, &count) in labels.iter().zip(components) {
            assert_eq!(row.len(), 3);
            let distinct: std::collections::HashSet<_> = row.iter().collect();
            assert_eq!(distinct.len() as u64, count);
            assert!(row.iter().all(|&label| label < count));
        }
    }

    #[test]
    fn restart_continues_the_iteration_index() {
        let mut sampler =
            DirichletProcessSampler::new(likelihoods(), SamplerSettings::default()).unwrap();
        let mut store = store();
        sampler.sample(&mut store, 10).unwrap();

        let mut resumed =
            DirichletProcessSampler::new(likelihoods(), SamplerSettings::default()).unwrap();
        resumed.restart(&mut store, 5).unwrap();
        let snapshot = resumed.snapshot().unwrap();
        assert_eq!(snapshot.iteration, 15);
        assert_eq!(store.trace(TRACE_ALPHA).unwrap().len(), 15);
    }

    #[test]
    fn restart_needs_a_checkpoint() {
        let mut sampler =
            DirichletProcessSampler::new(likelihoods(), SamplerSettings::default()).unwrap();
        let err = sampler.restart(&mut store(), 5).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }), "{err}");
    }

    #[test]
    fn draw_categorical_handles_vanishing_weights() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            draw_categorical(&[f64::NEG_INFINITY, f64::NEG_INFINITY], &mut rng),
            None
        );
        assert_eq!(
            draw_categorical(&[f64::NEG_INFINITY, 0.0], &mut rng),
            Some(1)
        );
    }
}

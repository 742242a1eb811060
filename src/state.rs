//! Markov chain state and the explicit RNG snapshot used for exact resume.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Serialized ChaCha generator state.
///
/// Stored field by field instead of as an opaque blob so a resumed chain
/// can be validated against the original one value at a time. The 128-bit
/// word position is split into two halves to stay within JSON number range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngSnapshot {
    pub seed: [u8; 32],
    pub stream: u64,
    pub word_pos_lo: u64,
    pub word_pos_hi: u64,
}

impl RngSnapshot {
    pub(crate) fn capture(rng: &ChaCha8Rng) -> Self {
        let word_pos = rng.get_word_pos();
        Self {
            seed: rng.get_seed(),
            stream: rng.get_stream(),
            word_pos_lo: word_pos as u64,
            word_pos_hi: (word_pos >> 64) as u64,
        }
    }

    pub(crate) fn restore(&self) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::from_seed(self.seed);
        rng.set_stream(self.stream);
        rng.set_word_pos(u128::from(self.word_pos_hi) << 64 | u128::from(self.word_pos_lo));
        rng
    }
}

/// Full state of the Gibbs chain between iterations.
///
/// Cluster ids are dense: `labels` maps each feature to an id below
/// `phi.len()`, and `counts[id]` is that cluster's occupancy. Destroying a
/// cluster moves the last id into the hole, so ids stay dense and the trace
/// stays a plain integer vector.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub(crate) labels: Vec<usize>,
    pub(crate) counts: Vec<usize>,
    pub(crate) phi: Vec<f64>,
    pub(crate) alpha: f64,
    pub(crate) iteration: u64,
    pub(crate) rng: ChaCha8Rng,
}

impl ChainState {
    /// Number of features carried by the chain.
    pub fn num_items(&self) -> usize {
        self.labels.len()
    }

    /// Number of currently non-empty clusters.
    pub fn num_clusters(&self) -> usize {
        self.phi.len()
    }

    /// Completed iterations since the chain was first initialized.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Concentration parameter of the Dirichlet process.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// The cellular frequency attributed to each feature, in feature order.
    pub fn item_frequencies(&self) -> Vec<f64> {
        self.labels.iter().map(|&label| self.phi[label]).collect()
    }

    /// Detach `item` from its cluster, destroying the cluster if it became
    /// empty. Returns the destroyed cluster's frequency, if any.
    ///
    /// The item's label is invalid until the next [`ChainState::attach`].
    pub(crate) fn detach(&mut self, item: usize) -> Option<f64> {
        let cluster = self.labels[item];
        self.labels[item] = usize::MAX;
        self.counts[cluster] -= 1;
        if self.counts[cluster] > 0 {
            return None;
        }

        let last = self.counts.len() - 1;
        self.counts.swap_remove(cluster);
        let phi = self.phi.swap_remove(cluster);
        if cluster != last {
            for label in self.labels.iter_mut() {
                if *label == last {
                    *label = cluster;
                }
            }
        }
        Some(phi)
    }

    /// Attach `item` to an existing cluster.
    pub(crate) fn attach(&mut self, item: usize, cluster: usize) {
        debug_assert!(cluster < self.counts.len());
        self.labels[item] = cluster;
        self.counts[cluster] += 1;
    }

    /// Create an empty cluster at `phi` and return its id.
    pub(crate) fn spawn_cluster(&mut self, phi: f64) -> usize {
        self.phi.push(phi);
        self.counts.push(0);
        self.phi.len() - 1
    }
}

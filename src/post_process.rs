//! Posterior summaries derived from a populated results store.

use std::collections::HashMap;

use itertools::Itertools;

use crate::errors::Error;
use crate::results::{ResultsStore, Trace};
use crate::run::KEY_GENES;
use crate::sampler::{
    TRACE_ALPHA, TRACE_CELLULAR_FREQUENCIES, TRACE_LABELS, TRACE_NUM_COMPONENTS,
};

/// Read-only view over a finished (or checkpointed) analysis.
///
/// Every summary is computed lazily from trace data; the store is never
/// mutated.
pub struct PostProcessor<'a> {
    store: &'a ResultsStore,
}

impl<'a> PostProcessor<'a> {
    pub fn new(store: &'a ResultsStore) -> Self {
        Self { store }
    }

    /// Feature keys in input order.
    pub fn genes(&self) -> Result<Vec<String>, Error> {
        self.store.get(KEY_GENES)
    }

    /// The concentration trace, one value per recorded iteration.
    pub fn alpha(&self) -> Result<Vec<f64>, Error> {
        match self.store.trace(TRACE_ALPHA)? {
            Trace::Scalar(entries) => Ok(entries.clone()),
            _ => Err(Error::TraceKind {
                name: TRACE_ALPHA.to_string(),
            }),
        }
    }

    /// The cluster-count trace, one value per recorded iteration.
    pub fn num_components(&self) -> Result<Vec<u64>, Error> {
        match self.store.trace(TRACE_NUM_COMPONENTS)? {
            Trace::Count(entries) => Ok(entries.clone()),
            _ => Err(Error::TraceKind {
                name: TRACE_NUM_COMPONENTS.to_string(),
            }),
        }
    }

    /// Per-gene trace of the frequency attributed to the gene's cluster.
    pub fn cellular_frequencies(&self) -> Result<HashMap<String, Vec<f64>>, Error> {
        let genes = self.genes()?;
        let rows = match self.store.trace(TRACE_CELLULAR_FREQUENCIES)? {
            Trace::Rows(rows) => rows,
            _ => {
                return Err(Error::TraceKind {
                    name: TRACE_CELLULAR_FREQUENCIES.to_string(),
                })
            }
        };

        let mut frequencies: HashMap<String, Vec<f64>> = genes
            .iter()
            .map(|gene| (gene.clone(), Vec::with_capacity(rows.len())))
            .collect();
        for row in rows {
            if row.len() != genes.len() {
                return Err(Error::InvalidStore {
                    msg: format!(
                        "a cellular-frequency row covers {} features instead of {}",
                        row.len(),
                        genes.len()
                    ),
                });
            }
            for (gene, &value) in genes.iter().zip(row) {
                // The key is always present; it was seeded from `genes`.
                if let Some(trace) = frequencies.get_mut(gene) {
                    trace.push(value);
                }
            }
        }
        Ok(frequencies)
    }

    /// Pairwise fraction of recorded iterations in which two features share
    /// a cluster. Symmetric, unit diagonal, entries in [0, 1].
    pub fn similarity_matrix(&self) -> Result<Vec<Vec<f64>>, Error> {
        let num_genes = self.genes()?.len();
        let rows = match self.store.trace(TRACE_LABELS)? {
            Trace::Labels(rows) => rows,
            _ => {
                return Err(Error::TraceKind {
                    name: TRACE_LABELS.to_string(),
                })
            }
        };

        let mut together = vec![vec![0u64; num_genes]; num_genes];
        for row in rows {
            if row.len() != num_genes {
                return Err(Error::InvalidStore {
                    msg: format!(
                        "a label row covers {} features instead of {}",
                        row.len(),
                        num_genes
                    ),
                });
            }
            for (i, j) in (0..num_genes).tuple_combinations() {
                if row[i] == row[j] {
                    together[i][j] += 1;
                }
            }
        }

        let recorded = rows.len();
        let mut matrix = vec![vec![0.0f64; num_genes]; num_genes];
        for i in 0..num_genes {
            matrix[i][i] = 1.0;
            for j in (i + 1)..num_genes {
                let fraction = if recorded == 0 {
                    0.0
                } else {
                    together[i][j] as f64 / recorded as f64
                };
                matrix[i][j] = fraction;
                matrix[j][i] = fraction;
            }
        }
        Ok(matrix)
    }
}

//! Infer the clonal population structure of a tumor from allele-count data.
//!
//! The model is a Dirichlet process mixture: every mutation carries a latent
//! cellular frequency, mutations sharing a frequency form a clone, and the
//! number of clones is itself inferred. The chain is advanced by Gibbs
//! sampling and checkpointed into a results store, so long runs can be
//! resumed bit-for-bit and post-processed at any later time.

pub(crate) mod data;
pub(crate) mod errors;
pub(crate) mod likelihood;
pub(crate) mod math;
pub(crate) mod post_process;
pub(crate) mod results;
pub(crate) mod run;
pub(crate) mod sampler;
pub(crate) mod state;

pub use data::{load_counts, DataPoint, Dataset};
pub use errors::Error;
pub use likelihood::{BinomialLikelihood, Likelihood};
pub use post_process::PostProcessor;
pub use results::{ResultsStore, Trace};
pub use run::{restart, run, write_results};
pub use sampler::{ChainSnapshot, DirichletProcessSampler, SamplerSettings};
pub use state::{ChainState, RngSnapshot};

//! End-to-end entry points: fresh analyses, restarts, and rendering of
//! posterior summaries to delimited files.

use std::fs;
use std::path::Path;

use log::info;

use crate::data::{load_counts, DataPoint, Dataset};
use crate::errors::Error;
use crate::likelihood::BinomialLikelihood;
use crate::post_process::PostProcessor;
use crate::results::ResultsStore;
use crate::sampler::{DirichletProcessSampler, SamplerSettings};

/// Store keys written by [`run`] and read back on restart and
/// post-processing.
pub(crate) const KEY_INPUT_FILE: &str = "input_file";
pub(crate) const KEY_GENES: &str = "genes";
pub(crate) const KEY_DATA: &str = "data";

/// Run a fresh analysis: load `input`, sample `num_iters` iterations, and
/// persist the closed store under `out_dir`.
///
/// The loaded data points are persisted alongside the chain snapshot, so a
/// later [`restart`] needs nothing but the analysis directory.
pub fn run(
    input: &Path,
    out_dir: &Path,
    num_iters: u64,
    settings: SamplerSettings,
) -> Result<(), Error> {
    settings_preflight(&settings, num_iters)?;
    fs::create_dir_all(out_dir).map_err(|source| Error::Directory {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let dataset = load_counts(input)?;
    info!(
        "loaded {} features from {}",
        dataset.len(),
        input.display()
    );
    let likelihoods = build_likelihoods(&dataset)?;
    let mut sampler = DirichletProcessSampler::new(likelihoods, settings)?;

    let mut store = ResultsStore::create(out_dir);
    store.set(KEY_INPUT_FILE, &input.display().to_string())?;
    store.set(KEY_GENES, dataset.keys())?;
    store.set(KEY_DATA, dataset.points())?;
    sampler.sample(&mut store, num_iters)?;
    store.close()?;
    info!("analysis checkpointed under {}", out_dir.display());
    Ok(())
}

/// Continue a checkpointed analysis for `num_iters` further iterations.
pub fn restart(out_dir: &Path, num_iters: u64) -> Result<(), Error> {
    let mut store = ResultsStore::open(out_dir)?;
    let points: Vec<DataPoint> = store.get(KEY_DATA)?;
    let likelihoods = points
        .iter()
        .map(BinomialLikelihood::new)
        .collect::<Result<Vec<_>, _>>()?;
    // The recording schedule is replaced by the checkpointed one.
    let mut sampler = DirichletProcessSampler::new(likelihoods, SamplerSettings::default())?;
    sampler.restart(&mut store, num_iters)?;
    store.close()?;
    info!("analysis extended under {}", out_dir.display());
    Ok(())
}

/// Render the posterior summaries of the analysis under `analysis_dir`
/// into delimited files under `out_dir`.
pub fn write_results(analysis_dir: &Path, out_dir: &Path) -> Result<(), Error> {
    let store = ResultsStore::open(analysis_dir)?;
    let post = PostProcessor::new(&store);

    fs::create_dir_all(out_dir).map_err(|source| Error::Directory {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let genes = post.genes()?;
    write_column(&out_dir.join("genes.tsv"), genes.iter())?;
    write_column(
        &out_dir.join("alpha.tsv"),
        post.alpha()?.iter().map(|value| value.to_string()),
    )?;
    write_column(
        &out_dir.join("components.tsv"),
        post.num_components()?.iter().map(|value| value.to_string()),
    )?;

    let matrix = post.similarity_matrix()?;
    let mut writer = tsv_writer(&out_dir.join("similarity_matrix.tsv"))?;
    for row in &matrix {
        writer.write_record(row.iter().map(|value| value.to_string()))?;
    }
    writer.flush()?;

    let frequency_dir = out_dir.join("cellular_frequencies");
    fs::create_dir_all(&frequency_dir).map_err(|source| Error::Directory {
        path: frequency_dir.clone(),
        source,
    })?;
    let frequencies = post.cellular_frequencies()?;
    for gene in &genes {
        let trace = frequencies.get(gene).ok_or_else(|| Error::KeyNotFound {
            key: gene.to_string(),
        })?;
        write_column(
            &frequency_dir.join(format!("{gene}.tsv")),
            trace.iter().map(|value| value.to_string()),
        )?;
    }

    info!(
        "posterior summaries for {} features written to {}",
        genes.len(),
        out_dir.display()
    );
    Ok(())
}

fn settings_preflight(settings: &SamplerSettings, num_iters: u64) -> Result<(), Error> {
    if settings.burnin >= num_iters {
        return Err(Error::Configuration {
            msg: format!(
                "burnin ({}) must be smaller than num_iters ({num_iters})",
                settings.burnin
            ),
        });
    }
    Ok(())
}

fn build_likelihoods(dataset: &Dataset) -> Result<Vec<BinomialLikelihood>, Error> {
    dataset
        .points()
        .iter()
        .map(BinomialLikelihood::new)
        .collect()
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<fs::File>, Error> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?)
}

fn write_column<I, S>(path: &Path, values: I) -> Result<(), Error>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    let mut writer = tsv_writer(path)?;
    for value in values {
        writer.write_record([value.as_ref()])?;
    }
    writer.flush()?;
    Ok(())
}

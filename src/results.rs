//! Durable keyed store for chain metadata and per-iteration traces.
//!
//! One analysis directory holds one JSON document. The document carries a
//! map of arbitrary serde values (input path, gene list, chain snapshot)
//! next to named trace series that grow by one entry per recorded
//! iteration. Writes stay in memory until [`ResultsStore::close`], which
//! publishes the document atomically via a temporary file and rename, so a
//! reader never observes a half-written store. Single-writer discipline:
//! concurrent writers are not supported.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

pub(crate) const STORE_FILE: &str = "results.json";

const STORE_VERSION: u32 = 1;

/// Iteration-indexed trace payloads.
///
/// Scalar series hold one value per recorded iteration; row series hold
/// one vector per recorded iteration, and row lengths may differ between
/// iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entries", rename_all = "snake_case")]
pub enum Trace {
    Scalar(Vec<f64>),
    Count(Vec<u64>),
    Rows(Vec<Vec<f64>>),
    Labels(Vec<Vec<u64>>),
}

impl Trace {
    /// Number of recorded iterations in this trace.
    pub fn len(&self) -> usize {
        match self {
            Trace::Scalar(entries) => entries.len(),
            Trace::Count(entries) => entries.len(),
            Trace::Rows(entries) => entries.len(),
            Trace::Labels(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize, Deserialize)]
struct Document {
    version: u32,
    values: BTreeMap<String, serde_json::Value>,
    traces: BTreeMap<String, Trace>,
}

/// Persistent results of one analysis.
#[derive(Debug)]
pub struct ResultsStore {
    path: PathBuf,
    values: BTreeMap<String, serde_json::Value>,
    traces: BTreeMap<String, Trace>,
}

impl ResultsStore {
    /// Start an empty store under `dir`. Nothing touches the filesystem
    /// until [`ResultsStore::close`]; an existing document is replaced
    /// then.
    pub fn create<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(STORE_FILE),
            values: BTreeMap::new(),
            traces: BTreeMap::new(),
        }
    }

    /// Open the store persisted under `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let path = dir.join(STORE_FILE);
        if !path.exists() {
            return Err(Error::MissingAnalysis {
                path: dir.to_path_buf(),
            });
        }
        let file = File::open(&path)?;
        let document: Document = serde_json::from_reader(BufReader::new(file))?;
        if document.version != STORE_VERSION {
            return Err(Error::InvalidStore {
                msg: format!("unsupported store version {}", document.version),
            });
        }
        Ok(Self {
            path,
            values: document.values,
            traces: document.traces,
        })
    }

    /// Whether `dir` holds a store document.
    pub fn exists<P: AsRef<Path>>(dir: P) -> bool {
        dir.as_ref().join(STORE_FILE).exists()
    }

    /// Set a keyed value, replacing any previous one.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), Error> {
        self.values
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Read back a keyed value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        let value = self.values.get(key).ok_or_else(|| Error::KeyNotFound {
            key: key.to_string(),
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Append to a scalar trace, creating it on first use.
    pub fn append_scalar(&mut self, name: &str, value: f64) -> Result<(), Error> {
        match self
            .traces
            .entry(name.to_string())
            .or_insert_with(|| Trace::Scalar(Vec::new()))
        {
            Trace::Scalar(entries) => {
                entries.push(value);
                Ok(())
            }
            _ => Err(Error::TraceKind {
                name: name.to_string(),
            }),
        }
    }

    /// Append to an integer-count trace, creating it on first use.
    pub fn append_count(&mut self, name: &str, value: u64) -> Result<(), Error> {
        match self
            .traces
            .entry(name.to_string())
            .or_insert_with(|| Trace::Count(Vec::new()))
        {
            Trace::Count(entries) => {
                entries.push(value);
                Ok(())
            }
            _ => Err(Error::TraceKind {
                name: name.to_string(),
            }),
        }
    }

    /// Append one float row to a row trace, creating it on first use.
    pub fn append_row(&mut self, name: &str, row: Vec<f64>) -> Result<(), Error> {
        match self
            .traces
            .entry(name.to_string())
            .or_insert_with(|| Trace::Rows(Vec::new()))
        {
            Trace::Rows(entries) => {
                entries.push(row);
                Ok(())
            }
            _ => Err(Error::TraceKind {
                name: name.to_string(),
            }),
        }
    }

    /// Append one cluster-id row to a label trace, creating it on first
    /// use.
    pub fn append_labels(&mut self, name: &str, row: Vec<u64>) -> Result<(), Error> {
        match self
            .traces
            .entry(name.to_string())
            .or_insert_with(|| Trace::Labels(Vec::new()))
        {
            Trace::Labels(entries) => {
                entries.push(row);
                Ok(())
            }
            _ => Err(Error::TraceKind {
                name: name.to_string(),
            }),
        }
    }

    /// Read a trace by name.
    pub fn trace(&self, name: &str) -> Result<&Trace, Error> {
        self.traces.get(name).ok_or_else(|| Error::KeyNotFound {
            key: name.to_string(),
        })
    }

    /// Finalize the store, flushing everything to disk.
    ///
    /// The document becomes visible atomically; a store that was never
    /// closed leaves any previous document untouched.
    pub fn close(self) -> Result<(), Error> {
        let document = Document {
            version: STORE_VERSION,
            values: self.values,
            traces: self.traces,
        };
        let staging = self.path.with_extension("json.tmp");
        let file = File::create(&staging)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &document)?;
        writer.flush()?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn close_then_open_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultsStore::create(dir.path());
        store.set("input_file", "counts.tsv").unwrap();
        store
            .set("genes", &["TP53".to_string(), "KRAS".to_string()])
            .unwrap();
        store.append_scalar("alpha", 1.5).unwrap();
        store.append_scalar("alpha", 0.75).unwrap();
        store.append_count("num_components", 2).unwrap();
        store.append_row("cellular_frequencies", vec![0.4, 0.4]).unwrap();
        store.append_labels("labels", vec![0, 0]).unwrap();
        store.close().unwrap();

        let reopened = ResultsStore::open(dir.path()).unwrap();
        let genes: Vec<String> = reopened.get("genes").unwrap();
        assert_eq!(genes, vec!["TP53", "KRAS"]);
        assert_eq!(
            reopened.trace("alpha").unwrap(),
            &Trace::Scalar(vec![1.5, 0.75])
        );
        assert_eq!(
            reopened.trace("labels").unwrap(),
            &Trace::Labels(vec![vec![0, 0]])
        );
        let input: String = reopened.get("input_file").unwrap();
        assert_eq!(input, "counts.tsv");
    }

    #[test]
    fn missing_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultsStore::create(dir.path());
        let err = store.get::<String>("sampler").unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }), "{err}");
        let err = store.trace("alpha").unwrap_err();
        assert!(matches!(err, Error::KeyNotFound { .. }), "{err}");
    }

    #[test]
    fn opening_an_absent_store_is_a_missing_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResultsStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::MissingAnalysis { .. }), "{err}");
    }

    #[test]
    fn trace_kind_is_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultsStore::create(dir.path());
        store.append_scalar("alpha", 1.0).unwrap();
        let err = store.append_count("alpha", 1).unwrap_err();
        assert!(matches!(err, Error::TraceKind { .. }), "{err}");
    }

    #[test]
    fn close_replaces_the_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ResultsStore::create(dir.path());
        store.append_scalar("alpha", 1.0).unwrap();
        store.close().unwrap();

        let mut store = ResultsStore::open(dir.path()).unwrap();
        store.append_scalar("alpha", 2.0).unwrap();
        store.close().unwrap();

        let reopened = ResultsStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.trace("alpha").unwrap(),
            &Trace::Scalar(vec![1.0, 2.0])
        );
    }
}

//! Input table loading and the ordered feature collection.
//!
//! The input is a tab-delimited table with one row per mutation: observed
//! allele counts plus the genotype-state priors of the reference and variant
//! populations. Row order is significant and is preserved through sampling
//! and post-processing.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Read counts and genotype-state priors for one feature.
///
/// A `DataPoint` is read-only evidence: once constructed it is never
/// mutated, by the sampler or anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    a: u64,
    d: u64,
    mu_r: Vec<f64>,
    mu_v: Vec<f64>,
    delta_r: Vec<f64>,
    delta_v: Vec<f64>,
}

impl DataPoint {
    /// Validate and build a data point.
    ///
    /// Requires `1 <= d`, `a <= d`, success probabilities in [0, 1],
    /// non-negative state weights, and `mu_r`/`delta_r` (and `mu_v`/
    /// `delta_v`) of equal, non-zero length.
    pub fn new(
        a: u64,
        d: u64,
        mu_r: Vec<f64>,
        mu_v: Vec<f64>,
        delta_r: Vec<f64>,
        delta_v: Vec<f64>,
    ) -> Result<Self, Error> {
        let fail = |msg: String| Error::InputFormat {
            context: "data point".to_string(),
            msg,
        };
        if d == 0 {
            return Err(fail("read depth d must be positive".to_string()));
        }
        if a > d {
            return Err(fail(format!(
                "variant count a = {a} exceeds read depth d = {d}"
            )));
        }
        if mu_r.is_empty() || mu_v.is_empty() {
            return Err(fail("at least one genotype state is required".to_string()));
        }
        if mu_r.len() != delta_r.len() {
            return Err(fail(format!(
                "mu_r has {} states but delta_r has {}",
                mu_r.len(),
                delta_r.len()
            )));
        }
        if mu_v.len() != delta_v.len() {
            return Err(fail(format!(
                "mu_v has {} states but delta_v has {}",
                mu_v.len(),
                delta_v.len()
            )));
        }
        if mu_r.iter().chain(mu_v.iter()).any(|mu| !(0.0..=1.0).contains(mu)) {
            return Err(fail(
                "success probabilities mu_r/mu_v must lie in [0, 1]".to_string(),
            ));
        }
        if delta_r
            .iter()
            .chain(delta_v.iter())
            .any(|delta| !delta.is_finite() || *delta < 0.0)
        {
            return Err(fail(
                "state weights delta_r/delta_v must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self {
            a,
            d,
            mu_r,
            mu_v,
            delta_r,
            delta_v,
        })
    }

    /// Variant-supporting read count.
    pub fn a(&self) -> u64 {
        self.a
    }

    /// Total read depth.
    pub fn d(&self) -> u64 {
        self.d
    }

    /// Per-state success probabilities of the reference population.
    pub fn mu_r(&self) -> &[f64] {
        &self.mu_r
    }

    /// Per-state success probabilities of the variant population.
    pub fn mu_v(&self) -> &[f64] {
        &self.mu_v
    }

    /// Prior state weights of the reference population.
    pub fn delta_r(&self) -> &[f64] {
        &self.delta_r
    }

    /// Prior state weights of the variant population.
    pub fn delta_v(&self) -> &[f64] {
        &self.delta_v
    }
}

/// Insertion-ordered mapping from feature key to data point.
///
/// Order of first appearance is significant end-to-end, so the order is kept
/// as an explicit key list next to a key-to-index lookup instead of relying
/// on an ordered-map primitive.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    keys: Vec<String>,
    lookup: HashMap<String, usize>,
    points: Vec<DataPoint>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a feature. Duplicate keys are rejected.
    pub fn insert(&mut self, key: String, point: DataPoint) -> Result<(), Error> {
        if self.lookup.contains_key(&key) {
            return Err(Error::InputFormat {
                context: "dataset".to_string(),
                msg: format!("duplicate feature key '{key}'"),
            });
        }
        self.lookup.insert(key.clone(), self.points.len());
        self.keys.push(key);
        self.points.push(point);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&DataPoint> {
        self.lookup.get(key).map(|&idx| &self.points[idx])
    }

    /// Feature keys in input order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Data points in input order.
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataPoint)> {
        self.keys
            .iter()
            .map(String::as_str)
            .zip(self.points.iter())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

const REQUIRED_COLUMNS: [&str; 7] = ["gene", "a", "d", "mu_r", "delta_r", "mu_v", "delta_v"];

/// Load a tab-delimited counts table into a [`Dataset`], preserving row
/// order.
///
/// Any malformed row aborts the whole load before sampling can begin.
pub fn load_counts<P: AsRef<Path>>(path: P) -> Result<Dataset, Error> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    let mut columns = HashMap::new();
    for name in REQUIRED_COLUMNS {
        let idx = headers.iter().position(|h| h == name).ok_or_else(|| {
            Error::InputFormat {
                context: path.display().to_string(),
                msg: format!("missing required column '{name}'"),
            }
        })?;
        columns.insert(name, idx);
    }

    let mut dataset = Dataset::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|pos| pos.line()).unwrap_or(0);
        let context = format!("{}: line {}", path.display(), line);
        let fail = |msg: String| Error::InputFormat {
            context: context.clone(),
            msg,
        };

        let gene = field(&record, &columns, "gene", &context)?.to_string();
        let a: u64 = field(&record, &columns, "a", &context)?
            .trim()
            .parse()
            .map_err(|_| fail("column 'a' is not a non-negative integer".to_string()))?;
        let d: u64 = field(&record, &columns, "d", &context)?
            .trim()
            .parse()
            .map_err(|_| fail("column 'd' is not a positive integer".to_string()))?;
        let mu_r = parse_float_list(field(&record, &columns, "mu_r", &context)?, "mu_r", &fail)?;
        let delta_r =
            parse_float_list(field(&record, &columns, "delta_r", &context)?, "delta_r", &fail)?;
        let mu_v = parse_float_list(field(&record, &columns, "mu_v", &context)?, "mu_v", &fail)?;
        let delta_v =
            parse_float_list(field(&record, &columns, "delta_v", &context)?, "delta_v", &fail)?;

        let point = DataPoint::new(a, d, mu_r, mu_v, delta_r, delta_v).map_err(|err| {
            match err {
                Error::InputFormat { msg, .. } => fail(msg),
                other => other,
            }
        })?;
        dataset.insert(gene, point).map_err(|err| match err {
            Error::InputFormat { msg, .. } => fail(msg),
            other => other,
        })?;
    }

    Ok(dataset)
}

fn field<'r>(
    record: &'r csv::StringRecord,
    columns: &HashMap<&str, usize>,
    name: &str,
    context: &str,
) -> Result<&'r str, Error> {
    record
        .get(columns[name])
        .ok_or_else(|| Error::InputFormat {
            context: context.to_string(),
            msg: format!("row is missing column '{name}'"),
        })
}

fn parse_float_list(
    raw: &str,
    name: &str,
    fail: &dyn Fn(String) -> Error,
) -> Result<Vec<f64>, Error> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| fail(format!("column '{name}' holds a non-numeric entry '{part}'")))
        })
        .collect()
}

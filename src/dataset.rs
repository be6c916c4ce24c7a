//! Logged run ingestion.
//!
//! Runs are CSV files with a header row and one numeric sample per line,
//! optionally gzip-compressed (`.gz`).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::Context;
use flate2::read::GzDecoder;

use crate::error::{UkfError, UkfResult};
use crate::types::MeasVec;

/// One row of a logged run.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub values: Vec<f64>,
}

impl Sample {
    pub fn get(&self, column: usize) -> UkfResult<f64> {
        self.values.get(column).copied().ok_or_else(|| {
            UkfError::Dimension(format!(
                "column {column} missing, row has {} columns",
                self.values.len()
            ))
        })
    }

    /// Readings from `columns`, multiplied by `scale`.
    pub fn select(&self, columns: &[usize], scale: f64) -> UkfResult<MeasVec> {
        let values = columns
            .iter()
            .map(|&c| self.get(c).map(|v| v * scale))
            .collect::<UkfResult<Vec<f64>>>()?;
        Ok(MeasVec::from_vec(values))
    }
}

#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub samples: Vec<Sample>,
}

impl Dataset {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let parsed = if path.extension().map(|e| e == "gz").unwrap_or(false) {
            Self::from_reader(BufReader::new(GzDecoder::new(file)))
        } else {
            Self::from_reader(BufReader::new(file))
        };
        parsed.with_context(|| format!("Failed to load {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.iter().map(str::to_string).collect();

        let mut samples = Vec::new();
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            let values = record
                .iter()
                .enumerate()
                .map(|(col, cell)| {
                    cell.parse::<f64>()
                        .with_context(|| format!("row {}, column {col}: '{cell}' is not a number", row + 1))
                })
                .collect::<anyhow::Result<Vec<f64>>>()?;
            samples.push(Sample { values });
        }

        Ok(Self { headers, samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

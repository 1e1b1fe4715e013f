use super::{IoError, line_of, open_file, path_label};
use crate::core::models::ids::VariantId;
use crate::core::mutants::MutantUniverse;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct LabelRow {
    variant: String,
    #[serde(alias = "activity", alias = "fitness")]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct DescriptorRow {
    variant: String,
}

/// A measured score for one member of a mutant universe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelRecord {
    pub variant: VariantId,
    pub score: f64,
}

/// A label as written in the file, before resolution against a universe.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLabel {
    pub line: usize,
    pub variant: String,
    pub score: f64,
}

fn reader_for<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(input)
}

/// Reads `variant,score` rows without resolving the descriptors.
pub fn read_raw_labels_from<R: Read>(input: R, source: &str) -> Result<Vec<RawLabel>, IoError> {
    let mut reader = reader_for(input);
    let mut labels = Vec::new();
    let mut record = csv::StringRecord::new();
    let headers = reader
        .headers()
        .map_err(|e| IoError::Csv {
            path: source.to_string(),
            source: e,
        })?
        .clone();

    let mut index = 0;
    while reader.read_record(&mut record).map_err(|e| IoError::Csv {
        path: source.to_string(),
        source: e,
    })? {
        let line = line_of(record.position(), index);
        let row: LabelRow = record
            .deserialize(Some(&headers))
            .map_err(|e| IoError::Malformed {
                path: source.to_string(),
                line,
                message: e.to_string(),
            })?;
        labels.push(RawLabel {
            line,
            variant: row.variant,
            score: row.score,
        });
        index += 1;
    }
    Ok(labels)
}

pub fn read_raw_labels(path: &Path) -> Result<Vec<RawLabel>, IoError> {
    read_raw_labels_from(open_file(path)?, &path_label(path))
}

/// Reads a labels CSV and resolves every descriptor against `universe`.
pub fn read_labels_from<R: Read>(
    input: R,
    source: &str,
    universe: &MutantUniverse,
) -> Result<Vec<LabelRecord>, IoError> {
    read_raw_labels_from(input, source)?
        .into_iter()
        .map(|raw| {
            let variant = universe
                .resolve_key(&raw.variant)
                .map_err(|e| IoError::Validation {
                    path: source.to_string(),
                    line: raw.line,
                    source: e,
                })?;
            Ok(LabelRecord {
                variant,
                score: raw.score,
            })
        })
        .collect()
}

pub fn read_labels(path: &Path, universe: &MutantUniverse) -> Result<Vec<LabelRecord>, IoError> {
    read_labels_from(open_file(path)?, &path_label(path), universe)
}

/// Reads the `variant` column of a CSV (other columns are ignored) as `(line, key)` pairs.
pub fn read_variant_keys_from<R: Read>(input: R, source: &str) -> Result<Vec<(usize, String)>, IoError> {
    let csv_error = |e| IoError::Csv {
        path: source.to_string(),
        source: e,
    };
    let mut reader = reader_for(input);
    let headers = reader.headers().map_err(csv_error)?.clone();
    let mut record = csv::StringRecord::new();
    let mut keys = Vec::new();
    while reader.read_record(&mut record).map_err(csv_error)? {
        let line = line_of(record.position(), keys.len());
        let row: DescriptorRow = record
            .deserialize(Some(&headers))
            .map_err(|e| IoError::Malformed {
                path: source.to_string(),
                line,
                message: e.to_string(),
            })?;
        keys.push((line, row.variant));
    }
    Ok(keys)
}

pub fn read_variant_keys(path: &Path) -> Result<Vec<(usize, String)>, IoError> {
    read_variant_keys_from(open_file(path)?, &path_label(path))
}

/// Reads the `variant` column of a CSV and resolves each entry against `universe`.
pub fn read_variant_ids_from<R: Read>(
    input: R,
    source: &str,
    universe: &MutantUniverse,
) -> Result<Vec<VariantId>, IoError> {
    read_variant_keys_from(input, source)?
        .into_iter()
        .map(|(line, key)| {
            universe.resolve_key(&key).map_err(|e| IoError::Validation {
                path: source.to_string(),
                line,
                source: e,
            })
        })
        .collect()
}

pub fn read_variant_ids(path: &Path, universe: &MutantUniverse) -> Result<Vec<VariantId>, IoError> {
    read_variant_ids_from(open_file(path)?, &path_label(path), universe)
}

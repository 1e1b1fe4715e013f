use super::{IoError, create_file, path_label};
use crate::core::mutants::MutantUniverse;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Serializes records as CSV with a header derived from the record's field names.
pub fn write_records_to<W: Write, T: Serialize>(
    output: W,
    destination: &str,
    records: &[T],
) -> Result<(), IoError> {
    let mut writer = csv::Writer::from_writer(output);
    for record in records {
        writer.serialize(record).map_err(|e| IoError::Csv {
            path: destination.to_string(),
            source: e,
        })?;
    }
    writer.flush().map_err(|e| IoError::Io {
        path: destination.to_string(),
        source: e,
    })
}

pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<(), IoError> {
    write_records_to(create_file(path)?, &path_label(path), records)
}

#[derive(Debug, Serialize)]
struct UniverseRow<'a> {
    id: usize,
    variant: String,
    order: usize,
    sequence: &'a str,
}

/// Writes the universe as `id,variant,order,sequence` in enumeration order.
pub fn write_universe_to<W: Write>(
    output: W,
    destination: &str,
    universe: &MutantUniverse,
) -> Result<(), IoError> {
    let rows: Vec<UniverseRow> = universe
        .iter()
        .map(|(id, variant)| UniverseRow {
            id: id.0,
            variant: variant.descriptor(),
            order: variant.mutations().len(),
            sequence: variant.sequence().as_str(),
        })
        .collect();
    write_records_to(output, destination, &rows)
}

pub fn write_universe(path: &Path, universe: &MutantUniverse) -> Result<(), IoError> {
    write_universe_to(create_file(path)?, &path_label(path), universe)
}

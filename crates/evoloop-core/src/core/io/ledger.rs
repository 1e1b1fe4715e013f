//! Round ledger of a live campaign: one `round,rank,variant,best_at_start` row per selected
//! variant. Reading it back lets a later process resume the round count, the budget, and
//! the convergence history.

use super::reports::write_records_to;
use super::{IoError, create_file, line_of, open_file, path_label};
use crate::core::error::ValidationError;
use crate::core::models::ids::VariantId;
use crate::core::mutants::MutantUniverse;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// One selection made in a closed round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerEntry {
    pub round: usize,
    /// 1-based position within the round.
    pub rank: usize,
    pub variant: VariantId,
    /// Best label when the round started; shared by every entry of the round.
    pub best_at_start: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRow {
    round: usize,
    rank: usize,
    variant: String,
    best_at_start: Option<f64>,
}

pub fn read_ledger_from<R: Read>(
    input: R,
    source: &str,
    universe: &MutantUniverse,
) -> Result<Vec<LedgerEntry>, IoError> {
    let csv_error = |e| IoError::Csv {
        path: source.to_string(),
        source: e,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers = reader.headers().map_err(csv_error)?.clone();
    let mut record = csv::StringRecord::new();
    let mut entries = Vec::new();
    while reader.read_record(&mut record).map_err(csv_error)? {
        let line = line_of(record.position(), entries.len());
        let row: LedgerRow = record
            .deserialize(Some(&headers))
            .map_err(|e| IoError::Malformed {
                path: source.to_string(),
                line,
                message: e.to_string(),
            })?;
        let variant = universe
            .resolve_key(&row.variant)
            .map_err(|e| IoError::Validation {
                path: source.to_string(),
                line,
                source: e,
            })?;
        entries.push(LedgerEntry {
            round: row.round,
            rank: row.rank,
            variant,
            best_at_start: row.best_at_start,
        });
    }
    Ok(entries)
}

pub fn read_ledger(path: &Path, universe: &MutantUniverse) -> Result<Vec<LedgerEntry>, IoError> {
    read_ledger_from(open_file(path)?, &path_label(path), universe)
}

pub fn write_ledger_to<W: Write>(
    output: W,
    destination: &str,
    entries: &[LedgerEntry],
    universe: &MutantUniverse,
) -> Result<(), IoError> {
    let rows = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let variant = universe.descriptor(entry.variant).ok_or_else(|| IoError::Validation {
                path: destination.to_string(),
                line: i + 2,
                source: ValidationError::UnknownVariant(entry.variant.to_string()),
            })?;
            Ok(LedgerRow {
                round: entry.round,
                rank: entry.rank,
                variant,
                best_at_start: entry.best_at_start,
            })
        })
        .collect::<Result<Vec<_>, IoError>>()?;
    write_records_to(output, destination, &rows)
}

pub fn write_ledger(
    path: &Path,
    entries: &[LedgerEntry],
    universe: &MutantUniverse,
) -> Result<(), IoError> {
    write_ledger_to(create_file(path)?, &path_label(path), entries, universe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::sequence::Sequence;
    use crate::core::mutants::{MutationPolicy, enumerate};

    fn universe() -> MutantUniverse {
        enumerate(&Sequence::parse("ACD").unwrap(), &MutationPolicy::saturation()).unwrap()
    }

    #[test]
    fn rows_use_descriptors_and_blank_for_unknown_best() {
        let universe = universe();
        let entries = [
            LedgerEntry {
                round: 0,
                rank: 1,
                variant: VariantId(3),
                best_at_start: None,
            },
            LedgerEntry {
                round: 1,
                rank: 1,
                variant: VariantId(0),
                best_at_start: Some(1.5),
            },
        ];
        let mut buffer = Vec::new();
        write_ledger_to(&mut buffer, "ledger", &entries, &universe).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "round,rank,variant,best_at_start");
        assert_eq!(
            lines[1],
            format!("0,1,{},", universe.descriptor(VariantId(3)).unwrap())
        );

        let back = read_ledger_from(text.as_bytes(), "ledger", &universe).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn unknown_variant_reports_its_line() {
        let universe = universe();
        let input = "round,rank,variant,best_at_start\n0,1,A1C,\n0,2,Z9Q,\n";
        let err = read_ledger_from(input.as_bytes(), "ledger", &universe).unwrap_err();
        assert!(matches!(err, IoError::Validation { line: 3, .. }));
    }
}

use super::{IoError, create_file, line_of, open_file, path_label};
use std::io::{Read, Write};
use std::path::Path;

/// One row of a representation table: a variant key (descriptor or sequence) and its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub key: String,
    pub values: Vec<f32>,
}

/// Reads a representation table: a header row, then one row per variant with the key in
/// the first column and the vector components in the remaining columns.
///
/// Every row must have the same number of components.
pub fn read_table_from<R: Read>(input: R, source: &str) -> Result<Vec<TableRow>, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    let csv_err = |e: csv::Error| IoError::Csv {
        path: source.to_string(),
        source: e,
    };

    let header_width = reader.headers().map_err(csv_err)?.len();
    if header_width < 2 {
        return Err(IoError::Malformed {
            path: source.to_string(),
            line: 1,
            message: "expected a key column followed by at least one value column".to_string(),
        });
    }

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(csv_err)?;
        let line = line_of(record.position(), index);
        let mut fields = record.iter();
        let key = fields.next().unwrap_or_default().to_string();
        if key.is_empty() {
            return Err(IoError::Malformed {
                path: source.to_string(),
                line,
                message: "empty key".to_string(),
            });
        }
        let values = fields
            .map(|field| {
                field.parse::<f32>().map_err(|_| IoError::Malformed {
                    path: source.to_string(),
                    line,
                    message: format!("'{field}' is not a number"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(TableRow { key, values });
    }
    Ok(rows)
}

pub fn read_table(path: &Path) -> Result<Vec<TableRow>, IoError> {
    read_table_from(open_file(path)?, &path_label(path))
}

/// Writes rows with header `variant,0,1,...`. The dimension is taken from the first row.
pub fn write_table_to<'a, W: Write>(
    output: W,
    destination: &str,
    rows: impl IntoIterator<Item = (String, &'a [f32])>,
) -> Result<usize, IoError> {
    let mut writer = csv::Writer::from_writer(output);
    let csv_err = |e: csv::Error| IoError::Csv {
        path: destination.to_string(),
        source: e,
    };

    let mut written = 0;
    let mut dim = None;
    for (key, values) in rows {
        let expected = *dim.get_or_insert_with(|| values.len());
        if written == 0 {
            let mut header = vec!["variant".to_string()];
            header.extend((0..expected).map(|i| i.to_string()));
            writer.write_record(&header).map_err(csv_err)?;
        }
        if values.len() != expected {
            return Err(IoError::Malformed {
                path: destination.to_string(),
                line: written + 2,
                message: format!(
                    "vector for '{key}' has {} components, expected {expected}",
                    values.len()
                ),
            });
        }
        let mut record = Vec::with_capacity(values.len() + 1);
        record.push(key);
        record.extend(values.iter().map(|v| v.to_string()));
        writer.write_record(&record).map_err(csv_err)?;
        written += 1;
    }
    writer.flush().map_err(|e| IoError::Io {
        path: destination.to_string(),
        source: e,
    })?;
    Ok(written)
}

pub fn write_table<'a>(
    path: &Path,
    rows: impl IntoIterator<Item = (String, &'a [f32])>,
) -> Result<usize, IoError> {
    write_table_to(create_file(path)?, &path_label(path), rows)
}

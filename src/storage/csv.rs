//! CSV import and export.
//!
//! Output is UTF-8 with a configurable separator and RFC4180-style
//! quoting: fields containing the separator, a quote or a newline are
//! wrapped in quotes with embedded quotes doubled. Input is parsed by a
//! full scan, so quoted fields may span lines.
//!
//! Import assigns roles from an explicit mapping; unmapped columns fall
//! back to `numerical` when every non-null value parses as a number and
//! `categorical` otherwise. Time-stamp columns accept epoch seconds or a
//! set of common date formats.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::containers::column::{Column, Role};
use crate::containers::encoding::{Encoding, NULL_CODE, NULL_STRING};
use crate::containers::frame::DataFrame;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: char,
    pub has_header: bool,
    pub quote_char: char,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: ',',
            has_header: true,
            quote_char: '"',
        }
    }
}

const TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d",
    "%d.%m.%Y",
];

/// Parses the whole CSV text into records of fields.
fn parse_records(text: &str, options: &CsvOptions) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == options.quote_char {
                if chars.peek() == Some(&options.quote_char) {
                    field.push(c);
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == options.quote_char && field.is_empty() {
            in_quotes = true;
        } else if c == options.delimiter {
            record.push(std::mem::take(&mut field));
        } else if c == '\n' || c == '\r' {
            if c == '\r' && chars.peek() == Some(&'\n') {
                chars.next();
            }
            record.push(std::mem::take(&mut field));
            if !(record.len() == 1 && record[0].is_empty()) {
                records.push(std::mem::take(&mut record));
            } else {
                record.clear();
            }
        } else {
            field.push(c);
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

fn parse_time(value: &str) -> f64 {
    if let Ok(v) = value.parse::<f64>() {
        return v;
    }
    for format in TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return dt.and_utc().timestamp() as f64;
        }
        if let Ok(d) = chrono::NaiveDate::parse_from_str(value, format) {
            return d.and_hms_opt(0, 0, 0).map_or(f64::NAN, |dt| {
                dt.and_utc().timestamp() as f64
            });
        }
    }
    f64::NAN
}

fn is_null(value: &str) -> bool {
    value.is_empty() || value == NULL_STRING
}

/// Reads a CSV file into a frame. `roles` maps column names to role
/// strings; unmapped columns are inferred.
pub fn read_csv(
    path: &Path,
    frame_name: &str,
    roles: &HashMap<String, String>,
    options: &CsvOptions,
    categories: &mut Encoding,
    join_keys: &mut Encoding,
) -> Result<DataFrame> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("cannot read '{}': {e}", path.display())))?;
    let mut records = parse_records(&text, options);
    if records.is_empty() {
        return Ok(DataFrame::new(frame_name));
    }

    let colnames: Vec<String> = if options.has_header {
        records.remove(0)
    } else {
        (0..records[0].len()).map(|i| format!("col{i}")).collect()
    };

    for (row_num, record) in records.iter().enumerate() {
        if record.len() != colnames.len() {
            return Err(Error::Shape(format!(
                "row {} of '{}' has {} fields, expected {}",
                row_num + 1,
                path.display(),
                record.len(),
                colnames.len()
            )));
        }
    }

    let mut frame = DataFrame::new(frame_name);
    for (col_ix, colname) in colnames.iter().enumerate() {
        let values: Vec<&str> = records.iter().map(|r| r[col_ix].trim()).collect();
        let role = match roles.get(colname) {
            Some(role) => Role::parse(role)?,
            None => infer_role(&values),
        };
        match role {
            Role::JoinKey => {
                let codes = values
                    .iter()
                    .map(|v| if is_null(v) { NULL_CODE } else { join_keys.intern(v) })
                    .collect();
                frame.add_int_column(role, Column::new(colname.clone(), codes))?;
            }
            Role::Categorical | Role::Text | Role::UnusedString => {
                let codes = values
                    .iter()
                    .map(|v| if is_null(v) { NULL_CODE } else { categories.intern(v) })
                    .collect();
                frame.add_int_column(role, Column::new(colname.clone(), codes))?;
            }
            Role::TimeStamp => {
                let floats = values
                    .iter()
                    .map(|v| if is_null(v) { f64::NAN } else { parse_time(v) })
                    .collect();
                frame.add_float_column(role, Column::new(colname.clone(), floats))?;
            }
            _ => {
                let floats = values
                    .iter()
                    .map(|v| {
                        if is_null(v) {
                            f64::NAN
                        } else {
                            v.parse::<f64>().unwrap_or(f64::NAN)
                        }
                    })
                    .collect();
                frame.add_float_column(role, Column::new(colname.clone(), floats))?;
            }
        }
    }
    frame.check_lengths()?;
    Ok(frame)
}

fn infer_role(values: &[&str]) -> Role {
    let all_numeric = values
        .iter()
        .filter(|v| !is_null(v))
        .all(|v| v.parse::<f64>().is_ok());
    if all_numeric {
        Role::Numerical
    } else {
        Role::Categorical
    }
}

fn quote_field(value: &str, options: &CsvOptions) -> String {
    let needs_quoting = value.contains(options.delimiter)
        || value.contains(options.quote_char)
        || value.contains('\n')
        || value.contains('\r');
    if needs_quoting {
        let doubled = value.replace(
            options.quote_char,
            &format!("{0}{0}", options.quote_char),
        );
        format!("{0}{1}{0}", options.quote_char, doubled)
    } else {
        value.to_string()
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        NULL_STRING.to_string()
    } else {
        value.to_string()
    }
}

/// Writes a frame as CSV, columns in role-bucket order.
pub fn write_csv(
    path: &Path,
    frame: &DataFrame,
    options: &CsvOptions,
    categories: &Encoding,
    join_keys: &Encoding,
) -> Result<()> {
    enum Source<'a> {
        Float(&'a crate::containers::column::FloatColumn),
        Int(&'a crate::containers::column::IntColumn, &'a Encoding),
    }

    let mut columns: Vec<(String, Source<'_>)> = Vec::new();
    for col in &frame.categoricals {
        columns.push((col.name.clone(), Source::Int(col, categories)));
    }
    for col in &frame.discretes {
        columns.push((col.name.clone(), Source::Float(col)));
    }
    for col in &frame.join_keys {
        columns.push((col.name.clone(), Source::Int(col, join_keys)));
    }
    for col in &frame.numericals {
        columns.push((col.name.clone(), Source::Float(col)));
    }
    for col in &frame.targets {
        columns.push((col.name.clone(), Source::Float(col)));
    }
    for col in &frame.texts {
        columns.push((col.name.clone(), Source::Int(col, categories)));
    }
    for col in &frame.time_stamps {
        columns.push((col.name.clone(), Source::Float(col)));
    }
    for col in &frame.unused_floats {
        columns.push((col.name.clone(), Source::Float(col)));
    }
    for col in &frame.unused_strings {
        columns.push((col.name.clone(), Source::Int(col, categories)));
    }

    let file = std::fs::File::create(path)
        .map_err(|e| Error::Io(format!("cannot create '{}': {e}", path.display())))?;
    let mut writer = std::io::BufWriter::new(file);
    let sep = options.delimiter.to_string();

    let header: Vec<String> = columns
        .iter()
        .map(|(name, _)| quote_field(name, options))
        .collect();
    writeln!(writer, "{}", header.join(&sep))?;

    for i in 0..frame.nrows() {
        let row: Vec<String> = columns
            .iter()
            .map(|(_, source)| match source {
                Source::Float(col) => format_float(col.get(i)),
                Source::Int(col, enc) => quote_field(enc.get_or_null(col.get(i)), options),
            })
            .collect();
        writeln!(writer, "{}", row.join(&sep))?;
    }
    writer.flush()?;
    Ok(())
}

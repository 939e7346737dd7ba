//! Delimited-text export for materialized tables.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::error::Result;
use crate::sim::results::Table;

/// Index columns written before the channel columns of every table.
pub const INDEX_COLUMNS: [&str; 4] = ["datetime", "global_step", "zone_substep", "calling_point"];

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Exports one table to a file at the given path.
///
/// # Errors
///
/// Returns an error if file creation or writing fails.
pub fn export_table(table: &Table, path: &Path, delimiter: u8) -> Result<()> {
    let file = File::create(path)?;
    write_table(table, io::BufWriter::new(file), delimiter)
}

/// Writes one table to any writer: a header row of index columns followed
/// by the table's columns, then one record per row. Unset values are
/// written as empty fields.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_table(table: &Table, writer: impl Write, delimiter: u8) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);

    wtr.write_record(
        INDEX_COLUMNS
            .iter()
            .copied()
            .chain(table.columns().iter().map(String::as_str)),
    )?;

    for row in table.rows() {
        let mut record = vec![
            row.stamp.calendar.format(DATETIME_FORMAT).to_string(),
            row.stamp.global_step.to_string(),
            row.stamp.zone_substep.to_string(),
            row.stamp.calling_point.to_string(),
        ];
        record.extend(
            row.values
                .iter()
                .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
        );
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

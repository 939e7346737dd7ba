//! API response and query types.

use serde::{Deserialize, Serialize};

use crate::sim::results::{Table, TableRow};

/// Entry of the `/tables` listing.
#[derive(Debug, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: usize,
}

impl From<&Table> for TableInfo {
    fn from(t: &Table) -> Self {
        Self {
            name: t.name().to_string(),
            columns: t.columns().to_vec(),
            rows: t.len(),
        }
    }
}

/// Rows of one table, with the column names they line up with.
#[derive(Debug, Serialize)]
pub struct TableResponse {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

/// Optional row range for the table endpoint, both ends inclusive.
#[derive(Debug, Deserialize)]
pub struct RowRange {
    pub from: Option<usize>,
    pub to: Option<usize>,
}

/// Error response body for 4xx errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// Canonical tabular contract shared by every query path.
//
// The explorer is inconsistent about key casing across submission paths, so
// column names are uppercased once when a row-set is accepted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Uppercased column names in first-seen order
    pub columns: Vec<String>,
    /// Every row carries exactly `columns`, missing cells are null
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a result set from accepted raw rows, uppercasing keys.
    ///
    /// When two keys collapse to the same uppercase name the first one wins.
    pub fn from_rows(raw_rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut upper_rows: Vec<Row> = Vec::with_capacity(raw_rows.len());

        for raw in raw_rows {
            let mut row = Row::new();
            for (key, value) in raw {
                let name = key.to_uppercase();
                if row.contains_key(&name) {
                    continue;
                }
                if !columns.contains(&name) {
                    columns.push(name.clone());
                }
                row.insert(name, value);
            }
            upper_rows.push(row);
        }

        let rows = upper_rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|column| {
                        let value = row.remove(column).unwrap_or(Value::Null);
                        (column.clone(), value)
                    })
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of running a response body through the normalizer
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizationOutcome {
    Rows(ResultSet),
    /// A row-set was found but it holds no rows
    NoData,
    Unparseable {
        /// Content block types seen in the response, for operators
        content_types: Vec<String>,
        /// Leading part of the body, capped like any upstream detail
        fragment: String,
    },
}

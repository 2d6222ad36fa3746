/*
Table metadata and its catalog serialization.

The system catalog is a b-tree rooted at page 1. Each catalog entry is a
single-field record whose TEXT value is the JSON form of one table's
metadata, so entries stay self-describing and survive reopen byte for byte.
*/

use serde::{Deserialize, Serialize};

use crate::errors::{DbError, Result};

/// Declared column types of the SQL surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Integer,
    Text,
    Real,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType, primary_key: bool) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            column_type,
            primary_key,
        }
    }
}

/// Everything the engine knows about one table: its name, the root page of
/// its tree, the ordered column list, which column (if any) is the primary
/// key, and the next auto-assigned key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub root_page: u32,
    pub columns: Vec<ColumnDef>,
    pub primary_key_index: Option<usize>,
    pub next_auto_increment: u64,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>, root_page: u32, columns: Vec<ColumnDef>) -> TableMetadata {
        let primary_key_index = columns.iter().position(|c| c.primary_key);
        TableMetadata {
            name: name.into(),
            root_page,
            columns,
            primary_key_index,
            next_auto_increment: 1,
        }
    }

    /// Index of a column by name, exact match.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn to_entry(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| DbError::corrupt(format!("cannot serialize metadata for '{}': {e}", self.name)))
    }

    pub fn from_entry(entry: &str) -> Result<TableMetadata> {
        serde_json::from_str(entry)
            .map_err(|e| DbError::corrupt(format!("cannot parse catalog entry: {e}")))
    }
}

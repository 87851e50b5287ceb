use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, TransformError};

/// A table the pipeline reads or produces, addressed by layer and name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    StgUsers,
    StgSessions,
    StgAlerts,
    DimUsers,
    FctSessions,
    FctAlerts,
}

impl Table {
    pub const STAGING: [Table; 3] = [Table::StgUsers, Table::StgSessions, Table::StgAlerts];
    pub const MARTS: [Table; 3] = [Table::DimUsers, Table::FctSessions, Table::FctAlerts];

    pub fn name(self) -> &'static str {
        match self {
            Table::StgUsers => "stg_users",
            Table::StgSessions => "stg_sessions",
            Table::StgAlerts => "stg_alerts",
            Table::DimUsers => "dim_users",
            Table::FctSessions => "fct_sessions",
            Table::FctAlerts => "fct_alerts",
        }
    }

    fn layer(self) -> &'static str {
        match self {
            Table::StgUsers | Table::StgSessions | Table::StgAlerts => "staging",
            Table::DimUsers | Table::FctSessions | Table::FctAlerts => "marts",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Warehouse {
    root: PathBuf,
}

impl Warehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self, table: Table) -> PathBuf {
        self.root
            .join(table.layer())
            .join(format!("{}.csv", table.name()))
    }

    pub fn exists(&self, table: Table) -> bool {
        self.path(table).is_file()
    }

    pub fn read<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>> {
        if !self.exists(table) {
            return Err(TransformError::MissingTable(table.name().to_string()));
        }
        read_rows(&self.path(table))
    }

    pub fn write<T: Serialize>(&self, table: Table, rows: &[T]) -> Result<PathBuf> {
        let path = self.path(table);
        write_rows(&path, rows)?;
        tracing::debug!(table = table.name(), rows = rows.len(), "table written");
        Ok(path)
    }
}

/// Reads a raw source file after checking that its header carries every
/// required column.
pub fn read_source<T: DeserializeOwned>(
    path: &Path,
    table: &str,
    required: &[&str],
) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|source| TransformError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let headers = reader
        .headers()
        .map_err(|source| TransformError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .clone();

    for column in required {
        if !headers.iter().any(|header| header == *column) {
            return Err(TransformError::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result.map_err(|source| TransformError::Read {
            path: path.to_path_buf(),
            source,
        })?);
    }
    Ok(rows)
}

pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| TransformError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        rows.push(result.map_err(|source| TransformError::Read {
            path: path.to_path_buf(),
            source,
        })?);
    }
    Ok(rows)
}

pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let write_err = |source| TransformError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(write_err)?;
    for row in rows {
        writer.serialize(row).map_err(write_err)?;
    }
    writer.flush()?;
    Ok(())
}

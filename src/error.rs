use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while reading, casting or writing tables.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("{table}: missing required column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("{table} row {row}: cannot cast `{column}` value {value:?} to {target}")]
    BadCast {
        table: String,
        row: usize,
        column: &'static str,
        value: String,
        target: &'static str,
    },

    #[error("table `{0}` has not been built yet")]
    MissingTable(String),

    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransformError>;

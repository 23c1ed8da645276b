use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse status surfaced to display layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaziStatus {
    Loading,
    Ready,
    Error,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationError {
    /// Stored value matches none of the known schema shapes.
    UnrecognizedShape,
    /// Shape was recognized but a field could not be read.
    Malformed(String),
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationError::UnrecognizedShape => write!(f, "unrecognized record shape"),
            MigrationError::Malformed(msg) => write!(f, "malformed record: {msg}"),
        }
    }
}

impl std::error::Error for MigrationError {}

#[derive(Debug, Clone, PartialEq)]
pub enum BaziError {
    /// Missing or unparseable birth data.
    Input(String),
    /// Out-of-range date or arithmetic fault.
    Calculation(String),
    /// Numeric and label sides disagree and could not be reconciled.
    Consistency(String),
    Migration(MigrationError),
}

impl BaziError {
    pub fn status(&self) -> BaziStatus {
        match self {
            BaziError::Input(_) => BaziStatus::Missing,
            _ => BaziStatus::Error,
        }
    }
}

impl fmt::Display for BaziError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaziError::Input(msg) => write!(f, "input error: {msg}"),
            BaziError::Calculation(msg) => write!(f, "calculation error: {msg}"),
            BaziError::Consistency(msg) => write!(f, "consistency error: {msg}"),
            BaziError::Migration(e) => write!(f, "migration error: {e}"),
        }
    }
}

impl std::error::Error for BaziError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BaziError::Migration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MigrationError> for BaziError {
    fn from(e: MigrationError) -> Self {
        BaziError::Migration(e)
    }
}

pub type Result<T> = std::result::Result<T, BaziError>;

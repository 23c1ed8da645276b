use std::fmt;

use bazi_core::{BaziError, BaziStatus, MigrationError};

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    InvalidData(String),
    Config(String),
    Io(std::io::Error),
    Bazi(BaziError),
}

impl StoreError {
    /// Status reported to callers: bad input reads as missing data,
    /// everything else as an error.
    pub fn status(&self) -> BaziStatus {
        match self {
            StoreError::Bazi(e) => e.status(),
            _ => BaziStatus::Error,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {e}"),
            StoreError::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            StoreError::Config(msg) => write!(f, "invalid config: {msg}"),
            StoreError::Io(e) => write!(f, "I/O error: {e}"),
            StoreError::Bazi(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<BaziError> for StoreError {
    fn from(e: BaziError) -> Self {
        StoreError::Bazi(e)
    }
}

impl From<MigrationError> for StoreError {
    fn from(e: MigrationError) -> Self {
        StoreError::Bazi(BaziError::Migration(e))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

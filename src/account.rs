//! Live account state: cash and held quantities.
//!
//! The broker is the system of record; the core only reads a fresh snapshot on
//! every call through [`PositionSource`].

use crate::error::{QuantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Cash balance and symbol-to-quantity holdings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: f64,
    #[serde(default)]
    pub positions: BTreeMap<String, f64>,
}

impl AccountSnapshot {
    pub fn new(cash: f64) -> Self {
        Self {
            cash,
            positions: BTreeMap::new(),
        }
    }

    pub fn with_position(mut self, symbol: impl Into<String>, quantity: f64) -> Self {
        self.positions.insert(symbol.into(), quantity);
        self
    }

    /// Positions with a non-zero quantity.
    pub fn held(&self) -> impl Iterator<Item = (&str, f64)> {
        self.positions
            .iter()
            .filter(|(_, q)| **q != 0.0)
            .map(|(s, q)| (s.as_str(), *q))
    }

    pub fn is_flat(&self) -> bool {
        self.held().next().is_none()
    }
}

/// Provides the live account snapshot.
pub trait PositionSource: Send + Sync {
    fn fetch_positions(&self) -> Result<AccountSnapshot>;
}

impl PositionSource for AccountSnapshot {
    fn fetch_positions(&self) -> Result<AccountSnapshot> {
        Ok(self.clone())
    }
}

/// Account snapshot read from a JSON file on every call.
#[derive(Debug, Clone)]
pub struct AccountFile {
    path: PathBuf,
}

impl AccountFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PositionSource for AccountFile {
    fn fetch_positions(&self) -> Result<AccountSnapshot> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            QuantError::unavailable("account", format!("{}: {}", self.path.display(), e))
        })?;
        let snapshot: AccountSnapshot = serde_json::from_str(&content)?;
        if !snapshot.cash.is_finite() {
            return Err(QuantError::InvalidInput(format!(
                "account cash must be finite, got {}",
                snapshot.cash
            )));
        }
        debug!(
            "Loaded account from {}: cash {:.2}, {} positions",
            self.path.display(),
            snapshot.cash,
            snapshot.positions.len()
        );
        Ok(snapshot)
    }
}

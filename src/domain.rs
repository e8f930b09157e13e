//! Host data rows as plugins see them
//!
//! Thin serde mirrors of the ledger's entities. The plugin host never owns
//! this data; it converts between these shapes and script values at the
//! `data` namespace boundary.

use serde::{Deserialize, Serialize};

/// A ledger transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRecord {
    pub id: i64,
    /// "expense" or "income".
    pub kind: String,
    pub amount: f64,
    pub category: String,
    pub account: String,
    #[serde(default)]
    pub note: String,
    /// ISO date, e.g. "2026-08-30".
    pub date: String,
}

/// Input shape for a plugin-created transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecord {
    pub kind: String,
    pub amount: f64,
    pub category: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debt {
    pub id: i64,
    pub contact: String,
    pub amount: f64,
    /// "lend" or "borrow".
    pub kind: String,
    #[serde(default)]
    pub note: String,
    pub date: String,
    pub settled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDebt {
    pub contact: String,
    pub amount: f64,
    pub kind: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContact {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub key: String,
    /// "expense" or "income".
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
}

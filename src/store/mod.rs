// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transaction Store
//!
//! Embedded redb database holding transfers, their secure envelope chains,
//! counterparties, contacts and Sunrise invitations.
//!
//! ## Table Layout
//!
//! - `transactions`: envelope id → Transaction (JSON)
//! - `transaction_index`: `!created|envelope_id` → envelope id (newest first)
//! - `secure_envelopes`: ulid → EnvelopeRecord (JSON)
//! - `envelope_index`: `envelope_id|timestamp|ulid` → ulid (oldest first)
//! - `counterparties`: ulid → Counterparty (JSON)
//! - `counterparty_index`: `!created|ulid` → ulid
//! - `counterparty_names`: common name → ulid (unique)
//! - `contacts`: ulid → Contact (JSON)
//! - `contact_index`: `counterparty|contact` → contact ulid
//! - `contact_emails`: lowercase email → contact ulid (unique)
//! - `sunrise`: ulid → SunriseRecord (JSON)
//! - `sunrise_by_envelope`: `envelope_id|ulid` → ulid
//!
//! Writes for a single transfer go through a [`PreparedTransaction`].

pub mod counterparties;
pub mod models;
pub mod prepared;
pub mod sunrise;
pub mod transactions;

pub use models::*;
pub use prepared::PreparedTransaction;

use std::collections::HashMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// =============================================================================
// Table Definitions
// =============================================================================

const TRANSACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");
const TRANSACTION_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("transaction_index");
const SECURE_ENVELOPES: TableDefinition<&str, &[u8]> = TableDefinition::new("secure_envelopes");
const ENVELOPE_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("envelope_index");
const COUNTERPARTIES: TableDefinition<&str, &[u8]> = TableDefinition::new("counterparties");
const COUNTERPARTY_INDEX: TableDefinition<&[u8], &str> =
    TableDefinition::new("counterparty_index");
const COUNTERPARTY_NAMES: TableDefinition<&str, &str> = TableDefinition::new("counterparty_names");
const CONTACTS: TableDefinition<&str, &[u8]> = TableDefinition::new("contacts");
const CONTACT_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("contact_index");
const CONTACT_EMAILS: TableDefinition<&str, &str> = TableDefinition::new("contact_emails");
const SUNRISE: TableDefinition<&str, &[u8]> = TableDefinition::new("sunrise");
const SUNRISE_BY_ENVELOPE: TableDefinition<&[u8], &str> =
    TableDefinition::new("sunrise_by_envelope");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("could not create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("record id does not match the prepared transaction")]
    IdMismatch,

    #[error("record must not have an id when it is created")]
    NoIdOnCreate,

    #[error("ambiguous lookup: {0}")]
    Ambiguous(String),

    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("invalid email address {0:?}")]
    InvalidEmail(String),

    #[error("unknown lookup field {0:?}")]
    UnknownField(String),

    #[error("prepared transaction already concluded")]
    Concluded,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Pagination
// =============================================================================

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Cursor pagination. Page ids are the ids of the last (next) or first (prev)
/// item of the neighbouring page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageInfo {
    #[serde(default)]
    pub page_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_page_id: Option<String>,
}

impl PageInfo {
    pub fn size(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE as usize
        } else {
            self.page_size as usize
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: PageInfo,
}

enum Cursor {
    Start,
    After(Vec<u8>),
    Before(Vec<u8>),
}

/// Scan one page of an index between `lower` and `upper` (exclusive).
/// Returns the indexed ids plus whether items exist after and before them.
fn scan_index<T>(
    table: &T,
    lower: &[u8],
    upper: &[u8],
    cursor: Cursor,
    size: usize,
) -> StoreResult<(Vec<String>, bool, bool)>
where
    T: ReadableTable<&'static [u8], &'static str>,
{
    let mut values = Vec::with_capacity(size + 1);

    match &cursor {
        Cursor::Start | Cursor::After(_) => {
            let start = match &cursor {
                Cursor::After(key) => Bound::Excluded(key.as_slice()),
                _ => Bound::Included(lower),
            };
            for entry in table.range::<&[u8]>((start, Bound::Excluded(upper)))? {
                let (_, value) = entry?;
                values.push(value.value().to_string());
                if values.len() > size {
                    break;
                }
            }
            let more = values.len() > size;
            values.truncate(size);
            Ok((values, more, matches!(cursor, Cursor::After(_))))
        }
        Cursor::Before(key) => {
            let range = (Bound::Included(lower), Bound::Excluded(key.as_slice()));
            for entry in table.range::<&[u8]>(range)?.rev() {
                let (_, value) = entry?;
                values.push(value.value().to_string());
                if values.len() > size {
                    break;
                }
            }
            let earlier = values.len() > size;
            values.truncate(size);
            values.reverse();
            Ok((values, true, earlier))
        }
    }
}

fn page_links(ids: &[String], size: usize, more: bool, earlier: bool) -> PageInfo {
    PageInfo {
        page_size: size as u32,
        next_page_id: if more { ids.last().cloned() } else { None },
        prev_page_id: if earlier { ids.first().cloned() } else { None },
    }
}

// =============================================================================
// Key Helpers
// =============================================================================

/// Map a signed timestamp onto unsigned bytes that sort in time order.
fn ordered_nanos(ts: DateTime<Utc>) -> u64 {
    let nanos = ts.timestamp_nanos_opt().unwrap_or(i64::MAX);
    (nanos as u64) ^ (1 << 63)
}

/// `!created|id` so forward scans return the newest records first.
fn created_desc_key(created: DateTime<Utc>, id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + id.len());
    key.extend_from_slice(&(!ordered_nanos(created)).to_be_bytes());
    key.extend_from_slice(id);
    key
}

/// `envelope_id|timestamp|ulid` so envelopes of a transfer are time ordered.
fn envelope_index_key(envelope_id: Uuid, timestamp: DateTime<Utc>, id: ulid::Ulid) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 8 + 16);
    key.extend_from_slice(envelope_id.as_bytes());
    key.extend_from_slice(&ordered_nanos(timestamp).to_be_bytes());
    key.extend_from_slice(&id.to_bytes());
    key
}

fn pair_key(parent: &[u8], child: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(parent.len() + child.len());
    key.extend_from_slice(parent);
    key.extend_from_slice(child);
    key
}

/// Upper bound for a range over every key starting with `prefix`.
fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    end.extend_from_slice(&[0xFF; 48]);
    end
}

fn get_json<T, R>(table: &R, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

// =============================================================================
// Store
// =============================================================================

/// The node's transaction store.
pub struct Store {
    db: Database,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TRANSACTIONS)?;
            let _ = write_txn.open_table(TRANSACTION_INDEX)?;
            let _ = write_txn.open_table(SECURE_ENVELOPES)?;
            let _ = write_txn.open_table(ENVELOPE_INDEX)?;
            let _ = write_txn.open_table(COUNTERPARTIES)?;
            let _ = write_txn.open_table(COUNTERPARTY_INDEX)?;
            let _ = write_txn.open_table(COUNTERPARTY_NAMES)?;
            let _ = write_txn.open_table(CONTACTS)?;
            let _ = write_txn.open_table(CONTACT_INDEX)?;
            let _ = write_txn.open_table(CONTACT_EMAILS)?;
            let _ = write_txn.open_table(SUNRISE)?;
            let _ = write_txn.open_table(SUNRISE_BY_ENVELOPE)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Transaction store opened");
        Ok(Self {
            db,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Per-transfer lock serializing prepared transactions.
    fn transfer_lock(&self, envelope_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(envelope_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nobody else holds or waits on it.
    fn release_lock(&self, envelope_id: Uuid) {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(&envelope_id) {
            // One reference in the map, one held by the releasing guard.
            if Arc::strong_count(lock) <= 2 {
                locks.remove(&envelope_id);
            }
        }
    }
}

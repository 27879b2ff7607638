// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfers and their secure envelope chains.

use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use ulid::Ulid;
use uuid::Uuid;

use super::{
    created_desc_key, envelope_index_key, get_json, page_links, prefix_end, scan_index, Cursor,
    Direction, EnvelopeRecord, Page, PageInfo, Store, StoreError, StoreResult, Transaction,
    ENVELOPE_INDEX, SECURE_ENVELOPES, TRANSACTIONS, TRANSACTION_INDEX,
};

// =============================================================================
// Write helpers (used inside a redb write transaction)
// =============================================================================

pub(super) fn put_transaction(txn: &WriteTransaction, record: &Transaction) -> StoreResult<()> {
    let id = record.id.to_string();
    let json = serde_json::to_vec(record)?;

    let mut table = txn.open_table(TRANSACTIONS)?;
    table.insert(id.as_str(), json.as_slice())?;

    let mut index = txn.open_table(TRANSACTION_INDEX)?;
    let key = created_desc_key(record.created, record.id.as_bytes());
    index.insert(key.as_slice(), id.as_str())?;
    Ok(())
}

pub(super) fn insert_envelope(txn: &WriteTransaction, record: &EnvelopeRecord) -> StoreResult<()> {
    let id = record.id.ok_or_else(|| StoreError::NotFound("envelope record id".into()))?;
    let id_str = id.to_string();
    let json = serde_json::to_vec(record)?;

    let mut table = txn.open_table(SECURE_ENVELOPES)?;
    table.insert(id_str.as_str(), json.as_slice())?;

    let mut index = txn.open_table(ENVELOPE_INDEX)?;
    let key = envelope_index_key(record.envelope_id, record.timestamp, id);
    index.insert(key.as_slice(), id_str.as_str())?;
    Ok(())
}

// =============================================================================
// Store API
// =============================================================================

impl Store {
    /// Transfers, newest first.
    pub fn list_transactions(&self, page: &PageInfo) -> StoreResult<Page<Transaction>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        let index = read_txn.open_table(TRANSACTION_INDEX)?;

        let cursor_key = |id: &str| -> StoreResult<Vec<u8>> {
            let record: Transaction = get_json(&table, id)?
                .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;
            Ok(created_desc_key(record.created, record.id.as_bytes()))
        };

        let cursor = match (&page.next_page_id, &page.prev_page_id) {
            (Some(next), _) => Cursor::After(cursor_key(next)?),
            (None, Some(prev)) => Cursor::Before(cursor_key(prev)?),
            (None, None) => Cursor::Start,
        };

        let size = page.size();
        let (ids, more, earlier) = scan_index(&index, &[], &[0xFF; 40], cursor, size)?;

        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(record) = get_json::<Transaction, _>(&table, id)? {
                items.push(record);
            }
        }

        Ok(Page {
            items,
            page: page_links(&ids, size, more, earlier),
        })
    }

    /// A single transfer with its envelope count.
    pub fn retrieve_transaction(&self, id: Uuid) -> StoreResult<Transaction> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        let mut record: Transaction = get_json(&table, &id.to_string())?
            .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;

        let index = read_txn.open_table(ENVELOPE_INDEX)?;
        let end = prefix_end(id.as_bytes());
        let mut count = 0u64;
        for entry in index.range(id.as_bytes().as_slice()..end.as_slice())? {
            entry?;
            count += 1;
        }
        record.envelope_count = count;
        Ok(record)
    }

    pub fn transaction_exists(&self, id: Uuid) -> StoreResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSACTIONS)?;
        Ok(table.get(id.to_string().as_str())?.is_some())
    }

    /// Envelopes of a transfer, oldest first.
    pub fn list_secure_envelopes(
        &self,
        transaction_id: Uuid,
        page: &PageInfo,
    ) -> StoreResult<Page<EnvelopeRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECURE_ENVELOPES)?;
        let index = read_txn.open_table(ENVELOPE_INDEX)?;

        let cursor_key = |id: &str| -> StoreResult<Vec<u8>> {
            let record: EnvelopeRecord = get_json(&table, id)?
                .filter(|rec: &EnvelopeRecord| rec.envelope_id == transaction_id)
                .ok_or_else(|| StoreError::NotFound(format!("secure envelope {id}")))?;
            let ulid = record
                .id
                .ok_or_else(|| StoreError::NotFound(format!("secure envelope {id}")))?;
            Ok(envelope_index_key(record.envelope_id, record.timestamp, ulid))
        };

        let cursor = match (&page.next_page_id, &page.prev_page_id) {
            (Some(next), _) => Cursor::After(cursor_key(next)?),
            (None, Some(prev)) => Cursor::Before(cursor_key(prev)?),
            (None, None) => Cursor::Start,
        };

        let lower = transaction_id.as_bytes().to_vec();
        let upper = prefix_end(&lower);
        let size = page.size();
        let (ids, more, earlier) = scan_index(&index, &lower, &upper, cursor, size)?;

        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(record) = get_json::<EnvelopeRecord, _>(&table, id)? {
                items.push(record);
            }
        }

        Ok(Page {
            items,
            page: page_links(&ids, size, more, earlier),
        })
    }

    pub fn retrieve_secure_envelope(
        &self,
        transaction_id: Uuid,
        envelope_id: Ulid,
    ) -> StoreResult<EnvelopeRecord> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECURE_ENVELOPES)?;
        get_json::<EnvelopeRecord, _>(&table, &envelope_id.to_string())?
            .filter(|record| record.envelope_id == transaction_id)
            .ok_or_else(|| StoreError::NotFound(format!("secure envelope {envelope_id}")))
    }

    /// Most recent envelope of a transfer, optionally in one direction.
    pub fn latest_secure_envelope(
        &self,
        transaction_id: Uuid,
        direction: Option<Direction>,
    ) -> StoreResult<EnvelopeRecord> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECURE_ENVELOPES)?;
        let index = read_txn.open_table(ENVELOPE_INDEX)?;

        let lower = transaction_id.as_bytes().to_vec();
        let upper = prefix_end(&lower);
        for entry in index.range(lower.as_slice()..upper.as_slice())?.rev() {
            let (_, value) = entry?;
            if let Some(record) = get_json::<EnvelopeRecord, _>(&table, value.value())? {
                if direction.is_none_or(|dir| record.direction == dir) {
                    return Ok(record);
                }
            }
        }
        Err(StoreError::NotFound(format!(
            "secure envelope for transaction {transaction_id}"
        )))
    }
}

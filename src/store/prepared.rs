// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Prepared Transactions
//!
//! A [`PreparedTransaction`] holds the per-transfer lock for one envelope id
//! and stages every write in memory. [`PreparedTransaction::commit`] applies
//! the staged entities in a single redb write transaction, so either all of
//! them become visible or none do. Holding the lock serializes prepares for
//! the same transfer; a waiter sees the row written by the previous holder.

use std::sync::Arc;

use chrono::Utc;
use redb::ReadableDatabase;
use tokio::sync::OwnedMutexGuard;
use ulid::Ulid;
use uuid::Uuid;

use super::counterparties::{
    apply_update, lookup_directory_pair, lookup_in, normalize_name, put_counterparty,
    stamp_contacts,
};
use super::sunrise::put_sunrise;
use super::transactions::{insert_envelope, put_transaction};
use super::{
    Counterparty, EnvelopeRecord, Store, StoreError, StoreResult, SunriseRecord, Transaction,
};

impl Store {
    /// Lock the transfer and load it for update, or stage a new one.
    pub async fn prepare_transaction(
        self: &Arc<Self>,
        envelope_id: Uuid,
    ) -> StoreResult<PreparedTransaction> {
        let guard = self.transfer_lock(envelope_id).lock_owned().await;

        let (transaction, created) = match self.retrieve_transaction(envelope_id) {
            Ok(existing) => (existing, false),
            Err(StoreError::NotFound(_)) => (Transaction::stub(envelope_id, Utc::now()), true),
            Err(e) => {
                self.release_lock(envelope_id);
                return Err(e);
            }
        };

        tracing::debug!(%envelope_id, created, "Transaction prepared");
        Ok(PreparedTransaction {
            store: Arc::clone(self),
            envelope_id,
            guard: Some(guard),
            created,
            dirty: created,
            transaction,
            envelopes: Vec::new(),
            counterparties: Vec::new(),
            sunrise: Vec::new(),
        })
    }
}

/// Scoped write handle for one transfer.
pub struct PreparedTransaction {
    store: Arc<Store>,
    envelope_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    created: bool,
    dirty: bool,
    transaction: Transaction,
    envelopes: Vec<EnvelopeRecord>,
    counterparties: Vec<Counterparty>,
    sunrise: Vec<SunriseRecord>,
}

impl PreparedTransaction {
    pub fn envelope_id(&self) -> Uuid {
        self.envelope_id
    }

    /// Whether this handle inserts the transfer row.
    pub fn created(&self) -> bool {
        self.created
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.guard.is_none() {
            return Err(StoreError::Concluded);
        }
        Ok(())
    }

    /// The transfer including staged changes.
    pub fn fetch(&self) -> StoreResult<Transaction> {
        self.check_open()?;
        let mut txn = self.transaction.clone();
        txn.envelope_count += self.envelopes.len() as u64;
        Ok(txn)
    }

    /// Merge the non-empty fields of `update` into the transfer.
    pub fn update(&mut self, update: &Transaction) -> StoreResult<()> {
        self.check_open()?;
        if !update.id.is_nil() && update.id != self.envelope_id {
            return Err(StoreError::IdMismatch);
        }
        self.transaction.merge(update);
        self.transaction.modified = Utc::now();
        self.dirty = true;
        Ok(())
    }

    /// Stage a new secure envelope for this transfer and assign its id.
    pub fn add_envelope(&mut self, mut record: EnvelopeRecord) -> StoreResult<EnvelopeRecord> {
        self.check_open()?;
        if record.id.is_some() {
            return Err(StoreError::NoIdOnCreate);
        }
        if record.envelope_id != self.envelope_id {
            return Err(StoreError::IdMismatch);
        }

        if let Some(reply_to) = record.reply_to {
            let staged = self.envelopes.iter().any(|env| env.id == Some(reply_to));
            if !staged {
                self.store
                    .retrieve_secure_envelope(self.envelope_id, reply_to)
                    .map_err(|_| StoreError::NotFound(format!("reply_to envelope {reply_to}")))?;
            }
        }

        let now = Utc::now();
        record.id = Some(Ulid::new());
        record.created = now;
        record.modified = now;
        self.envelopes.push(record.clone());
        Ok(record)
    }

    fn staged_counterparty(&self, keep: impl Fn(&Counterparty) -> bool) -> Option<Counterparty> {
        self.counterparties.iter().find(|cp| keep(cp)).cloned()
    }

    fn stage_counterparty(&mut self, record: Counterparty) {
        match self
            .counterparties
            .iter_mut()
            .find(|cp| cp.id == record.id)
        {
            Some(slot) => *slot = record,
            None => self.counterparties.push(record),
        }
    }

    fn new_counterparty(&mut self, mut record: Counterparty) -> Counterparty {
        let now = Utc::now();
        record.normalize();
        record.id = Some(Ulid::new());
        record.created = now;
        record.modified = now;
        stamp_contacts(&mut record, now);
        self.stage_counterparty(record.clone());
        record
    }

    /// Associate a counterparty with the transfer. It is found by id, then by
    /// directory registration (created when missing), then by common name;
    /// a record with none of these is created.
    pub fn add_counterparty(&mut self, record: Counterparty) -> StoreResult<Counterparty> {
        self.check_open()?;

        let resolved = if let Some(id) = record.id {
            match self.staged_counterparty(|cp| cp.id == Some(id)) {
                Some(found) => found,
                None => self.store.retrieve_counterparty(id)?,
            }
        } else if record.has_directory_pair() {
            let directory = record.registered_directory.clone().unwrap_or_default();
            let directory_id = record.directory_id.clone().unwrap_or_default();
            let staged = self.staged_counterparty(|cp| {
                cp.registered_directory.as_deref() == Some(directory.as_str())
                    && cp.directory_id.as_deref() == Some(directory_id.as_str())
            });
            let stored = match staged {
                Some(found) => Some(found),
                None => {
                    let read_txn = self.store.db.begin_read()?;
                    lookup_directory_pair(&read_txn, &directory, &directory_id)?
                }
            };
            match stored {
                Some(found) => found,
                None => self.new_counterparty(record),
            }
        } else if !record.common_name.is_empty() {
            self.lookup_counterparty("common_name", &record.common_name)?
        } else {
            self.new_counterparty(record)
        };

        self.associate(&resolved);
        Ok(resolved)
    }

    /// Stage a new counterparty and associate it with the transfer.
    pub fn create_counterparty(&mut self, record: Counterparty) -> StoreResult<Counterparty> {
        self.check_open()?;
        if record.id.is_some() {
            return Err(StoreError::NoIdOnCreate);
        }
        let created = self.new_counterparty(record);
        self.associate(&created);
        Ok(created)
    }

    fn associate(&mut self, counterparty: &Counterparty) {
        self.transaction.counterparty = counterparty.name.clone();
        self.transaction.counterparty_id = counterparty.id;
        self.transaction.modified = Utc::now();
        self.dirty = true;
    }

    pub fn update_counterparty(&mut self, update: &Counterparty) -> StoreResult<Counterparty> {
        self.check_open()?;
        let id = update
            .id
            .ok_or_else(|| StoreError::NotFound("counterparty id".into()))?;
        let existing = match self.staged_counterparty(|cp| cp.id == Some(id)) {
            Some(found) => found,
            None => self.store.retrieve_counterparty(id)?,
        };

        let now = Utc::now();
        let mut merged = apply_update(&existing, update);
        merged.normalize();
        merged.modified = now;
        stamp_contacts(&mut merged, now);
        self.stage_counterparty(merged.clone());

        if self.transaction.counterparty_id == Some(id) {
            self.transaction.counterparty = merged.name.clone();
            self.dirty = true;
        }
        Ok(merged)
    }

    /// Look up a counterparty including ones staged on this handle.
    pub fn lookup_counterparty(&self, field: &str, value: &str) -> StoreResult<Counterparty> {
        self.check_open()?;
        let staged = match field {
            "common_name" => self.staged_counterparty(|cp| cp.common_name == value),
            "name" => self.staged_counterparty(|cp| normalize_name(&cp.name) == normalize_name(value)),
            "lei" => self.staged_counterparty(|cp| cp.lei.as_deref() == Some(value)),
            other => return Err(StoreError::UnknownField(other.to_string())),
        };
        if let Some(found) = staged {
            return Ok(found);
        }

        let read_txn = self.store.db.begin_read()?;
        lookup_in(&read_txn, field, value)
    }

    pub fn update_sunrise(&mut self, record: &SunriseRecord) -> StoreResult<SunriseRecord> {
        self.check_open()?;
        let id = record
            .id
            .ok_or_else(|| StoreError::NotFound("sunrise record id".into()))?;
        if record.envelope_id != self.envelope_id {
            return Err(StoreError::IdMismatch);
        }

        let mut updated = record.clone();
        updated.modified = Utc::now();
        match self.sunrise.iter_mut().find(|rec| rec.id == Some(id)) {
            Some(slot) => {
                updated.created = slot.created;
                *slot = updated.clone();
            }
            None => {
                updated.created = self.store.retrieve_sunrise(id)?.created;
                self.sunrise.push(updated.clone());
            }
        }
        Ok(updated)
    }

    /// Write a Sunrise record of this transfer now instead of at commit, so
    /// it survives a rollback. Creates the record when it has no id yet.
    pub fn write_sunrise(&mut self, record: SunriseRecord) -> StoreResult<SunriseRecord> {
        self.check_open()?;
        if record.envelope_id != self.envelope_id {
            return Err(StoreError::IdMismatch);
        }
        if let Some(id) = record.id {
            self.sunrise.retain(|staged| staged.id != Some(id));
        }
        match record.id {
            None => self.store.create_sunrise(record),
            Some(_) => self.store.update_sunrise(&record),
        }
    }

    /// Write every staged entity in one database transaction and release
    /// the transfer.
    pub fn commit(&mut self) -> StoreResult<()> {
        self.check_open()?;
        let result = self.write_staged();
        self.conclude();

        match &result {
            Ok(()) => tracing::debug!(envelope_id = %self.envelope_id, "Transaction committed"),
            Err(e) => tracing::warn!(envelope_id = %self.envelope_id, error = %e, "Transaction commit failed"),
        }
        result
    }

    fn write_staged(&mut self) -> StoreResult<()> {
        let write_txn = self.store.db.begin_write()?;

        for counterparty in &self.counterparties {
            put_counterparty(&write_txn, counterparty)?;
        }

        if let Some(last) = self.envelopes.iter().map(|env| env.timestamp).max() {
            if self.transaction.last_update.is_none_or(|ts| ts < last) {
                self.transaction.last_update = Some(last);
            }
        }
        if self.dirty || !self.envelopes.is_empty() {
            let mut record = self.transaction.clone();
            record.envelope_count += self.envelopes.len() as u64;
            put_transaction(&write_txn, &record)?;
        }

        for envelope in &self.envelopes {
            insert_envelope(&write_txn, envelope)?;
        }
        for record in &self.sunrise {
            put_sunrise(&write_txn, record)?;
        }

        write_txn.commit()?;
        Ok(())
    }

    /// Discard staged changes. Calling it again, or after commit, does nothing.
    pub fn rollback(&mut self) {
        if self.guard.is_some() {
            tracing::debug!(envelope_id = %self.envelope_id, "Transaction rolled back");
            self.conclude();
        }
    }

    fn conclude(&mut self) {
        self.envelopes.clear();
        self.counterparties.clear();
        self.sunrise.clear();
        if self.guard.is_some() {
            self.store.release_lock(self.envelope_id);
            self.guard = None;
        }
    }
}

impl Drop for PreparedTransaction {
    fn drop(&mut self) {
        self.conclude();
    }
}

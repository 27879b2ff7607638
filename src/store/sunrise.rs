// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sunrise invitation records.

use chrono::Utc;
use redb::{ReadableDatabase, ReadableTable, WriteTransaction};
use ulid::Ulid;
use uuid::Uuid;

use super::{
    get_json, pair_key, prefix_end, Store, StoreError, StoreResult, SunriseRecord, SUNRISE,
    SUNRISE_BY_ENVELOPE,
};

pub(super) fn put_sunrise(txn: &WriteTransaction, record: &SunriseRecord) -> StoreResult<()> {
    let id = record
        .id
        .ok_or_else(|| StoreError::NotFound("sunrise record id".into()))?;
    let id_str = id.to_string();
    let json = serde_json::to_vec(record)?;

    let mut table = txn.open_table(SUNRISE)?;
    table.insert(id_str.as_str(), json.as_slice())?;

    let mut index = txn.open_table(SUNRISE_BY_ENVELOPE)?;
    let key = pair_key(record.envelope_id.as_bytes(), &id.to_bytes());
    index.insert(key.as_slice(), id_str.as_str())?;
    Ok(())
}

impl Store {
    pub fn create_sunrise(&self, mut record: SunriseRecord) -> StoreResult<SunriseRecord> {
        if record.id.is_some() {
            return Err(StoreError::NoIdOnCreate);
        }
        let now = Utc::now();
        record.id = Some(Ulid::new());
        record.email = record.email.to_lowercase();
        record.created = now;
        record.modified = now;

        let write_txn = self.db.begin_write()?;
        put_sunrise(&write_txn, &record)?;
        write_txn.commit()?;
        Ok(record)
    }

    pub fn retrieve_sunrise(&self, id: Ulid) -> StoreResult<SunriseRecord> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUNRISE)?;
        get_json(&table, &id.to_string())?
            .ok_or_else(|| StoreError::NotFound(format!("sunrise record {id}")))
    }

    pub fn update_sunrise(&self, record: &SunriseRecord) -> StoreResult<SunriseRecord> {
        let id = record
            .id
            .ok_or_else(|| StoreError::NotFound("sunrise record id".into()))?;
        let existing = self.retrieve_sunrise(id)?;
        if existing.envelope_id != record.envelope_id {
            return Err(StoreError::IdMismatch);
        }

        let mut updated = record.clone();
        updated.created = existing.created;
        updated.modified = Utc::now();

        let write_txn = self.db.begin_write()?;
        put_sunrise(&write_txn, &updated)?;
        write_txn.commit()?;
        Ok(updated)
    }

    /// Every invitation sent for a transfer.
    pub fn list_sunrise(&self, envelope_id: Uuid) -> StoreResult<Vec<SunriseRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SUNRISE)?;
        let index = read_txn.open_table(SUNRISE_BY_ENVELOPE)?;

        let lower = envelope_id.as_bytes().to_vec();
        let upper = prefix_end(&lower);
        let mut records = Vec::new();
        for entry in index.range(lower.as_slice()..upper.as_slice())? {
            let (_, value) = entry?;
            if let Some(record) = get_json::<SunriseRecord, _>(&table, value.value())? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::store::testing::temp_store;
    use crate::store::SunriseStatus;

    #[test]
    fn sunrise_lifecycle() {
        let (_dir, store) = temp_store();
        let envelope_id = Uuid::new_v4();

        let mut record = store
            .create_sunrise(SunriseRecord {
                envelope_id,
                email: "Barry@Example.com".to_string(),
                expiration: Utc::now() + TimeDelta::days(14),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(record.status, SunriseStatus::Draft);
        assert_eq!(record.email, "barry@example.com");
        assert!(matches!(
            store.create_sunrise(record.clone()),
            Err(StoreError::NoIdOnCreate)
        ));

        record.status = SunriseStatus::Pending;
        record.sent_on = Some(Utc::now());
        store.update_sunrise(&record).unwrap();

        let listed = store.list_sunrise(envelope_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, SunriseStatus::Pending);
        assert!(store.list_sunrise(Uuid::new_v4()).unwrap().is_empty());

        record.envelope_id = Uuid::new_v4();
        assert!(matches!(
            store.update_sunrise(&record),
            Err(StoreError::IdMismatch)
        ));
    }
}

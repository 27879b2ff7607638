// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Counterparties and their contacts.

use chrono::{DateTime, Utc};
use redb::{ReadTransaction, ReadableDatabase, ReadableTable, WriteTransaction};
use ulid::Ulid;
use unicode_normalization::UnicodeNormalization;

use super::{
    created_desc_key, get_json, page_links, pair_key, prefix_end, scan_index, Contact,
    Counterparty, CounterpartySource, Cursor, Page, PageInfo, Protocol, Store, StoreError,
    StoreResult, CONTACTS, CONTACT_EMAILS, CONTACT_INDEX, COUNTERPARTIES, COUNTERPARTY_INDEX,
    COUNTERPARTY_NAMES,
};

// =============================================================================
// Email Addresses
// =============================================================================

/// A parsed mailbox: optional display name plus lowercase address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: String,
}

impl Mailbox {
    pub fn domain(&self) -> &str {
        self.address.rsplit_once('@').map(|(_, d)| d).unwrap_or_default()
    }
}

/// Parse `addr@example.com` or `Display Name <addr@example.com>`.
pub fn parse_email(input: &str) -> StoreResult<Mailbox> {
    let input = input.trim();
    let invalid = || StoreError::InvalidEmail(input.to_string());

    let (name, address) = match (input.find('<'), input.rfind('>')) {
        (Some(open), Some(close)) if open < close && close == input.len() - 1 => {
            let name = input[..open].trim().trim_matches('"').trim();
            let name = Some(name.to_string()).filter(|n| !n.is_empty());
            (name, input[open + 1..close].trim())
        }
        (None, None) => (None, input),
        _ => return Err(invalid()),
    };

    let (local, domain) = address.rsplit_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.is_empty()
        || domain.starts_with('.')
        || domain.ends_with('.')
        || address.chars().any(|c| c.is_whitespace() || c == '<' || c == '>')
    {
        return Err(invalid());
    }

    Ok(Mailbox {
        name,
        address: address.to_lowercase(),
    })
}

/// Case and width insensitive form of a counterparty name.
pub(crate) fn normalize_name(name: &str) -> String {
    name.nfkc().collect::<String>().trim().to_lowercase()
}

// =============================================================================
// Field Updates
// =============================================================================

/// Apply an update to an existing counterparty. The protocol never changes,
/// and directory sourced records keep their authoritative fields.
pub(crate) fn apply_update(existing: &Counterparty, update: &Counterparty) -> Counterparty {
    let mut merged = existing.clone();

    if !existing.source.is_authoritative() {
        if !update.common_name.is_empty() {
            merged.common_name = update.common_name.clone();
        }
        if !update.endpoint.is_empty() {
            merged.endpoint = update.endpoint.clone();
        }
        if !update.name.is_empty() {
            merged.name = update.name.clone();
        }
        merged.directory_id = update.directory_id.clone().or(merged.directory_id);
        merged.registered_directory = update
            .registered_directory
            .clone()
            .or(merged.registered_directory);
        merged.ivms_record = update.ivms_record.clone().or(merged.ivms_record);
        merged.verified_on = update.verified_on.or(merged.verified_on);
    }

    merged.website = update.website.clone().or(merged.website);
    merged.country = update.country.clone().or(merged.country);
    merged.lei = update.lei.clone().or(merged.lei);
    if update.contacts.is_some() {
        merged.contacts = update.contacts.clone();
    }
    merged
}

/// Give new contacts an id and link them to their counterparty.
pub(crate) fn stamp_contacts(counterparty: &mut Counterparty, now: DateTime<Utc>) {
    let parent = counterparty.id;
    for contact in counterparty.contacts.iter_mut().flatten() {
        if contact.id.is_none() {
            contact.id = Some(Ulid::new());
            contact.created = now;
        }
        contact.email = contact.email.trim().to_lowercase();
        contact.counterparty_id = parent;
        contact.modified = now;
    }
}

// =============================================================================
// Write helpers (used inside a redb write transaction)
// =============================================================================

pub(super) fn put_counterparty(txn: &WriteTransaction, record: &Counterparty) -> StoreResult<()> {
    let id = record
        .id
        .ok_or_else(|| StoreError::NotFound("counterparty id".into()))?;
    let id_str = id.to_string();

    let mut table = txn.open_table(COUNTERPARTIES)?;
    let previous: Option<Counterparty> = get_json(&table, &id_str)?;

    {
        let mut names = txn.open_table(COUNTERPARTY_NAMES)?;
        if let Some(owner) = names.get(record.common_name.as_str())? {
            if owner.value() != id_str {
                return Err(StoreError::Duplicate(format!(
                    "counterparty common name {:?}",
                    record.common_name
                )));
            }
        }
        if let Some(prev) = &previous {
            if prev.common_name != record.common_name {
                names.remove(prev.common_name.as_str())?;
            }
        }
        names.insert(record.common_name.as_str(), id_str.as_str())?;
    }

    let mut stored = record.clone();
    stored.contacts = None;
    let json = serde_json::to_vec(&stored)?;
    table.insert(id_str.as_str(), json.as_slice())?;

    if previous.is_none() {
        let mut index = txn.open_table(COUNTERPARTY_INDEX)?;
        let key = created_desc_key(record.created, &id.to_bytes());
        index.insert(key.as_slice(), id_str.as_str())?;
    }

    for contact in record.contacts.iter().flatten() {
        put_contact(txn, contact)?;
    }
    Ok(())
}

pub(super) fn put_contact(txn: &WriteTransaction, contact: &Contact) -> StoreResult<()> {
    let (Some(id), Some(parent)) = (contact.id, contact.counterparty_id) else {
        return Err(StoreError::NotFound("contact id".into()));
    };
    let id_str = id.to_string();
    let email = contact.email.to_lowercase();

    let mut table = txn.open_table(CONTACTS)?;
    let previous: Option<Contact> = get_json(&table, &id_str)?;

    let mut emails = txn.open_table(CONTACT_EMAILS)?;
    if let Some(owner) = emails.get(email.as_str())? {
        if owner.value() != id_str {
            return Err(StoreError::Duplicate(format!("contact email {email:?}")));
        }
    }
    if let Some(prev) = &previous {
        if !prev.email.eq_ignore_ascii_case(&email) {
            emails.remove(prev.email.to_lowercase().as_str())?;
        }
    }
    emails.insert(email.as_str(), id_str.as_str())?;

    let json = serde_json::to_vec(contact)?;
    table.insert(id_str.as_str(), json.as_slice())?;

    let mut index = txn.open_table(CONTACT_INDEX)?;
    let key = pair_key(&parent.to_bytes(), &id.to_bytes());
    index.insert(key.as_slice(), id_str.as_str())?;
    Ok(())
}

// =============================================================================
// Read helpers
// =============================================================================

pub(super) fn read_contacts(rtxn: &ReadTransaction, parent: Ulid) -> StoreResult<Vec<Contact>> {
    let index = rtxn.open_table(CONTACT_INDEX)?;
    let table = rtxn.open_table(CONTACTS)?;

    let lower = parent.to_bytes().to_vec();
    let upper = prefix_end(&lower);
    let mut contacts = Vec::new();
    for entry in index.range(lower.as_slice()..upper.as_slice())? {
        let (_, value) = entry?;
        if let Some(contact) = get_json::<Contact, _>(&table, value.value())? {
            contacts.push(contact);
        }
    }
    Ok(contacts)
}

pub(super) fn read_counterparty(rtxn: &ReadTransaction, id: Ulid) -> StoreResult<Option<Counterparty>> {
    let table = rtxn.open_table(COUNTERPARTIES)?;
    let Some(mut record) = get_json::<Counterparty, _>(&table, &id.to_string())? else {
        return Ok(None);
    };
    record.contacts = Some(read_contacts(rtxn, id)?);
    Ok(Some(record))
}

/// Every counterparty matching `keep`, without contacts.
fn scan_counterparties(
    rtxn: &ReadTransaction,
    keep: impl Fn(&Counterparty) -> bool,
) -> StoreResult<Vec<Counterparty>> {
    let table = rtxn.open_table(COUNTERPARTIES)?;
    let mut found = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        let record: Counterparty = serde_json::from_slice(value.value())?;
        if keep(&record) {
            found.push(record);
        }
    }
    Ok(found)
}

fn single(mut found: Vec<Counterparty>, what: String) -> StoreResult<Counterparty> {
    match found.len() {
        0 => Err(StoreError::NotFound(what)),
        1 => Ok(found.remove(0)),
        _ => Err(StoreError::Ambiguous(what)),
    }
}

pub(super) fn lookup_in(rtxn: &ReadTransaction, field: &str, value: &str) -> StoreResult<Counterparty> {
    let what = format!("counterparty with {field} {value:?}");
    let record = match field {
        "common_name" => {
            let names = rtxn.open_table(COUNTERPARTY_NAMES)?;
            let id = match names.get(value)? {
                Some(id) => id.value().to_string(),
                None => return Err(StoreError::NotFound(what)),
            };
            id.parse::<Ulid>()
                .map_err(|_| StoreError::NotFound(what.clone()))?
        }
        "name" => single(scan_counterparties(rtxn, |cp| cp.name == value)?, what.clone())?
            .id
            .ok_or_else(|| StoreError::NotFound(what.clone()))?,
        "lei" => single(
            scan_counterparties(rtxn, |cp| cp.lei.as_deref() == Some(value))?,
            what.clone(),
        )?
        .id
        .ok_or_else(|| StoreError::NotFound(what.clone()))?,
        other => return Err(StoreError::UnknownField(other.to_string())),
    };

    read_counterparty(rtxn, record)?.ok_or(StoreError::NotFound(what))
}

pub(super) fn lookup_directory_pair(
    rtxn: &ReadTransaction,
    registered_directory: &str,
    directory_id: &str,
) -> StoreResult<Option<Counterparty>> {
    let found = scan_counterparties(rtxn, |cp| {
        cp.registered_directory.as_deref() == Some(registered_directory)
            && cp.directory_id.as_deref() == Some(directory_id)
    })?;
    match found.first().and_then(|cp| cp.id) {
        Some(id) => read_counterparty(rtxn, id),
        None => Ok(None),
    }
}

// =============================================================================
// Store API
// =============================================================================

impl Store {
    pub fn create_counterparty(&self, mut record: Counterparty) -> StoreResult<Counterparty> {
        if record.id.is_some() {
            return Err(StoreError::NoIdOnCreate);
        }

        let now = Utc::now();
        record.normalize();
        record.id = Some(Ulid::new());
        record.created = now;
        record.modified = now;
        stamp_contacts(&mut record, now);

        let write_txn = self.db.begin_write()?;
        put_counterparty(&write_txn, &record)?;
        write_txn.commit()?;

        tracing::info!(
            counterparty_id = %record.id.unwrap_or_default(),
            common_name = %record.common_name,
            source = %record.source,
            "Counterparty created"
        );
        if record.contacts.is_none() {
            record.contacts = Some(Vec::new());
        }
        Ok(record)
    }

    /// A counterparty with its contacts.
    pub fn retrieve_counterparty(&self, id: Ulid) -> StoreResult<Counterparty> {
        let read_txn = self.db.begin_read()?;
        read_counterparty(&read_txn, id)?
            .ok_or_else(|| StoreError::NotFound(format!("counterparty {id}")))
    }

    pub fn update_counterparty(&self, update: &Counterparty) -> StoreResult<Counterparty> {
        let id = update
            .id
            .ok_or_else(|| StoreError::NotFound("counterparty id".into()))?;
        let existing = self.retrieve_counterparty(id)?;

        let now = Utc::now();
        let mut merged = apply_update(&existing, update);
        merged.normalize();
        merged.modified = now;
        stamp_contacts(&mut merged, now);

        let write_txn = self.db.begin_write()?;
        put_counterparty(&write_txn, &merged)?;
        write_txn.commit()?;
        Ok(merged)
    }

    /// Counterparties, newest first, without contacts.
    pub fn list_counterparties(&self, page: &PageInfo) -> StoreResult<Page<Counterparty>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COUNTERPARTIES)?;
        let index = read_txn.open_table(COUNTERPARTY_INDEX)?;

        let cursor_key = |id: &str| -> StoreResult<Vec<u8>> {
            let record: Counterparty = get_json(&table, id)?
                .ok_or_else(|| StoreError::NotFound(format!("counterparty {id}")))?;
            let ulid = record
                .id
                .ok_or_else(|| StoreError::NotFound(format!("counterparty {id}")))?;
            Ok(created_desc_key(record.created, &ulid.to_bytes()))
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
            if let Some(record) = get_json::<Counterparty, _>(&table, id)? {
                items.push(record);
            }
        }

        Ok(Page {
            items,
            page: page_links(&ids, size, more, earlier),
        })
    }

    /// Find exactly one counterparty by `common_name`, `name` or `lei`.
    pub fn lookup_counterparty(&self, field: &str, value: &str) -> StoreResult<Counterparty> {
        let read_txn = self.db.begin_read()?;
        lookup_in(&read_txn, field, value)
    }

    pub fn list_contacts(&self, counterparty_id: Ulid) -> StoreResult<Vec<Contact>> {
        let read_txn = self.db.begin_read()?;
        if read_counterparty(&read_txn, counterparty_id)?.is_none() {
            return Err(StoreError::NotFound(format!("counterparty {counterparty_id}")));
        }
        read_contacts(&read_txn, counterparty_id)
    }

    pub fn create_contact(&self, counterparty_id: Ulid, mut contact: Contact) -> StoreResult<Contact> {
        if contact.id.is_some() {
            return Err(StoreError::NoIdOnCreate);
        }
        let mailbox = parse_email(&contact.email)?;
        self.retrieve_counterparty(counterparty_id)?;

        let now = Utc::now();
        contact.id = Some(Ulid::new());
        contact.email = mailbox.address;
        contact.counterparty_id = Some(counterparty_id);
        contact.created = now;
        contact.modified = now;

        let write_txn = self.db.begin_write()?;
        put_contact(&write_txn, &contact)?;
        write_txn.commit()?;
        Ok(contact)
    }

    /// Find the Sunrise counterparty for an email address, creating it if
    /// needed. Matches by contact email first, then by unique name.
    pub fn get_or_create_sunrise_counterparty(
        &self,
        email: &str,
        name: &str,
    ) -> StoreResult<Counterparty> {
        let mailbox = parse_email(email)?;

        let read_txn = self.db.begin_read()?;
        let emails = read_txn.open_table(CONTACT_EMAILS)?;
        if let Some(contact_id) = emails.get(mailbox.address.as_str())? {
            let contacts = read_txn.open_table(CONTACTS)?;
            let parent = get_json::<Contact, _>(&contacts, contact_id.value())?
                .and_then(|contact| contact.counterparty_id);
            if let Some(id) = parent {
                if let Some(record) = read_counterparty(&read_txn, id)? {
                    return Ok(record);
                }
            }
        }

        let wanted = normalize_name(name);
        let matches = if wanted.is_empty() {
            Vec::new()
        } else {
            scan_counterparties(&read_txn, |cp| normalize_name(&cp.name) == wanted)?
        };
        drop(emails);

        let contact = Contact {
            name: mailbox.name.clone().unwrap_or_default(),
            email: mailbox.address.clone(),
            ..Default::default()
        };

        match matches.len() {
            0 => {
                drop(read_txn);
                let domain = mailbox.domain().to_string();
                self.create_counterparty(Counterparty {
                    source: CounterpartySource::Sunrise,
                    protocol: Protocol::Sunrise,
                    common_name: domain.clone(),
                    endpoint: format!("mailto:{}", mailbox.address),
                    name: if name.trim().is_empty() {
                        domain.clone()
                    } else {
                        name.trim().to_string()
                    },
                    website: Some(format!("https://{domain}")),
                    contacts: Some(vec![contact]),
                    ..Default::default()
                })
            }
            1 => {
                let id = matches[0]
                    .id
                    .ok_or_else(|| StoreError::NotFound(format!("counterparty {name:?}")))?;
                drop(read_txn);
                self.create_contact(id, contact)?;
                self.retrieve_counterparty(id)
            }
            _ => Err(StoreError::Ambiguous(format!(
                "multiple counterparties named {name:?}"
            ))),
        }
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process remote node for tests.
//!
//! A [`MockPeer`] behaves like a counterparty: it learns our key during key
//! exchange, opens what we send with its own key and answers with scripted
//! replies sealed back to us.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Connector, PeerClient, PeerError, PeerInfo, PeerResult, SigningKey};
use crate::envelope::payload::{Pending, TransactionPayload};
use crate::envelope::{
    Envelope, EnvelopeOptions, Payload, Rejection, RejectionCode, SecureEnvelope, TransferState,
};
use crate::keys::{fixtures, KeyPair, PublicKey};
use crate::trp::{Inquiry, Resolution};

/// What the remote answers to the next transfer.
#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    /// Echo the received payload with this transfer state.
    State(TransferState),
    /// Answer with a payload of our choosing.
    Payload(Payload, TransferState),
    Reject(Rejection),
    Fail(String),
}

pub(crate) struct MockPeer {
    key: KeyPair,
    learned: Mutex<Option<PublicKey>>,
    replies: Mutex<VecDeque<MockReply>>,
    received: Mutex<Vec<Envelope>>,
    inquiries: Mutex<Vec<Inquiry>>,
    resolution: Mutex<Option<Resolution>>,
    delay: Mutex<Option<Duration>>,
    transfers: AtomicUsize,
    exchanges: AtomicUsize,
    fail_close: AtomicBool,
}

impl MockPeer {
    pub fn new() -> Arc<Self> {
        Self::with_key(fixtures::remote())
    }

    pub fn with_key(key: KeyPair) -> Arc<Self> {
        Arc::new(Self {
            key,
            learned: Mutex::new(None),
            replies: Mutex::new(VecDeque::new()),
            received: Mutex::new(Vec::new()),
            inquiries: Mutex::new(Vec::new()),
            resolution: Mutex::new(None),
            delay: Mutex::new(None),
            transfers: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
        })
    }

    pub fn push(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    pub fn set_resolution(&self, resolution: Resolution) {
        *self.resolution.lock() = Some(resolution);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn transfers(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn learned_key(&self) -> Option<PublicKey> {
        self.learned.lock().clone()
    }

    /// Envelopes received so far, opened when they were sealed to us.
    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().clone()
    }

    pub fn inquiries(&self) -> Vec<Inquiry> {
        self.inquiries.lock().clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn reject(&self, envelope_id: &str, rejection: Rejection) -> SecureEnvelope {
        let state = if rejection.retry {
            TransferState::Repair
        } else {
            TransferState::Rejected
        };
        let mut msg = Envelope::reject(rejection, EnvelopeOptions::default().with_transfer_state(state))
            .into_proto();
        msg.id = envelope_id.to_string();
        msg
    }

    fn seal_reply(&self, envelope_id: &str, payload: Payload, state: TransferState) -> PeerResult<SecureEnvelope> {
        let Some(key) = self.learned_key() else {
            return Ok(self.reject(
                envelope_id,
                Rejection::new(RejectionCode::NoSigningKey, "no sealing key for originator", true),
            ));
        };

        let mut reply = Envelope::new(payload, EnvelopeOptions::default().with_transfer_state(state));
        reply.encrypt().map_err(|e| PeerError::Transport(e.to_string()))?;
        reply.seal(&key).map_err(|e| PeerError::Transport(e.to_string()))?;

        let mut msg = reply.into_proto();
        msg.id = envelope_id.to_string();
        Ok(msg)
    }
}

#[async_trait]
impl PeerClient for MockPeer {
    async fn transfer(&self, envelope: SecureEnvelope) -> PeerResult<SecureEnvelope> {
        self.pause().await;
        self.transfers.fetch_add(1, Ordering::SeqCst);

        let envelope_id = envelope.id.clone();
        let mut incoming = Envelope::wrap(envelope);
        let opened = if incoming.is_sealed() && !incoming.is_error() {
            incoming.open(&self.key)
        } else {
            Ok(())
        };
        self.received.lock().push(incoming.clone());

        if let Err(e) = opened {
            return match e.into_rejection() {
                Ok(rejection) => Ok(self.reject(&envelope_id, rejection)),
                Err(e) => Err(PeerError::Transport(e.to_string())),
            };
        }

        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or(MockReply::State(TransferState::Pending));

        match reply {
            MockReply::Fail(message) => Err(PeerError::Transport(message)),
            MockReply::Reject(rejection) => Ok(self.reject(&envelope_id, rejection)),
            MockReply::Payload(payload, state) => self.seal_reply(&envelope_id, payload, state),
            MockReply::State(state) => {
                let payload = match incoming.payload() {
                    Some(payload) => payload.clone(),
                    None => {
                        return Ok(self.reject(
                            &envelope_id,
                            Rejection::new(RejectionCode::Rejected, "nothing to reply to", false),
                        ))
                    }
                };
                let payload = if state == TransferState::Pending {
                    Payload {
                        transaction: TransactionPayload::Pending(Pending {
                            envelope_id: envelope_id.clone(),
                            received_by: "Beneficiary VASP".to_string(),
                            transaction: payload.transaction.transaction().cloned(),
                            ..Default::default()
                        }),
                        ..payload
                    }
                } else {
                    payload
                };
                self.seal_reply(&envelope_id, payload, state)
            }
        }
    }

    async fn key_exchange(&self, key: SigningKey) -> PeerResult<SigningKey> {
        self.pause().await;
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        *self.learned.lock() = Some(key.public_key()?);
        Ok(SigningKey::from(self.key.public_key()))
    }

    async fn trp_inquiry(&self, inquiry: &Inquiry) -> PeerResult<Resolution> {
        self.pause().await;
        self.inquiries.lock().push(inquiry.clone());
        Ok(self.resolution.lock().clone().unwrap_or_else(Resolution::pending))
    }

    async fn close(&self) -> PeerResult<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(PeerError::Transport("connection already closed".into()));
        }
        Ok(())
    }
}

/// Routes common names to registered mock peers.
pub(crate) struct MockConnector {
    peers: Mutex<HashMap<String, Arc<MockPeer>>>,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn register(&self, common_name: &str, peer: Arc<MockPeer>) {
        self.peers.lock().insert(common_name.to_string(), peer);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, info: &PeerInfo) -> PeerResult<Arc<dyn PeerClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let peer = self
            .peers
            .lock()
            .get(&info.common_name)
            .cloned()
            .ok_or_else(|| PeerError::Transport(format!("no route to {}", info.common_name)))?;
        let client: Arc<dyn PeerClient> = peer;
        Ok(client)
    }
}

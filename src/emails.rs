// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Email Delivery
//!
//! Outgoing mail goes through an [`EmailSender`]. [`send_with_backoff`] retries
//! failed attempts with exponential backoff and stops early when its
//! cancellation token fires. Rendering and the SMTP/SendGrid transports are
//! external; the node ships a logging sender and an in-memory sender used in
//! tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::counterparties::parse_email;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("missing email subject")]
    MissingSubject,

    #[error("missing email recipient")]
    MissingRecipient,

    #[error("could not parse email address {0:?}")]
    IncorrectEmail(String),

    #[error("email transport failed: {0}")]
    Transport(String),

    #[error("email transport refused the message: {0}")]
    Refused(String),

    #[error("email sending cancelled")]
    Cancelled,

    #[error("could not send email after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl EmailError {
    /// Transport failures are retried, everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmailError::Transport(_))
    }
}

pub type EmailResult<T> = Result<T, EmailError>;

// =============================================================================
// Message
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

impl Message {
    pub fn validate(&self) -> EmailResult<()> {
        if self.to.trim().is_empty() {
            return Err(EmailError::MissingRecipient);
        }
        if self.subject.trim().is_empty() {
            return Err(EmailError::MissingSubject);
        }
        parse_email(&self.to).map_err(|_| EmailError::IncorrectEmail(self.to.clone()))?;
        Ok(())
    }

    /// Invitation to review a transfer through the Sunrise portal.
    pub fn sunrise_invite(to: &str, organization: &str, verify_url: &str) -> Self {
        let subject = format!("Travel Rule compliance exchange requested by {organization}");
        let text = format!(
            "{organization} has sent you Travel Rule information for a virtual asset \
             transfer and requests your review.\n\n\
             Open the secure link below to review the transfer. The link expires \
             and can only be used by you.\n\n{verify_url}\n"
        );
        let html = format!(
            "<p>{organization} has sent you Travel Rule information for a virtual asset \
             transfer and requests your review.</p>\
             <p><a href=\"{verify_url}\">Review the transfer</a></p>"
        );
        Self {
            to: to.to_string(),
            subject,
            text,
            html: Some(html),
        }
    }
}

// =============================================================================
// Senders
// =============================================================================

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Make a single delivery attempt.
    async fn send(&self, message: &Message) -> EmailResult<()>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    async fn send(&self, message: &Message) -> EmailResult<()> {
        message.validate()?;
        info!(to = %message.to, subject = %message.subject, "Email (log transport)");
        debug!(body = %message.text, "Email body");
        Ok(())
    }
}

/// Records every delivered message. Can be told to fail the next attempts.
#[derive(Debug, Default)]
pub struct MemorySender {
    sent: Mutex<Vec<Message>>,
    failures: Mutex<u32>,
}

impl MemorySender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` attempts with a retryable transport error.
    pub fn fail_next(&self, n: u32) {
        *self.failures.lock() = n;
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EmailSender for MemorySender {
    async fn send(&self, message: &Message) -> EmailResult<()> {
        message.validate()?;
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(EmailError::Transport("simulated outage".into()));
            }
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Exponential backoff between delivery attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization: f64,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(2500),
            multiplier: 2.0,
            randomization: 0.45,
            max_interval: Duration::from_secs(45),
            max_elapsed: Duration::from_secs(180),
        }
    }
}

impl Backoff {
    /// Jittered delay around `interval`.
    fn randomize(&self, interval: Duration) -> Duration {
        let delta = self.randomization * interval.as_secs_f64();
        let low = interval.as_secs_f64() - delta;
        let high = interval.as_secs_f64() + delta;
        if high <= low {
            return interval;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(low..=high).max(0.0))
    }

    fn grow(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Send a message, retrying transport failures until it is delivered, the
/// elapsed budget runs out or `cancel` fires.
pub async fn send_with_backoff(
    sender: &dyn EmailSender,
    message: &Message,
    backoff: &Backoff,
    cancel: &CancellationToken,
) -> EmailResult<()> {
    message.validate()?;

    let started = Instant::now();
    let mut interval = backoff.initial_interval;
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(EmailError::Cancelled);
        }

        attempts += 1;
        let error = match sender.send(message).await {
            Ok(()) => {
                debug!(to = %message.to, attempts, "Email sent");
                return Ok(());
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        let delay = backoff.randomize(interval);
        if started.elapsed() + delay > backoff.max_elapsed {
            warn!(to = %message.to, attempts, error = %error, "Giving up on email");
            return Err(EmailError::Exhausted {
                attempts,
                last: error.to_string(),
            });
        }

        debug!(to = %message.to, attempts, error = %error, ?delay, "Could not send email, retrying");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(EmailError::Cancelled),
        }
        interval = backoff.grow(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> Backoff {
        Backoff {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(4),
            max_elapsed: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn message() -> Message {
        Message::sunrise_invite(
            "barry@example.com",
            "Alice VASP",
            "https://envoy.example.com/sunrise/verify?token=abc",
        )
    }

    #[tokio::test]
    async fn retries_transport_failures() {
        let sender = MemorySender::new();
        sender.fail_next(2);
        send_with_backoff(&sender, &message(), &quick(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let sender = MemorySender::new();
        sender.fail_next(u32::MAX);
        let backoff = Backoff {
            max_elapsed: Duration::from_millis(20),
            ..quick()
        };
        let err = send_with_backoff(&sender, &message(), &backoff, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::Exhausted { .. }));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_retries() {
        let sender = MemorySender::new();
        sender.fail_next(u32::MAX);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = send_with_backoff(&sender, &message(), &quick(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::Cancelled));
    }

    #[tokio::test]
    async fn invalid_messages_are_not_retried() {
        let sender = MemorySender::new();
        let bad = Message {
            to: "nobody".to_string(),
            subject: "hi".to_string(),
            ..Default::default()
        };
        let err = send_with_backoff(&sender, &bad, &quick(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::IncorrectEmail(_)));
    }

    #[test]
    fn default_backoff_matches_policy() {
        let backoff = Backoff::default();
        assert_eq!(backoff.initial_interval, Duration::from_millis(2500));
        assert_eq!(backoff.grow(Duration::from_secs(30)), Duration::from_secs(45));
        for _ in 0..20 {
            let delay = backoff.randomize(Duration::from_secs(10));
            assert!(delay >= Duration::from_millis(5500) && delay <= Duration::from_millis(14500));
        }
    }
}

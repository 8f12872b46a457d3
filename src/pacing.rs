//! Poll command pacing.
//!
//! Meters in this family only talk when asked. The pacer decides when the
//! poll command goes out, from two timers measured against the moment the
//! last command was sent:
//!
//! - after `poll_period_ms`, once the previous command has been answered
//! - after `response_timeout_ms`, whether answered or not, so a lost reply
//!   never stalls the stream
//!
//! All times are caller-supplied monotonic milliseconds, which keeps the
//! pacer fully deterministic under a simulated clock.

use tracing::{debug, trace};

/// The byte a meter sends to acknowledge a command it accepted.
pub const ACK_OK: u8 = b'0';

/// Result of classifying a single-byte acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Command accepted; the data response is still to come.
    Accepted,
    /// Command refused (syntax error, wrong mode...). Carries the raw byte.
    Rejected(u8),
}

/// Decides when the poll command goes out again.
///
/// A poll is re-issued once the previous one was answered and the poll period
/// has passed, or unconditionally once the response timeout has passed.
#[derive(Debug, Clone)]
pub struct CommandPacer {
    poll_command: String,
    poll_period_ms: u64,
    response_timeout_ms: u64,
    command_sent_at: u64,
    awaiting_response: bool,
    rejected_acks: u64,
}

impl CommandPacer {
    /// Creates an idle pacer for `poll_command`.
    pub fn new(poll_command: impl Into<String>, poll_period_ms: u64, response_timeout_ms: u64) -> Self {
        Self {
            poll_command: poll_command.into(),
            poll_period_ms,
            response_timeout_ms,
            command_sent_at: 0,
            awaiting_response: false,
            rejected_acks: 0,
        }
    }

    /// The command being paced.
    pub fn poll_command(&self) -> &str {
        &self.poll_command
    }

    /// Spacing of answered polls.
    pub fn poll_period_ms(&self) -> u64 {
        self.poll_period_ms
    }

    /// Resend delay for unanswered polls.
    pub fn response_timeout_ms(&self) -> u64 {
        self.response_timeout_ms
    }

    /// When the last poll went out.
    pub fn command_sent_at(&self) -> u64 {
        self.command_sent_at
    }

    /// True while the last poll is unanswered.
    pub fn awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    /// Number of refused commands since the last reset.
    pub fn rejected_acks(&self) -> u64 {
        self.rejected_acks
    }

    /// Clears state for a new acquisition starting at `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        self.command_sent_at = now_ms;
        self.awaiting_response = false;
        self.rejected_acks = 0;
    }

    /// Whether the poll command should be (re)issued at `now_ms`.
    pub fn should_poll(&self, now_ms: u64) -> bool {
        let elapsed = now_ms.saturating_sub(self.command_sent_at);
        (!self.awaiting_response && elapsed > self.poll_period_ms)
            || elapsed > self.response_timeout_ms
    }

    /// Records that the poll command went out at `now_ms`.
    pub fn mark_sent(&mut self, now_ms: u64) {
        if self.awaiting_response {
            debug!(
                elapsed_ms = now_ms.saturating_sub(self.command_sent_at),
                "Response timeout, re-issuing poll command"
            );
        }
        self.command_sent_at = now_ms;
        self.awaiting_response = true;
    }

    /// Classifies an acknowledgement byte.
    ///
    /// A refusal clears the pending response so the next tick may retry right
    /// after the poll period instead of waiting out the response timeout.
    pub fn on_ack(&mut self, byte: u8) -> AckOutcome {
        if byte == ACK_OK {
            trace!("Command acknowledged");
            return AckOutcome::Accepted;
        }
        self.awaiting_response = false;
        self.rejected_acks += 1;
        debug!(ack = %char::from(byte), "Device rejected command");
        AckOutcome::Rejected(byte)
    }

    /// Records that a complete response arrived.
    pub fn on_response(&mut self) {
        self.awaiting_response = false;
    }
}

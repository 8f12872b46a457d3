//! Device session: the cooperative polling engine.
//!
//! A [`DeviceSession`] ties one transport, one profile and one datafeed sink
//! together. It never blocks and never spawns: the host calls
//! [`poll_once`](DeviceSession::poll_once) on its own schedule (typically every
//! 50 ms) with a monotonic timestamp, and each call
//!
//! 1. drains whatever bytes are pending into the line assembler,
//! 2. classifies each completed message as ACK or reply and decodes replies,
//! 3. applies the acquisition limits,
//! 4. re-issues the poll command when pacing says so.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = ProfileRegistry::builtin();
//! let profile = registry.require("189")?;
//! let mut session = DeviceSession::new(profile, transport, sink, SessionSettings::default());
//!
//! session.start_acquisition(clock.now_ms())?;
//! loop {
//!     if session.poll_once(clock.now_ms())?.is_stop_requested() {
//!         break;
//!     }
//!     std::thread::sleep(Duration::from_millis(50));
//! }
//! session.stop_acquisition()?;
//! session.close()?;
//! ```

use crate::assembler::{LineAssembler, Message, DEFAULT_BUFFER_CAPACITY};
use crate::decoder::DecoderState;
use crate::error::AppResult;
use crate::framing::{AcquisitionFramer, DatafeedSink};
use crate::limits::SwLimits;
use crate::pacing::{AckOutcome, CommandPacer};
use crate::profile::DeviceProfile;
use crate::transport::{Transport, SERIAL_WRITE_TIMEOUT_MS};
use tracing::{debug, info, instrument, trace, warn};

/// Line delimiter of every supported meter.
pub const LINE_DELIMITER: u8 = b'\r';

/// Per-session tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Receive buffer size in bytes.
    pub buffer_capacity: usize,
    /// Sample limit, 0 for none.
    pub limit_samples: u64,
    /// Frame limit, 0 for none.
    pub limit_frames: u64,
    /// Time limit in milliseconds, 0 for none.
    pub limit_msec: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            limit_samples: 0,
            limit_frames: 0,
            limit_msec: 0,
        }
    }
}

impl SessionSettings {
    fn limits(&self) -> SwLimits {
        SwLimits::new(self.limit_samples, self.limit_msec).with_frames(self.limit_frames)
    }
}

/// Counters for one `poll_once` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Bytes pulled from the transport
    pub bytes_read: usize,
    /// Single-byte acknowledgements seen
    pub acks: usize,
    /// Non-ACK messages handed to the decoder
    pub messages: usize,
    /// Samples accepted by the sink
    pub samples: usize,
    /// Samples the sink refused
    pub rejected: usize,
    /// Decoded samples on a channel the profile does not declare
    pub dropped: usize,
    /// Commands written (polls and follow-ups)
    pub commands_sent: usize,
}

/// Outcome of one `poll_once` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Keep polling.
    Continue(PollReport),
    /// A limit was reached during this call. Reported once.
    StopRequested(PollReport),
    /// No acquisition is running; nothing was done.
    Stopped,
}

impl PollStatus {
    /// True on the call that reached a limit.
    pub fn is_stop_requested(&self) -> bool {
        matches!(self, PollStatus::StopRequested(_))
    }

    /// Counters of the call, unless the session was already stopped.
    pub fn report(&self) -> Option<&PollReport> {
        match self {
            PollStatus::Continue(report) | PollStatus::StopRequested(report) => Some(report),
            PollStatus::Stopped => None,
        }
    }
}

/// Live connection to one meter.
pub struct DeviceSession<'p, T: Transport, S: DatafeedSink> {
    profile: &'p DeviceProfile,
    transport: T,
    assembler: LineAssembler,
    pacer: CommandPacer,
    decoder_state: DecoderState,
    framer: AcquisitionFramer<S>,
}

impl<'p, T: Transport, S: DatafeedSink> DeviceSession<'p, T, S> {
    /// Binds a profile, an open transport and a sink. Nothing is sent until
    /// [`start_acquisition`](Self::start_acquisition).
    pub fn new(profile: &'p DeviceProfile, transport: T, sink: S, settings: SessionSettings) -> Self {
        Self {
            profile,
            transport,
            assembler: LineAssembler::new(settings.buffer_capacity, LINE_DELIMITER),
            pacer: CommandPacer::new(
                profile.poll_command,
                profile.poll_period_ms,
                profile.response_timeout_ms,
            ),
            decoder_state: DecoderState::default(),
            framer: AcquisitionFramer::new(sink, settings.limits()),
        }
    }

    /// Profile of the connected meter.
    pub fn profile(&self) -> &'p DeviceProfile {
        self.profile
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The datafeed sink.
    pub fn sink(&self) -> &S {
        self.framer.sink()
    }

    /// Framing state and limit counters.
    pub fn framer(&self) -> &AcquisitionFramer<S> {
        &self.framer
    }

    /// Poll pacing state.
    pub fn pacer(&self) -> &CommandPacer {
        &self.pacer
    }

    /// Receive buffer state.
    pub fn assembler(&self) -> &LineAssembler {
        &self.assembler
    }

    /// What the decoder learned from earlier replies.
    pub fn decoder_state(&self) -> &DecoderState {
        &self.decoder_state
    }

    /// Samples delivered in the current acquisition.
    pub fn samples_emitted(&self) -> u64 {
        self.framer.samples_emitted()
    }

    /// True between `start_acquisition` and the stop request or `stop_acquisition`.
    pub fn is_running(&self) -> bool {
        self.framer.is_running() && !self.framer.stop_requested()
    }

    /// Starts streaming: clears stale input and state, emits the stream
    /// header and sends the first poll command.
    #[instrument(skip(self), fields(model = %self.profile))]
    pub fn start_acquisition(&mut self, now_ms: u64) -> AppResult<()> {
        self.transport.flush_input()?;
        self.assembler.reset();
        self.decoder_state.reset();
        self.pacer.reset(now_ms);
        self.framer.on_start(now_ms)?;
        self.send_poll(now_ms)?;
        info!(transport = %self.transport.describe(), "Acquisition started");
        Ok(())
    }

    /// Runs one cooperative step. See the module docs for the sequence.
    ///
    /// Only transport failures are returned as errors.
    #[instrument(level = "trace", skip(self), fields(model = %self.profile))]
    pub fn poll_once(&mut self, now_ms: u64) -> AppResult<PollStatus> {
        if !self.is_running() {
            return Ok(PollStatus::Stopped);
        }

        let mut report = PollReport::default();
        let mut stop = false;

        // Bounded by one buffer's worth so a chattering device cannot pin the host.
        let mut byte = [0u8; 1];
        let budget = self.assembler.capacity();
        while report.bytes_read < budget && !stop {
            if self.transport.read_nonblocking(&mut byte)? == 0 {
                break;
            }
            report.bytes_read += 1;
            if let Some(message) = self.assembler.feed(byte[0]) {
                stop = self.handle_message(&message, now_ms, &mut report)?;
            }
        }

        if !stop {
            stop = self.framer.check_stop(now_ms);
        }

        if stop {
            return Ok(PollStatus::StopRequested(report));
        }

        if self.pacer.should_poll(now_ms) {
            self.send_poll(now_ms)?;
            report.commands_sent += 1;
        }

        Ok(PollStatus::Continue(report))
    }

    /// Ends the acquisition. Emits the end marker once; later calls are no-ops.
    #[instrument(skip(self), fields(model = %self.profile))]
    pub fn stop_acquisition(&mut self) -> AppResult<()> {
        if self.framer.on_stop()? {
            info!(samples = self.framer.samples_emitted(), "Acquisition stopped");
        }
        Ok(())
    }

    /// Closes the transport, ending the acquisition first if needed.
    pub fn close(&mut self) -> AppResult<()> {
        self.stop_acquisition()?;
        self.transport.close()
    }

    /// Returns true when the message raised the stop request.
    fn handle_message(
        &mut self,
        message: &Message,
        now_ms: u64,
        report: &mut PollReport,
    ) -> AppResult<bool> {
        if let Some(byte) = message.ack_byte() {
            report.acks += 1;
            if let AckOutcome::Rejected(code) = self.pacer.on_ack(byte) {
                debug!(code = %char::from(code), "Command rejected by device");
            }
            return Ok(false);
        }

        let text = message.as_str();
        trace!(line = %text, "Received line");
        report.messages += 1;

        let outcome = self.profile.decoder.decode(&text, &mut self.decoder_state);
        if outcome.meaningful {
            self.pacer.on_response();
        }

        if let Some(command) = outcome.follow_up {
            self.send_command(&command)?;
            report.commands_sent += 1;
        }

        let profile = self.profile;
        let mut samples = outcome.samples;
        let decoded = samples.len();
        samples.retain(|sample| {
            let known = profile.has_channel(&sample.channel);
            if !known {
                debug!(channel = %sample.channel, "Dropping sample on unknown channel");
            }
            known
        });
        report.dropped += decoded - samples.len();

        if samples.is_empty() {
            return Ok(false);
        }
        let verdict = self.framer.on_batch(samples, now_ms);
        report.samples += verdict.delivered;
        report.rejected += verdict.rejected;
        Ok(verdict.stop)
    }

    fn send_command(&mut self, command: &str) -> AppResult<()> {
        self.transport
            .write_blocking(command.as_bytes(), SERIAL_WRITE_TIMEOUT_MS)
            .inspect_err(|e| warn!(error = %e, command = command.trim_end(), "Unable to send command"))?;
        trace!(command = command.trim_end(), "Sent command");
        Ok(())
    }

    fn send_poll(&mut self, now_ms: u64) -> AppResult<()> {
        self.send_command(self.profile.poll_command)?;
        self.pacer.mark_sent(now_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaqError;
    use crate::profile::ProfileRegistry;
    use crate::sink::CollectingSink;
    use crate::transport::mock::{self, MockDeviceHarness, MockTransport};
    use tracing_test::traced_test;

    fn session_for(
        key: &str,
        settings: SessionSettings,
    ) -> (
        DeviceSession<'static, MockTransport, CollectingSink>,
        MockDeviceHarness,
    ) {
        let profile = ProfileRegistry::builtin().require(key).unwrap();
        let (transport, harness) = mock::new();
        let session = DeviceSession::new(profile, transport, CollectingSink::new(), settings);
        (session, harness)
    }

    #[test]
    fn start_sends_first_poll() {
        let (mut session, mut harness) = session_for("189", SessionSettings::default());
        session.start_acquisition(0).unwrap();
        assert_eq!(harness.take_commands(), vec!["QM\r"]);
        assert!(session.pacer().awaiting_response());
        assert_eq!(session.sink().start_count(), 1);
    }

    #[test]
    fn start_discards_stale_input() {
        let (mut session, harness) = session_for("189", SessionSettings::default());
        harness.send_response(b"QM,+9.999 V DC\r").unwrap();
        session.start_acquisition(0).unwrap();
        let status = session.poll_once(10).unwrap();
        assert_eq!(status.report().map(|r| r.bytes_read), Some(0));
    }

    #[test]
    fn reply_is_decoded_and_delivered() {
        let (mut session, harness) = session_for("189", SessionSettings::default());
        session.start_acquisition(0).unwrap();
        harness.send_response(b"0\rQM,+1.234 V DC\r").unwrap();

        let status = session.poll_once(20).unwrap();
        let report = status.report().copied().unwrap();
        assert_eq!(report.acks, 1);
        assert_eq!(report.messages, 1);
        assert_eq!(report.samples, 1);
        assert!(!session.pacer().awaiting_response());
        assert_eq!(session.samples_emitted(), 1);
    }

    #[test]
    fn reply_split_across_ticks() {
        let (mut session, harness) = session_for("189", SessionSettings::default());
        session.start_acquisition(0).unwrap();
        harness.send_response(b"QM,+1.2").unwrap();
        session.poll_once(10).unwrap();
        assert_eq!(session.samples_emitted(), 0);
        harness.send_response(b"34 V DC\r").unwrap();
        session.poll_once(20).unwrap();
        assert_eq!(session.samples_emitted(), 1);
    }

    #[test]
    fn follow_up_command_is_sent() {
        let (mut session, mut harness) = session_for("199b", SessionSettings::default());
        session.start_acquisition(0).unwrap();
        harness.take_writes();

        harness.send_response(b"0\r11,1,3,1,1,0,0\r").unwrap();
        let status = session.poll_once(100).unwrap();
        assert_eq!(status.report().map(|r| r.commands_sent), Some(1));
        assert_eq!(harness.take_commands(), vec!["QM 11\r"]);

        harness.send_response(b"0\r1.500E+0\r").unwrap();
        session.poll_once(200).unwrap();
        assert_eq!(session.sink().samples()[0].value, 1.5);
    }

    #[traced_test]
    #[test]
    fn samples_on_undeclared_channels_are_dropped() {
        let (mut session, harness) = session_for("289", SessionSettings::default());
        session.start_acquisition(0).unwrap();

        harness
            .send_response(
                b"0\rV_DC,NONE,AUTO,VDC,2,0,OFF,0,0,2,\
                  SCRATCH,1.0,VDC,0,4,5,NORMAL,NONE,0,\
                  PRIMARY,2.0,VDC,0,4,5,NORMAL,NONE,0\r",
            )
            .unwrap();
        let status = session.poll_once(10).unwrap();
        let report = status.report().unwrap();
        assert_eq!(report.samples, 1);
        assert_eq!(report.dropped, 1);

        let samples = session.sink().samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].channel, "primary");
        assert!(logs_contain("Dropping sample on unknown channel"));
    }

    #[test]
    fn transport_failure_propagates() {
        let (mut session, harness) = session_for("189", SessionSettings::default());
        session.start_acquisition(0).unwrap();
        harness.fail_reads(true);
        let err = session.poll_once(10).unwrap_err();
        assert!(matches!(err, DaqError::Transport(_)));
    }

    #[test]
    fn write_failure_on_resend_propagates() {
        let (mut session, harness) = session_for("189", SessionSettings::default());
        session.start_acquisition(0).unwrap();
        harness.fail_writes(true);
        assert!(session.poll_once(5_000).unwrap_err().is_transport());
    }

    #[test]
    fn stopped_session_does_nothing() {
        let (mut session, mut harness) = session_for("189", SessionSettings::default());
        assert_eq!(session.poll_once(0).unwrap(), PollStatus::Stopped);
        session.start_acquisition(0).unwrap();
        session.stop_acquisition().unwrap();
        harness.take_writes();
        assert_eq!(session.poll_once(10_000).unwrap(), PollStatus::Stopped);
        assert!(harness.take_writes().is_empty());
    }

    #[test]
    fn close_ends_acquisition_once() {
        let (mut session, _harness) = session_for("189", SessionSettings::default());
        session.start_acquisition(0).unwrap();
        session.stop_acquisition().unwrap();
        session.close().unwrap();
        assert_eq!(session.sink().end_count(), 1);
        assert!(!session.transport().is_open());
    }

    #[traced_test]
    #[test]
    fn rejected_ack_is_logged_and_clears_wait() {
        let (mut session, harness) = session_for("189", SessionSettings::default());
        session.start_acquisition(0).unwrap();
        harness.send_response(b"1\r").unwrap();
        session.poll_once(10).unwrap();
        assert!(!session.pacer().awaiting_response());
        assert_eq!(session.pacer().rejected_acks(), 1);
        assert!(logs_contain("Device rejected command"));
    }

    #[traced_test]
    #[test]
    fn sink_rejection_does_not_stop_polling() {
        let profile = ProfileRegistry::builtin().require("287-qm").unwrap();
        let (transport, harness) = mock::new();
        let mut sink = CollectingSink::new();
        sink.reject_deliveries(true);
        let mut session = DeviceSession::new(profile, transport, sink, SessionSettings::default());
        session.start_acquisition(0).unwrap();

        harness.send_response(b"12.34,VDC,NORMAL\r").unwrap();
        let status = session.poll_once(10).unwrap();
        assert!(matches!(status, PollStatus::Continue(r) if r.rejected == 1));
        assert!(session.is_running());
        assert!(logs_contain("Datafeed sink rejected samples"));
    }
}

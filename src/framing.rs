//! Acquisition framing and limit enforcement.
//!
//! Consumers see every acquisition as `stream start`, zero or more sample
//! batches, `stream end`. [`AcquisitionFramer`] owns the sink and guarantees
//! that shape no matter how often the host starts or stops:
//!
//! - the end marker is emitted at most once per acquisition
//! - samples arriving outside an acquisition are dropped
//! - a configured sample limit is never overshot; a batch is truncated to
//!   what the limit still allows
//! - the stop request is raised exactly once
//!
//! A sink that refuses a delivery does not stop the acquisition. The refusal
//! is logged and counted, and the batch is not retried.

use crate::error::{AppResult, DaqError};
use crate::limits::SwLimits;
use crate::measurement::Measurement;
use chrono::Utc;
use tracing::{debug, info, warn};

/// Consumer of framed measurement batches.
pub trait DatafeedSink {
    /// Marks the start of an acquisition.
    fn signal_stream_start(&mut self) -> AppResult<()>;

    /// Receives one batch of timestamped samples.
    fn deliver(&mut self, batch: &[Measurement]) -> AppResult<()>;

    /// Marks the end of an acquisition. Called at most once per start.
    fn signal_stream_end(&mut self) -> AppResult<()>;
}

impl<S: DatafeedSink + ?Sized> DatafeedSink for &mut S {
    fn signal_stream_start(&mut self) -> AppResult<()> {
        (**self).signal_stream_start()
    }

    fn deliver(&mut self, batch: &[Measurement]) -> AppResult<()> {
        (**self).deliver(batch)
    }

    fn signal_stream_end(&mut self) -> AppResult<()> {
        (**self).signal_stream_end()
    }
}

impl<S: DatafeedSink + ?Sized> DatafeedSink for Box<S> {
    fn signal_stream_start(&mut self) -> AppResult<()> {
        (**self).signal_stream_start()
    }

    fn deliver(&mut self, batch: &[Measurement]) -> AppResult<()> {
        (**self).deliver(batch)
    }

    fn signal_stream_end(&mut self) -> AppResult<()> {
        (**self).signal_stream_end()
    }
}

/// Where the framer is in the start/samples/end sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingState {
    /// No acquisition started yet.
    Idle,
    /// Header emitted, samples flowing.
    Running,
    /// End marker emitted.
    Ended,
}

/// Result of handing samples to the framer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleVerdict {
    /// Samples accepted by the sink.
    pub delivered: usize,
    /// Samples the sink refused.
    pub rejected: usize,
    /// This call raised the stop request.
    pub stop: bool,
}

/// Frames one acquisition for a [`DatafeedSink`] and enforces the limits.
#[derive(Debug)]
pub struct AcquisitionFramer<S> {
    sink: S,
    limits: SwLimits,
    state: FramingState,
    stop_requested: bool,
    rejected: u64,
}

impl<S: DatafeedSink> AcquisitionFramer<S> {
    /// Idle framer delivering to `sink`.
    pub fn new(sink: S, limits: SwLimits) -> Self {
        Self {
            sink,
            limits,
            state: FramingState::Idle,
            stop_requested: false,
            rejected: 0,
        }
    }

    /// Current framing state.
    pub fn state(&self) -> FramingState {
        self.state
    }

    /// True while samples are accepted.
    pub fn is_running(&self) -> bool {
        self.state == FramingState::Running
    }

    /// True once a limit fired during the current acquisition.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Samples delivered during the current acquisition.
    pub fn samples_emitted(&self) -> u64 {
        self.limits.samples_read()
    }

    /// Samples the sink refused during the current acquisition.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// The limits and their counters.
    pub fn limits(&self) -> &SwLimits {
        &self.limits
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The sink, mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consumes the framer, returning the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Starts an acquisition: resets counters and emits the header.
    pub fn on_start(&mut self, now_ms: u64) -> AppResult<()> {
        if self.state == FramingState::Running {
            debug!("Acquisition already running, restarting framing");
        }
        self.limits.acquisition_start(now_ms);
        self.stop_requested = false;
        self.rejected = 0;
        self.state = FramingState::Running;
        self.sink.signal_stream_start()
    }

    /// Timestamps and forwards one sample.
    pub fn on_sample(&mut self, sample: Measurement, now_ms: u64) -> SampleVerdict {
        self.on_batch(vec![sample], now_ms)
    }

    /// Timestamps and forwards a batch decoded from one message.
    pub fn on_batch(&mut self, mut samples: Vec<Measurement>, now_ms: u64) -> SampleVerdict {
        let mut verdict = SampleVerdict::default();
        if self.state != FramingState::Running || self.stop_requested {
            debug!(count = samples.len(), "Dropping samples outside acquisition");
            return verdict;
        }

        if let Some(allowed) = self.limits.samples_allowed() {
            let allowed = usize::try_from(allowed).unwrap_or(usize::MAX);
            if samples.len() > allowed {
                debug!(dropped = samples.len() - allowed, "Truncating batch at sample limit");
                samples.truncate(allowed);
            }
        }

        if !samples.is_empty() {
            let stamp = Utc::now();
            for sample in samples.iter_mut().filter(|s| s.timestamp.is_none()) {
                sample.timestamp = Some(stamp);
            }

            self.limits.update_samples_read(samples.len() as u64);
            self.limits.update_frames_read(1);

            match self.sink.deliver(&samples) {
                Ok(()) => verdict.delivered = samples.len(),
                Err(e) => {
                    warn!(error = %e, count = samples.len(), "Datafeed sink rejected samples");
                    self.rejected += samples.len() as u64;
                    verdict.rejected = samples.len();
                }
            }
        }

        verdict.stop = self.check_stop(now_ms);
        verdict
    }

    /// Raises the stop request if a limit has been reached.
    ///
    /// Returns true only on the call that raised it.
    pub fn check_stop(&mut self, now_ms: u64) -> bool {
        if self.state != FramingState::Running || self.stop_requested {
            return false;
        }
        if self.limits.check(now_ms) {
            self.stop_requested = true;
            info!(
                samples = self.limits.samples_read(),
                "Acquisition limit reached, requesting stop"
            );
            return true;
        }
        false
    }

    /// Ends the acquisition, emitting the end marker once.
    ///
    /// Returns whether a marker was emitted by this call.
    pub fn on_stop(&mut self) -> AppResult<bool> {
        if self.state != FramingState::Running {
            return Ok(false);
        }
        self.state = FramingState::Ended;
        self.sink.signal_stream_end()?;
        Ok(true)
    }
}

/// Maps a sink failure into the crate error type.
pub fn sink_error(err: impl std::fmt::Display) -> DaqError {
    DaqError::Sink(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Quantity, Unit};
    use crate::sink::{CollectingSink, FeedEvent};
    use tracing_test::traced_test;

    fn volts(v: f64) -> Measurement {
        Measurement::new(Quantity::Voltage, Unit::Volt, v)
    }

    #[test]
    fn header_samples_end() {
        let mut framer = AcquisitionFramer::new(CollectingSink::new(), SwLimits::default());
        framer.on_start(0).unwrap();
        let verdict = framer.on_sample(volts(1.0), 10);
        assert_eq!(verdict.delivered, 1);
        assert!(framer.on_stop().unwrap());

        let events = framer.sink().events();
        assert!(matches!(events[0], FeedEvent::Start));
        assert!(matches!(events[1], FeedEvent::Samples(_)));
        assert!(matches!(events[2], FeedEvent::End));
        assert!(framer.sink().samples()[0].timestamp.is_some());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut framer = AcquisitionFramer::new(CollectingSink::new(), SwLimits::default());
        assert!(!framer.on_stop().unwrap());
        framer.on_start(0).unwrap();
        assert!(framer.on_stop().unwrap());
        assert!(!framer.on_stop().unwrap());
        assert!(!framer.on_stop().unwrap());
        assert_eq!(framer.sink().end_count(), 1);
    }

    #[test]
    fn samples_outside_acquisition_are_dropped() {
        let mut framer = AcquisitionFramer::new(CollectingSink::new(), SwLimits::default());
        assert_eq!(framer.on_sample(volts(1.0), 0).delivered, 0);
        framer.on_start(0).unwrap();
        framer.on_stop().unwrap();
        assert_eq!(framer.on_sample(volts(1.0), 0).delivered, 0);
        assert!(framer.sink().samples().is_empty());
    }

    #[test]
    fn sample_limit_fires_once_and_truncates() {
        let mut framer = AcquisitionFramer::new(CollectingSink::new(), SwLimits::new(3, 0));
        framer.on_start(0).unwrap();
        assert!(!framer.on_sample(volts(1.0), 0).stop);
        let verdict = framer.on_batch(vec![volts(2.0), volts(3.0), volts(4.0)], 0);
        assert_eq!(verdict.delivered, 2);
        assert!(verdict.stop);
        assert!(!framer.check_stop(1));
        assert_eq!(framer.on_sample(volts(5.0), 2).delivered, 0);
        assert_eq!(framer.samples_emitted(), 3);
    }

    #[test]
    fn time_limit_via_check_stop() {
        let mut framer = AcquisitionFramer::new(CollectingSink::new(), SwLimits::new(0, 100));
        framer.on_start(50).unwrap();
        assert!(!framer.check_stop(150));
        assert!(framer.check_stop(151));
        assert!(!framer.check_stop(152));
        assert!(framer.stop_requested());
    }

    #[test]
    fn restart_clears_stop_request() {
        let mut framer = AcquisitionFramer::new(CollectingSink::new(), SwLimits::new(1, 0));
        framer.on_start(0).unwrap();
        assert!(framer.on_sample(volts(1.0), 0).stop);
        framer.on_stop().unwrap();
        framer.on_start(10).unwrap();
        assert!(!framer.stop_requested());
        assert_eq!(framer.samples_emitted(), 0);
        assert!(framer.on_sample(volts(1.0), 10).stop);
    }

    #[traced_test]
    #[test]
    fn sink_rejection_is_logged_not_retried() {
        let mut sink = CollectingSink::new();
        sink.reject_deliveries(true);
        let mut framer = AcquisitionFramer::new(sink, SwLimits::default());
        framer.on_start(0).unwrap();

        let verdict = framer.on_sample(volts(1.0), 0);
        assert_eq!(verdict.rejected, 1);
        assert_eq!(framer.rejected_count(), 1);
        assert_eq!(framer.sink().delivery_attempts(), 1);
        assert!(logs_contain("Datafeed sink rejected samples"));

        framer.sink_mut().reject_deliveries(false);
        assert_eq!(framer.on_sample(volts(2.0), 0).delivered, 1);
        assert_eq!(framer.sink().samples().len(), 1);
    }
}

//! Datafeed sinks.
//!
//! - [`CollectingSink`]: keeps every event in memory (tests, embedding)
//! - [`ChannelSink`]: forwards events over a tokio unbounded channel
//! - [`JsonLinesSink`]: writes one JSON object per line, used by the CLI

use crate::error::AppResult;
use crate::framing::{sink_error, DatafeedSink};
use crate::measurement::Measurement;
use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One framing event as seen by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Stream header.
    Start,
    /// One delivered batch.
    Samples(Vec<Measurement>),
    /// Stream end marker.
    End,
}

// =============================================================================
// CollectingSink
// =============================================================================

/// In-memory sink recording every event.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Vec<FeedEvent>,
    reject: bool,
    delivery_attempts: usize,
}

impl CollectingSink {
    /// Empty sink that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent deliveries fail, for exercising rejection paths.
    pub fn reject_deliveries(&mut self, reject: bool) {
        self.reject = reject;
    }

    /// Every event in arrival order.
    pub fn events(&self) -> &[FeedEvent] {
        &self.events
    }

    /// All delivered samples in order.
    pub fn samples(&self) -> Vec<&Measurement> {
        self.events
            .iter()
            .filter_map(|e| match e {
                FeedEvent::Samples(batch) => Some(batch),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Stream headers seen.
    pub fn start_count(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, FeedEvent::Start)).count()
    }

    /// End markers seen.
    pub fn end_count(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, FeedEvent::End)).count()
    }

    /// Calls to `deliver`, accepted or not.
    pub fn delivery_attempts(&self) -> usize {
        self.delivery_attempts
    }
}

impl DatafeedSink for CollectingSink {
    fn signal_stream_start(&mut self) -> AppResult<()> {
        self.events.push(FeedEvent::Start);
        Ok(())
    }

    fn deliver(&mut self, batch: &[Measurement]) -> AppResult<()> {
        self.delivery_attempts += 1;
        if self.reject {
            return Err(sink_error("collecting sink set to reject"));
        }
        self.events.push(FeedEvent::Samples(batch.to_vec()));
        Ok(())
    }

    fn signal_stream_end(&mut self) -> AppResult<()> {
        self.events.push(FeedEvent::End);
        Ok(())
    }
}

// =============================================================================
// ChannelSink
// =============================================================================

/// Sink that hands events to an async consumer.
///
/// Sending never blocks the polling loop. Once the receiver is dropped every
/// call fails with [`DaqError::Sink`](crate::error::DaqError::Sink).
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<FeedEvent>,
}

impl ChannelSink {
    /// Creates the sink with its receiving end.
    pub fn channel() -> (Self, UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: FeedEvent) -> AppResult<()> {
        self.tx
            .send(event)
            .map_err(|_| sink_error("datafeed receiver dropped"))
    }
}

impl DatafeedSink for ChannelSink {
    fn signal_stream_start(&mut self) -> AppResult<()> {
        self.send(FeedEvent::Start)
    }

    fn deliver(&mut self, batch: &[Measurement]) -> AppResult<()> {
        self.send(FeedEvent::Samples(batch.to_vec()))
    }

    fn signal_stream_end(&mut self) -> AppResult<()> {
        self.send(FeedEvent::End)
    }
}

// =============================================================================
// JsonLinesSink
// =============================================================================

#[derive(Serialize)]
struct Marker {
    event: &'static str,
}

/// Writes `{"event":"start"}`, one line per sample, then `{"event":"end"}`.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    /// Sink writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> AppResult<()> {
        serde_json::to_writer(&mut self.writer, value).map_err(sink_error)?;
        self.writer.write_all(b"\n").map_err(sink_error)?;
        Ok(())
    }

    fn write_marker(&mut self, event: &'static str) -> AppResult<()> {
        self.write_line(&Marker { event })?;
        self.writer.flush().map_err(sink_error)
    }
}

impl<W: Write> DatafeedSink for JsonLinesSink<W> {
    fn signal_stream_start(&mut self) -> AppResult<()> {
        self.write_marker("start")
    }

    fn deliver(&mut self, batch: &[Measurement]) -> AppResult<()> {
        for sample in batch {
            self.write_line(sample)?;
        }
        self.writer.flush().map_err(sink_error)
    }

    fn signal_stream_end(&mut self) -> AppResult<()> {
        self.write_marker("end")
    }
}

//! Software acquisition limits.
//!
//! Meters stream until told to stop, so sample-count, frame-count and
//! duration limits are enforced on the host. A limit of zero means unlimited.

use tracing::debug;

/// Host-side acquisition limits and the counters they are checked against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwLimits {
    /// Samples to deliver before stopping.
    pub limit_samples: u64,
    /// Frames to deliver before stopping.
    pub limit_frames: u64,
    /// Acquisition duration in milliseconds.
    pub limit_msec: u64,
    samples_read: u64,
    frames_read: u64,
    start_time: Option<u64>,
}

/// What is left before a limit triggers.
///
/// Unlimited dimensions report `u64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining {
    /// Samples still allowed.
    pub samples: u64,
    /// Frames still allowed.
    pub frames: u64,
    /// Milliseconds left.
    pub msecs: u64,
    /// Same as [`SwLimits::check`].
    pub exceeded: bool,
}

impl SwLimits {
    /// Limits on sample count and duration, no frame limit.
    pub fn new(limit_samples: u64, limit_msec: u64) -> Self {
        Self {
            limit_samples,
            limit_msec,
            ..Self::default()
        }
    }

    /// Adds a frame limit.
    pub fn with_frames(mut self, limit_frames: u64) -> Self {
        self.limit_frames = limit_frames;
        self
    }

    /// Resets counters and starts the clock at `now_ms`.
    pub fn acquisition_start(&mut self, now_ms: u64) {
        self.samples_read = 0;
        self.frames_read = 0;
        self.start_time = Some(now_ms);
    }

    /// Counts `count` more delivered samples.
    pub fn update_samples_read(&mut self, count: u64) {
        self.samples_read = self.samples_read.saturating_add(count);
    }

    /// Counts `count` more delivered frames.
    pub fn update_frames_read(&mut self, count: u64) {
        self.frames_read = self.frames_read.saturating_add(count);
    }

    /// Samples counted since the acquisition started.
    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    /// Frames counted since the acquisition started.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn elapsed(&self, now_ms: u64) -> Option<u64> {
        self.start_time.map(|start| now_ms.saturating_sub(start))
    }

    /// True once any configured limit has been reached.
    ///
    /// The time limit triggers only when elapsed time strictly exceeds it.
    pub fn check(&self, now_ms: u64) -> bool {
        if self.limit_samples > 0 && self.samples_read >= self.limit_samples {
            debug!(limit = self.limit_samples, "Requested number of samples reached");
            return true;
        }
        if self.limit_frames > 0 && self.frames_read >= self.limit_frames {
            debug!(limit = self.limit_frames, "Requested number of frames reached");
            return true;
        }
        if self.limit_msec > 0 {
            if let Some(elapsed) = self.elapsed(now_ms) {
                if elapsed > self.limit_msec {
                    debug!(limit_ms = self.limit_msec, elapsed_ms = elapsed, "Requested sampling time reached");
                    return true;
                }
            }
        }
        false
    }

    /// How many samples may still be delivered, `None` if unlimited.
    pub fn samples_allowed(&self) -> Option<u64> {
        (self.limit_samples > 0).then(|| self.limit_samples.saturating_sub(self.samples_read))
    }

    /// What is left of each limit at `now_ms`.
    pub fn remaining(&self, now_ms: u64) -> Remaining {
        let left = |limit: u64, used: u64| {
            if limit == 0 {
                u64::MAX
            } else {
                limit.saturating_sub(used)
            }
        };
        let msecs = if self.limit_msec == 0 {
            u64::MAX
        } else {
            self.limit_msec
                .saturating_sub(self.elapsed(now_ms).unwrap_or(0))
        };
        Remaining {
            samples: left(self.limit_samples, self.samples_read),
            frames: left(self.limit_frames, self.frames_read),
            msecs,
            exceeded: self.check(now_ms),
        }
    }
}

//! Progress and speed accounting.
//!
//! Throughput is sampled at most once per window and cached in between, so
//! the displayed speed stays stable instead of jittering with every chunk.

use std::time::{Duration, Instant};

use serde::Serialize;

use super::{Direction, TransferRecord, TransferStatus};

/// Unit suffixes for sizes and speeds, in steps of 1024.
const SUFFIXES: [&str; 5] = ["", "K", "M", "G", "T"];

/// Cached throughput estimate for one transfer.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    window: Duration,
    last_sample: Instant,
    bytes_since_sample: u64,
    cached_speed: f64,
}

impl SpeedMeter {
    /// Create a meter whose first window starts at `now`.
    #[must_use]
    pub const fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            last_sample: now,
            bytes_since_sample: 0,
            cached_speed: 0.0,
        }
    }

    /// Account `bytes` moved at `now`.
    ///
    /// Once more than one window has elapsed since the last sample, the cached
    /// speed is recomputed and a new window starts.
    pub fn record(&mut self, bytes: u64, now: Instant) {
        self.bytes_since_sample = self.bytes_since_sample.saturating_add(bytes);

        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed > self.window {
            self.cached_speed = self.bytes_since_sample as f64 / elapsed.as_secs_f64();
            self.last_sample = now;
            self.bytes_since_sample = 0;
        }
    }

    /// Start a fresh window at `now`, forgetting earlier samples.
    pub fn restart(&mut self, now: Instant) {
        self.last_sample = now;
        self.bytes_since_sample = 0;
        self.cached_speed = 0.0;
    }

    /// Last computed speed in bytes per second.
    #[must_use]
    pub const fn speed(&self) -> f64 {
        self.cached_speed
    }

    /// Start of the current sample window.
    #[must_use]
    pub const fn last_sample_time(&self) -> Instant {
        self.last_sample
    }

    /// Bytes accounted since the current window started.
    #[must_use]
    pub const fn bytes_since_sample(&self) -> u64 {
        self.bytes_since_sample
    }
}

/// Format a byte count with a 1024-step suffix.
///
/// Scaling stops at the last suffix, even if the value is still 1024 or more.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    format_scaled(bytes as f64)
}

/// Format a speed in bytes per second with a 1024-step suffix.
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_scaled(bytes_per_sec))
}

fn format_scaled(mut value: f64) -> String {
    let mut idx = 0;
    while value >= 1024.0 && idx + 1 < SUFFIXES.len() {
        value /= 1024.0;
        idx += 1;
    }

    if idx == 0 {
        format!("{}", value.round() as u64)
    } else {
        format!("{value:.1}{}", SUFFIXES[idx])
    }
}

/// Render a fixed-width bar for `fraction` (0.0 - 1.0).
///
/// Transfers of unknown length render an empty, dotted bar.
#[must_use]
pub fn render_bar(fraction: Option<f64>, width: usize) -> String {
    let Some(fraction) = fraction else {
        return format!("[{}]", ".".repeat(width));
    };
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

/// Display values for one transfer.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    /// Display index in the registry
    pub index: usize,
    /// File name
    pub name: String,
    /// Peer label
    pub peer: String,
    /// Transfer direction
    pub direction: Direction,
    /// Current status
    pub status: TransferStatus,
    /// Bytes moved
    pub position: u64,
    /// Total bytes, if known
    pub size: Option<u64>,
    /// Completion percentage (0.0 - 100.0), if the size is known
    pub percent: Option<f64>,
    /// Cached speed in bytes per second
    pub speed: f64,
    /// Estimated seconds remaining
    pub eta_secs: Option<u64>,
}

impl ProgressView {
    /// Take a snapshot of `record` shown at `index`.
    #[must_use]
    pub fn from_record(index: usize, record: &TransferRecord) -> Self {
        let size = record.size().known();
        let position = record.position();
        let speed = record.speed();

        let percent = size.map(|total| {
            if total == 0 {
                100.0
            } else {
                position as f64 / total as f64 * 100.0
            }
        });

        let eta_secs = size
            .filter(|_| speed > 0.0 && record.status() == TransferStatus::InProgress)
            .map(|total| (total.saturating_sub(position) as f64 / speed).ceil() as u64);

        Self {
            index,
            name: record.display_name().to_string(),
            peer: record.peer_display_name().to_string(),
            direction: record.direction(),
            status: record.status(),
            position,
            size,
            percent,
            speed,
            eta_secs,
        }
    }

    /// Render one display line with a bar of `bar_width` characters.
    #[must_use]
    pub fn line(&self, bar_width: usize) -> String {
        let size = self.size.map_or_else(|| "?".to_string(), format_size);
        let percent = self
            .percent
            .map_or_else(String::new, |p| format!(" {p:.0}%"));

        format!(
            "[{}] {} {} ({}) {}: {}/{} {} {}{}",
            self.index,
            self.direction,
            self.name,
            self.peer,
            self.status,
            format_size(self.position),
            size,
            format_speed(self.speed),
            render_bar(self.percent.map(|p| p / 100.0), bar_width),
            percent,
        )
    }
}

impl TransferRecord {
    /// Render this record's display line as shown at `index`.
    #[must_use]
    pub fn progress_line(&self, index: usize, bar_width: usize) -> String {
        ProgressView::from_record(index, self).line(bar_width)
    }
}

//! Vendor samples into readings: the rolling window and persistence hand-off.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, warn};

use cgmlink_types::Reading;

use crate::error::Result;
use crate::vendor::VendorSample;

/// Default span of the in-memory window.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Append-only persistence for readings, scoped by user.
///
/// Writes are fire-and-forget from the core's point of view: they run on a
/// spawned task, failures are logged, and nothing is retried. Implementations
/// should tolerate the same reading arriving twice.
#[async_trait]
pub trait ReadingSink: Send + Sync + 'static {
    async fn append(&self, scope: &str, reading: &Reading) -> Result<()>;
}

/// Readings from the trailing retention span, newest first.
#[derive(Debug, Clone)]
pub struct ReadingWindow {
    readings: Vec<Reading>,
    retention: Duration,
}

impl Default for ReadingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl ReadingWindow {
    pub fn new(retention: Duration) -> Self {
        Self {
            readings: Vec::new(),
            retention,
        }
    }

    /// Append `reading`, drop everything at or before `now - retention`, and
    /// re-sort newest first.
    ///
    /// Returns `true` if the reading is in the window afterwards. A reading
    /// with the same timestamp as one already held is not added twice.
    pub fn insert(&mut self, reading: Reading, now: OffsetDateTime) -> bool {
        let duplicate = self
            .readings
            .iter()
            .any(|r| r.timestamp == reading.timestamp);
        if !duplicate {
            self.readings.push(reading);
        }
        self.prune(now);
        !duplicate && reading.timestamp > now - self.retention
    }

    /// Drop readings older than the retention span.
    pub fn prune(&mut self, now: OffsetDateTime) {
        let cutoff = now - self.retention;
        self.readings.retain(|r| r.timestamp > cutoff);
        self.readings
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }

    /// Readings, newest first.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn latest(&self) -> Option<&Reading> {
        self.readings.first()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Turns vendor samples into readings, forwards them to the sink, and keeps
/// the window.
pub struct ReadingIngest {
    window: ReadingWindow,
    sink: Option<Arc<dyn ReadingSink>>,
    scope: Option<String>,
}

impl std::fmt::Debug for ReadingIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingIngest")
            .field("window", &self.window)
            .field("has_sink", &self.sink.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

impl ReadingIngest {
    pub fn new(retention: Duration) -> Self {
        Self {
            window: ReadingWindow::new(retention),
            sink: None,
            scope: None,
        }
    }

    /// Forward readings to `sink` under `scope`. Without a scope nothing is
    /// persisted but the window still fills.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ReadingSink>, scope: Option<String>) -> Self {
        self.sink = Some(sink);
        self.scope = scope;
        self
    }

    pub fn window(&self) -> &ReadingWindow {
        &self.window
    }

    /// Process one sample. Returns the reading if it entered the window.
    pub fn ingest(&mut self, sample: &VendorSample, now: OffsetDateTime) -> Option<Reading> {
        let Some(reading) = sample.to_reading() else {
            debug!("Dropping sample without a glucose value ({})", sample.read_at);
            return None;
        };

        self.forward(reading);

        if self.window.insert(reading, now) {
            Some(reading)
        } else {
            debug!("Reading at {} not added to window", reading.timestamp);
            None
        }
    }

    fn forward(&self, reading: Reading) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let Some(scope) = self.scope.clone() else {
            debug!("No user scope set; reading not persisted");
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = sink.append(&scope, &reading).await {
                        warn!("Failed to persist reading at {}: {}", reading.timestamp, e);
                    }
                });
            }
            Err(_) => warn!("No async runtime; reading at {} not persisted", reading.timestamp),
        }
    }
}

//! Store-backed reading sink.

use std::sync::Arc;

use async_trait::async_trait;
use cgmlink_core::ReadingSink;
use cgmlink_store::Store;
use cgmlink_types::Reading;
use tokio::sync::Mutex;
use tracing::debug;

/// Persists readings the core forwards into the local SQLite store.
///
/// The connection is shared with the rest of the command behind an async
/// mutex, so pairing writes and reading writes never interleave.
#[derive(Clone)]
pub struct StoreSink {
    store: Arc<Mutex<Store>>,
}

impl StoreSink {
    pub fn new(store: Arc<Mutex<Store>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReadingSink for StoreSink {
    async fn append(&self, scope: &str, reading: &Reading) -> cgmlink_core::Result<()> {
        let store = self.store.lock().await;
        let inserted = store
            .insert_reading(scope, reading)
            .map_err(cgmlink_core::Error::persistence)?;
        if !inserted {
            debug!("Reading at {} already stored", reading.timestamp);
        }
        Ok(())
    }
}

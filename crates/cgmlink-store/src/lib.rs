//! Local persistence for CGM readings and the paired transmitter.
//!
//! SQLite storage that lets a session survive restarts: readings are kept
//! per user scope and deduplicated on their sample time, and the single
//! paired transmitter is remembered for auto-reconnect.
//!
//! # Example
//!
//! ```
//! use cgmlink_store::{ReadingQuery, Store};
//! use cgmlink_types::Reading;
//! use time::OffsetDateTime;
//!
//! let store = Store::open_in_memory()?;
//! let reading = Reading::new(104.0, OffsetDateTime::now_utc(), Some(3));
//!
//! assert!(store.insert_reading("alice", &reading)?);
//! // At-least-once delivery: the same sample again is ignored.
//! assert!(!store.insert_reading("alice", &reading)?);
//!
//! let latest = store.latest_reading("alice")?;
//! assert_eq!(latest.map(|r| r.value), Some(104.0));
//! # Ok::<(), cgmlink_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{ReadingStats, StoredPairing, StoredReading};
pub use queries::ReadingQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/cgmlink/data.db`
/// - macOS: `~/Library/Application Support/cgmlink/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\cgmlink\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("cgmlink")
        .join("data.db")
}

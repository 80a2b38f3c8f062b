//! Connection identifiers
//!
//! Ids are UUIDv7 (millisecond timestamp + OS randomness) so they sort by
//! creation time. If the OS random source fails, ids come from a
//! process-wide counter instead.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Builder;

static FALLBACK_COUNTER: Mutex<u64> = Mutex::new(0);

/// New connection id
pub fn generate_connection_id() -> String {
    generate_with(getrandom::fill)
}

fn generate_with<E: std::fmt::Display>(
    fill: impl FnOnce(&mut [u8]) -> Result<(), E>,
) -> String {
    let mut random = [0u8; 10];
    match fill(&mut random) {
        Ok(()) => {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default();
            Builder::from_unix_timestamp_millis(millis, &random)
                .into_uuid()
                .to_string()
        }
        Err(e) => {
            warn!("Random source unavailable ({}), using counter id", e);
            next_fallback_id()
        }
    }
}

fn next_fallback_id() -> String {
    let mut counter = FALLBACK_COUNTER
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *counter += 1;
    counter.to_string()
}

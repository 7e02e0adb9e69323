//! Cooperative stop signal
//!
//! An operator stops a running import by setting a flag in the option store.
//! The flag is written twice: to the durable store and to a short-lived
//! transient mirror. The fetch protocol polls [`StopSignal::is_set`] right
//! before and right after every network call; nothing is ever interrupted
//! mid-request.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use yatco_common::{KvStore, Result};

/// Key of the stop flag in both stores
pub const STOP_FLAG_KEY: &str = "yatco_stop_import";

/// Expiry of the transient mirror
pub const STOP_MIRROR_TTL: Duration = Duration::from_secs(3600);

/// Handle on the stop flag, passed explicitly into the fetch loop
#[derive(Clone)]
pub struct StopSignal {
    durable: Arc<dyn KvStore>,
    transient: Arc<dyn KvStore>,
}

impl StopSignal {
    pub fn new(durable: Arc<dyn KvStore>, transient: Arc<dyn KvStore>) -> Self {
        Self { durable, transient }
    }

    /// Whether a stop has been requested.
    ///
    /// The durable flag is consulted first; the transient mirror only when
    /// the durable flag is absent. Caches are bypassed. A store that cannot
    /// be read counts as "not set".
    pub fn is_set(&self) -> bool {
        match read_flag(self.durable.as_ref()) {
            Ok(Some(set)) => return set,
            Ok(None) => {},
            Err(e) => warn!(error = %e, "Failed to read durable stop flag"),
        }

        match read_flag(self.transient.as_ref()) {
            Ok(flag) => flag.unwrap_or(false),
            Err(e) => {
                warn!(error = %e, "Failed to read transient stop flag");
                false
            },
        }
    }

    /// Ask any running import to stop at its next checkpoint
    pub fn request_stop(&self) -> Result<()> {
        self.durable.set(STOP_FLAG_KEY, Value::Bool(true))?;
        self.transient
            .set_with_ttl(STOP_FLAG_KEY, Value::Bool(true), STOP_MIRROR_TTL)?;
        info!("Stop requested");
        Ok(())
    }

    /// Remove the flag from both stores
    pub fn clear(&self) -> Result<()> {
        self.durable.delete(STOP_FLAG_KEY)?;
        self.transient.delete(STOP_FLAG_KEY)?;
        Ok(())
    }
}

/// Interpret a stored flag; options written by other tools may use
/// strings or numbers instead of booleans
fn read_flag(store: &dyn KvStore) -> Result<Option<bool>> {
    store.evict(STOP_FLAG_KEY);
    let flag = store.get(STOP_FLAG_KEY)?.map(|value| match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        _ => false,
    });
    Ok(flag)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use yatco_common::MemoryKvStore;

    fn signal() -> (Arc<MemoryKvStore>, Arc<MemoryKvStore>, StopSignal) {
        let durable = Arc::new(MemoryKvStore::new());
        let transient = Arc::new(MemoryKvStore::new());
        let signal = StopSignal::new(durable.clone(), transient.clone());
        (durable, transient, signal)
    }

    #[test]
    fn test_unset_by_default() {
        let (_, _, signal) = signal();
        assert!(!signal.is_set());
    }

    #[test]
    fn test_request_and_clear() {
        let (durable, transient, signal) = signal();
        signal.request_stop().unwrap();
        assert!(signal.is_set());
        assert_eq!(durable.get(STOP_FLAG_KEY).unwrap(), Some(json!(true)));
        assert_eq!(transient.get(STOP_FLAG_KEY).unwrap(), Some(json!(true)));

        signal.clear().unwrap();
        assert!(!signal.is_set());
    }

    #[test]
    fn test_transient_mirror_used_when_durable_absent() {
        let (_, transient, signal) = signal();
        transient.set(STOP_FLAG_KEY, json!("1")).unwrap();
        assert!(signal.is_set());
    }

    #[test]
    fn test_durable_flag_takes_precedence() {
        let (durable, transient, signal) = signal();
        durable.set(STOP_FLAG_KEY, json!(false)).unwrap();
        transient.set(STOP_FLAG_KEY, json!(true)).unwrap();
        assert!(!signal.is_set());
    }
}

//! Storage surface contract.

use async_trait::async_trait;

use crate::error::Result;

/// Uniform async key-value access over whatever durable surface the host
/// exposes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the stored value, or `None` when the key is absent.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Whether values survive a process restart.
    fn is_durable(&self) -> bool {
        true
    }
}

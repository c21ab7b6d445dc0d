//! Persistence for webservice configs and their history.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::errors::RepositoryError;
use crate::models::{WebserviceConfig, WebserviceConfigHistory};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage backend for webservice configs.
///
/// Create, update and restore record a YAML snapshot of the config block in
/// history unless an identical snapshot already exists for that webservice.
#[async_trait]
pub trait WebserviceRepository: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<WebserviceConfig, RepositoryError>;

    async fn get_by_id(&self, id: i32) -> Result<WebserviceConfig, RepositoryError>;

    /// All webservices, ordered by name.
    async fn list(&self) -> Result<Vec<WebserviceConfig>, RepositoryError>;

    /// Active webservices only, ordered by name.
    async fn list_valid(&self) -> Result<Vec<WebserviceConfig>, RepositoryError>;

    /// Insert a new webservice. Returns the assigned id.
    async fn create(&self, ws: &WebserviceConfig, user_id: i32) -> Result<i32, RepositoryError>;

    /// Overwrite name, config block and validity of `ws.id`.
    async fn update(&self, ws: &WebserviceConfig, user_id: i32) -> Result<(), RepositoryError>;

    /// Delete a webservice together with its history.
    async fn delete(&self, id: i32) -> Result<(), RepositoryError>;

    async fn exists(&self, name: &str) -> Result<bool, RepositoryError>;

    /// Whether another webservice (not `exclude_id`) already uses `name`.
    async fn exists_excluding(&self, name: &str, exclude_id: i32) -> Result<bool, RepositoryError>;

    /// Snapshots of one webservice, newest first.
    async fn history(&self, config_id: i32) -> Result<Vec<WebserviceConfigHistory>, RepositoryError>;

    async fn history_entry(&self, history_id: i64) -> Result<WebserviceConfigHistory, RepositoryError>;

    /// Put a snapshot's config block back in place.
    async fn restore_from_history(&self, history_id: i64, user_id: i32) -> Result<(), RepositoryError>;
}

/// Content digest used to de-duplicate history snapshots.
pub fn config_digest(yaml: &str) -> String {
    hex::encode(Sha256::digest(yaml.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex() {
        let a = config_digest("Name: CRM\n");
        assert_eq!(a.len(), 64);
        assert_eq!(a, config_digest("Name: CRM\n"));
        assert_ne!(a, config_digest("Name: ERP\n"));
    }
}

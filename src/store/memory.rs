//! In-process repository, optionally seeded from a YAML file.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{config_digest, WebserviceRepository};
use crate::errors::RepositoryError;
use crate::models::{WebserviceConfig, WebserviceConfigData, WebserviceConfigHistory};

#[derive(Default)]
struct Inner {
    configs: BTreeMap<i32, WebserviceConfig>,
    history: Vec<WebserviceConfigHistory>,
    last_id: i32,
    last_history_id: i64,
}

impl Inner {
    fn find_by_name(&self, name: &str) -> Option<&WebserviceConfig> {
        self.configs.values().find(|ws| ws.name == name)
    }

    fn name_taken(&self, name: &str, exclude_id: i32) -> bool {
        self.configs
            .values()
            .any(|ws| ws.name == name && ws.id != exclude_id)
    }

    /// Record a history snapshot unless this exact config is already there.
    fn snapshot(&mut self, config_id: i32, yaml: String, user_id: i32) {
        let digest = config_digest(&yaml);
        if self
            .history
            .iter()
            .any(|h| h.config_id == config_id && h.config_digest == digest)
        {
            return;
        }
        self.last_history_id += 1;
        let now = Utc::now();
        self.history.push(WebserviceConfigHistory {
            id: self.last_history_id,
            config_id,
            config: yaml,
            config_digest: digest,
            create_time: now,
            create_by: user_id,
            change_time: now,
            change_by: user_id,
        });
    }
}

/// Repository held entirely in memory. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML list of webservice definitions:
    ///
    /// ```yaml
    /// - name: CRM
    ///   valid_id: 1
    ///   config:
    ///     Requester:
    ///       Transport: { Type: HTTP::REST, Config: { Host: https://crm.example.com } }
    /// ```
    pub async fn from_yaml_file(path: impl AsRef<Path>, user_id: i32) -> Result<Self, RepositoryError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let store = Self::new();
        store.seed(parse_definitions(&raw)?, user_id).await?;
        Ok(store)
    }

    /// Create every definition in order.
    pub async fn seed(&self, definitions: Vec<WebserviceConfig>, user_id: i32) -> Result<(), RepositoryError> {
        for ws in definitions {
            let id = self.create(&ws, user_id).await?;
            tracing::debug!(webservice = %ws.name, id, "seeded webservice");
        }
        Ok(())
    }
}

/// Parse the YAML definition list accepted by `from_yaml_file`.
pub fn parse_definitions(raw: &str) -> Result<Vec<WebserviceConfig>, RepositoryError> {
    Ok(serde_yaml::from_str(raw)?)
}

#[async_trait]
impl WebserviceRepository for MemoryStore {
    async fn get_by_name(&self, name: &str) -> Result<WebserviceConfig, RepositoryError> {
        self.inner
            .read()
            .await
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("webservice {:?}", name)))
    }

    async fn get_by_id(&self, id: i32) -> Result<WebserviceConfig, RepositoryError> {
        self.inner
            .read()
            .await
            .configs
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("webservice id {}", id)))
    }

    async fn list(&self) -> Result<Vec<WebserviceConfig>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut all: Vec<WebserviceConfig> = inner.configs.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn list_valid(&self) -> Result<Vec<WebserviceConfig>, RepositoryError> {
        let mut all = self.list().await?;
        all.retain(WebserviceConfig::is_valid);
        Ok(all)
    }

    async fn create(&self, ws: &WebserviceConfig, user_id: i32) -> Result<i32, RepositoryError> {
        let yaml = ws.config.to_yaml()?;
        let mut inner = self.inner.write().await;
        if inner.find_by_name(&ws.name).is_some() {
            return Err(RepositoryError::NameTaken(ws.name.clone()));
        }

        inner.last_id += 1;
        let id = inner.last_id;
        let now = Utc::now();
        let stored = WebserviceConfig {
            id,
            name: ws.name.clone(),
            config: ws.config.clone(),
            valid_id: ws.valid_id,
            create_time: now,
            create_by: user_id,
            change_time: now,
            change_by: user_id,
        };
        inner.configs.insert(id, stored);
        inner.snapshot(id, yaml, user_id);
        Ok(id)
    }

    async fn update(&self, ws: &WebserviceConfig, user_id: i32) -> Result<(), RepositoryError> {
        let yaml = ws.config.to_yaml()?;
        let mut inner = self.inner.write().await;
        if inner.name_taken(&ws.name, ws.id) {
            return Err(RepositoryError::NameTaken(ws.name.clone()));
        }

        let stored = inner
            .configs
            .get_mut(&ws.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("webservice id {}", ws.id)))?;
        stored.name = ws.name.clone();
        stored.config = ws.config.clone();
        stored.valid_id = ws.valid_id;
        stored.change_time = Utc::now();
        stored.change_by = user_id;

        inner.snapshot(ws.id, yaml, user_id);
        Ok(())
    }

    async fn delete(&self, id: i32) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.history.retain(|h| h.config_id != id);
        inner
            .configs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("webservice id {}", id)))
    }

    async fn exists(&self, name: &str) -> Result<bool, RepositoryError> {
        Ok(self.inner.read().await.find_by_name(name).is_some())
    }

    async fn exists_excluding(&self, name: &str, exclude_id: i32) -> Result<bool, RepositoryError> {
        Ok(self.inner.read().await.name_taken(name, exclude_id))
    }

    async fn history(&self, config_id: i32) -> Result<Vec<WebserviceConfigHistory>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<WebserviceConfigHistory> = inner
            .history
            .iter()
            .filter(|h| h.config_id == config_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(entries)
    }

    async fn history_entry(&self, history_id: i64) -> Result<WebserviceConfigHistory, RepositoryError> {
        self.inner
            .read()
            .await
            .history
            .iter()
            .find(|h| h.id == history_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("history entry {}", history_id)))
    }

    async fn restore_from_history(&self, history_id: i64, user_id: i32) -> Result<(), RepositoryError> {
        let entry = self.history_entry(history_id).await?;
        let config = WebserviceConfigData::from_yaml(&entry.config)?;

        let mut inner = self.inner.write().await;
        let stored = inner
            .configs
            .get_mut(&entry.config_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("webservice id {}", entry.config_id)))?;
        stored.config = config;
        stored.change_time = Utc::now();
        stored.change_by = user_id;

        inner.snapshot(entry.config_id, entry.config, user_id);
        Ok(())
    }
}

use std::sync::Arc;

use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{
    clients::{Cache, Store},
    models::template::{Template, TemplateInput},
};

pub const ALL_TEMPLATES_KEY: &str = "all-templates";

pub fn template_key(id: i64) -> String {
    format!("template:{}", id)
}

/// Read-through cache in front of the template store. Cache failures never
/// fail a call: reads fall back to the store and writes are best effort.
#[derive(Clone)]
pub struct TemplateCache {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    ttl_seconds: u64,
}

impl TemplateCache {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache>, ttl_seconds: u64) -> Self {
        Self {
            store,
            cache,
            ttl_seconds,
        }
    }

    pub async fn list(&self) -> Result<Vec<Template>> {
        if let Some(templates) = self.cached::<Vec<Template>>(ALL_TEMPLATES_KEY).await {
            return Ok(templates);
        }

        let templates = self.store.list_templates().await?;
        self.populate(ALL_TEMPLATES_KEY, &templates).await;

        Ok(templates)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Template>> {
        let key = template_key(id);

        if let Some(template) = self.cached::<Template>(&key).await {
            return Ok(Some(template));
        }

        let template = self.store.get_template(id).await?;
        if let Some(template) = &template {
            self.populate(&key, template).await;
        }

        Ok(template)
    }

    pub async fn create(&self, input: &TemplateInput) -> Result<Template> {
        let template = self.store.create_template(input).await?;
        self.invalidate(None).await;

        Ok(template)
    }

    pub async fn update(&self, id: i64, input: &TemplateInput) -> Result<Option<Template>> {
        let template = self.store.update_template(id, input).await?;
        if template.is_some() {
            self.invalidate(Some(id)).await;
        }

        Ok(template)
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let deleted = self.store.delete_template(id).await?;
        if deleted {
            self.invalidate(Some(id)).await;
        }

        Ok(deleted)
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key, "Template cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                debug!(key, "Template cache miss");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling back to store");
                None
            }
        }
    }

    async fn populate<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.cache.set_ex(key, &raw, self.ttl_seconds).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn invalidate(&self, id: Option<i64>) {
        let mut keys = vec![ALL_TEMPLATES_KEY.to_string()];
        if let Some(id) = id {
            keys.push(template_key(id));
        }

        if let Err(e) = self.cache.del(&keys).await {
            warn!(?keys, error = %e, "Cache invalidation failed");
        }
    }
}

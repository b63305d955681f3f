//! Pluggable memory backends. The Gateway never stores data itself — ranking, filtering,
//! and relevance scoring remain each backend's own responsibility.

use async_trait::async_trait;
use dashmap::DashMap;
use grace_core::SignedPayload;
use serde_json::Value;

use crate::error::MemoryResult;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: Value,
    pub metadata: Value,
    pub score: f32,
    /// Signature bound to `(domain, id, content)` at store time, via
    /// [`signable_bytes`]. Verified fresh at fetch time so a tampered record is caught
    /// rather than trusted.
    pub signature: SignedPayload,
}

/// The bytes a backend item's signature covers, shared between store time (where the
/// signature is produced) and fetch time (where it's re-verified).
pub fn signable_bytes(domain: &str, id: &str, content: &Value) -> Vec<u8> {
    format!("{domain}:{id}:{content}").into_bytes()
}

#[derive(Debug, Clone)]
pub struct BackendFetchResult {
    pub items: Vec<MemoryItem>,
    pub logic_update_id: Option<String>,
}

#[async_trait]
pub trait MemoryBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, domain: &str, query: &str, limit: usize) -> MemoryResult<BackendFetchResult>;

    /// Persists a pre-signed item under `id` (assigned by the Gateway, which signs
    /// `signable_bytes(domain, id, content)` before the backend ever sees it).
    async fn store(
        &self,
        id: &str,
        domain: &str,
        content: Value,
        metadata: Value,
        signature: SignedPayload,
    ) -> MemoryResult<()>;
}

/// A `sled`-backed implementation of `MemoryBackend`: durable storage with an in-process
/// hot-cache layer in front of it.
pub struct SledBackend {
    name: String,
    db: sled::Db,
    cache: DashMap<String, MemoryItem>,
    logic_update_id: String,
}

impl SledBackend {
    pub fn open(name: &str, db: sled::Db, logic_update_id: &str) -> Self {
        Self {
            name: name.to_string(),
            db,
            cache: DashMap::new(),
            logic_update_id: logic_update_id.to_string(),
        }
    }

    fn key(domain: &str, id: &str) -> String {
        format!("{domain}:{id}")
    }
}

#[async_trait]
impl MemoryBackend for SledBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, domain: &str, query: &str, limit: usize) -> MemoryResult<BackendFetchResult> {
        let prefix = format!("{domain}:");
        let mut items: Vec<MemoryItem> = Vec::new();
        for kv in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = kv?;
            if let Ok(item) = serde_json::from_slice::<MemoryItem>(&value) {
                let haystack = item.content.to_string();
                if query.is_empty() || haystack.to_lowercase().contains(&query.to_lowercase()) {
                    items.push(item);
                }
            }
            if items.len() >= limit {
                break;
            }
        }
        Ok(BackendFetchResult {
            items,
            logic_update_id: Some(self.logic_update_id.clone()),
        })
    }

    async fn store(
        &self,
        id: &str,
        domain: &str,
        content: Value,
        metadata: Value,
        signature: SignedPayload,
    ) -> MemoryResult<()> {
        let item = MemoryItem {
            id: id.to_string(),
            content,
            metadata,
            score: 1.0,
            signature,
        };
        let key = Self::key(domain, id);
        let encoded = serde_json::to_vec(&item)?;
        self.db.insert(key.as_bytes(), encoded)?;
        self.cache.insert(format!("{domain}:{id}"), item);
        Ok(())
    }
}

/// A `DashMap`-backed backend with no durable requirement — used for tests and for
/// components whose data need not survive a restart.
#[derive(Default)]
pub struct InMemoryBackend {
    name: String,
    store: DashMap<String, Vec<MemoryItem>>,
}

impl InMemoryBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            store: DashMap::new(),
        }
    }
}

#[async_trait]
impl MemoryBackend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, domain: &str, query: &str, limit: usize) -> MemoryResult<BackendFetchResult> {
        let items = self
            .store
            .get(domain)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|item| {
                        query.is_empty()
                            || item
                                .content
                                .to_string()
                                .to_lowercase()
                                .contains(&query.to_lowercase())
                    })
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(BackendFetchResult {
            items,
            logic_update_id: None,
        })
    }

    async fn store(
        &self,
        id: &str,
        domain: &str,
        content: Value,
        metadata: Value,
        signature: SignedPayload,
    ) -> MemoryResult<()> {
        let item = MemoryItem {
            id: id.to_string(),
            content,
            metadata,
            score: 1.0,
            signature,
        };
        self.store.entry(domain.to_string()).or_default().push(item);
        Ok(())
    }
}

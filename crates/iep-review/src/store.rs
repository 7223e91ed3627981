//! Server-owned document store.
//!
//! The in-memory map is the working set. When Redis is configured every write goes through
//! to it, and the map is seeded from it at startup. Redis failures are logged and otherwise
//! ignored, so the service keeps running memory-only.
//!
//! Key schema:
//! - `iep:v1:document:{id}`: JSON-serialized Document (no TTL)
use std::collections::HashMap;

use iep_common::redis::RedisCache;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::model::{Document, SubCriteria};

const KEY_PREFIX: &str = "iep:v1:document:";

#[derive(Debug, thiserror::Error)]
pub enum RubricEditError {
    #[error("document not found: {0}")]
    Document(String),

    #[error("document {0} has no rubric")]
    NoRubric(String),

    #[error("criterion not found: {section}/{criterion}")]
    Criterion { section: String, criterion: String },
}

pub struct DocumentStore {
    documents: RwLock<HashMap<String, Document>>,
    redis: RedisCache,
}

impl DocumentStore {
    pub fn new(redis: RedisCache) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            redis,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(RedisCache::disabled())
    }

    pub fn is_persistent(&self) -> bool {
        self.redis.is_configured()
    }

    /// Seed the map from Redis. Returns how many documents were loaded.
    pub async fn load(&self) -> usize {
        let Some(keys) = self.redis.scan_keys(KEY_PREFIX).await else {
            return 0;
        };
        let mut loaded = 0;
        let mut documents = self.documents.write().await;
        for key in keys {
            let Some(json) = self.redis.get(&key).await else {
                continue;
            };
            match serde_json::from_str::<Document>(&json) {
                Ok(doc) => {
                    documents.insert(doc.id.clone(), doc);
                    loaded += 1;
                }
                Err(e) => warn!(error = %e, key, "skipping undecodable stored document"),
            }
        }
        info!(loaded, "documents loaded from redis");
        loaded
    }

    async fn persist(&self, document: &Document) {
        if !self.redis.is_configured() {
            return;
        }
        let key = format!("{KEY_PREFIX}{}", document.id);
        match serde_json::to_string(document) {
            Ok(json) => {
                if !self.redis.set(&key, &json).await {
                    warn!(document_id = %document.id, "document not persisted to redis");
                }
            }
            Err(e) => warn!(error = %e, document_id = %document.id, "document serialization failed"),
        }
    }

    /// Insert or replace. Last write wins; Redis is written under the map lock so both
    /// see writes in the same order.
    pub async fn put(&self, document: Document) {
        let mut documents = self.documents.write().await;
        self.persist(&document).await;
        documents.insert(document.id.clone(), document);
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.documents.read().await.get(id).cloned()
    }

    /// All documents, newest upload first.
    pub async fn list(&self) -> Vec<Document> {
        let mut documents: Vec<Document> = self.documents.read().await.values().cloned().collect();
        documents.sort_by(|a, b| b.upload_date.cmp(&a.upload_date).then_with(|| b.id.cmp(&a.id)));
        documents
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Drop every document. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut documents = self.documents.write().await;
        let removed = documents.len();
        documents.clear();
        if self.redis.is_configured() && !self.redis.delete_by_prefix(KEY_PREFIX).await {
            warn!("stored documents not cleared from redis");
        }
        removed
    }

    /// Replace one sub-criterion summary and persist the document.
    pub async fn edit_rubric_summary(
        &self,
        id: &str,
        section_id: &str,
        criterion_id: &str,
        summary: &str,
    ) -> Result<SubCriteria, RubricEditError> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| RubricEditError::Document(id.to_string()))?;
        let feedback = document
            .feedback_data
            .as_mut()
            .filter(|f| !f.rubric_scores.is_empty())
            .ok_or_else(|| RubricEditError::NoRubric(id.to_string()))?;
        let criterion = feedback
            .rubric_scores
            .iter_mut()
            .filter(|section| section.id == section_id)
            .flat_map(|section| section.sub_criteria.iter_mut())
            .find(|c| c.id == criterion_id)
            .ok_or_else(|| RubricEditError::Criterion {
                section: section_id.to_string(),
                criterion: criterion_id.to_string(),
            })?;
        criterion.summary = summary.to_string();
        let criterion = criterion.clone();
        info!(
            document_id = %id,
            section_id,
            criterion_id,
            "rubric summary edited"
        );
        self.persist(document).await;
        Ok(criterion)
    }
}

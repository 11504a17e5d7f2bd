//! # farm-store
//!
//! The document-store contract the backend persists devices, jobs and tasks
//! through. The production store lives behind the backend API; this crate
//! defines the consumed interface (named collections, minimal equality
//! queries, typed document restore) together with [`MemoryStore`], an
//! in-memory implementation for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found in {collection}")]
    NotFound { collection: Collection },

    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Named collections the backend persists entities in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Devices,
    Jobs,
    Tasks,
    Containers,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Devices => "devices",
            Collection::Jobs => "jobs",
            Collection::Tasks => "tasks",
            Collection::Containers => "containers",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A minimal query object: every listed field must equal the stored value.
pub type Query = serde_json::Map<String, Value>;

/// Build a query from `(field, value)` pairs.
pub fn query<I, K>(fields: I) -> Query
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    fields
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}

/// Abstract document store.
///
/// Documents are JSON objects; typed access goes through [`StoreExt`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, collection: Collection, query: &Query)
        -> Result<Option<Value>, StoreError>;

    async fn find_many(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Vec<Value>, StoreError>;

    async fn save(&self, collection: Collection, document: Value) -> Result<Value, StoreError>;

    async fn save_many(
        &self,
        collection: Collection,
        documents: Vec<Value>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Replace the first document matching `query`; errors if none matches.
    async fn update(
        &self,
        collection: Collection,
        query: &Query,
        document: Value,
    ) -> Result<Value, StoreError>;
}

/// Typed convenience layer over [`DocumentStore`].
#[async_trait]
pub trait StoreExt: DocumentStore {
    async fn find_as<T: DeserializeOwned + Send>(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Option<T>, StoreError> {
        match self.find(collection, query).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn find_many_as<T: DeserializeOwned + Send>(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Vec<T>, StoreError> {
        self.find_many(collection, query)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(StoreError::from))
            .collect()
    }

    async fn save_as<T: Serialize + Send + Sync>(
        &self,
        collection: Collection,
        document: &T,
    ) -> Result<Value, StoreError> {
        self.save(collection, serde_json::to_value(document)?).await
    }
}

impl<S: DocumentStore + ?Sized> StoreExt for S {}

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(document: &Value, query: &Query) -> bool {
    let Some(object) = document.as_object() else {
        return false;
    };
    query
        .iter()
        .all(|(field, expected)| object.get(field) == Some(expected))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .and_then(|documents| documents.iter().find(|doc| matches(doc, query)).cloned()))
    }

    async fn find_many(
        &self,
        collection: Collection,
        query: &Query,
    ) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|doc| matches(doc, query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save(&self, collection: Collection, document: Value) -> Result<Value, StoreError> {
        if !document.is_object() {
            return Err(StoreError::NotAnObject);
        }

        let mut collections = self.collections.write().await;
        collections
            .entry(collection)
            .or_default()
            .push(document.clone());
        Ok(document)
    }

    async fn save_many(
        &self,
        collection: Collection,
        documents: Vec<Value>,
    ) -> Result<Vec<Value>, StoreError> {
        for document in &documents {
            if !document.is_object() {
                return Err(StoreError::NotAnObject);
            }
        }

        let mut collections = self.collections.write().await;
        collections
            .entry(collection)
            .or_default()
            .extend(documents.iter().cloned());
        Ok(documents)
    }

    async fn update(
        &self,
        collection: Collection,
        query: &Query,
        document: Value,
    ) -> Result<Value, StoreError> {
        if !document.is_object() {
            return Err(StoreError::NotAnObject);
        }

        let mut collections = self.collections.write().await;
        let documents = collections
            .entry(collection)
            .or_default();

        match documents.iter_mut().find(|doc| matches(doc, query)) {
            Some(slot) => {
                *slot = document.clone();
                Ok(document)
            }
            None => Err(StoreError::NotFound { collection }),
        }
    }
}

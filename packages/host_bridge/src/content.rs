//! Content operations: the typed vocabulary both ends agree on.
//!
//! The bridge itself never looks inside payloads; these types live here so the
//! backend's wrappers and the embedded client's handlers share one definition.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge::Bridge;
use crate::envelope::Envelope;
use crate::error::BridgeError;
use crate::retry::{RetryPolicy, with_retry};

pub const SEARCH: &str = "search";
pub const GET_ENTITY: &str = "get_entity";
pub const CREATE_ENTITY: &str = "create_entity";
pub const DELETE_ENTITY: &str = "delete_entity";
pub const LIST_ENTITIES: &str = "list_entities";
pub const LIST_FILES: &str = "list_files";
pub const ATTACH_ITEMS: &str = "attach_items";

/// One-way notifications broadcast after mutations.
pub const ENTITY_CREATED: &str = "entity_created";
pub const ENTITY_DELETED: &str = "entity_deleted";

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub pack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub pack: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Ids of embedded items (attached with `attach_items`).
    #[serde(default)]
    pub items: Vec<String>,
}

impl Entity {
    pub fn reference(&self) -> EntityRef {
        EntityRef {
            entity_type: self.entity_type.clone(),
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub pack: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deleted {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListRequest {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileListing {
    pub path: String,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachItems {
    pub target_id: String,
    pub item_ids: Vec<String>,
}

/// Typed wrappers over [`Bridge::call`] for each content operation.
///
/// Reads (search, listings) go through the retry wrapper; mutations and
/// point lookups are single attempts.
#[derive(Clone)]
pub struct ContentApi {
    bridge: Bridge,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ContentApi {
    pub fn new(bridge: Bridge, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            bridge,
            timeout,
            retry,
        }
    }

    pub async fn search_items(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, BridgeError> {
        with_retry(&self.retry, SEARCH, || {
            self.bridge.call_typed(SEARCH, request, self.timeout)
        })
        .await
    }

    pub async fn get_entity(&self, entity: &EntityRef) -> Result<Entity, BridgeError> {
        self.bridge.call_typed(GET_ENTITY, entity, self.timeout).await
    }

    /// Create an entity, then tell every connected client about it.
    pub async fn create_entity(&self, new: &NewEntity) -> Result<Entity, BridgeError> {
        let created: Entity = self
            .bridge
            .call_typed(CREATE_ENTITY, new, self.timeout)
            .await?;
        self.notify(ENTITY_CREATED, &created.reference()).await;
        Ok(created)
    }

    pub async fn delete_entity(&self, entity: &EntityRef) -> Result<Deleted, BridgeError> {
        let deleted: Deleted = self
            .bridge
            .call_typed(DELETE_ENTITY, entity, self.timeout)
            .await?;
        self.notify(ENTITY_DELETED, entity).await;
        Ok(deleted)
    }

    pub async fn list_entities(&self, entity_type: &str) -> Result<Vec<EntitySummary>, BridgeError> {
        let request = ListRequest {
            entity_type: entity_type.to_string(),
        };
        with_retry(&self.retry, LIST_ENTITIES, || {
            self.bridge.call_typed(LIST_ENTITIES, &request, self.timeout)
        })
        .await
    }

    pub async fn list_files(&self, path: &str) -> Result<FileListing, BridgeError> {
        let request = FileListRequest {
            path: path.to_string(),
        };
        with_retry(&self.retry, LIST_FILES, || {
            self.bridge.call_typed(LIST_FILES, &request, self.timeout)
        })
        .await
    }

    pub async fn attach_items(&self, request: &AttachItems) -> Result<Entity, BridgeError> {
        self.bridge.call_typed(ATTACH_ITEMS, request, self.timeout).await
    }

    async fn notify(&self, kind: &str, entity: &EntityRef) {
        match serde_json::to_value(entity) {
            Ok(data) => {
                self.bridge.broadcast(Envelope::new(kind).with_data(data)).await;
            }
            Err(e) => tracing::warn!(kind, error = %e, "failed to encode notification"),
        }
    }
}

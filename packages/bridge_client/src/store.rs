//! In-memory content store standing in for the host application's content API.
//!
//! Implements every content handler the backend calls. Real deployments swap
//! this for the host's own collections; the handler shapes stay the same.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use host_bridge::content::{
    ATTACH_ITEMS, AttachItems, CREATE_ENTITY, DEFAULT_SEARCH_LIMIT, DELETE_ENTITY, Deleted,
    ENTITY_CREATED, ENTITY_DELETED, Entity, EntityRef, EntitySummary, FileListRequest,
    FileListing, GET_ENTITY, LIST_ENTITIES, LIST_FILES, ListRequest, NewEntity, SEARCH,
    SearchHit, SearchRequest,
};
use host_bridge::{Dispatcher, HandlerError};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct StoreInner {
    /// entity_type -> id -> entity, ordered for stable listings
    entities: HashMap<String, BTreeMap<String, Entity>>,
    files: BTreeSet<String>,
}

#[derive(Clone, Default)]
pub struct ContentStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every content handler on `dispatcher`.
    pub fn install(&self, dispatcher: &mut Dispatcher) {
        let store = self.clone();
        dispatcher.on(SEARCH, move |req: SearchRequest| {
            let store = store.clone();
            async move { Ok::<_, HandlerError>(store.search(&req).await) }
        });

        let store = self.clone();
        dispatcher.on(GET_ENTITY, move |entity: EntityRef| {
            let store = store.clone();
            async move { store.get(&entity).await }
        });

        let store = self.clone();
        dispatcher.on(CREATE_ENTITY, move |new: NewEntity| {
            let store = store.clone();
            async move { store.create(new).await }
        });

        let store = self.clone();
        dispatcher.on(DELETE_ENTITY, move |entity: EntityRef| {
            let store = store.clone();
            async move { store.delete(&entity).await }
        });

        let store = self.clone();
        dispatcher.on(LIST_ENTITIES, move |req: ListRequest| {
            let store = store.clone();
            async move { Ok::<_, HandlerError>(store.list(&req.entity_type).await) }
        });

        let store = self.clone();
        dispatcher.on(LIST_FILES, move |req: FileListRequest| {
            let store = store.clone();
            async move { Ok::<_, HandlerError>(store.list_files(&req.path).await) }
        });

        let store = self.clone();
        dispatcher.on(ATTACH_ITEMS, move |req: AttachItems| {
            let store = store.clone();
            async move { store.attach(&req).await }
        });

        // Mutation notifications from the backend. This store is the source
        // of truth already, so they only get logged.
        for kind in [ENTITY_CREATED, ENTITY_DELETED] {
            dispatcher.on(kind, move |entity: EntityRef| async move {
                debug!(kind, entity_type = %entity.entity_type, id = %entity.id, "content changed");
                Ok::<_, HandlerError>(Value::Null)
            });
        }
    }

    pub async fn insert(&self, entity: Entity) {
        let mut inner = self.inner.write().await;
        inner
            .entities
            .entry(entity.entity_type.clone())
            .or_default()
            .insert(entity.id.clone(), entity);
    }

    pub async fn add_file(&self, path: impl Into<String>) {
        let path = path.into();
        self.inner
            .write()
            .await
            .files
            .insert(path.trim_matches('/').to_string());
    }

    /// Case-insensitive substring match on names, ordered by name.
    pub async fn search(&self, req: &SearchRequest) -> Vec<SearchHit> {
        let needle = req.query.to_lowercase();
        let limit = req.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let inner = self.inner.read().await;
        let mut hits: Vec<SearchHit> = inner
            .entities
            .values()
            .flat_map(|by_id| by_id.values())
            .filter(|e| req.pack.is_none() || e.pack == req.pack)
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .map(|e| SearchHit {
                id: e.id.clone(),
                entity_type: e.entity_type.clone(),
                name: e.name.clone(),
                pack: e.pack.clone(),
            })
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        hits
    }

    pub async fn get(&self, entity: &EntityRef) -> Result<Entity, HandlerError> {
        self.inner
            .read()
            .await
            .entities
            .get(&entity.entity_type)
            .and_then(|by_id| by_id.get(&entity.id))
            .cloned()
            .ok_or_else(|| not_found(entity))
    }

    pub async fn create(&self, new: NewEntity) -> Result<Entity, HandlerError> {
        if new.name.trim().is_empty() {
            return Err(HandlerError::Invalid("name must not be empty".into()));
        }
        if new.entity_type.trim().is_empty() {
            return Err(HandlerError::Invalid("entity_type must not be empty".into()));
        }
        let entity = Entity {
            id: uuid::Uuid::new_v4().simple().to_string(),
            entity_type: new.entity_type,
            name: new.name,
            pack: new.pack,
            data: new.data,
            items: Vec::new(),
        };
        self.insert(entity.clone()).await;
        Ok(entity)
    }

    pub async fn delete(&self, entity: &EntityRef) -> Result<Deleted, HandlerError> {
        let mut inner = self.inner.write().await;
        inner
            .entities
            .get_mut(&entity.entity_type)
            .and_then(|by_id| by_id.remove(&entity.id))
            .map(|removed| Deleted { id: removed.id })
            .ok_or_else(|| not_found(entity))
    }

    pub async fn list(&self, entity_type: &str) -> Vec<EntitySummary> {
        self.inner
            .read()
            .await
            .entities
            .get(entity_type)
            .map(|by_id| {
                by_id
                    .values()
                    .map(|e| EntitySummary {
                        id: e.id.clone(),
                        name: e.name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Immediate children of `path` ("" is the root).
    pub async fn list_files(&self, path: &str) -> FileListing {
        let dir = path.trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let inner = self.inner.read().await;
        let mut dirs = BTreeSet::new();
        let mut files = Vec::new();
        for file in inner.files.iter() {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((subdir, _)) => {
                    dirs.insert(subdir.to_string());
                }
                None => files.push(rest.to_string()),
            }
        }

        FileListing {
            path: dir.to_string(),
            dirs: dirs.into_iter().collect(),
            files,
        }
    }

    /// Attach items to an entity of any type. Every item id must exist.
    pub async fn attach(&self, req: &AttachItems) -> Result<Entity, HandlerError> {
        let mut inner = self.inner.write().await;

        let known = |id: &str| inner.entities.values().any(|by_id| by_id.contains_key(id));
        if let Some(missing) = req.item_ids.iter().find(|id| !known(id.as_str())) {
            return Err(HandlerError::NotFound(format!("item {missing}")));
        }

        let target = inner
            .entities
            .values_mut()
            .find_map(|by_id| by_id.get_mut(&req.target_id))
            .ok_or_else(|| HandlerError::NotFound(format!("entity {}", req.target_id)))?;
        for id in &req.item_ids {
            if !target.items.contains(id) {
                target.items.push(id.clone());
            }
        }
        Ok(target.clone())
    }
}

fn not_found(entity: &EntityRef) -> HandlerError {
    HandlerError::NotFound(format!("{} {}", entity.entity_type, entity.id))
}

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use host_bridge::content::{
    AttachItems, Deleted, Entity, EntityRef, EntitySummary, FileListing, NewEntity, SearchHit,
    SearchRequest,
};
use serde::Deserialize;

use super::ApiError;
use crate::AppState;

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    pack: Option<String>,
    limit: Option<usize>,
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let request = SearchRequest {
        query: params.q,
        pack: params.pack,
        limit: params.limit,
    };
    Ok(Json(state.content.search_items(&request).await?))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    entity_type: String,
}

pub async fn list_entities_handler(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<EntitySummary>>, ApiError> {
    Ok(Json(state.content.list_entities(&params.entity_type).await?))
}

pub async fn get_entity_handler(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<Json<Entity>, ApiError> {
    let entity = EntityRef { entity_type, id };
    Ok(Json(state.content.get_entity(&entity).await?))
}

pub async fn create_entity_handler(
    State(state): State<AppState>,
    Json(new): Json<NewEntity>,
) -> Result<(StatusCode, Json<Entity>), ApiError> {
    let created = state.content.create_entity(&new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_entity_handler(
    State(state): State<AppState>,
    Path((entity_type, id)): Path<(String, String)>,
) -> Result<Json<Deleted>, ApiError> {
    let entity = EntityRef { entity_type, id };
    Ok(Json(state.content.delete_entity(&entity).await?))
}

#[derive(Deserialize)]
pub struct AttachBody {
    item_ids: Vec<String>,
}

pub async fn attach_items_handler(
    State(state): State<AppState>,
    Path((_entity_type, id)): Path<(String, String)>,
    Json(body): Json<AttachBody>,
) -> Result<Json<Entity>, ApiError> {
    let request = AttachItems {
        target_id: id,
        item_ids: body.item_ids,
    };
    Ok(Json(state.content.attach_items(&request).await?))
}

#[derive(Deserialize)]
pub struct FilesQuery {
    #[serde(default)]
    path: String,
}

pub async fn list_files_handler(
    State(state): State<AppState>,
    Query(params): Query<FilesQuery>,
) -> Result<Json<FileListing>, ApiError> {
    Ok(Json(state.content.list_files(&params.path).await?))
}

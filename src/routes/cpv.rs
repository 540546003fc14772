//! CPV dictionary reads

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use crate::api::DataResponse;
use crate::app::AppState;
use crate::auth::RequireAuth;
use crate::domain::cpv::{CpvChild, CpvChildResponse, CpvChildrenQuery};
use crate::error::ApiResult;

/// GET /cpv/tree
pub async fn cpv_tree(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let tree = state.cpv_cache.tree(&state.db).await?;
    Ok(Json(DataResponse::new(tree.as_slice())).into_response())
}

/// GET /cpv/children?parent_level_code=
///
/// One level of the tree; roots when no parent is given.
pub async fn cpv_children(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(query): Query<CpvChildrenQuery>,
) -> ApiResult<impl IntoResponse> {
    let parent = query
        .parent_level_code
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let rows = sqlx::query_as::<_, CpvChild>(
        r#"
        SELECT c.id, c.cpv_parent_code, c.cpv_level_code, c.cpv_code, c.name_ua, c.name_en,
               (c.cpv_level_code <> '0' AND EXISTS(
                   SELECT 1 FROM cpv_dictionary k WHERE k.cpv_parent_code = c.cpv_level_code
               )) AS has_children
        FROM cpv_dictionary c
        WHERE CASE WHEN $1::text IS NULL THEN c.cpv_parent_code IN ('', '0') ELSE c.cpv_parent_code = $1 END
        ORDER BY c.cpv_code
        "#,
    )
    .bind(parent)
    .fetch_all(&state.db)
    .await?;

    let data: Vec<CpvChildResponse> = rows.into_iter().map(Into::into).collect();
    Ok(DataResponse::new(data))
}

//! 产品与卡密库存 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use rewards_core::{InventoryItem, Product, StockSummary};
use tracing::info;
use validator::Validate;

use crate::{
    dto::{
        AddItemsRequest, ApiResponse, CreateProductRequest, DeletedResponse, ItemQueryParams,
        ItemsAddedResponse, PageResponse,
    },
    error::AdminError,
    state::AppState,
};

/// 创建产品
///
/// POST /products
pub async fn create_product(
    State(state): State<AppState>,
    Json(req): Json<CreateProductRequest>,
) -> Result<Json<ApiResponse<Product>>, AdminError> {
    req.validate()?;

    let product = state
        .core
        .catalog
        .create_product(&req.id, &req.name, req.pricing, req.download_link)
        .await?;
    Ok(Json(ApiResponse::success(product)))
}

/// GET /products
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Product>>>, AdminError> {
    Ok(Json(ApiResponse::success(
        state.core.catalog.list_products().await?,
    )))
}

/// 按时长统计库存
///
/// GET /products/{id}/stock
pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<StockSummary>>>, AdminError> {
    Ok(Json(ApiResponse::success(
        state.core.catalog.stock(&product_id).await?,
    )))
}

/// 卡密列表
///
/// GET /products/{id}/items?status=&page=&pageSize=
pub async fn list_items(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Query(params): Query<ItemQueryParams>,
) -> Result<Json<ApiResponse<PageResponse<InventoryItem>>>, AdminError> {
    params.validate()?;

    let page = state
        .core
        .catalog
        .items_page(&product_id, params.status, params.page, params.page_size)
        .await?;
    Ok(Json(ApiResponse::success(page.into())))
}

/// 批量入库卡密
///
/// POST /products/{id}/items
pub async fn add_items(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Json(req): Json<AddItemsRequest>,
) -> Result<Json<ApiResponse<ItemsAddedResponse>>, AdminError> {
    req.validate()?;

    let added = state
        .core
        .catalog
        .add_items(&product_id, req.duration_days, &req.items)
        .await?;
    if added == 0 {
        return Err(AdminError::Validation("没有有效的卡密".to_string()));
    }
    info!(product_id = %product_id, duration_days = req.duration_days, added, "Items added");

    Ok(Json(ApiResponse::success(ItemsAddedResponse {
        product_id,
        duration_days: req.duration_days,
        added,
    })))
}

/// 删除产品及其全部卡密
///
/// DELETE /products/{id}
pub async fn delete_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<ApiResponse<DeletedResponse>>, AdminError> {
    let deleted_items = state.core.catalog.delete_product(&product_id).await?;
    Ok(Json(ApiResponse::success(DeletedResponse {
        id: product_id,
        deleted_items,
    })))
}

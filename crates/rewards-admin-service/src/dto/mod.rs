//! 请求和响应的数据传输对象

pub mod request;
pub mod response;

pub use request::{
    AddItemsRequest, AdjustPointsRequest, CreateProductRequest, ItemQueryParams,
    PaginationParams, SetBanRequest, StartBroadcastRequest, UpdateSettingsRequest,
};
pub use response::{
    ApiResponse, BanResponse, BroadcastCreated, BroadcastJobDto, CleanupResponse,
    DeletedResponse, ItemsAddedResponse, PageResponse, PointsResponse,
};

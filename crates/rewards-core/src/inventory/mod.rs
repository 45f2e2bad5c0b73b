//! 卡密库存
//!
//! - [`ProductCatalog`]：产品、价格表与卡密池的维护
//! - [`InventoryAllocator`]：积分领取卡密，保证同一卡密至多发放一次

mod allocator;
mod catalog;

pub use allocator::{ClaimResult, InventoryAllocator};
pub use catalog::{OwnedItem, ProductCatalog, generate_payloads};

//! Data models for Stockroom

mod entry;
mod pending;
mod product;

pub use entry::{merge_view, ProductEntry};
pub use pending::{PendingProduct, StagedImage, TempId};
pub use product::{ImagePayload, ImageSource, NewProduct, Product, ProductInput, ValidProduct};

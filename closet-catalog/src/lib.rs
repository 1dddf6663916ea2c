pub mod inventory;
pub mod product;

pub use inventory::{reserve_lines, release_lines, CatalogGateway, InMemoryCatalog, InventoryError, StockLine};
pub use product::{Product, ProductQuote, TransactionKind};

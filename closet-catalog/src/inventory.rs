use crate::product::Product;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Quantity of one product to take from (or give back to) stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

/// Catalog capability used by the order engine. Stock changes must be
/// compare-and-decrement per product so concurrent checkouts cannot oversell.
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, InventoryError>;

    /// Take `quantity` units, failing without any change if fewer are available.
    /// Returns the remaining stock.
    async fn decrement_stock(&self, product_id: Uuid, quantity: u32) -> Result<u32, InventoryError>;

    /// Give `quantity` units back.
    async fn restore_stock(&self, product_id: Uuid, quantity: u32) -> Result<(), InventoryError>;
}

/// Take stock for every line or for none of them.
pub async fn reserve_lines(catalog: &dyn CatalogGateway, lines: &[StockLine]) -> Result<(), InventoryError> {
    let mut taken: Vec<StockLine> = Vec::with_capacity(lines.len());

    for line in lines {
        match catalog.decrement_stock(line.product_id, line.quantity).await {
            Ok(_) => taken.push(*line),
            Err(e) => {
                release_lines(catalog, &taken).await;
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Give stock back for every line. Failures are logged; the remaining lines are
/// still attempted. Returns the lines that could not be restored.
pub async fn release_lines(catalog: &dyn CatalogGateway, lines: &[StockLine]) -> Vec<StockLine> {
    let mut failed = Vec::new();
    for line in lines {
        if let Err(e) = catalog.restore_stock(line.product_id, line.quantity).await {
            tracing::error!(
                "Failed to restore {} unit(s) of product {}: {}",
                line.quantity,
                line.product_id,
                e
            );
            failed.push(*line);
        }
    }
    failed
}

/// In-memory catalog for tests and local runs.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: Mutex<HashMap<Uuid, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, product: Product) {
        self.products.lock().await.insert(product.id, product);
    }

    pub async fn stock_of(&self, product_id: Uuid) -> Option<u32> {
        self.products.lock().await.get(&product_id).map(|p| p.stock)
    }
}

#[async_trait]
impl CatalogGateway for InMemoryCatalog {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, InventoryError> {
        Ok(self.products.lock().await.get(&id).cloned())
    }

    async fn decrement_stock(&self, product_id: Uuid, quantity: u32) -> Result<u32, InventoryError> {
        let mut products = self.products.lock().await;
        let product = products.get_mut(&product_id).ok_or(InventoryError::NotFound(product_id))?;

        if !product.is_active {
            return Err(InventoryError::Inactive(product_id));
        }

        if product.stock < quantity {
            return Err(InventoryError::InsufficientStock {
                product_id,
                requested: quantity,
                available: product.stock,
            });
        }

        product.stock -= quantity;
        Ok(product.stock)
    }

    async fn restore_stock(&self, product_id: Uuid, quantity: u32) -> Result<(), InventoryError> {
        let mut products = self.products.lock().await;
        let product = products.get_mut(&product_id).ok_or(InventoryError::NotFound(product_id))?;
        product.stock = product.stock.saturating_add(quantity);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Product not found: {0}")]
    NotFound(Uuid),

    #[error("Product is no longer available: {0}")]
    Inactive(Uuid),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("Catalog backend failure: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use closet_shared::{Money, Percentage};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn product(stock: u32) -> Product {
        Product {
            id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            name: "Linen blazer".to_string(),
            sale_price: Money::new(dec!(500)),
            rental_price: Money::new(dec!(80)),
            deposit_per_unit: Money::new(dec!(100)),
            commission_rate: Percentage::new(dec!(15)).unwrap(),
            stock,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_decrement_and_restore() {
        let catalog = InMemoryCatalog::new();
        let p = product(3);
        catalog.upsert(p.clone()).await;

        assert_eq!(catalog.decrement_stock(p.id, 2).await.unwrap(), 1);
        let err = catalog.decrement_stock(p.id, 2).await.unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { requested: 2, available: 1, .. }));
        assert_eq!(catalog.stock_of(p.id).await, Some(1));

        catalog.restore_stock(p.id, 2).await.unwrap();
        assert_eq!(catalog.stock_of(p.id).await, Some(3));
    }

    #[tokio::test]
    async fn test_reserve_lines_is_all_or_nothing() {
        let catalog = InMemoryCatalog::new();
        let plenty = product(5);
        let scarce = product(1);
        catalog.upsert(plenty.clone()).await;
        catalog.upsert(scarce.clone()).await;

        let lines = [
            StockLine { product_id: plenty.id, quantity: 2 },
            StockLine { product_id: scarce.id, quantity: 2 },
        ];
        assert!(reserve_lines(&catalog, &lines).await.is_err());
        assert_eq!(catalog.stock_of(plenty.id).await, Some(5));
        assert_eq!(catalog.stock_of(scarce.id).await, Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_decrements_never_oversell() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let p = product(3);
        catalog.upsert(p.clone()).await;

        let product_id = p.id;
        let mut handles = Vec::new();
        for _ in 0..10 {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(async move { catalog.decrement_stock(product_id, 1).await.is_ok() }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 3);
        assert_eq!(catalog.stock_of(p.id).await, Some(0));
    }

    #[tokio::test]
    async fn test_inactive_product_cannot_be_taken() {
        let catalog = InMemoryCatalog::new();
        let mut p = product(3);
        p.is_active = false;
        catalog.upsert(p.clone()).await;
        assert!(matches!(catalog.decrement_stock(p.id, 1).await, Err(InventoryError::Inactive(_))));
    }
}

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, ProductId};

/// Catalog entry for a stocked product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    /// Threshold below which stock is reported as low. Never enforced.
    pub safety_stock: i64,
}

/// Validated registration request; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    name: String,
    safety_stock: i64,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, safety_stock: i64) -> Result<Self, DomainError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DomainError::invalid_argument("name cannot be empty"));
        }
        if safety_stock < 0 {
            return Err(DomainError::invalid_argument(format!(
                "safety_stock cannot be negative (got {safety_stock})"
            )));
        }
        Ok(Self { name, safety_stock })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn safety_stock(&self) -> i64 {
        self.safety_stock
    }

    pub fn into_product(self, product_id: ProductId) -> Product {
        Product {
            product_id,
            name: self.name,
            safety_stock: self.safety_stock,
        }
    }
}

/// Reporting classification of a product's total stock.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    Low,
    Healthy,
}

impl StockStatus {
    pub fn classify(total: i64, safety_stock: i64) -> Self {
        if total <= 0 {
            StockStatus::OutOfStock
        } else if total < safety_stock {
            StockStatus::Low
        } else {
            StockStatus::Healthy
        }
    }

    pub fn needs_attention(&self) -> bool {
        !matches!(self, StockStatus::Healthy)
    }
}

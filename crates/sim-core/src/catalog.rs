//! Read access to externally owned business, product and material records.

use crate::{validate_catalog, Business, Material, MaterialId, Product, ProductId, ValidationError};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

/// Externally owned records the engine reads every tick. Stock and revenue
/// mutations are requested through this trait, never applied behind its back.
pub trait Catalog: Send {
    fn business(&self) -> &Business;
    fn product(&self, id: &ProductId) -> Option<&Product>;
    fn material(&self, id: &MaterialId) -> Option<&Material>;
    /// Ids of every product currently offered.
    fn product_ids(&self) -> Vec<ProductId>;
    fn set_material_stock(&mut self, id: &MaterialId, stock: u32);
    fn add_revenue(&mut self, amount: Decimal);

    /// Duration of the stage for `id`. Unknown materials take one tick.
    fn stage_ticks(&self, id: &MaterialId) -> u32 {
        self.material(id).map(Material::stage_ticks).unwrap_or(1)
    }

    /// Sum of all stage durations of `product`; a product without materials
    /// still occupies a slot for one tick.
    fn product_ticks(&self, product: &Product) -> u32 {
        if product.materials.is_empty() {
            return 1;
        }
        product
            .materials
            .iter()
            .map(|m| self.stage_ticks(m))
            .fold(0u32, u32::saturating_add)
    }
}

/// Catalog kept in memory; used by the CLI, tests and benchmarks.
#[derive(Clone, Debug)]
pub struct InMemoryCatalog {
    business: Business,
    materials: BTreeMap<MaterialId, Material>,
    products: BTreeMap<ProductId, Product>,
    revenue: Decimal,
}

impl InMemoryCatalog {
    pub fn new(
        business: Business,
        materials: Vec<Material>,
        products: Vec<Product>,
    ) -> Result<Self, ValidationError> {
        validate_catalog(&materials, &products)?;
        Ok(Self {
            business,
            materials: materials.into_iter().map(|m| (m.id.clone(), m)).collect(),
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
            revenue: Decimal::ZERO,
        })
    }

    /// Revenue collected so far.
    pub fn revenue(&self) -> Decimal {
        self.revenue
    }

    pub fn materials(&self) -> impl Iterator<Item = &Material> {
        self.materials.values()
    }

    /// Adds `qty` units to a material. Returns `false` for unknown ids.
    pub fn restock(&mut self, id: &MaterialId, qty: u32) -> bool {
        match self.materials.get_mut(id) {
            Some(m) => {
                m.stock = m.stock.saturating_add(qty);
                debug!(material = %id, stock = m.stock, "restocked");
                true
            }
            None => false,
        }
    }

    /// Inserts or replaces a product.
    pub fn upsert_product(&mut self, product: Product) {
        self.products.insert(product.id.clone(), product);
    }

    /// Deletes a product; units already in production finish without it.
    pub fn remove_product(&mut self, id: &ProductId) -> Option<Product> {
        self.products.remove(id)
    }

    /// Replaces the business configuration (capacity, delivery time, ...).
    pub fn set_business(&mut self, business: Business) {
        self.business = business;
    }

    pub fn business_mut(&mut self) -> &mut Business {
        &mut self.business
    }
}

impl Catalog for InMemoryCatalog {
    fn business(&self) -> &Business {
        &self.business
    }

    fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.get(id)
    }

    fn material(&self, id: &MaterialId) -> Option<&Material> {
        self.materials.get(id)
    }

    fn product_ids(&self) -> Vec<ProductId> {
        self.products.keys().cloned().collect()
    }

    fn set_material_stock(&mut self, id: &MaterialId, stock: u32) {
        if let Some(m) = self.materials.get_mut(id) {
            m.stock = stock;
        }
    }

    fn add_revenue(&mut self, amount: Decimal) {
        self.revenue += amount;
    }
}

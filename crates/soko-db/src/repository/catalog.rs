//! # Catalog Repository
//!
//! Read-side access to the reference data the engine consumes from its
//! CRUD collaborators: products, variants, relations, addresses, shipping
//! and payment methods, promotions. Catalog management itself lives in
//! the surrounding storefront; the inserts here exist for seeding and for
//! the collaborator boundary.

use sqlx::SqlitePool;

use crate::error::DbResult;
use soko_core::{
    Address, PaymentMethod, Product, ProductRelation, ProductVariant, Promotion, ShippingMethod,
};

/// Repository for catalog reference data.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

const PRODUCT_COLUMNS: &str = "id, sku, name, price_cents, weight_grams, requires_shipping, \
     is_active, stock_quantity, min_purchase_qty, max_purchase_qty, \
     customer_purchase_limit, created_at, updated_at";

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Products & variants
    // -------------------------------------------------------------------------

    /// Gets a product by ID.
    pub async fn product(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Gets a variant by ID.
    pub async fn variant(&self, id: &str) -> DbResult<Option<ProductVariant>> {
        let variant = sqlx::query_as::<_, ProductVariant>(
            "SELECT id, product_id, name, price_cents, is_active \
             FROM product_variants WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(variant)
    }

    /// Inserts a product.
    pub async fn insert_product(&self, product: &Product) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO products ( \
                id, sku, name, price_cents, weight_grams, requires_shipping, \
                is_active, stock_quantity, min_purchase_qty, max_purchase_qty, \
                customer_purchase_limit, created_at, updated_at \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.weight_grams)
        .bind(product.requires_shipping)
        .bind(product.is_active)
        .bind(product.stock_quantity)
        .bind(product.min_purchase_qty)
        .bind(product.max_purchase_qty)
        .bind(product.customer_purchase_limit)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a variant.
    pub async fn insert_variant(&self, variant: &ProductVariant) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO product_variants (id, product_id, name, price_cents, is_active) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&variant.id)
        .bind(&variant.product_id)
        .bind(&variant.name)
        .bind(variant.price_cents)
        .bind(variant.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Product relations
    // -------------------------------------------------------------------------

    /// Lists the relation edges originating from one product.
    pub async fn relations_for(&self, product_id: &str) -> DbResult<Vec<ProductRelation>> {
        let rows = sqlx::query_as::<_, ProductRelation>(
            "SELECT product_id, related_product_id, relation \
             FROM product_relations WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Inserts a relation edge.
    pub async fn insert_relation(&self, relation: &ProductRelation) -> DbResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO product_relations (product_id, related_product_id, relation) \
             VALUES (?1, ?2, ?3)",
        )
        .bind(&relation.product_id)
        .bind(&relation.related_product_id)
        .bind(relation.relation)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Addresses
    // -------------------------------------------------------------------------

    /// Gets an address by ID.
    pub async fn address(&self, id: &str) -> DbResult<Option<Address>> {
        let address = sqlx::query_as::<_, Address>(
            "SELECT id, full_name, line1, line2, city, region, postal_code, country, phone \
             FROM addresses WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(address)
    }

    /// Inserts an address.
    pub async fn insert_address(&self, address: &Address) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO addresses ( \
                id, full_name, line1, line2, city, region, postal_code, country, phone \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&address.id)
        .bind(&address.full_name)
        .bind(&address.line1)
        .bind(&address.line2)
        .bind(&address.city)
        .bind(&address.region)
        .bind(&address.postal_code)
        .bind(&address.country)
        .bind(&address.phone)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Shipping
    // -------------------------------------------------------------------------

    /// Gets a shipping method by ID.
    pub async fn shipping_method(&self, id: &str) -> DbResult<Option<ShippingMethod>> {
        let method = sqlx::query_as::<_, ShippingMethod>(
            "SELECT id, zone_id, name, is_active, price_cents, min_order_cents, max_weight_grams \
             FROM shipping_methods WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(method)
    }

    /// Lists the countries a shipping zone covers.
    pub async fn zone_countries(&self, zone_id: &str) -> DbResult<Vec<String>> {
        let countries: Vec<String> =
            sqlx::query_scalar("SELECT country FROM shipping_zone_countries WHERE zone_id = ?1")
                .bind(zone_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(countries)
    }

    /// Whether ANY configured zone covers a country.
    ///
    /// Used as a soft signal: missing zone configuration produces a
    /// validation warning, not a hard block.
    pub async fn any_zone_covers(&self, country: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM shipping_zone_countries WHERE country = ?1",
        )
        .bind(country)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Inserts a shipping zone with its covered countries.
    pub async fn insert_zone(&self, zone_id: &str, name: &str, countries: &[&str]) -> DbResult<()> {
        sqlx::query("INSERT INTO shipping_zones (id, name) VALUES (?1, ?2)")
            .bind(zone_id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        for country in countries {
            sqlx::query(
                "INSERT OR IGNORE INTO shipping_zone_countries (zone_id, country) VALUES (?1, ?2)",
            )
            .bind(zone_id)
            .bind(country)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Inserts a shipping method.
    pub async fn insert_shipping_method(&self, method: &ShippingMethod) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO shipping_methods ( \
                id, zone_id, name, is_active, price_cents, min_order_cents, max_weight_grams \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&method.id)
        .bind(&method.zone_id)
        .bind(&method.name)
        .bind(method.is_active)
        .bind(method.price_cents)
        .bind(method.min_order_cents)
        .bind(method.max_weight_grams)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Payment methods
    // -------------------------------------------------------------------------

    /// Gets a payment method by code.
    pub async fn payment_method(&self, code: &str) -> DbResult<Option<PaymentMethod>> {
        let method = sqlx::query_as::<_, PaymentMethod>(
            "SELECT code, name, is_active, min_amount_cents, max_amount_cents, requires_local_phone \
             FROM payment_methods WHERE code = ?1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(method)
    }

    /// Lists the countries a payment method is available in.
    ///
    /// An empty list means the method is available everywhere.
    pub async fn payment_method_countries(&self, code: &str) -> DbResult<Vec<String>> {
        let countries: Vec<String> =
            sqlx::query_scalar("SELECT country FROM payment_method_countries WHERE code = ?1")
                .bind(code)
                .fetch_all(&self.pool)
                .await?;

        Ok(countries)
    }

    /// Inserts a payment method with its country availability.
    pub async fn insert_payment_method(
        &self,
        method: &PaymentMethod,
        countries: &[&str],
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO payment_methods ( \
                code, name, is_active, min_amount_cents, max_amount_cents, requires_local_phone \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&method.code)
        .bind(&method.name)
        .bind(method.is_active)
        .bind(method.min_amount_cents)
        .bind(method.max_amount_cents)
        .bind(method.requires_local_phone)
        .execute(&self.pool)
        .await?;

        for country in countries {
            sqlx::query(
                "INSERT OR IGNORE INTO payment_method_countries (code, country) VALUES (?1, ?2)",
            )
            .bind(&method.code)
            .bind(country)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Promotions
    // -------------------------------------------------------------------------

    /// Lists all promotions flagged active.
    ///
    /// Window and minimum-order filtering happens in the validation rules
    /// (they need the cart's subtotal).
    pub async fn active_promotions(&self) -> DbResult<Vec<Promotion>> {
        let rows = sqlx::query_as::<_, Promotion>(
            "SELECT id, name, discount_type, value, min_order_cents, starts_at, ends_at, is_active \
             FROM promotions WHERE is_active = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Inserts a promotion.
    pub async fn insert_promotion(&self, promotion: &Promotion) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO promotions ( \
                id, name, discount_type, value, min_order_cents, starts_at, ends_at, is_active \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&promotion.id)
        .bind(&promotion.name)
        .bind(promotion.discount_type)
        .bind(promotion.value)
        .bind(promotion.min_order_cents)
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

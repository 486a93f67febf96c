//! # Validation Context
//!
//! One read-only snapshot of everything the rule set needs, assembled
//! up front so the rules themselves stay pure functions.
//!
//! ## Why Snapshot First?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  load(cart_id)  ──►  ValidationContext  ──►  rules::run(&ctx)           │
//! │                                                                         │
//! │  • rules never touch the database, so the full set runs without        │
//! │    short-circuiting and stays trivially testable                       │
//! │  • the engine stays honest: validation cannot mutate reservation       │
//! │    state because the rules never see a connection                      │
//! │  • one consistent read beats fourteen interleaved ones                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use soko_core::{
    Address, Cart, CartItem, Coupon, PaymentMethod, Product, ProductRelation, ProductVariant,
    Promotion, ShippingMethod, StockRecord,
};

/// Everything known about one cart line at validation time.
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub item: CartItem,
    pub product: Option<Product>,
    pub variant: Option<ProductVariant>,
    /// Ledger row; None means only the legacy flat stock field exists.
    pub stock: Option<StockRecord>,
    /// Units this cart already holds for the item's key.
    pub own_reserved: i64,
    /// Historical non-cancelled purchases by the cart's owner.
    pub already_purchased: i64,
}

impl ItemContext {
    /// Current catalog price: variant override, else product price, else
    /// the stored snapshot (when the product is gone the snapshot is all
    /// we have - existence has its own rule).
    pub fn current_price_cents(&self) -> i64 {
        if let Some(variant) = &self.variant {
            if let Some(price) = variant.price_cents {
                return price;
            }
        }
        match &self.product {
            Some(product) => product.price_cents,
            None => self.item.unit_price_cents,
        }
    }
}

/// Read-only snapshot backing one validation pass.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub cart: Cart,
    pub items: Vec<ItemContext>,
    /// Relation edges among the products present in the cart.
    pub relations: Vec<ProductRelation>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<ShippingMethod>,
    /// Countries covered by the chosen shipping method's zone.
    pub method_zone_countries: Vec<String>,
    /// Whether ANY configured zone covers the shipping country.
    pub any_zone_covers_country: Option<bool>,
    pub payment_method: Option<PaymentMethod>,
    /// Countries the payment method is available in (empty = everywhere).
    pub payment_countries: Vec<String>,
    pub coupon: Option<Coupon>,
    /// Product ids the coupon is restricted to (empty = unrestricted).
    pub coupon_products: Vec<String>,
    /// Whether the cart's owner has redeemed the coupon before.
    pub coupon_used_by_customer: bool,
    pub promotions: Vec<Promotion>,
    pub now: DateTime<Utc>,
}

impl ValidationContext {
    /// Whether any item in the cart needs physical shipping.
    pub fn requires_shipping(&self) -> bool {
        self.items
            .iter()
            .any(|i| i.product.as_ref().map(|p| p.requires_shipping).unwrap_or(false))
    }

    /// Total cart weight from catalog data (missing products weigh zero).
    pub fn total_weight_grams(&self) -> i64 {
        self.items
            .iter()
            .filter_map(|i| {
                i.product
                    .as_ref()
                    .map(|p| p.weight_grams * i.item.quantity)
            })
            .sum()
    }

    /// Assembles the snapshot for one cart.
    pub async fn load(engine: &Engine, cart_id: &str) -> EngineResult<Self> {
        let db = engine.db();

        let cart = db
            .carts()
            .get(cart_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Cart", cart_id))?;

        let raw_items = db.carts().items(cart_id).await?;
        let mut items = Vec::with_capacity(raw_items.len());
        for item in raw_items {
            let product = db.catalog().product(&item.product_id).await?;
            let variant = match &item.variant_id {
                Some(variant_id) => db.catalog().variant(variant_id).await?,
                None => None,
            };
            // Plain read: validation never creates ledger rows (rule 4
            // falls back to the legacy field with a warning instead)
            let stock = db.stock().get(&item.key()).await?;
            let own_reserved = db
                .reservations()
                .active_quantity_for(cart_id, &item.key())
                .await?;

            let already_purchased = match (&cart.user_id, &product) {
                (Some(user_id), Some(p)) if p.customer_purchase_limit.is_some() => {
                    db.orders().purchased_quantity(user_id, &p.id).await?
                }
                _ => 0,
            };

            items.push(ItemContext {
                item,
                product,
                variant,
                stock,
                own_reserved,
                already_purchased,
            });
        }

        // Relation edges among the distinct products in the cart
        let mut product_ids: Vec<String> =
            items.iter().map(|i| i.item.product_id.clone()).collect();
        product_ids.sort();
        product_ids.dedup();
        let mut relations = Vec::new();
        for product_id in &product_ids {
            relations.extend(db.catalog().relations_for(product_id).await?);
        }

        let shipping_address = match &cart.shipping_address_id {
            Some(id) => db.catalog().address(id).await?,
            None => None,
        };
        let billing_address = match &cart.billing_address_id {
            Some(id) => db.catalog().address(id).await?,
            None => None,
        };

        let shipping_method = match &cart.shipping_method_id {
            Some(id) => db.catalog().shipping_method(id).await?,
            None => None,
        };
        let method_zone_countries = match &shipping_method {
            Some(method) => db.catalog().zone_countries(&method.zone_id).await?,
            None => Vec::new(),
        };
        let any_zone_covers_country = match &shipping_address {
            Some(address) => Some(db.catalog().any_zone_covers(&address.country).await?),
            None => None,
        };

        let payment_method = match &cart.payment_method_code {
            Some(code) => db.catalog().payment_method(code).await?,
            None => None,
        };
        let payment_countries = match &payment_method {
            Some(method) => db.catalog().payment_method_countries(&method.code).await?,
            None => Vec::new(),
        };

        let coupon = match &cart.coupon_code {
            Some(code) => db.coupons().get(code).await?,
            None => None,
        };
        let coupon_products = match &coupon {
            Some(coupon) => db.coupons().restricted_products(&coupon.code).await?,
            None => Vec::new(),
        };
        let coupon_used_by_customer = match (&coupon, &cart.user_id) {
            (Some(coupon), Some(user_id)) => {
                db.coupons().redeemed_by(&coupon.code, user_id).await?
            }
            _ => false,
        };

        let promotions = db.catalog().active_promotions().await?;

        Ok(ValidationContext {
            cart,
            items,
            relations,
            shipping_address,
            billing_address,
            shipping_method,
            method_zone_countries,
            any_zone_covers_country,
            payment_method,
            payment_countries,
            coupon,
            coupon_products,
            coupon_used_by_customer,
            promotions,
            now: Utc::now(),
        })
    }
}

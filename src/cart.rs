//! Cart aggregate: the in-progress sale.
//!
//! A plain owned value with no storage or network side effects. Totals are
//! recomputed from the line items on every call; there is no cached derived
//! state to fall out of agreement with the lines.

use crate::model::{LineItem, Product};

/// The in-progress sale on this terminal.
///
/// Line items keep insertion order for display; totals are independent of
/// order. `error` holds the last user-facing checkout failure until the next
/// successful checkout or an explicit [`Cart::clear`].
#[derive(Debug, Default, Clone)]
pub struct Cart {
    items: Vec<LineItem>,
    error: Option<String>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` units of `product`, merging into the existing line when
    /// the product is already in the cart. Zero quantity is a no-op.
    pub fn add_item(&mut self, product: &Product, quantity: u32) {
        if quantity == 0 {
            return;
        }
        match self
            .items
            .iter_mut()
            .find(|line| line.product_id == product.product_id)
        {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => self.items.push(LineItem::new(product, quantity)),
        }
    }

    /// Remove the line for `product_id` entirely. No-op when absent.
    pub fn remove_item(&mut self, product_id: &str) {
        self.items.retain(|line| line.product_id != product_id);
    }

    /// Set the quantity for `product_id`. Zero removes the line; a product
    /// not in the cart is a no-op.
    pub fn update_quantity(&mut self, product_id: &str, quantity: u32) {
        if quantity == 0 {
            self.remove_item(product_id);
            return;
        }
        if let Some(line) = self
            .items
            .iter_mut()
            .find(|line| line.product_id == product_id)
        {
            line.quantity = quantity;
        }
    }

    /// Empty the cart and clear any recorded checkout error.
    pub fn clear(&mut self) {
        self.items.clear();
        self.error = None;
    }

    /// Total number of units across all lines.
    pub fn total_items(&self) -> u64 {
        self.items.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// Grand total in the smallest currency unit.
    pub fn total_amount(&self) -> i64 {
        self.items.iter().map(LineItem::subtotal).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Copy of the current lines, detached from the cart, for persisting a
    /// sale.
    pub fn snapshot(&self) -> Vec<LineItem> {
        self.items.clone()
    }

    /// Last user-facing checkout failure, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }
}

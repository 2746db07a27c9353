//! Cart state, transition table and commands.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::codec::{Codec, JsonCodec};
use crate::error::DomainError;
use crate::registry::AggregateKind;

use super::{CartCheckedOut, CartError, CartOpened, ItemAdded, ItemRemoved};

/// Stored aggregate type name of carts.
pub const CART_AGGREGATE_TYPE: &str = "Cart";

/// Lifecycle of a cart.
///
/// ```text
/// New ──► Open ──► CheckedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CartStatus {
    #[default]
    New,
    Open,
    CheckedOut,
}

/// One line of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub sku: String,
    pub qty: u32,
}

/// Materialized cart state.
///
/// Lines keep the order in which their items were first added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    customer_id: Option<String>,
    lines: Vec<CartLine>,
    status: CartStatus,
}

impl Cart {
    /// Builds the cart kind with its JSON codec and transition table.
    pub fn kind() -> AggregateKind<Cart> {
        Self::kind_with_codec(JsonCodec)
    }

    pub fn kind_with_codec<C: Codec>(codec: C) -> AggregateKind<Cart, C> {
        AggregateKind::with_codec(CART_AGGREGATE_TYPE, Cart::default, codec)
            .on(Cart::opened)
            .on(Cart::item_added)
            .on(Cart::item_removed)
            .on(Cart::checked_out)
    }

    fn opened(&mut self, event: CartOpened) {
        self.customer_id = event.customer_id;
        self.status = CartStatus::Open;
    }

    fn item_added(&mut self, event: ItemAdded) {
        match self.lines.iter_mut().find(|line| line.sku == event.sku) {
            Some(line) => line.qty = line.qty.saturating_add(event.qty),
            None => self.lines.push(CartLine {
                sku: event.sku,
                qty: event.qty,
            }),
        }
    }

    fn item_removed(&mut self, event: ItemRemoved) {
        self.lines.retain(|line| line.sku != event.sku);
    }

    fn checked_out(&mut self, _event: CartCheckedOut) {
        self.status = CartStatus::CheckedOut;
    }
}

// Query methods
impl Cart {
    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    pub fn status(&self) -> CartStatus {
        self.status
    }

    /// Returns the cart lines in the order they were first added.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Returns the quantity of an item, or 0 if it is not in the cart.
    pub fn quantity(&self, sku: &str) -> u32 {
        self.lines
            .iter()
            .find(|line| line.sku == sku)
            .map_or(0, |line| line.qty)
    }

    /// Returns the total quantity of all items.
    pub fn total_quantity(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |total, line| total.saturating_add(line.qty))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn ensure_open(&self) -> Result<(), CartError> {
        match self.status {
            CartStatus::New => Err(CartError::NotOpen),
            CartStatus::Open => Ok(()),
            CartStatus::CheckedOut => Err(CartError::AlreadyCheckedOut),
        }
    }
}

// Commands
impl<C: Codec> Aggregate<Cart, C> {
    /// Opens a new cart.
    pub fn open(&mut self, customer_id: Option<String>) -> Result<(), DomainError> {
        if self.state().status() != CartStatus::New {
            return Err(CartError::AlreadyOpened.into());
        }
        self.record(CartOpened { customer_id })
    }

    /// Adds `qty` units of an item.
    pub fn add_item(&mut self, sku: impl Into<String>, qty: u32) -> Result<(), DomainError> {
        self.state().ensure_open()?;
        if qty == 0 {
            return Err(CartError::InvalidQuantity { qty }.into());
        }
        let sku = sku.into();
        if self.state().quantity(&sku).checked_add(qty).is_none() {
            return Err(CartError::QuantityOverflow { sku }.into());
        }
        self.record(ItemAdded { sku, qty })
    }

    /// Removes an item entirely.
    pub fn remove_item(&mut self, sku: impl Into<String>) -> Result<(), DomainError> {
        self.state().ensure_open()?;
        let sku = sku.into();
        if self.state().quantity(&sku) == 0 {
            return Err(CartError::ItemNotFound { sku }.into());
        }
        self.record(ItemRemoved { sku })
    }

    /// Checks out a non-empty cart.
    pub fn check_out(&mut self) -> Result<(), DomainError> {
        self.state().ensure_open()?;
        if self.state().is_empty() {
            return Err(CartError::Empty.into());
        }
        self.record(CartCheckedOut {
            checked_out_at: Utc::now(),
        })
    }
}

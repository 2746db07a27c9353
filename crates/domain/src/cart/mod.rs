//! Shopping cart aggregate.
//!
//! A small but complete aggregate used to exercise the persistence engine:
//! a cart is opened, items are added and removed, and it is finally checked
//! out, after which it no longer accepts changes.

mod aggregate;
mod events;

pub use aggregate::{CART_AGGREGATE_TYPE, Cart, CartLine, CartStatus};
pub use events::{CartCheckedOut, CartOpened, ItemAdded, ItemRemoved};

use thiserror::Error;

/// Errors that can occur during cart operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartError {
    /// The cart has not been opened yet.
    #[error("Cart is not open")]
    NotOpen,

    /// The cart was already opened.
    #[error("Cart already opened")]
    AlreadyOpened,

    /// The cart was checked out and is closed for changes.
    #[error("Cart already checked out")]
    AlreadyCheckedOut,

    /// Quantities must be positive.
    #[error("Invalid quantity: {qty} (must be greater than 0)")]
    InvalidQuantity { qty: u32 },

    /// Adding the quantity would exceed the largest quantity a line can hold.
    #[error("Quantity overflow for item {sku}")]
    QuantityOverflow { sku: String },

    /// The item is not in the cart.
    #[error("Item not found: {sku}")]
    ItemNotFound { sku: String },

    /// An empty cart cannot be checked out.
    #[error("Cart has no items")]
    Empty,
}

//! Cart domain events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// The cart was opened. Always the first event of a cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartOpened {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

impl DomainEvent for CartOpened {
    const EVENT_TYPE: &'static str = "CartOpened";
}

/// Some quantity of an item was put in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub sku: String,
    pub qty: u32,
}

impl DomainEvent for ItemAdded {
    const EVENT_TYPE: &'static str = "ItemAdded";
}

/// An item was taken out of the cart entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub sku: String,
}

impl DomainEvent for ItemRemoved {
    const EVENT_TYPE: &'static str = "ItemRemoved";
}

/// The cart was checked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartCheckedOut {
    pub checked_out_at: DateTime<Utc>,
}

impl DomainEvent for CartCheckedOut {
    const EVENT_TYPE: &'static str = "CartCheckedOut";
}

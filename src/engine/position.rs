use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::{OrderKind, PositionSide, ProtectiveOrder};

/// Controller lifecycle state
///
/// `Exiting` only exists while a close sequence runs under the controller
/// lock; it is never published in a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    Flat,
    Entering,
    InPosition,
    Exiting,
}

impl ControllerState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ControllerState) -> bool {
        use ControllerState::*;
        matches!(
            (self, next),
            (Flat, Entering)
                | (Entering, InPosition)
                | (Entering, Flat)
                | (InPosition, Exiting)
                | (Exiting, Flat)
        )
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Flat => write!(f, "FLAT"),
            ControllerState::Entering => write!(f, "ENTERING"),
            ControllerState::InPosition => write!(f, "IN_POSITION"),
            ControllerState::Exiting => write!(f, "EXITING"),
        }
    }
}

/// Stop and take-profit orders guarding a position
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtectiveOrders {
    pub stop: Option<String>,
    pub take_profit: Option<String>,
    /// Set once the take-profit cancel was sent after trailing armed
    pub take_profit_cancelled: bool,
}

impl ProtectiveOrders {
    pub fn from_orders(orders: &[ProtectiveOrder]) -> Self {
        let find = |kind| {
            orders
                .iter()
                .find(|o| o.kind == kind)
                .map(|o| o.order_id.clone())
        };
        Self {
            stop: find(OrderKind::Stop),
            take_profit: find(OrderKind::TakeProfit),
            take_profit_cancelled: false,
        }
    }

    /// Order ids still expected to be live on the exchange
    pub fn live_ids(&self) -> Vec<&str> {
        let mut ids = Vec::with_capacity(2);
        if let Some(id) = &self.stop {
            ids.push(id.as_str());
        }
        if let (Some(id), false) = (&self.take_profit, self.take_profit_cancelled) {
            ids.push(id.as_str());
        }
        ids
    }

    /// Whether a filled order belongs to this position
    ///
    /// A cancelled take-profit still matches: its fill may have raced the cancel.
    pub fn owns(&self, order_id: &str) -> bool {
        self.stop.as_deref() == Some(order_id) || self.take_profit.as_deref() == Some(order_id)
    }

    pub fn is_empty(&self) -> bool {
        self.stop.is_none() && self.take_profit.is_none()
    }
}

/// The single open position of the managed symbol
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// Increments with every entry; ties background work to one position
    pub generation: u64,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub opened_at: DateTime<Utc>,
    pub high_water_mark: Decimal,
    pub low_water_mark: Decimal,
    pub trailing_armed: bool,
    pub protective_orders: ProtectiveOrders,
}

impl Position {
    pub fn open(
        generation: u64,
        symbol: impl Into<String>,
        side: PositionSide,
        entry_price: Decimal,
        quantity: Decimal,
        protective_orders: ProtectiveOrders,
    ) -> Self {
        Self {
            generation,
            symbol: symbol.into(),
            side,
            entry_price,
            quantity,
            opened_at: Utc::now(),
            high_water_mark: entry_price,
            low_water_mark: entry_price,
            trailing_armed: false,
            protective_orders,
        }
    }

    /// PnL of closing the whole position at `exit_price`
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        (exit_price - self.entry_price) * self.quantity * self.side.sign()
    }
}

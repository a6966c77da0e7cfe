//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ──► Processing ──┬──► Completed
///    │                     ├──► Cancelled
///    │                     └──► Failed
///    └────────────────────────► Completed | Cancelled | Failed
/// ```
///
/// Transitions only ever move to a strictly later stage. Terminal statuses
/// have no successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order is placed and stock reserved; fulfillment has not started.
    #[default]
    Pending,

    /// Fulfillment is under way.
    Processing,

    /// Order has been fulfilled (terminal).
    Completed,

    /// Order was cancelled (terminal).
    Cancelled,

    /// Fulfillment failed (terminal).
    Failed,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Failed,
    ];

    /// Position of the status along the lifecycle path.
    fn stage(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Processing => 1,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Failed => 2,
        }
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        self.stage() == 2
    }

    /// Returns true if the order may move from this status to `target`.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        target.stage() > self.stage()
    }

    /// Returns true if this status is `target` or already past it.
    pub fn has_reached(&self, target: OrderStatus) -> bool {
        self.stage() >= target.stage()
    }

    /// Returns true if entering this status stamps the processed timestamp.
    pub fn stamps_processed_at(&self) -> bool {
        matches!(self, OrderStatus::Processing | OrderStatus::Completed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown order status '{s}'"))
    }
}

use crate::entities::order::OrderStatus;

const ALL_STATUSES: [OrderStatus; 5] = [
    OrderStatus::Pending,
    OrderStatus::Accepted,
    OrderStatus::OutForDelivery,
    OrderStatus::Delivered,
    OrderStatus::Cancelled,
];

impl OrderStatus {
    /// Every status in lifecycle order.
    pub fn all() -> &'static [OrderStatus] {
        &ALL_STATUSES
    }

    /// Statuses this one may move to. Every status, including itself.
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending
            | OrderStatus::Accepted
            | OrderStatus::OutForDelivery
            | OrderStatus::Delivered
            | OrderStatus::Cancelled => &ALL_STATUSES,
        }
    }

    /// Statuses that no longer hold an agent.
    pub fn terminal() -> impl Iterator<Item = OrderStatus> {
        ALL_STATUSES.into_iter().filter(OrderStatus::is_terminal)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

/// What happens to the assigned agent after a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRelease {
    Release,
    Keep,
}

/// Decides whether the assigned agent becomes available after moving to `status`.
///
/// `delivered` always frees the agent. `cancelled` frees it only when the
/// deployment opts in with `release_agent_on_cancel`.
pub fn release_policy(status: OrderStatus, release_on_cancel: bool) -> AgentRelease {
    match status {
        OrderStatus::Delivered => AgentRelease::Release,
        OrderStatus::Cancelled if release_on_cancel => AgentRelease::Release,
        _ => AgentRelease::Keep,
    }
}

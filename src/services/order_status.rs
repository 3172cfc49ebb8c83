//! Order status transitions.
//!
//! Every action names the exact set of statuses it may start from; nothing
//! here compares status codes numerically. [`plan`] turns an accepted action
//! into the ordered list of writes the order service executes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    entities::{order, order::OrderStatus, order_item},
    errors::ServiceError,
};

/// A status-changing request against an existing order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderAction {
    Pay,
    Cancel,
    Confirm,
    Ship,
    Refund,
    AdminCancel,
}

impl OrderAction {
    /// Resolves an action name from the shopper-facing route.
    pub fn parse_user(name: &str) -> Result<Self, ServiceError> {
        match name {
            "pay" => Ok(Self::Pay),
            "cancel" => Ok(Self::Cancel),
            "confirm" => Ok(Self::Confirm),
            other => Err(ServiceError::ValidationError(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }

    /// Resolves an action name from the admin route. `cancel` there is the
    /// admin cancellation, which may also reverse a payment.
    pub fn parse_admin(name: &str) -> Result<Self, ServiceError> {
        match name {
            "ship" => Ok(Self::Ship),
            "refund" => Ok(Self::Refund),
            "cancel" => Ok(Self::AdminCancel),
            other => Err(ServiceError::ValidationError(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Self::Ship | Self::Refund | Self::AdminCancel)
    }

    /// Statuses the action may be applied to.
    pub fn allowed_from(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Self::Pay | Self::Cancel => &[PendingPayment],
            Self::Confirm => &[Shipped],
            Self::Ship => &[Paid],
            Self::Refund => &[Paid, Shipped],
            Self::AdminCancel => &[PendingPayment, Paid],
        }
    }

    pub fn target(self) -> OrderStatus {
        match self {
            Self::Pay => OrderStatus::Paid,
            Self::Cancel | Self::AdminCancel => OrderStatus::Cancelled,
            Self::Confirm => OrderStatus::Completed,
            Self::Ship => OrderStatus::Shipped,
            Self::Refund => OrderStatus::Refunded,
        }
    }

    pub fn stamp(self) -> Option<Stamp> {
        match self {
            Self::Pay => Some(Stamp::PaidAt),
            Self::Ship => Some(Stamp::ShippedAt),
            Self::Confirm => Some(Stamp::CompletedAt),
            Self::Cancel | Self::Refund | Self::AdminCancel => None,
        }
    }

    /// Returns the status the order moves to, or a precondition error naming
    /// the status it is actually in.
    pub fn check(self, current: OrderStatus) -> Result<OrderStatus, ServiceError> {
        if self.allowed_from().contains(&current) {
            return Ok(self.target());
        }
        let expected = self
            .allowed_from()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        Err(ServiceError::invalid_status(
            format!("order is {}; {} requires {}", current, self, expected),
            current,
        ))
    }
}

/// Timestamp column stamped alongside a status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    PaidAt,
    ShippedAt,
    CompletedAt,
}

/// One write in a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Compare-and-swap of the order status.
    SetStatus {
        from: OrderStatus,
        to: OrderStatus,
        stamp: Option<Stamp>,
    },
    AdjustBalance { user_id: i32, delta: Decimal },
    AdjustStock { product_id: i32, delta: i32 },
    AdjustSales { product_id: i32, delta: i32 },
}

/// Ordered writes for one accepted transition.
///
/// Steps up to and including the status write abort the transition when they
/// fail. Steps after it are best-effort: a failure is logged and the
/// transition still reports success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub action: OrderAction,
    pub steps: Vec<Step>,
}

impl TransitionPlan {
    /// Index of the status write; later steps are best-effort.
    pub fn boundary(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| matches!(s, Step::SetStatus { .. }))
    }
}

/// Switches for behaviour that differs between the two paid-order reversals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionPolicy {
    /// When true an admin cancel of a paid order also takes back the sales
    /// it added, like a refund does.
    pub admin_cancel_reverses_sales: bool,
}

/// Builds the write plan for `action` applied to `order`.
///
/// The caller has already run [`OrderAction::check`]; the status write always
/// comes first so that a lost race leaves nothing else applied.
pub fn plan(
    action: OrderAction,
    order: &order::Model,
    items: &[order_item::Model],
    policy: &TransitionPolicy,
) -> TransitionPlan {
    let mut steps = vec![Step::SetStatus {
        from: order.status,
        to: action.target(),
        stamp: action.stamp(),
    }];

    let restore_stock = items.iter().map(|item| Step::AdjustStock {
        product_id: item.product_id,
        delta: item.quantity,
    });

    match action {
        OrderAction::Pay => {
            steps.push(Step::AdjustBalance {
                user_id: order.user_id,
                delta: -order.total_amount,
            });
            steps.extend(items.iter().map(|item| Step::AdjustSales {
                product_id: item.product_id,
                delta: item.quantity,
            }));
        }
        OrderAction::Cancel => steps.extend(restore_stock),
        OrderAction::Confirm | OrderAction::Ship => {}
        OrderAction::Refund => {
            steps.push(Step::AdjustBalance {
                user_id: order.user_id,
                delta: order.total_amount,
            });
            for item in items {
                steps.push(Step::AdjustStock {
                    product_id: item.product_id,
                    delta: item.quantity,
                });
                steps.push(Step::AdjustSales {
                    product_id: item.product_id,
                    delta: -item.quantity,
                });
            }
        }
        OrderAction::AdminCancel => {
            let was_paid = order.status == OrderStatus::Paid;
            if was_paid {
                steps.push(Step::AdjustBalance {
                    user_id: order.user_id,
                    delta: order.total_amount,
                });
            }
            for item in items {
                steps.push(Step::AdjustStock {
                    product_id: item.product_id,
                    delta: item.quantity,
                });
                if was_paid && policy.admin_cancel_reverses_sales {
                    steps.push(Step::AdjustSales {
                        product_id: item.product_id,
                        delta: -item.quantity,
                    });
                }
            }
        }
    }

    TransitionPlan { action, steps }
}

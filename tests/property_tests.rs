//! Property-based tests for the order transition plans.
//!
//! Every reversal has to undo exactly what the forward transitions applied,
//! for any mix of lines, quantities and prices.

use std::collections::HashMap;

use assert_matches::assert_matches;
use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_api::{
    entities::{
        order::{self, OrderStatus},
        order_item,
    },
    services::order_status::{plan, OrderAction, Step, TransitionPolicy},
};

#[derive(Debug, Default, PartialEq)]
struct Ledger {
    balance: Decimal,
    stock: HashMap<i32, i32>,
    sales: HashMap<i32, i32>,
}

impl Ledger {
    fn apply(&mut self, steps: &[Step]) {
        for step in steps {
            match step {
                Step::SetStatus { .. } => {}
                Step::AdjustBalance { delta, .. } => self.balance += *delta,
                Step::AdjustStock { product_id, delta } => {
                    *self.stock.entry(*product_id).or_default() += delta
                }
                Step::AdjustSales { product_id, delta } => {
                    *self.sales.entry(*product_id).or_default() += delta
                }
            }
        }
    }

    /// Drops zero entries so that "touched then restored" equals "untouched".
    fn normalized(mut self) -> Self {
        self.stock.retain(|_, v| *v != 0);
        self.sales.retain(|_, v| *v != 0);
        self
    }
}

fn lines_strategy() -> impl Strategy<Value = Vec<(i32, i32, i64)>> {
    // (product id, quantity, price in cents); repeated product ids allowed
    prop::collection::vec((1i32..6, 1i32..50, 1i64..100_000), 1..8)
}

fn build(status: OrderStatus, lines: &[(i32, i32, i64)]) -> (order::Model, Vec<order_item::Model>) {
    let items: Vec<order_item::Model> = lines
        .iter()
        .enumerate()
        .map(|(i, (product_id, quantity, cents))| order_item::Model {
            id: i as i32 + 1,
            order_id: 1,
            product_id: *product_id,
            product_name: format!("product-{}", product_id),
            product_image: None,
            price: Decimal::new(*cents, 2),
            quantity: *quantity,
        })
        .collect();
    let total = items.iter().map(order_item::Model::subtotal).sum();
    let order = order::Model {
        id: 1,
        order_no: "LS20260101000000000001".to_string(),
        user_id: 7,
        total_amount: total,
        shipping_fee: Decimal::ZERO,
        status,
        address_id: 1,
        address_snapshot: "{}".to_string(),
        remark: None,
        created_at: Utc::now(),
        paid_at: None,
        shipped_at: None,
        completed_at: None,
    };
    (order, items)
}

/// Stock taken at checkout, which no plan contains.
fn checkout(items: &[order_item::Model]) -> Vec<Step> {
    items
        .iter()
        .map(|item| Step::AdjustStock {
            product_id: item.product_id,
            delta: -item.quantity,
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn pay_then_refund_nets_to_zero(lines in lines_strategy()) {
        let policy = TransitionPolicy::default();
        let (pending, items) = build(OrderStatus::PendingPayment, &lines);
        let (paid, _) = build(OrderStatus::Paid, &lines);

        let mut ledger = Ledger::default();
        ledger.apply(&checkout(&items));
        ledger.apply(&plan(OrderAction::Pay, &pending, &items, &policy).steps);
        prop_assert_eq!(ledger.balance, -pending.total_amount);
        ledger.apply(&plan(OrderAction::Refund, &paid, &items, &policy).steps);

        prop_assert_eq!(ledger.normalized(), Ledger::default());
    }

    #[test]
    fn user_cancel_restores_checkout_stock(lines in lines_strategy()) {
        let (pending, items) = build(OrderStatus::PendingPayment, &lines);

        let mut ledger = Ledger::default();
        ledger.apply(&checkout(&items));
        ledger.apply(&plan(OrderAction::Cancel, &pending, &items, &TransitionPolicy::default()).steps);

        prop_assert_eq!(ledger.normalized(), Ledger::default());
    }

    #[test]
    fn admin_cancel_of_paid_order_keeps_sales_unless_configured(
        lines in lines_strategy(),
        reverses_sales in any::<bool>(),
    ) {
        let policy = TransitionPolicy { admin_cancel_reverses_sales: reverses_sales };
        let (pending, items) = build(OrderStatus::PendingPayment, &lines);
        let (paid, _) = build(OrderStatus::Paid, &lines);

        let mut ledger = Ledger::default();
        ledger.apply(&checkout(&items));
        ledger.apply(&plan(OrderAction::Pay, &pending, &items, &policy).steps);
        ledger.apply(&plan(OrderAction::AdminCancel, &paid, &items, &policy).steps);
        let ledger = ledger.normalized();

        prop_assert_eq!(ledger.balance, Decimal::ZERO);
        prop_assert!(ledger.stock.is_empty());
        prop_assert_eq!(ledger.sales.is_empty(), reverses_sales);
    }

    #[test]
    fn status_write_always_leads(lines in lines_strategy()) {
        let policy = TransitionPolicy::default();
        let cases = [
            (OrderAction::Pay, OrderStatus::PendingPayment),
            (OrderAction::Cancel, OrderStatus::PendingPayment),
            (OrderAction::Ship, OrderStatus::Paid),
            (OrderAction::Confirm, OrderStatus::Shipped),
            (OrderAction::Refund, OrderStatus::Shipped),
            (OrderAction::AdminCancel, OrderStatus::Paid),
        ];
        for (action, status) in cases {
            let (order, items) = build(status, &lines);
            let plan = plan(action, &order, &items, &policy);
            prop_assert_eq!(plan.boundary(), Some(0));
            let target = action.target();
            assert_matches!(
                plan.steps[0],
                Step::SetStatus { from, to, .. } if from == status && to == target
            );
        }
    }
}

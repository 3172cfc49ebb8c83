use crate::{
    db::transaction::with_transaction,
    entities::{
        order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderStatus},
        order_item::{self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity},
        product, user,
    },
    errors::{ErrorKind, ServiceError},
    events::{Event, EventSender},
    metrics,
    services::{
        accounts::AccountService,
        addresses::{AddressService, AddressSnapshot},
        cart::{CartLine, CartService},
        catalog::CatalogService,
        inventory::InventoryService,
        order_status::{self, OrderAction, Stamp, Step, TransitionPlan, TransitionPolicy},
    },
};
use chrono::{Local, NaiveDateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Query},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Iterable,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

pub const DEFAULT_ORDER_NUMBER_PREFIX: &str = "LS";
pub const MAX_PAGE_SIZE: u64 = 100;
/// Largest quantity a single line may ask for.
pub const MAX_LINE_QUANTITY: i32 = 10_000;
pub const RECENT_ORDERS_IN_STATS: u64 = 5;

/// One requested line of a direct purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    #[validate(range(min = 1, message = "productId must be positive"))]
    pub product_id: i32,
    #[validate(range(min = 1, max = 10000, message = "quantity must be between 1 and 10000"))]
    pub quantity: i32,
}

/// Where the lines of a new order come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderSource {
    /// Every selected row of the shopper's cart.
    Cart,
    Direct(Vec<OrderLineRequest>),
}

impl OrderSource {
    pub fn is_cart(&self) -> bool {
        matches!(self, Self::Cart)
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub address_id: i32,
    pub remark: Option<String>,
    pub source: OrderSource,
}

/// An order together with its lines, in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

impl OrderWithItems {
    pub fn items_total(&self) -> Decimal {
        self.items.iter().map(order_item::Model::subtotal).sum()
    }
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderWithItems>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default)]
pub struct OrderListFilter {
    pub status: Option<OrderStatus>,
    /// Substring of the order number or of the owner's username.
    pub keyword: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderStats {
    pub total_orders: u64,
    /// Sum of order totals over paid, unreversed orders.
    pub revenue: Decimal,
    /// Order count for every status, zeros included, in code order.
    pub by_status: Vec<(OrderStatus, u64)>,
    /// Newest first.
    pub recent: Vec<OrderWithItems>,
}

/// Who is asking for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User(i32),
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSettings {
    pub order_number_prefix: String,
    pub admin_cancel_reverses_sales: bool,
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self {
            order_number_prefix: DEFAULT_ORDER_NUMBER_PREFIX.to_string(),
            admin_cancel_reverses_sales: false,
        }
    }
}

/// Builds an order number: prefix, local time to the second, and a six digit
/// random suffix. Uniqueness is left to the unique index.
pub fn generate_order_no<R: Rng + ?Sized>(prefix: &str, now: NaiveDateTime, rng: &mut R) -> String {
    format!(
        "{}{}{:06}",
        prefix,
        now.format("%Y%m%d%H%M%S"),
        rng.gen_range(0..1_000_000)
    )
}

/// A validated line, priced from the catalog at checkout time.
struct PricedLine {
    product: product::Model,
    quantity: i32,
}

impl PricedLine {
    fn subtotal(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }
}

/// Order lifecycle: checkout and every status transition after it.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    catalog: CatalogService,
    inventory: InventoryService,
    accounts: AccountService,
    cart: CartService,
    addresses: AddressService,
    settings: OrderSettings,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            catalog: CatalogService::new(db_pool.clone()),
            inventory: InventoryService::new(db_pool.clone()),
            accounts: AccountService::new(db_pool.clone()),
            cart: CartService::new(db_pool.clone()),
            addresses: AddressService::new(db_pool.clone()),
            db_pool,
            event_sender,
            settings,
        }
    }

    pub fn settings(&self) -> &OrderSettings {
        &self.settings
    }

    /// Creates an order from the cart or from an explicit item list.
    ///
    /// Validation runs before anything is written. The order row and its
    /// items are inserted in one transaction; stock decrements and the cart
    /// clear follow as separate best-effort writes.
    #[instrument(skip(self, input), fields(address_id = input.address_id, from_cart = input.source.is_cart()))]
    pub async fn create_order(
        &self,
        user_id: i32,
        input: CreateOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        let result = self.try_create_order(user_id, input).await;
        match &result {
            Ok(created) => {
                metrics::ORDERS_CREATED.inc();
                info!(order_no = %created.order.order_no, total = %created.order.total_amount, "Order created");
            }
            Err(e) => {
                metrics::ORDER_CREATION_FAILURES
                    .with_label_values(&[e.error_code()])
                    .inc();
                warn!(error = %e, "Order creation rejected");
            }
        }
        result
    }

    async fn try_create_order(
        &self,
        user_id: i32,
        input: CreateOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        let address = self
            .addresses
            .find_by_id(input.address_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "address {} is not a shipping address of this user",
                    input.address_id
                ))
            })?;

        let from_cart = input.source.is_cart();
        let requested: Vec<CartLine> = match input.source {
            OrderSource::Cart => self.cart.find_selected_by_user(user_id).await?,
            OrderSource::Direct(lines) => lines
                .into_iter()
                .map(|l| CartLine {
                    product_id: l.product_id,
                    quantity: l.quantity,
                })
                .collect(),
        };
        if requested.is_empty() {
            return Err(ServiceError::ValidationError(
                "order must contain at least one item".to_string(),
            ));
        }

        let lines = self.price_lines(&requested).await?;

        let total_amount: Decimal = lines.iter().map(PricedLine::subtotal).sum();
        let snapshot = AddressSnapshot::from(&address).encode()?;
        let order_no = generate_order_no(
            &self.settings.order_number_prefix,
            Local::now().naive_local(),
            &mut rand::thread_rng(),
        );

        let order_row = OrderActiveModel {
            order_no: Set(order_no.clone()),
            user_id: Set(user_id),
            total_amount: Set(total_amount),
            shipping_fee: Set(Decimal::ZERO),
            status: Set(OrderStatus::PendingPayment),
            address_id: Set(address.id),
            address_snapshot: Set(snapshot),
            remark: Set(input.remark.filter(|r| !r.trim().is_empty())),
            created_at: Set(Utc::now()),
            paid_at: Set(None),
            shipped_at: Set(None),
            completed_at: Set(None),
            ..Default::default()
        };
        let item_rows: Vec<OrderItemActiveModel> = lines
            .iter()
            .map(|line| OrderItemActiveModel {
                product_id: Set(line.product.id),
                product_name: Set(line.product.name.clone()),
                product_image: Set(CatalogService::primary_image(&line.product)),
                price: Set(line.product.price),
                quantity: Set(line.quantity),
                ..Default::default()
            })
            .collect();

        let created = with_transaction(&self.db_pool, move |txn| {
            Box::pin(async move {
                let order = order_row.insert(txn).await?;
                let mut items = Vec::with_capacity(item_rows.len());
                for mut row in item_rows {
                    row.order_id = Set(order.id);
                    items.push(row.insert(txn).await?);
                }
                Ok::<_, ServiceError>(OrderWithItems { order, items })
            })
        })
        .await
        .map_err(|e| match e {
            ServiceError::DatabaseError(db_err) => {
                error!(error = %db_err, %order_no, "Order persistence rolled back");
                ServiceError::OrderCreationFailed(db_err.to_string())
            }
            other => other,
        })?;

        for line in &lines {
            if let Err(e) = self
                .inventory
                .adjust_stock(line.product.id, -line.quantity)
                .await
            {
                error!(error = %e, order_no = %created.order.order_no, product_id = line.product.id, "Stock decrement failed after order commit");
            }
        }
        if from_cart {
            if let Err(e) = self.cart.delete_selected(user_id).await {
                error!(error = %e, order_no = %created.order.order_no, "Cart clear failed after order commit");
            }
        }

        self.publish(Event::OrderCreated {
            order_no: created.order.order_no.clone(),
            user_id,
            total_amount: created.order.total_amount,
            from_cart,
        })
        .await;

        Ok(created)
    }

    /// Resolves every requested line against the catalog. Quantities of the
    /// same product are summed before the stock check.
    async fn price_lines(&self, requested: &[CartLine]) -> Result<Vec<PricedLine>, ServiceError> {
        let mut lines = Vec::with_capacity(requested.len());
        let mut wanted: HashMap<i32, i64> = HashMap::new();

        for line in requested {
            if !(1..=MAX_LINE_QUANTITY).contains(&line.quantity) {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for product {} must be between 1 and {}",
                    line.product_id, MAX_LINE_QUANTITY
                )));
            }
            let product = self
                .catalog
                .find_by_id(line.product_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.product_id))
                })?;
            if !product.is_listed() {
                return Err(ServiceError::ValidationError(format!(
                    "product '{}' is not available",
                    product.name
                )));
            }

            // Summed in i64 so repeated lines cannot wrap past the stock check.
            let total_wanted = wanted.entry(product.id).or_insert(0);
            *total_wanted += i64::from(line.quantity);
            if *total_wanted > i64::from(product.stock) {
                return Err(ServiceError::InsufficientStock(format!(
                    "product '{}' has {} in stock, {} requested",
                    product.name, product.stock, total_wanted
                )));
            }

            lines.push(PricedLine {
                product,
                quantity: line.quantity,
            });
        }
        Ok(lines)
    }

    #[instrument(skip(self))]
    pub async fn pay(&self, order_no: &str, user_id: i32) -> Result<OrderWithItems, ServiceError> {
        self.transition(order_no, Actor::User(user_id), OrderAction::Pay)
            .await
    }

    #[instrument(skip(self))]
    pub async fn cancel_by_user(
        &self,
        order_no: &str,
        user_id: i32,
    ) -> Result<OrderWithItems, ServiceError> {
        self.transition(order_no, Actor::User(user_id), OrderAction::Cancel)
            .await
    }

    #[instrument(skip(self))]
    pub async fn confirm_receipt(
        &self,
        order_no: &str,
        user_id: i32,
    ) -> Result<OrderWithItems, ServiceError> {
        self.transition(order_no, Actor::User(user_id), OrderAction::Confirm)
            .await
    }

    #[instrument(skip(self))]
    pub async fn admin_ship(&self, order_no: &str) -> Result<OrderWithItems, ServiceError> {
        self.transition(order_no, Actor::Admin, OrderAction::Ship).await
    }

    #[instrument(skip(self))]
    pub async fn admin_refund(&self, order_no: &str) -> Result<OrderWithItems, ServiceError> {
        self.transition(order_no, Actor::Admin, OrderAction::Refund)
            .await
    }

    #[instrument(skip(self))]
    pub async fn admin_cancel(&self, order_no: &str) -> Result<OrderWithItems, ServiceError> {
        self.transition(order_no, Actor::Admin, OrderAction::AdminCancel)
            .await
    }

    /// Applies `action` on behalf of `actor`.
    pub async fn transition(
        &self,
        order_no: &str,
        actor: Actor,
        action: OrderAction,
    ) -> Result<OrderWithItems, ServiceError> {
        let result = self.try_transition(order_no, actor, action).await;
        match &result {
            Ok(_) => {
                metrics::ORDER_TRANSITIONS
                    .with_label_values(&[action.as_ref()])
                    .inc();
            }
            Err(e) => {
                if matches!(
                    e.kind(),
                    ErrorKind::Validation | ErrorKind::Precondition | ErrorKind::NotFound
                ) {
                    metrics::ORDER_TRANSITION_REJECTIONS
                        .with_label_values(&[action.as_ref()])
                        .inc();
                }
                warn!(%order_no, %action, error = %e, "Order transition rejected");
            }
        }
        result
    }

    async fn try_transition(
        &self,
        order_no: &str,
        actor: Actor,
        action: OrderAction,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.find_order(order_no).await?;
        match actor {
            Actor::User(_) if action.is_admin() => {
                return Err(ServiceError::Forbidden(format!(
                    "{} is an admin action",
                    action
                )));
            }
            Actor::User(user_id) if order.user_id != user_id => {
                return Err(ServiceError::Forbidden(format!(
                    "order {} does not belong to the caller",
                    order_no
                )));
            }
            Actor::Admin if !action.is_admin() => {
                return Err(ServiceError::Forbidden(format!(
                    "{} is a shopper action",
                    action
                )));
            }
            _ => {}
        }

        action.check(order.status)?;

        if action == OrderAction::Pay {
            let owner = self.accounts.find_user(order.user_id).await?;
            if owner.balance < order.total_amount {
                return Err(ServiceError::InsufficientBalance(format!(
                    "order total {} exceeds balance {}",
                    order.total_amount, owner.balance
                )));
            }
        }

        let items = self.load_items(order.id).await?;
        let policy = TransitionPolicy {
            admin_cancel_reverses_sales: self.settings.admin_cancel_reverses_sales,
        };
        let plan = order_status::plan(action, &order, &items, &policy);
        self.execute(&order, &plan).await?;

        info!(%order_no, %action, from = %order.status, to = %action.target(), "Order transitioned");
        self.publish(transition_event(action, &order)).await;

        let order = self.find_order(order_no).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Runs a plan. Failures up to the status write abort the transition;
    /// failures after it are logged and leave the new status in place.
    async fn execute(&self, order: &order::Model, plan: &TransitionPlan) -> Result<(), ServiceError> {
        let boundary = plan.boundary().unwrap_or(plan.steps.len());
        for (index, step) in plan.steps.iter().enumerate() {
            match self.apply_step(order, step).await {
                Ok(()) => {}
                Err(e) if index <= boundary => {
                    if index > 0 {
                        error!(order_no = %order.order_no, step = ?step, error = %e, "Transition aborted after partial writes");
                    }
                    return Err(e);
                }
                Err(e) => {
                    error!(order_no = %order.order_no, action = %plan.action, step = ?step, error = %e, "Best-effort transition step failed");
                }
            }
        }
        Ok(())
    }

    async fn apply_step(&self, order: &order::Model, step: &Step) -> Result<(), ServiceError> {
        match *step {
            Step::SetStatus { from, to, stamp } => self.swap_status(order, from, to, stamp).await,
            Step::AdjustBalance { user_id, delta } => {
                self.accounts.adjust_balance(user_id, delta).await
            }
            Step::AdjustStock { product_id, delta } => {
                self.inventory.adjust_stock(product_id, delta).await
            }
            Step::AdjustSales { product_id, delta } => {
                self.inventory.adjust_sales(product_id, delta).await
            }
        }
    }

    /// `UPDATE orders SET status = to WHERE id = ? AND status = from`.
    async fn swap_status(
        &self,
        order: &order::Model,
        from: OrderStatus,
        to: OrderStatus,
        stamp: Option<Stamp>,
    ) -> Result<(), ServiceError> {
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(to.code()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Status.eq(from.code()));
        if let Some(stamp) = stamp {
            let column = match stamp {
                Stamp::PaidAt => order::Column::PaidAt,
                Stamp::ShippedAt => order::Column::ShippedAt,
                Stamp::CompletedAt => order::Column::CompletedAt,
            };
            update = update.col_expr(column, Expr::value(Utc::now()));
        }

        let result = update.exec(&*self.db_pool).await.map_err(|e| {
            error!(error = %e, order_no = %order.order_no, "Failed to write order status");
            ServiceError::DatabaseError(e)
        })?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "order {} is no longer {}",
                order.order_no, from
            )));
        }
        Ok(())
    }

    /// Order with items for its owner.
    #[instrument(skip(self))]
    pub async fn get_for_user(
        &self,
        order_no: &str,
        user_id: i32,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.find_order(order_no).await?;
        if order.user_id != user_id {
            return Err(ServiceError::Forbidden(format!(
                "order {} does not belong to the caller",
                order_no
            )));
        }
        let items = self.load_items(order.id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Any order with items.
    #[instrument(skip(self))]
    pub async fn get(&self, order_no: &str) -> Result<OrderWithItems, ServiceError> {
        let order = self.find_order(order_no).await?;
        let items = self.load_items(order.id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// The user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: i32,
        page: u64,
        limit: u64,
        status: Option<OrderStatus>,
    ) -> Result<OrderPage, ServiceError> {
        let mut query = OrderEntity::find().filter(order::Column::UserId.eq(user_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.code()));
        }
        self.paginate(query, page, limit).await
    }

    /// All orders, newest first, for the admin console.
    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        page: u64,
        limit: u64,
        filter: OrderListFilter,
    ) -> Result<OrderPage, ServiceError> {
        let mut query = OrderEntity::find();
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status.code()));
        }
        if let Some(keyword) = filter
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            let owners = Query::select()
                .column(user::Column::Id)
                .from(user::Entity)
                .and_where(user::Column::Username.contains(keyword))
                .to_owned();
            query = query.filter(
                Condition::any()
                    .add(order::Column::OrderNo.contains(keyword))
                    .add(order::Column::UserId.in_subquery(owners)),
            );
        }
        self.paginate(query, page, limit).await
    }

    /// Order count and revenue over paid, unreversed orders.
    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<OrderStats, ServiceError> {
        let db = &*self.db_pool;
        let total_orders = OrderEntity::find().count(db).await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;

        let revenue_statuses: Vec<i32> = OrderStatus::iter()
            .filter(|s| s.counts_as_revenue())
            .map(OrderStatus::code)
            .collect();

        let revenue: Option<Option<Decimal>> = OrderEntity::find()
            .select_only()
            .column_as(order::Column::TotalAmount.sum(), "revenue")
            .filter(order::Column::Status.is_in(revenue_statuses))
            .into_tuple()
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to sum revenue");
                ServiceError::DatabaseError(e)
            })?;

        let grouped: Vec<(i32, i64)> = OrderEntity::find()
            .select_only()
            .column(order::Column::Status)
            .column_as(order::Column::Id.count(), "count")
            .group_by(order::Column::Status)
            .into_tuple()
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to count orders by status");
                ServiceError::DatabaseError(e)
            })?;
        let grouped: HashMap<i32, i64> = grouped.into_iter().collect();
        let by_status = OrderStatus::iter()
            .map(|status| {
                let count = grouped.get(&status.code()).copied().unwrap_or(0);
                (status, u64::try_from(count).unwrap_or(0))
            })
            .collect();

        let recent = self
            .list_all(1, RECENT_ORDERS_IN_STATS, OrderListFilter::default())
            .await?
            .orders;

        Ok(OrderStats {
            total_orders,
            revenue: revenue.flatten().unwrap_or_default().round_dp(2),
            by_status,
            recent,
        })
    }

    async fn paginate(
        &self,
        query: sea_orm::Select<OrderEntity>,
        page: u64,
        limit: u64,
    ) -> Result<OrderPage, ServiceError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db_pool, limit);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, page, limit, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        let ids: Vec<i32> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<i32, Vec<order_item::Model>> = HashMap::new();
        if !ids.is_empty() {
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.is_in(ids))
                .order_by_asc(order_item::Column::Id)
                .all(&*self.db_pool)
                .await
                .map_err(ServiceError::DatabaseError)?;
            for item in items {
                items_by_order.entry(item.order_id).or_default().push(item);
            }
        }

        let orders = orders
            .into_iter()
            .map(|order| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                OrderWithItems { order, items }
            })
            .collect();

        Ok(OrderPage {
            orders,
            total,
            page,
            limit,
        })
    }

    async fn find_order(&self, order_no: &str) -> Result<order::Model, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::OrderNo.eq(order_no))
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, %order_no, "Failed to fetch order");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_no)))
    }

    async fn load_items(&self, order_id: i32) -> Result<Vec<order_item::Model>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, order_id, "Failed to fetch order items");
                ServiceError::DatabaseError(e)
            })
    }

    async fn publish(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send order event");
            }
        }
    }
}

/// Event describing `action` applied to `before`.
fn transition_event(action: OrderAction, before: &order::Model) -> Event {
    let order_no = before.order_no.clone();
    let user_id = before.user_id;
    match action {
        OrderAction::Pay => Event::OrderPaid {
            order_no,
            user_id,
            amount: before.total_amount,
        },
        OrderAction::Cancel => Event::OrderCancelled {
            order_no,
            user_id,
            by_admin: false,
            refunded: None,
        },
        OrderAction::AdminCancel => Event::OrderCancelled {
            order_no,
            user_id,
            by_admin: true,
            refunded: (before.status == OrderStatus::Paid).then_some(before.total_amount),
        },
        OrderAction::Confirm => Event::OrderCompleted { order_no, user_id },
        OrderAction::Ship => Event::OrderShipped { order_no, user_id },
        OrderAction::Refund => Event::OrderRefunded {
            order_no,
            user_id,
            amount: before.total_amount,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{seed_address, seed_cart, seed_product, seed_user};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    struct Fixture {
        db: Arc<DatabaseConnection>,
        service: OrderService,
        user: user::Model,
        address_id: i32,
    }

    async fn fixture(balance: Decimal) -> Fixture {
        let db = Arc::new(crate::db::test_pool().await);
        let user = seed_user(&db, "hana", balance).await;
        let address = seed_address(&db, user.id).await;
        let service = OrderService::new(db.clone(), None, OrderSettings::default());
        Fixture {
            db,
            service,
            user,
            address_id: address.id,
        }
    }

    fn direct(address_id: i32, lines: &[(i32, i32)]) -> CreateOrderInput {
        CreateOrderInput {
            address_id,
            remark: None,
            source: OrderSource::Direct(
                lines
                    .iter()
                    .map(|&(product_id, quantity)| OrderLineRequest {
                        product_id,
                        quantity,
                    })
                    .collect(),
            ),
        }
    }

    async fn product(db: &DatabaseConnection, id: i32) -> product::Model {
        product::Entity::find_by_id(id).one(db).await.unwrap().unwrap()
    }

    async fn balance(db: &DatabaseConnection, id: i32) -> Decimal {
        user::Entity::find_by_id(id)
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    #[test]
    fn order_number_layout() {
        let now = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let no = generate_order_no("LS", now, &mut rng);
        assert_eq!(no.len(), 2 + 14 + 6);
        assert!(no.starts_with("LS20240301090507"));
    }

    proptest! {
        #[test]
        fn order_numbers_are_prefix_timestamp_and_six_digits(seed in any::<u64>(), secs in 0i64..4_000_000_000) {
            let now = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
                + chrono::Duration::seconds(secs);
            let mut rng = StdRng::seed_from_u64(seed);
            let no = generate_order_no("LS", now, &mut rng);
            prop_assert_eq!(no.len(), 22);
            prop_assert!(no[2..].chars().all(|c| c.is_ascii_digit()));
            prop_assert_eq!(&no[2..16], now.format("%Y%m%d%H%M%S").to_string());
        }
    }

    #[tokio::test]
    async fn direct_order_freezes_prices_and_decrements_stock() {
        let f = fixture(dec!(0)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;

        let created = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 3)]))
            .await
            .unwrap();

        assert_eq!(created.order.total_amount, dec!(30.00));
        assert_eq!(created.items_total(), created.order.total_amount);
        assert_eq!(created.order.status, OrderStatus::PendingPayment);
        assert_eq!(created.order.shipping_fee, Decimal::ZERO);
        assert_eq!(created.items[0].product_name, "Lamp");
        assert_eq!(
            created.items[0].product_image.as_deref(),
            Some("/img/Lamp.png")
        );
        assert_eq!(product(&f.db, lamp.id).await.stock, 2);

        let snapshot = AddressSnapshot::decode(&created.order.address_snapshot).unwrap();
        assert_eq!(snapshot.user_id, f.user.id);
    }

    #[tokio::test]
    async fn creation_rejections_write_nothing() {
        let f = fixture(dec!(0)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;

        let over = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 6)]))
            .await;
        assert!(matches!(over, Err(ServiceError::InsufficientStock(_))));

        // Duplicate lines are checked against stock together.
        let split = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 3), (lamp.id, 3)]))
            .await;
        assert!(matches!(split, Err(ServiceError::InsufficientStock(_))));

        let empty = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[]))
            .await;
        assert!(matches!(empty, Err(ServiceError::ValidationError(_))));

        let missing = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id + 99, 1)]))
            .await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));

        let stranger = seed_user(&f.db, "ivan", dec!(0)).await;
        let foreign_address = f
            .service
            .create_order(stranger.id, direct(f.address_id, &[(lamp.id, 1)]))
            .await;
        assert!(matches!(
            foreign_address,
            Err(ServiceError::ValidationError(_))
        ));

        assert_eq!(OrderEntity::find().count(&*f.db).await.unwrap(), 0);
        assert_eq!(product(&f.db, lamp.id).await.stock, 5);
    }

    #[tokio::test]
    async fn repeated_lines_near_i32_max_cannot_wrap_the_stock_check() {
        let f = fixture(dec!(0)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 10).await;

        let huge = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 10), (lamp.id, i32::MAX)]))
            .await;
        assert!(matches!(huge, Err(ServiceError::ValidationError(_))));

        let over_bound = f
            .service
            .create_order(
                f.user.id,
                direct(f.address_id, &[(lamp.id, MAX_LINE_QUANTITY + 1)]),
            )
            .await;
        assert!(matches!(over_bound, Err(ServiceError::ValidationError(_))));

        let at_bound = f
            .service
            .create_order(
                f.user.id,
                direct(f.address_id, &[(lamp.id, 10), (lamp.id, MAX_LINE_QUANTITY)]),
            )
            .await;
        assert!(matches!(at_bound, Err(ServiceError::InsufficientStock(_))));

        assert_eq!(OrderEntity::find().count(&*f.db).await.unwrap(), 0);
        assert_eq!(product(&f.db, lamp.id).await.stock, 10);
    }

    #[tokio::test]
    async fn unlisted_products_are_rejected() {
        let f = fixture(dec!(0)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let mut row: product::ActiveModel = lamp.clone().into();
        row.status = Set(product::ProductStatus::Unlisted);
        row.update(&*f.db).await.unwrap();

        let result = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 1)]))
            .await;
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn cart_checkout_clears_selected_rows() {
        let f = fixture(dec!(0)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let mug = seed_product(&f.db, "Mug", dec!(4.50), 5).await;
        seed_cart(&f.db, f.user.id, lamp.id, 2, true).await;
        seed_cart(&f.db, f.user.id, mug.id, 1, false).await;

        let created = f
            .service
            .create_order(
                f.user.id,
                CreateOrderInput {
                    address_id: f.address_id,
                    remark: Some("leave at door".into()),
                    source: OrderSource::Cart,
                },
            )
            .await
            .unwrap();

        assert_eq!(created.items.len(), 1);
        assert_eq!(created.order.total_amount, dec!(20.00));
        assert_eq!(created.order.remark.as_deref(), Some("leave at door"));
        let remaining = CartService::new(f.db.clone())
            .find_selected_by_user(f.user.id)
            .await
            .unwrap();
        assert!(remaining.is_empty());

        let again = f
            .service
            .create_order(
                f.user.id,
                CreateOrderInput {
                    address_id: f.address_id,
                    remark: None,
                    source: OrderSource::Cart,
                },
            )
            .await;
        assert!(matches!(again, Err(ServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn pay_then_full_lifecycle() {
        let f = fixture(dec!(100.00)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let order_no = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 3)]))
            .await
            .unwrap()
            .order
            .order_no;

        let paid = f.service.pay(&order_no, f.user.id).await.unwrap();
        assert_eq!(paid.order.status, OrderStatus::Paid);
        assert!(paid.order.paid_at.is_some());
        assert_eq!(balance(&f.db, f.user.id).await, dec!(70.00));
        assert_eq!(product(&f.db, lamp.id).await.sales, 3);

        let second = f.service.pay(&order_no, f.user.id).await;
        assert!(matches!(second, Err(ServiceError::InvalidStatus { .. })));
        assert_eq!(balance(&f.db, f.user.id).await, dec!(70.00));

        let shipped = f.service.admin_ship(&order_no).await.unwrap();
        assert!(shipped.order.shipped_at.is_some());

        let done = f.service.confirm_receipt(&order_no, f.user.id).await.unwrap();
        assert_eq!(done.order.status, OrderStatus::Completed);
        assert!(done.order.completed_at.is_some());

        for result in [
            f.service.cancel_by_user(&order_no, f.user.id).await,
            f.service.admin_refund(&order_no).await,
            f.service.admin_cancel(&order_no).await,
        ] {
            assert!(matches!(result, Err(ServiceError::InvalidStatus { .. })));
        }
    }

    #[tokio::test]
    async fn insufficient_balance_changes_nothing() {
        let f = fixture(dec!(20.00)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let order_no = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 3)]))
            .await
            .unwrap()
            .order
            .order_no;

        let result = f.service.pay(&order_no, f.user.id).await;
        assert!(matches!(result, Err(ServiceError::InsufficientBalance(_))));

        let order = f.service.get(&order_no).await.unwrap().order;
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert!(order.paid_at.is_none());
        assert_eq!(balance(&f.db, f.user.id).await, dec!(20.00));
    }

    #[tokio::test]
    async fn user_cancel_restores_stock() {
        let f = fixture(dec!(0)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let order_no = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 4)]))
            .await
            .unwrap()
            .order
            .order_no;
        assert_eq!(product(&f.db, lamp.id).await.stock, 1);

        let cancelled = f.service.cancel_by_user(&order_no, f.user.id).await.unwrap();
        assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
        assert_eq!(product(&f.db, lamp.id).await.stock, 5);
    }

    #[tokio::test]
    async fn refund_reverses_payment_and_inventory() {
        let f = fixture(dec!(50.00)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let order_no = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 3)]))
            .await
            .unwrap()
            .order
            .order_no;
        f.service.pay(&order_no, f.user.id).await.unwrap();

        let refunded = f.service.admin_refund(&order_no).await.unwrap();
        assert_eq!(refunded.order.status, OrderStatus::Refunded);
        assert_eq!(balance(&f.db, f.user.id).await, dec!(50.00));
        let lamp = product(&f.db, lamp.id).await;
        assert_eq!((lamp.stock, lamp.sales), (5, 0));
    }

    #[tokio::test]
    async fn admin_cancel_of_paid_order_keeps_sales_by_default() {
        let f = fixture(dec!(50.00)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let order_no = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 2)]))
            .await
            .unwrap()
            .order
            .order_no;
        f.service.pay(&order_no, f.user.id).await.unwrap();

        f.service.admin_cancel(&order_no).await.unwrap();
        assert_eq!(balance(&f.db, f.user.id).await, dec!(50.00));
        let lamp = product(&f.db, lamp.id).await;
        assert_eq!((lamp.stock, lamp.sales), (5, 2));
    }

    #[tokio::test]
    async fn admin_cancel_can_reverse_sales() {
        let f = fixture(dec!(50.00)).await;
        let service = OrderService::new(
            f.db.clone(),
            None,
            OrderSettings {
                admin_cancel_reverses_sales: true,
                ..OrderSettings::default()
            },
        );
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let order_no = service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 2)]))
            .await
            .unwrap()
            .order
            .order_no;
        service.pay(&order_no, f.user.id).await.unwrap();
        service.admin_cancel(&order_no).await.unwrap();

        let lamp = product(&f.db, lamp.id).await;
        assert_eq!((lamp.stock, lamp.sales), (5, 0));
    }

    #[tokio::test]
    async fn ship_requires_payment() {
        let f = fixture(dec!(0)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let order_no = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 1)]))
            .await
            .unwrap()
            .order
            .order_no;

        let result = f.service.admin_ship(&order_no).await;
        assert!(matches!(
            result,
            Err(ServiceError::InvalidStatus {
                current: Some(OrderStatus::PendingPayment),
                ..
            })
        ));
        let order = f.service.get(&order_no).await.unwrap().order;
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert!(order.shipped_at.is_none());
    }

    #[tokio::test]
    async fn ownership_is_enforced() {
        let f = fixture(dec!(100.00)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let order_no = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 1)]))
            .await
            .unwrap()
            .order
            .order_no;
        let other = seed_user(&f.db, "jun", dec!(100.00)).await;

        assert!(matches!(
            f.service.pay(&order_no, other.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.get_for_user(&order_no, other.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.get_for_user("LS0", f.user.id).await,
            Err(ServiceError::NotFound(_))
        ));

        // The owner still may not run an admin action on their own order.
        let own_ship = f
            .service
            .transition(&order_no, Actor::User(f.user.id), OrderAction::Ship)
            .await;
        match own_ship {
            Err(ServiceError::Forbidden(msg)) => assert!(msg.contains("is an admin action"), "{}", msg),
            other => panic!("expected forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stale_status_write_is_a_conflict() {
        let f = fixture(dec!(100.00)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 5).await;
        let created = f
            .service
            .create_order(f.user.id, direct(f.address_id, &[(lamp.id, 1)]))
            .await
            .unwrap();
        f.service.cancel_by_user(&created.order.order_no, f.user.id).await.unwrap();

        // The plan was built against the pending order, which has since moved.
        let stale = order_status::plan(
            OrderAction::Pay,
            &created.order,
            &created.items,
            &TransitionPolicy::default(),
        );
        let result = f.service.execute(&created.order, &stale).await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(balance(&f.db, f.user.id).await, dec!(100.00));
    }

    #[tokio::test]
    async fn listing_filters_and_stats() {
        let f = fixture(dec!(100.00)).await;
        let lamp = seed_product(&f.db, "Lamp", dec!(10.00), 50).await;
        let mut numbers = Vec::new();
        for qty in [1, 2, 3] {
            numbers.push(
                f.service
                    .create_order(f.user.id, direct(f.address_id, &[(lamp.id, qty)]))
                    .await
                    .unwrap()
                    .order
                    .order_no,
            );
        }
        f.service.pay(&numbers[0], f.user.id).await.unwrap();
        f.service.pay(&numbers[1], f.user.id).await.unwrap();
        f.service.admin_refund(&numbers[1]).await.unwrap();

        let mine = f.service.list_for_user(f.user.id, 1, 2, None).await.unwrap();
        assert_eq!(mine.total, 3);
        assert_eq!(mine.orders.len(), 2);
        assert!(mine.orders.iter().all(|o| !o.items.is_empty()));

        let pending = f
            .service
            .list_for_user(f.user.id, 1, 10, Some(OrderStatus::PendingPayment))
            .await
            .unwrap();
        assert_eq!(pending.total, 1);
        assert_eq!(pending.orders[0].order.order_no, numbers[2]);

        let by_name = f
            .service
            .list_all(
                1,
                10,
                OrderListFilter {
                    status: None,
                    keyword: Some("han".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(by_name.total, 3);

        let by_number = f
            .service
            .list_all(
                1,
                10,
                OrderListFilter {
                    status: None,
                    keyword: Some(numbers[0].clone()),
                },
            )
            .await
            .unwrap();
        assert_eq!(by_number.total, 1);

        let stats = f.service.stats().await.unwrap();
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.revenue, dec!(10.00));
        assert_eq!(stats.by_status.len(), OrderStatus::iter().count());
        let count_of = |wanted: OrderStatus| {
            stats
                .by_status
                .iter()
                .find(|(status, _)| *status == wanted)
                .map(|(_, n)| *n)
        };
        assert_eq!(count_of(OrderStatus::PendingPayment), Some(1));
        assert_eq!(count_of(OrderStatus::Paid), Some(1));
        assert_eq!(count_of(OrderStatus::Refunded), Some(1));
        assert_eq!(count_of(OrderStatus::Shipped), Some(0));
        let recent: Vec<&str> = stats
            .recent
            .iter()
            .map(|o| o.order.order_no.as_str())
            .collect();
        assert_eq!(recent, vec![numbers[2].as_str(), numbers[1].as_str(), numbers[0].as_str()]);
    }

    #[tokio::test]
    async fn events_are_published_for_each_step() {
        let db = Arc::new(crate::db::test_pool().await);
        let (tx, mut rx) = mpsc::channel(8);
        let service = OrderService::new(
            db.clone(),
            Some(Arc::new(EventSender::new(tx))),
            OrderSettings::default(),
        );
        let user = seed_user(&db, "kim", dec!(10.00)).await;
        let address = seed_address(&db, user.id).await;
        let lamp = seed_product(&db, "Lamp", dec!(10.00), 1).await;

        let order_no = service
            .create_order(user.id, direct(address.id, &[(lamp.id, 1)]))
            .await
            .unwrap()
            .order
            .order_no;
        service.pay(&order_no, user.id).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().name(), "order_created");
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::OrderPaid {
                order_no,
                user_id: user.id,
                amount: dec!(10.00)
            }
        );
    }
}

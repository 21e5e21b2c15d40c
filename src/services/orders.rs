use crate::{
    auth::AuthUser,
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel},
        order::{OrderStatus, PaymentMethod},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        shop,
        user::{self, Role},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        agents::{AgentService, GeoPoint},
        catalog::CatalogService,
        order_status::{release_policy, AgentRelease},
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Select,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// One requested line of a new order
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    #[serde(alias = "product")]
    pub product_id: Uuid,
    /// Display name snapshot; the catalog name is used when omitted
    #[serde(default)]
    pub name: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String, example = "10.00")]
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    #[validate(custom = "not_blank")]
    pub street: String,
    #[validate(custom = "not_blank")]
    pub city: String,
    #[serde(alias = "pincode")]
    #[validate(custom = "not_blank")]
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
}

impl DeliveryAddress {
    fn from_model(model: &OrderModel) -> Self {
        Self {
            street: model.delivery_street.clone(),
            city: model.delivery_city.clone(),
            postal_code: model.delivery_postal_code.clone(),
            geo: GeoPoint::from_parts(model.delivery_lat, model.delivery_lng),
        }
    }
}

/// Request body for placing an order. Any client-supplied total is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(alias = "shop")]
    pub shop_id: Uuid,
    #[validate(custom = "validate_items")]
    pub items: Vec<OrderItemInput>,
    #[validate]
    pub delivery_address: DeliveryAddress,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    #[validate(length(min = 1, message = "status is required"))]
    #[schema(example = "out_for_delivery")]
    pub status: String,
}

/// Admin listing filters; all optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct OrderListFilter {
    pub status: Option<OrderStatus>,
    pub shop_id: Option<Uuid>,
    /// Inclusive lower bound on placement time (RFC 3339)
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on placement time (RFC 3339)
    pub date_to: Option<DateTime<Utc>>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

impl From<OrderItemModel> for OrderItemResponse {
    fn from(item: OrderItemModel) -> Self {
        let line_total = item.line_total();
        Self {
            product_id: item.product_id,
            name: item.name,
            quantity: item.quantity,
            price: item.unit_price,
            line_total,
        }
    }
}

/// Name/contact summary of a related party. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PartySummary {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShopSummary {
    pub id: Uuid,
    pub name: String,
}

impl From<&shop::Model> for ShopSummary {
    fn from(shop: &shop::Model) -> Self {
        Self {
            id: shop.id,
            name: shop.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub shop_id: Uuid,
    pub delivery_agent_id: Option<Uuid>,
    pub items: Vec<OrderItemResponse>,
    #[schema(value_type = String, example = "25.00")]
    pub total_amount: Decimal,
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<PartySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop: Option<ShopSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<PartySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub items: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackingAgent {
    pub name: String,
    pub phone: Option<String>,
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub delivery_address: DeliveryAddress,
    pub shop: Option<ShopSummary>,
    pub agent: Option<TrackingAgent>,
    pub placed_at: DateTime<Utc>,
}

/// Money columns are NUMERIC(12, 2).
const MONEY_SCALE: u32 = 2;
const MAX_AMOUNT: Decimal = dec!(9999999999.99);

/// Which related parties a view fills in.
#[derive(Debug, Clone, Copy, Default)]
struct Populate {
    customer: bool,
    shop: bool,
    agent: bool,
}

/// Sums quantity × unit price, or `None` on overflow.
pub fn compute_total<I>(lines: I) -> Option<Decimal>
where
    I: IntoIterator<Item = (i32, Decimal)>,
{
    lines.into_iter().try_fold(Decimal::ZERO, |acc, (qty, price)| {
        price
            .checked_mul(Decimal::from(qty))
            .and_then(|line| acc.checked_add(line))
    })
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

fn validate_items(items: &[OrderItemInput]) -> Result<(), ValidationError> {
    if items.is_empty() {
        let mut err = ValidationError::new("items_required");
        err.message = Some("Order must contain at least one item".into());
        return Err(err);
    }
    if items.iter().any(|item| item.quantity < 1) {
        let mut err = ValidationError::new("quantity");
        err.message = Some("Each item quantity must be at least 1".into());
        return Err(err);
    }
    if items.iter().any(|item| item.price.is_sign_negative() && !item.price.is_zero()) {
        let mut err = ValidationError::new("price");
        err.message = Some("Each item price must be zero or greater".into());
        return Err(err);
    }
    if items.iter().any(|item| item.price.normalize().scale() > MONEY_SCALE) {
        let mut err = ValidationError::new("price");
        err.message = Some("Each item price must have at most two decimal places".into());
        return Err(err);
    }
    let within_range = |amount: Option<Decimal>| amount.is_some_and(|a| a <= MAX_AMOUNT);
    if !items
        .iter()
        .all(|item| within_range(compute_total([(item.quantity, item.price)])))
    {
        let mut err = ValidationError::new("line_total");
        err.message = Some(format!("Each line total must not exceed {}", MAX_AMOUNT).into());
        return Err(err);
    }
    if !within_range(compute_total(items.iter().map(|i| (i.quantity, i.price)))) {
        let mut err = ValidationError::new("total");
        err.message = Some(format!("Order total must not exceed {}", MAX_AMOUNT).into());
        return Err(err);
    }
    Ok(())
}

/// Order workflow: placement with agent assignment, status changes, views and tracking.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    agents: AgentService,
    catalog: CatalogService,
    config: Arc<AppConfig>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        agents: AgentService,
        catalog: CatalogService,
        config: Arc<AppConfig>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            agents,
            catalog,
            config,
            event_sender,
        }
    }

    /// Places an order for the calling customer and assigns it a delivery agent.
    ///
    /// The agent claim, the order row and its items are written in one
    /// transaction; on any failure nothing is persisted and the agent stays
    /// available.
    #[instrument(skip(self, caller, request), fields(customer_id = %caller.user_id, shop_id = %request.shop_id))]
    pub async fn create_order(
        &self,
        caller: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        if !caller.has_role(Role::Customer) {
            return Err(ServiceError::Forbidden(
                "Only customers can place orders".to_string(),
            ));
        }
        request.validate()?;

        let db = &*self.db_pool;

        let shop = self.catalog.get_shop(request.shop_id).await?.ok_or_else(|| {
            ServiceError::InvalidInput(format!("Shop {} does not exist", request.shop_id))
        })?;

        let product_ids: Vec<Uuid> = request.items.iter().map(|i| i.product_id).collect();
        let products = self
            .catalog
            .shop_products(db, shop.id, &product_ids)
            .await?;

        for item in &request.items {
            if !products.contains_key(&item.product_id) {
                return Err(ServiceError::InvalidInput(format!(
                    "Product {} does not belong to shop {}",
                    item.product_id, shop.id
                )));
            }
        }

        let total = compute_total(request.items.iter().map(|i| (i.quantity, i.price)))
            .ok_or_else(|| ServiceError::InvalidInput("Order total is out of range".to_string()))?;

        let order_id = Uuid::new_v4();
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let agent = match self.agents.claim_available_agent(&txn).await {
            Ok(agent) => agent,
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    error!(error = %rb, "Failed to roll back after agent claim failure");
                }
                if matches!(e, ServiceError::NoAgentAvailable) {
                    warn!(%order_id, "No delivery agent available; order rejected");
                }
                return Err(e);
            }
        };

        let address = request.delivery_address;
        let order_model = OrderActiveModel {
            id: Set(order_id),
            customer_id: Set(caller.user_id),
            shop_id: Set(shop.id),
            delivery_agent_id: Set(Some(agent.id)),
            total_amount: Set(total),
            delivery_street: Set(address.street.trim().to_string()),
            delivery_city: Set(address.city.trim().to_string()),
            delivery_postal_code: Set(address.postal_code.trim().to_string()),
            delivery_lat: Set(address.geo.map(|g| g.lat)),
            delivery_lng: Set(address.geo.map(|g| g.lng)),
            payment_method: Set(request.payment_method.unwrap_or_default()),
            status: Set(OrderStatus::Pending),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, %order_id, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        let items: Vec<OrderItemModel> = request
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let name = item
                    .name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .or_else(|| products.get(&item.product_id).map(|p| p.name.clone()))
                    .unwrap_or_default();
                OrderItemModel {
                    id: Uuid::new_v4(),
                    order_id,
                    position: position as i32,
                    product_id: item.product_id,
                    name,
                    quantity: item.quantity,
                    unit_price: item.price,
                }
            })
            .collect();

        let item_models: Vec<order_item::ActiveModel> = items
            .iter()
            .map(|item| order_item::ActiveModel {
                id: Set(item.id),
                order_id: Set(item.order_id),
                position: Set(item.position),
                product_id: Set(item.product_id),
                name: Set(item.name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
            })
            .collect();
        OrderItemEntity::insert_many(item_models)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, %order_id, "Failed to insert order items");
                ServiceError::DatabaseError(e)
            })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        counter!("dispatch.orders.created", 1);
        info!(%order_id, agent_id = %agent.id, total = %total, "Order created and agent assigned");

        self.publish(Event::OrderCreated {
            order_id,
            customer_id: caller.user_id,
            shop_id: shop.id,
        })
        .await;
        self.publish(Event::AgentAssigned {
            order_id,
            agent_id: agent.id,
        })
        .await;

        Ok(model_to_response(order_model, items))
    }

    /// Moves an order to a new status, releasing the agent when the order finishes.
    ///
    /// The status write is committed before the release is attempted; a failed
    /// release is reported as `AgentReleaseFailed` with the new status kept.
    /// Reopening a finished order binds its agent again, or fails with
    /// `Conflict` when the agent already serves another live order.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id, role = %caller.role))]
    pub async fn update_status(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let order = self.find_order(order_id).await?;

        let authorized = match caller.role {
            Role::Admin => true,
            Role::Delivery => order.delivery_agent_id == Some(caller.user_id),
            Role::Customer | Role::Shop => false,
        };
        if !authorized {
            warn!(%order_id, "Caller may not update this order's status");
            return Err(ServiceError::Forbidden(
                "Not authorized to update this order".to_string(),
            ));
        }

        let next = OrderStatus::from_str(new_status.trim()).map_err(|_| {
            ServiceError::InvalidStatus(format!(
                "'{}' is not one of: pending, accepted, out_for_delivery, delivered, cancelled",
                new_status
            ))
        })?;

        let previous = order.status;
        if !previous.can_transition_to(next) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition from '{}' to '{}'",
                previous, next
            )));
        }

        let agent_id = order.delivery_agent_id;
        let reopening = previous.is_terminal() && !next.is_terminal();
        let mut active: OrderActiveModel = order.into();
        active.status = Set(next);

        let updated = match agent_id.filter(|_| reopening) {
            Some(agent_id) => self.reopen(order_id, active, agent_id).await?,
            None => active.update(db).await.map_err(|e| {
                error!(error = %e, %order_id, "Failed to update order status");
                ServiceError::DatabaseError(e)
            })?,
        };

        info!(%order_id, old_status = %previous, new_status = %next, "Order status updated");
        self.publish(Event::OrderStatusChanged {
            order_id,
            old_status: previous,
            new_status: next,
        })
        .await;

        if let (AgentRelease::Release, Some(agent_id)) = (
            release_policy(next, self.config.release_agent_on_cancel),
            agent_id,
        ) {
            if let Err(e) = self.agents.release_agent(order_id, agent_id).await {
                error!(error = %e, %order_id, %agent_id, "Status committed but agent release failed");
                counter!("dispatch.agent.release_failures", 1);
                return Err(ServiceError::AgentReleaseFailed {
                    order_id,
                    agent_id,
                    reason: e.to_string(),
                });
            }
        }

        let items = self.load_items(&[order_id]).await?.remove(&order_id).unwrap_or_default();
        Ok(model_to_response(updated, items))
    }

    /// Writes a terminal order back to a live status together with re-binding its agent.
    async fn reopen(
        &self,
        order_id: Uuid,
        active: OrderActiveModel,
        agent_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let result = match self.agents.reclaim_agent(&txn, order_id, agent_id).await {
            Ok(()) => active.update(&txn).await.map_err(ServiceError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(updated) => {
                txn.commit().await?;
                info!(%order_id, %agent_id, "Order reopened with its agent");
                Ok(updated)
            }
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    error!(error = %rb, %order_id, "Failed to roll back order reopen");
                }
                Err(e)
            }
        }
    }

    /// Every order, newest first, filtered and paginated. Admin only.
    #[instrument(skip(self, caller))]
    pub async fn list_all_orders(
        &self,
        caller: &AuthUser,
        filter: OrderListFilter,
    ) -> Result<OrderPage, ServiceError> {
        if !caller.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only admins can list all orders".to_string(),
            ));
        }

        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(ServiceError::InvalidInput(
                    "dateFrom must not be after dateTo".to_string(),
                ));
            }
        }

        let page = filter.page.unwrap_or(1).max(1);
        let limit = self.config.effective_page_size(filter.limit);
        let in_range = (page - 1)
            .checked_mul(limit)
            .is_some_and(|offset| i64::try_from(offset).is_ok());
        if !in_range {
            return Err(ServiceError::InvalidInput(format!(
                "page {} is out of range for limit {}",
                page, limit
            )));
        }

        let mut query = OrderEntity::find();
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(shop_id) = filter.shop_id {
            query = query.filter(order::Column::ShopId.eq(shop_id));
        }
        if let Some(from) = filter.date_from {
            query = query.filter(order::Column::CreatedAt.gte(from));
        }
        if let Some(to) = filter.date_to {
            query = query.filter(order::Column::CreatedAt.lte(to));
        }

        let paginator = newest_first(query).paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let items = self
            .populate(
                orders,
                Populate {
                    customer: true,
                    shop: true,
                    agent: true,
                },
            )
            .await?;

        Ok(OrderPage {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    /// Orders placed by the calling customer.
    #[instrument(skip(self, caller), fields(customer_id = %caller.user_id))]
    pub async fn list_my_orders(
        &self,
        caller: &AuthUser,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        if !caller.has_role(Role::Customer) {
            return Err(ServiceError::Forbidden(
                "Only customers have placed orders".to_string(),
            ));
        }

        let orders = newest_first(
            OrderEntity::find().filter(order::Column::CustomerId.eq(caller.user_id)),
        )
        .all(&*self.db_pool)
        .await?;

        self.populate(
            orders,
            Populate {
                shop: true,
                agent: true,
                ..Default::default()
            },
        )
        .await
    }

    /// Orders assigned to the calling delivery agent.
    #[instrument(skip(self, caller), fields(agent_id = %caller.user_id))]
    pub async fn list_assigned_orders(
        &self,
        caller: &AuthUser,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        if !caller.has_role(Role::Delivery) {
            return Err(ServiceError::Forbidden(
                "Only delivery agents have assigned orders".to_string(),
            ));
        }

        let orders = newest_first(
            OrderEntity::find().filter(order::Column::DeliveryAgentId.eq(caller.user_id)),
        )
        .all(&*self.db_pool)
        .await?;

        self.populate(
            orders,
            Populate {
                customer: true,
                shop: true,
                ..Default::default()
            },
        )
        .await
    }

    /// Tracking view for the owning customer, the assigned agent, or an admin.
    #[instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn track_order(
        &self,
        caller: &AuthUser,
        order_id: Uuid,
    ) -> Result<TrackingResponse, ServiceError> {
        let order = self.find_order(order_id).await?;

        let allowed = match caller.role {
            Role::Admin => true,
            Role::Customer => order.customer_id == caller.user_id,
            Role::Delivery => order.delivery_agent_id == Some(caller.user_id),
            Role::Shop => false,
        };
        if !allowed {
            return Err(ServiceError::Forbidden(
                "Not authorized to track this order".to_string(),
            ));
        }

        let shop = self.catalog.get_shop(order.shop_id).await?;
        let agent = match order.delivery_agent_id {
            Some(agent_id) => user::Entity::find_by_id(agent_id)
                .one(&*self.db_pool)
                .await?
                .map(|a| TrackingAgent {
                    location: GeoPoint::from_parts(a.current_lat, a.current_lng),
                    name: a.name,
                    phone: a.phone,
                }),
            None => None,
        };

        Ok(TrackingResponse {
            order_id: order.id,
            status: order.status,
            total_amount: order.total_amount,
            delivery_address: DeliveryAddress::from_model(&order),
            shop: shop.as_ref().map(ShopSummary::from),
            agent,
            placed_at: order.created_at,
        })
    }

    async fn find_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, %order_id, "Failed to fetch order");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn load_items(
        &self,
        order_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<OrderItemModel>>, ServiceError> {
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids.iter().copied()))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db_pool)
            .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
        for row in rows {
            grouped.entry(row.order_id).or_default().push(row);
        }
        Ok(grouped)
    }

    /// Attaches items and the requested party summaries, batching lookups per view.
    async fn populate(
        &self,
        orders: Vec<OrderModel>,
        populate: Populate,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items = self.load_items(&order_ids).await?;

        let mut user_ids = HashSet::new();
        for o in &orders {
            if populate.customer {
                user_ids.insert(o.customer_id);
            }
            if populate.agent {
                if let Some(agent_id) = o.delivery_agent_id {
                    user_ids.insert(agent_id);
                }
            }
        }
        let users = self.agents.users_by_ids(user_ids).await?;

        let shops = if populate.shop {
            let shop_ids: HashSet<Uuid> = orders.iter().map(|o| o.shop_id).collect();
            self.catalog.shops_by_ids(shop_ids).await?
        } else {
            HashMap::new()
        };

        Ok(orders
            .into_iter()
            .map(|o| {
                let customer = populate
                    .customer
                    .then(|| users.get(&o.customer_id))
                    .flatten()
                    .map(|u| PartySummary {
                        id: u.id,
                        name: u.name.clone(),
                        email: Some(u.email.clone()),
                        phone: None,
                    });
                let agent = populate
                    .agent
                    .then(|| o.delivery_agent_id.and_then(|id| users.get(&id)))
                    .flatten()
                    .map(|u| PartySummary {
                        id: u.id,
                        name: u.name.clone(),
                        email: None,
                        phone: u.phone.clone(),
                    });
                let shop = shops.get(&o.shop_id).map(ShopSummary::from);
                let order_items = items.remove(&o.id).unwrap_or_default();

                let mut response = model_to_response(o, order_items);
                response.customer = customer;
                response.agent = agent;
                response.shop = shop;
                response
            })
            .collect())
    }

    async fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

fn newest_first(query: Select<OrderEntity>) -> Select<OrderEntity> {
    query
        .order_by_desc(order::Column::CreatedAt)
        .order_by_desc(order::Column::Id)
}

fn model_to_response(model: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
    OrderResponse {
        delivery_address: DeliveryAddress::from_model(&model),
        id: model.id,
        customer_id: model.customer_id,
        shop_id: model.shop_id,
        delivery_agent_id: model.delivery_agent_id,
        items: items.into_iter().map(OrderItemResponse::from).collect(),
        total_amount: model.total_amount,
        payment_method: model.payment_method,
        status: model.status,
        created_at: model.created_at,
        updated_at: model.updated_at,
        customer: None,
        shop: None,
        agent: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request_json(items: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "shopId": Uuid::new_v4(),
            "items": items,
            "deliveryAddress": {"street": "1 Main St", "city": "Pune", "postalCode": "411001"},
        })
    }

    #[test]
    fn scenario_total_is_twenty_five() {
        let total = compute_total(vec![(2, dec!(10)), (1, dec!(5))]).unwrap();
        assert_eq!(total, dec!(25));
    }

    #[test]
    fn empty_order_totals_zero() {
        assert_eq!(compute_total(Vec::new()), Some(Decimal::ZERO));
    }

    #[test]
    fn overflowing_total_is_none() {
        assert_eq!(compute_total(vec![(i32::MAX, Decimal::MAX)]), None);
    }

    #[test]
    fn client_total_is_ignored_on_deserialize() {
        let mut body = request_json(serde_json::json!([
            {"productId": Uuid::new_v4(), "quantity": 2, "price": 10}
        ]));
        body["totalAmount"] = serde_json::json!(1);
        let req: CreateOrderRequest = serde_json::from_value(body).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.payment_method, None);
    }

    #[test]
    fn legacy_field_names_are_accepted() {
        let body = serde_json::json!({
            "shop": Uuid::new_v4(),
            "items": [{"product": Uuid::new_v4(), "quantity": 1, "price": "4.50"}],
            "deliveryAddress": {"street": "s", "city": "c", "pincode": "p"},
            "paymentMethod": "card"
        });
        let req: CreateOrderRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.payment_method, Some(PaymentMethod::Card));
        assert_eq!(req.delivery_address.postal_code, "p");
    }

    #[test]
    fn validation_rejects_bad_items_and_blank_address() {
        let empty: CreateOrderRequest =
            serde_json::from_value(request_json(serde_json::json!([]))).unwrap();
        assert!(empty.validate().is_err());

        let zero_qty: CreateOrderRequest = serde_json::from_value(request_json(
            serde_json::json!([{"productId": Uuid::new_v4(), "quantity": 0, "price": 1}]),
        ))
        .unwrap();
        assert!(zero_qty.validate().is_err());

        let negative: CreateOrderRequest = serde_json::from_value(request_json(
            serde_json::json!([{"productId": Uuid::new_v4(), "quantity": 1, "price": -1}]),
        ))
        .unwrap();
        assert!(negative.validate().is_err());

        let mut blank: CreateOrderRequest = serde_json::from_value(request_json(
            serde_json::json!([{"productId": Uuid::new_v4(), "quantity": 1, "price": 0}]),
        ))
        .unwrap();
        assert!(blank.validate().is_ok());
        blank.delivery_address.city = "   ".into();
        assert!(blank.validate().is_err());
    }

    fn single_item(quantity: i32, price: &str) -> CreateOrderRequest {
        serde_json::from_value(request_json(serde_json::json!([
            {"productId": Uuid::new_v4(), "quantity": quantity, "price": price}
        ])))
        .unwrap()
    }

    #[test]
    fn prices_beyond_cents_are_rejected() {
        assert!(single_item(3, "0.005").validate().is_err());
        assert!(single_item(3, "0.01").validate().is_ok());
        assert!(single_item(3, "10.500").validate().is_ok());
    }

    #[test]
    fn amounts_beyond_storage_range_are_rejected() {
        assert!(single_item(1000, "10000000000").validate().is_err());
        assert!(single_item(1, "9999999999.99").validate().is_ok());
        assert!(single_item(2, "9999999999.99").validate().is_err());

        let two_lines: CreateOrderRequest = serde_json::from_value(request_json(serde_json::json!([
            {"productId": Uuid::new_v4(), "quantity": 1, "price": "6000000000"},
            {"productId": Uuid::new_v4(), "quantity": 1, "price": "6000000000"}
        ])))
        .unwrap();
        let err = ServiceError::from(two_lines.validate().unwrap_err());
        assert_eq!(err.code(), "invalid_input");
        assert!(err.to_string().contains("Order total"));
    }

    #[test]
    fn model_to_response_flattens_address_and_items() {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let model = OrderModel {
            id: order_id,
            customer_id: Uuid::new_v4(),
            shop_id: Uuid::new_v4(),
            delivery_agent_id: Some(Uuid::new_v4()),
            total_amount: dec!(25),
            delivery_street: "1 Main St".into(),
            delivery_city: "Pune".into(),
            delivery_postal_code: "411001".into(),
            delivery_lat: Some(18.5),
            delivery_lng: Some(73.8),
            payment_method: PaymentMethod::Cod,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: Some(now),
        };
        let items = vec![OrderItemModel {
            id: Uuid::new_v4(),
            order_id,
            position: 0,
            product_id: Uuid::new_v4(),
            name: "Tea".into(),
            quantity: 2,
            unit_price: dec!(10),
        }];

        let response = model_to_response(model, items);
        assert_eq!(response.items[0].line_total, dec!(20));
        assert_eq!(
            response.delivery_address.geo,
            Some(GeoPoint { lat: 18.5, lng: 73.8 })
        );

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["paymentMethod"], "cod");
        assert_eq!(json["deliveryAddress"]["postalCode"], "411001");
        assert!(json.get("customer").is_none());
    }

    proptest! {
        #[test]
        fn total_matches_line_sum(
            lines in prop::collection::vec((1i32..1_000, 0i64..1_000_000), 1..20)
        ) {
            let priced: Vec<(i32, Decimal)> = lines
                .iter()
                .map(|(q, cents)| (*q, Decimal::new(*cents, 2)))
                .collect();
            let expected: Decimal = priced
                .iter()
                .map(|(q, p)| *p * Decimal::from(*q))
                .sum();
            prop_assert_eq!(compute_total(priced.clone()), Some(expected));

            let mut reversed = priced;
            reversed.reverse();
            prop_assert_eq!(compute_total(reversed), Some(expected));
        }
    }
}

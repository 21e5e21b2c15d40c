use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, Order as SortOrder, Query, UpdateStatement},
    ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, Select,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::{
        order::{self, OrderStatus},
        user::{self, Role},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Upper bound on claim rounds when other requests keep winning the race.
const MAX_CLAIM_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self { lat, lng }),
            _ => None,
        }
    }
}

/// Directory record of a delivery agent, without any credential material.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub vehicle_details: Option<String>,
    pub is_available: bool,
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for AgentResponse {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            phone: model.phone,
            vehicle_details: model.vehicle_details,
            is_available: model.is_available,
            location: GeoPoint::from_parts(model.current_lat, model.current_lng),
            created_at: model.created_at,
        }
    }
}

/// Identity directory operations for delivery agents.
#[derive(Clone)]
pub struct AgentService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl AgentService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Claims the longest-registered available agent, marking it unavailable.
    ///
    /// Runs on the caller's connection so the claim commits or rolls back with
    /// the order that needs it. Candidate selection and the flag flip are one
    /// `UPDATE … WHERE id IN (SELECT … LIMIT 1) AND is_available RETURNING *`,
    /// so the claim is the transaction's first statement and takes the write
    /// lock before reading. No row back while an available agent still exists
    /// means a concurrent claim won that agent; the next one is tried.
    pub async fn claim_available_agent<C>(&self, conn: &C) -> Result<user::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        let backend = conn.get_database_backend();

        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let now = Utc::now();
            let claim = claim_statement(now);
            if let Some(row) = conn.query_one(backend.build(&claim)).await? {
                let agent = user::Model::from_query_result(&row, "")?;
                debug!(agent_id = %agent.id, attempt, "Claimed delivery agent");
                return Ok(agent);
            }

            let remaining = available_agents().count(conn).await?;
            if remaining == 0 {
                counter!("dispatch.agent_claim.none_available", 1);
                return Err(ServiceError::NoAgentAvailable);
            }

            debug!(attempt, remaining, "Agent claimed concurrently, retrying");
        }

        warn!(
            attempts = MAX_CLAIM_ATTEMPTS,
            "Gave up claiming a delivery agent under contention"
        );
        counter!("dispatch.agent_claim.contention_exhausted", 1);
        Err(ServiceError::NoAgentAvailable)
    }

    /// Binds the agent of a reopened order again.
    ///
    /// A free agent is flipped to unavailable. An agent that is already
    /// unavailable is fine as long as no other non-terminal order holds it;
    /// otherwise reopening would double-book the agent and is refused.
    pub async fn reclaim_agent<C>(
        &self,
        conn: &C,
        order_id: Uuid,
        agent_id: Uuid,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let result = user::Entity::update_many()
            .col_expr(user::Column::IsAvailable, Expr::value(false))
            .col_expr(user::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(user::Column::Id.eq(agent_id))
            .filter(user::Column::IsAvailable.eq(true))
            .exec(conn)
            .await?;
        if result.rows_affected == 1 {
            info!(%order_id, %agent_id, "Delivery agent bound again to reopened order");
            return Ok(());
        }

        let other_active = self
            .active_order_count(conn, agent_id, Some(order_id))
            .await?;
        if other_active > 0 {
            return Err(ServiceError::Conflict(format!(
                "Agent {} is busy with {} other order(s); order cannot be reopened",
                agent_id, other_active
            )));
        }
        Ok(())
    }

    /// Marks the agent of a finished order available again.
    ///
    /// Returns `Ok(false)` without writing when the agent record is gone.
    #[instrument(skip(self))]
    pub async fn release_agent(&self, order_id: Uuid, agent_id: Uuid) -> Result<bool, ServiceError> {
        let result = user::Entity::update_many()
            .col_expr(user::Column::IsAvailable, Expr::value(true))
            .col_expr(user::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(user::Column::Id.eq(agent_id))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            warn!(%order_id, %agent_id, "Assigned agent no longer exists; skipping release");
            return Ok(false);
        }

        counter!("dispatch.agent.released", 1);
        info!(%order_id, %agent_id, "Delivery agent released");
        self.publish(Event::AgentReleased { order_id, agent_id })
            .await;
        Ok(true)
    }

    /// The caller's own directory record.
    #[instrument(skip(self, caller), fields(agent_id = %caller.user_id))]
    pub async fn agent_profile(&self, caller: &AuthUser) -> Result<AgentResponse, ServiceError> {
        ensure_delivery(caller)?;
        let agent = self.find_agent(caller.user_id).await?;
        Ok(agent.into())
    }

    /// Flips the caller's availability flag.
    ///
    /// Going available is refused while a non-terminal order still references the agent.
    #[instrument(skip(self, caller), fields(agent_id = %caller.user_id))]
    pub async fn toggle_availability(
        &self,
        caller: &AuthUser,
    ) -> Result<AgentResponse, ServiceError> {
        ensure_delivery(caller)?;
        let db = &*self.db_pool;
        let agent = self.find_agent(caller.user_id).await?;
        let next = !agent.is_available;

        if next {
            let active = self.active_order_count(db, agent.id, None).await?;
            if active > 0 {
                return Err(ServiceError::Conflict(format!(
                    "Agent has {} active order(s) and cannot become available",
                    active
                )));
            }
        }

        let now = Utc::now();
        let result = user::Entity::update_many()
            .col_expr(user::Column::IsAvailable, Expr::value(next))
            .col_expr(user::Column::UpdatedAt, Expr::value(Some(now)))
            .filter(user::Column::Id.eq(agent.id))
            .filter(user::Column::IsAvailable.eq(agent.is_available))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Availability changed concurrently; retry".to_string(),
            ));
        }

        info!(agent_id = %agent.id, is_available = next, "Agent availability toggled");
        self.publish(Event::AgentAvailabilityChanged {
            agent_id: agent.id,
            is_available: next,
        })
        .await;

        Ok(user::Model {
            is_available: next,
            updated_at: Some(now),
            ..agent
        }
        .into())
    }

    /// Every delivery agent, oldest first.
    #[instrument(skip(self))]
    pub async fn list_agents(&self) -> Result<Vec<AgentResponse>, ServiceError> {
        let agents = user::Entity::find()
            .filter(user::Column::Role.eq(Role::Delivery))
            .order_by_asc(user::Column::CreatedAt)
            .order_by_asc(user::Column::Id)
            .all(&*self.db_pool)
            .await?;
        Ok(agents.into_iter().map(AgentResponse::from).collect())
    }

    /// Batch lookup used when populating order views.
    pub async fn users_by_ids(
        &self,
        ids: impl IntoIterator<Item = Uuid>,
    ) -> Result<HashMap<Uuid, user::Model>, ServiceError> {
        let ids: Vec<Uuid> = ids.into_iter().collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let users = user::Entity::find()
            .filter(user::Column::Id.is_in(ids))
            .all(&*self.db_pool)
            .await?;
        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }

    async fn find_agent(&self, agent_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(agent_id)
            .filter(user::Column::Role.eq(Role::Delivery))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Delivery agent {} not found", agent_id)))
    }

    async fn active_order_count<C>(
        &self,
        conn: &C,
        agent_id: Uuid,
        excluding: Option<Uuid>,
    ) -> Result<u64, ServiceError>
    where
        C: ConnectionTrait,
    {
        let mut query = order::Entity::find()
            .filter(order::Column::DeliveryAgentId.eq(agent_id))
            .filter(order::Column::Status.is_not_in(OrderStatus::terminal()));
        if let Some(order_id) = excluding {
            query = query.filter(order::Column::Id.ne(order_id));
        }
        Ok(query.count(conn).await?)
    }

    async fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }
}

fn available_agents() -> Select<user::Entity> {
    user::Entity::find()
        .filter(user::Column::Role.eq(Role::Delivery))
        .filter(user::Column::IsAvailable.eq(true))
}

fn claim_statement(now: DateTime<Utc>) -> UpdateStatement {
    let candidate = Query::select()
        .column(user::Column::Id)
        .from(user::Entity)
        .and_where(user::Column::Role.eq(Role::Delivery))
        .and_where(user::Column::IsAvailable.eq(true))
        .order_by(user::Column::CreatedAt, SortOrder::Asc)
        .order_by(user::Column::Id, SortOrder::Asc)
        .limit(1)
        .to_owned();

    Query::update()
        .table(user::Entity)
        .values([
            (user::Column::IsAvailable, false.into()),
            (user::Column::UpdatedAt, Some(now).into()),
        ])
        .and_where(user::Column::Id.in_subquery(candidate))
        .and_where(user::Column::IsAvailable.eq(true))
        .returning_all()
        .to_owned()
}

fn ensure_delivery(caller: &AuthUser) -> Result<(), ServiceError> {
    if caller.has_role(Role::Delivery) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Only delivery agents can manage their availability".to_string(),
        ))
    }
}

pub mod agents;
pub mod common;
pub mod orders;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{agents::AgentService, catalog::CatalogService, orders::OrderService},
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub agents: Arc<AgentService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let agents = AgentService::new(db_pool.clone(), event_sender.clone());
        let catalog = CatalogService::new(db_pool.clone());
        let orders = OrderService::new(
            db_pool,
            agents.clone(),
            catalog,
            config,
            event_sender,
        );

        Self {
            orders: Arc::new(orders),
            agents: Arc::new(agents),
        }
    }
}

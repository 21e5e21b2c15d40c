use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::{product, shop},
    errors::ServiceError,
};

/// Read-only lookups over shops and their products.
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn get_shop(&self, shop_id: Uuid) -> Result<Option<shop::Model>, ServiceError> {
        Ok(shop::Entity::find_by_id(shop_id)
            .one(&*self.db_pool)
            .await?)
    }

    /// Loads the requested products of one shop, keyed by id. Ids that do not
    /// exist or belong to another shop are simply absent from the map.
    pub async fn shop_products<C>(
        &self,
        conn: &C,
        shop_id: Uuid,
        product_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, product::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let products = product::Entity::find()
            .filter(product::Column::ShopId.eq(shop_id))
            .filter(product::Column::Id.is_in(product_ids.iter().copied()))
            .all(conn)
            .await?;

        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Batch lookup used when populating order views.
    pub async fn shops_by_ids(
        &self,
        ids: impl IntoIterator<Item = Uuid>,
    ) -> Result<HashMap<Uuid, shop::Model>, ServiceError> {
        let ids: Vec<Uuid> = ids.into_iter().collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let shops = shop::Entity::find()
            .filter(shop::Column::Id.is_in(ids))
            .all(&*self.db_pool)
            .await?;

        Ok(shops.into_iter().map(|s| (s.id, s)).collect())
    }
}

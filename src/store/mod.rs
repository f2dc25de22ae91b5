//! Authoritative order storage: the Order Store component.
//!
//! Postgres-backed (the only storage backend this crate carries); every
//! operation below is a single transaction.

pub mod models;

pub use models::{Order, OrderFilters, OrderStatus, OrderWithHistory, StatusHistoryEntry, TransitionFields};

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sea_query::{Expr, Order as SeaOrder, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Which leg of a delivery the auto-assigner is assigning for. Determines
/// both the status set counted as "active load" and the driver column
/// written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverRole {
    Pickup,
    Delivery,
}

impl DriverRole {
    fn active_statuses(&self) -> &'static [OrderStatus] {
        match self {
            DriverRole::Pickup => &[
                OrderStatus::PickupAssigned,
                OrderStatus::PickingUp,
                OrderStatus::PickedUp,
            ],
            DriverRole::Delivery => &[OrderStatus::OutForDelivery, OrderStatus::DeliveryAttempted],
        }
    }

    fn driver_column(&self) -> Orders {
        match self {
            DriverRole::Pickup => Orders::PickupDriverId,
            DriverRole::Delivery => Orders::DeliveryDriverId,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order not found: {id}")]
    NotFound { id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(sea_query::Iden, Clone, Copy)]
enum Orders {
    Table,
    Id,
    ClientId,
    Status,
    PickupAddress,
    DeliveryAddress,
    PackageDetails,
    CmsReference,
    WmsReference,
    RouteId,
    PickupDriverId,
    DeliveryDriverId,
    DeliveryAttempts,
    MaxDeliveryAttempts,
    DeliveryNotes,
    ProofOfDelivery,
    CreatedAt,
    UpdatedAt,
}

/// Interface for authoritative order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(
        &self,
        client_id: &str,
        pickup_address: &str,
        delivery_address: &str,
        package_details: Value,
    ) -> Result<Order>;

    async fn get(&self, id: Uuid) -> Result<Option<OrderWithHistory>>;

    async fn list(&self, filters: &OrderFilters, limit: i64, offset: i64) -> Result<(Vec<Order>, i64)>;

    async fn transition(
        &self,
        id: Uuid,
        new_status: OrderStatus,
        details: Option<&str>,
        extra_fields: TransitionFields,
    ) -> Result<Option<Order>>;

    /// Active-load counts per driver for the given role, keyed by driver
    /// username. Drivers with no active orders simply do not appear.
    async fn active_load_counts(&self, role: DriverRole) -> Result<HashMap<String, i64>>;
}

pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            StoreError::Database(sqlx::Error::Migrate(Box::new(e)))
        })?;
        Ok(())
    }

    async fn load_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>> {
        let rows = sqlx::query_as::<_, StatusHistoryEntry>(
            "SELECT id, order_id, old_status, new_status, details, created_at
             FROM order_status_history WHERE order_id = $1 ORDER BY created_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create(
        &self,
        client_id: &str,
        pickup_address: &str,
        delivery_address: &str,
        package_details: Value,
    ) -> Result<Order> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let now = Utc::now();
        let order = sqlx::query_as::<_, Order>(
            "INSERT INTO orders (
                client_id, status, pickup_address, delivery_address, package_details,
                delivery_attempts, max_delivery_attempts, created_at, updated_at
            ) VALUES ($1, 'PENDING', $2, $3, $4, 0, 3, $5, $5)
            RETURNING *",
        )
        .bind(client_id)
        .bind(pickup_address)
        .bind(delivery_address)
        .bind(&package_details)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO order_status_history (id, order_id, old_status, new_status, details, created_at)
             VALUES ($1, $2, NULL, 'PENDING', 'Order created', $3)",
        )
        .bind(Uuid::new_v4())
        .bind(order.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OrderWithHistory>> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(order) = order else { return Ok(None) };
        let status_history = self.load_history(order.id).await?;
        Ok(Some(OrderWithHistory { order, status_history }))
    }

    async fn list(&self, filters: &OrderFilters, limit: i64, offset: i64) -> Result<(Vec<Order>, i64)> {
        let mut query = Query::select();
        query
            .column(sea_query::Asterisk)
            .from(Orders::Table)
            .order_by(Orders::CreatedAt, SeaOrder::Desc)
            .limit(limit as u64)
            .offset(offset as u64);

        apply_filters(&mut query, filters);

        let (sql, values) = query.build_sqlx(PostgresQueryBuilder);
        let orders = sqlx::query_as_with::<_, Order, _>(&sql, values)
            .fetch_all(&self.pool)
            .await?;

        let mut count_query = Query::select();
        count_query
            .expr(Expr::col(Orders::Id).count())
            .from(Orders::Table);
        apply_filters(&mut count_query, filters);
        let (count_sql, count_values) = count_query.build_sqlx(PostgresQueryBuilder);
        let total: i64 = sqlx::query_scalar_with(&count_sql, count_values)
            .fetch_one(&self.pool)
            .await?;

        Ok((orders, total))
    }

    async fn transition(
        &self,
        id: Uuid,
        new_status: OrderStatus,
        details: Option<&str>,
        extra_fields: TransitionFields,
    ) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let Some(current) = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let now = Utc::now();
        let updated = sqlx::query_as::<_, Order>(
            "UPDATE orders SET
                status = $2,
                cms_reference = COALESCE($3, cms_reference),
                wms_reference = COALESCE($4, wms_reference),
                route_id = COALESCE($5, route_id),
                pickup_driver_id = COALESCE($6, pickup_driver_id),
                delivery_driver_id = COALESCE($7, delivery_driver_id),
                delivery_attempts = COALESCE($8, delivery_attempts),
                delivery_notes = COALESCE($9, delivery_notes),
                proof_of_delivery = COALESCE($10, proof_of_delivery),
                updated_at = $11
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(new_status)
        .bind(&extra_fields.cms_reference)
        .bind(&extra_fields.wms_reference)
        .bind(&extra_fields.route_id)
        .bind(&extra_fields.pickup_driver_id)
        .bind(&extra_fields.delivery_driver_id)
        .bind(extra_fields.delivery_attempts)
        .bind(&extra_fields.delivery_notes)
        .bind(&extra_fields.proof_of_delivery)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO order_status_history (id, order_id, old_status, new_status, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(current.status)
        .bind(new_status)
        .bind(details)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn active_load_counts(&self, role: DriverRole) -> Result<HashMap<String, i64>> {
        let column = role.driver_column();
        let statuses: Vec<&'static str> = role.active_statuses().iter().map(|s| s.as_wire()).collect();

        let mut query = Query::select();
        query
            .column(column)
            .expr(Expr::col(Orders::Id).count())
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Status).is_in(statuses))
            .and_where(Expr::col(column).is_not_null())
            .group_by_col(column);

        let (sql, values) = query.build_sqlx(PostgresQueryBuilder);
        let rows: Vec<(String, i64)> = sqlx::query_as_with(&sql, values).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }
}

fn apply_filters(query: &mut sea_query::SelectStatement, filters: &OrderFilters) {
    if let Some(client_id) = &filters.client_id {
        query.and_where(Expr::col(Orders::ClientId).eq(client_id.clone()));
    }
    if let Some(pickup_driver_id) = &filters.pickup_driver_id {
        query.and_where(Expr::col(Orders::PickupDriverId).eq(pickup_driver_id.clone()));
    }
    if let Some(delivery_driver_id) = &filters.delivery_driver_id {
        query.and_where(Expr::col(Orders::DeliveryDriverId).eq(delivery_driver_id.clone()));
    }
    if let Some(driver_id) = &filters.driver_id_any {
        query.and_where(
            Expr::col(Orders::PickupDriverId)
                .eq(driver_id.clone())
                .or(Expr::col(Orders::DeliveryDriverId).eq(driver_id.clone())),
        );
    }
    if let Some(status) = filters.status {
        query.and_where(Expr::col(Orders::Status).eq(status.as_wire()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_filters_client_id() {
        let mut query = Query::select();
        query.column(sea_query::Asterisk).from(Orders::Table);
        let filters = OrderFilters {
            client_id: Some("client-1".to_string()),
            ..Default::default()
        };
        apply_filters(&mut query, &filters);
        let sql = query.to_string(PostgresQueryBuilder);
        assert!(sql.contains("client_id"));
    }

    #[test]
    fn test_driver_role_active_statuses() {
        assert_eq!(
            DriverRole::Pickup.active_statuses(),
            &[OrderStatus::PickupAssigned, OrderStatus::PickingUp, OrderStatus::PickedUp]
        );
        assert_eq!(
            DriverRole::Delivery.active_statuses(),
            &[OrderStatus::OutForDelivery, OrderStatus::DeliveryAttempted]
        );
    }

    #[test]
    fn test_apply_filters_driver_id_any_is_disjunction() {
        let mut query = Query::select();
        query.column(sea_query::Asterisk).from(Orders::Table);
        let filters = OrderFilters {
            driver_id_any: Some("driver-1".to_string()),
            ..Default::default()
        };
        apply_filters(&mut query, &filters);
        let sql = query.to_string(PostgresQueryBuilder);
        assert!(sql.contains("pickup_driver_id"));
        assert!(sql.contains("delivery_driver_id"));
        assert!(sql.contains(" OR "));
    }
}

//! PostgreSQL 저장소.
//!
//! 열거형은 텍스트 컬럼으로 저장하고 Display/FromStr로 변환합니다.
//! 스키마 프로비저닝은 배포 측 책임이며, 기대하는 테이블은
//! `accounts` / `positions` / `orders`입니다 (열거형 TEXT, 금액·수량
//! NUMERIC, 시각 TIMESTAMPTZ, id BIGSERIAL).

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::info;

use perp_core::{
    Account, Direction, ExchangeKind, LeverageType, Order, OrderStatus, OrderType, Position,
    PositionFilter, PositionStatus, Side, Store, StoreError,
};

/// PostgreSQL 저장소.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 데이터베이스 연결 및 풀 생성.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(backend_error)?;
        info!("데이터베이스 연결 완료");
        Ok(Self::new(pool))
    }
}

fn backend_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound("레코드 없음".to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

fn parse_enum<T: FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    T::from_str(value).map_err(StoreError::Backend)
}

// ====== 행 매핑 ======

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    name: String,
    exchange: String,
    quote_asset: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    api_passphrase: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            name: row.name,
            exchange: parse_enum::<ExchangeKind>(&row.exchange)?,
            quote_asset: row.quote_asset,
            api_key: row.api_key.map(SecretString::from),
            api_secret: row.api_secret.map(SecretString::from),
            api_passphrase: row.api_passphrase.map(SecretString::from),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PositionRow {
    id: i64,
    account_id: i64,
    exchange: String,
    quote_asset: String,
    base_asset: String,
    direction: String,
    leverage_multiplier: Option<Decimal>,
    leverage_type: String,
    quantity: Decimal,
    unrealized_pnl: Decimal,
    unrealized_pnl_percent: Decimal,
    realized_pnl: Decimal,
    realized_pnl_percent: Decimal,
    stop_loss: Option<Decimal>,
    liquidation_price: Option<Decimal>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PositionRow> for Position {
    type Error = StoreError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        Ok(Position {
            id: row.id,
            account_id: row.account_id,
            exchange: parse_enum::<ExchangeKind>(&row.exchange)?,
            quote_asset: row.quote_asset,
            base_asset: row.base_asset,
            direction: parse_enum::<Direction>(&row.direction)?,
            leverage_multiplier: row.leverage_multiplier,
            leverage_type: parse_enum::<LeverageType>(&row.leverage_type)?,
            quantity: row.quantity,
            unrealized_pnl: row.unrealized_pnl,
            unrealized_pnl_percent: row.unrealized_pnl_percent,
            realized_pnl: row.realized_pnl,
            realized_pnl_percent: row.realized_pnl_percent,
            stop_loss: row.stop_loss,
            liquidation_price: row.liquidation_price,
            status: parse_enum::<PositionStatus>(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    account_id: i64,
    position_id: i64,
    exchange: String,
    quote_asset: String,
    base_asset: String,
    exchange_order_id: Option<String>,
    side: String,
    order_type: String,
    price: Option<Decimal>,
    quantity: Decimal,
    quantity_filled: Decimal,
    status: String,
    take_profit: Option<Decimal>,
    stop_loss: Option<Decimal>,
    reduce_only: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            account_id: row.account_id,
            position_id: row.position_id,
            exchange: parse_enum::<ExchangeKind>(&row.exchange)?,
            quote_asset: row.quote_asset,
            base_asset: row.base_asset,
            exchange_order_id: row.exchange_order_id,
            side: parse_enum::<Side>(&row.side)?,
            order_type: parse_enum::<OrderType>(&row.order_type)?,
            price: row.price,
            quantity: row.quantity,
            quantity_filled: row.quantity_filled,
            status: parse_enum::<OrderStatus>(&row.status)?,
            take_profit: row.take_profit,
            stop_loss: row.stop_loss,
            reduce_only: row.reduce_only,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const POSITION_COLUMNS: &str = "id, account_id, exchange, quote_asset, base_asset, direction, \
     leverage_multiplier, leverage_type, quantity, unrealized_pnl, unrealized_pnl_percent, \
     realized_pnl, realized_pnl_percent, stop_loss, liquidation_price, status, \
     created_at, updated_at, completed_at";

const ORDER_COLUMNS: &str = "id, account_id, position_id, exchange, quote_asset, base_asset, \
     exchange_order_id, side, order_type, price, quantity, quantity_filled, status, \
     take_profit, stop_loss, reduce_only, created_at, updated_at";

async fn insert_position<'e, E>(executor: E, position: &Position) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO positions (account_id, exchange, quote_asset, base_asset, direction, \
         leverage_multiplier, leverage_type, quantity, unrealized_pnl, unrealized_pnl_percent, \
         realized_pnl, realized_pnl_percent, stop_loss, liquidation_price, status, \
         created_at, updated_at, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
         RETURNING id",
    )
    .bind(position.account_id)
    .bind(position.exchange.to_string())
    .bind(&position.quote_asset)
    .bind(&position.base_asset)
    .bind(position.direction.to_string())
    .bind(position.leverage_multiplier)
    .bind(position.leverage_type.to_string())
    .bind(position.quantity)
    .bind(position.unrealized_pnl)
    .bind(position.unrealized_pnl_percent)
    .bind(position.realized_pnl)
    .bind(position.realized_pnl_percent)
    .bind(position.stop_loss)
    .bind(position.liquidation_price)
    .bind(position.status.to_string())
    .bind(position.created_at)
    .bind(position.updated_at)
    .bind(position.completed_at)
    .fetch_one(executor)
    .await
    .map_err(backend_error)
}

async fn insert_order_row<'e, E>(executor: E, order: &Order) -> Result<i64, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO orders (account_id, position_id, exchange, quote_asset, base_asset, \
         exchange_order_id, side, order_type, price, quantity, quantity_filled, status, \
         take_profit, stop_loss, reduce_only, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
         RETURNING id",
    )
    .bind(order.account_id)
    .bind(order.position_id)
    .bind(order.exchange.to_string())
    .bind(&order.quote_asset)
    .bind(&order.base_asset)
    .bind(&order.exchange_order_id)
    .bind(order.side.to_string())
    .bind(order.order_type.to_string())
    .bind(order.price)
    .bind(order.quantity)
    .bind(order.quantity_filled)
    .bind(order.status.to_string())
    .bind(order.take_profit)
    .bind(order.stop_loss)
    .bind(order.reduce_only)
    .bind(order.created_at)
    .bind(order.updated_at)
    .fetch_one(executor)
    .await
    .map_err(backend_error)
}

#[async_trait]
impl Store for PgStore {
    async fn account(&self, id: i64) -> Result<Account, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, name, exchange, quote_asset, api_key, api_secret, api_passphrase, \
             created_at, updated_at FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend_error)?;
        row.try_into()
    }

    async fn position(&self, id: i64) -> Result<Position, StoreError> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend_error)?;
        row.try_into()
    }

    async fn create_position_with_order(
        &self,
        mut position: Position,
        mut order: Order,
    ) -> Result<(Position, Order), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        position.id = insert_position(&mut *tx, &position).await?;
        order.position_id = position.id;
        order.id = insert_order_row(&mut *tx, &order).await?;

        tx.commit().await.map_err(backend_error)?;
        Ok((position, order))
    }

    async fn update_position(&self, position: &Position) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE positions SET quantity = $1, unrealized_pnl = $2, \
             unrealized_pnl_percent = $3, realized_pnl = $4, realized_pnl_percent = $5, \
             stop_loss = $6, liquidation_price = $7, status = $8, \
             leverage_multiplier = $9, leverage_type = $10, \
             updated_at = $11, completed_at = $12 WHERE id = $13",
        )
        .bind(position.quantity)
        .bind(position.unrealized_pnl)
        .bind(position.unrealized_pnl_percent)
        .bind(position.realized_pnl)
        .bind(position.realized_pnl_percent)
        .bind(position.stop_loss)
        .bind(position.liquidation_price)
        .bind(position.status.to_string())
        .bind(position.leverage_multiplier)
        .bind(position.leverage_type.to_string())
        .bind(position.updated_at)
        .bind(position.completed_at)
        .bind(position.id)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("포지션 {}", position.id)));
        }
        Ok(())
    }

    async fn active_positions(&self) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE status NOT IN ('closed', 'stop_loss', 'liquidated') ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_open_position(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
        direction: Direction,
    ) -> Result<Option<Position>, StoreError> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE account_id = $1 AND quote_asset = $2 AND base_asset = $3 \
             AND direction = $4 AND status NOT IN ('closed', 'stop_loss', 'liquidated') \
             ORDER BY id LIMIT 1"
        ))
        .bind(account_id)
        .bind(quote_asset)
        .bind(base_asset)
        .bind(direction.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_error)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn terminal_positions(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
    ) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE account_id = $1 AND quote_asset = $2 AND base_asset = $3 \
             AND status IN ('closed', 'stop_loss', 'liquidated') ORDER BY id"
        ))
        .bind(account_id)
        .bind(quote_asset)
        .bind(base_asset)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_positions(
        &self,
        filter: &PositionFilter,
    ) -> Result<Vec<Position>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {POSITION_COLUMNS} FROM positions WHERE 1=1"));
        if let Some(account_id) = filter.account_id {
            builder.push(" AND account_id = ").push_bind(account_id);
        }
        if let Some(exchange) = filter.exchange {
            builder.push(" AND exchange = ").push_bind(exchange.to_string());
        }
        if let Some(quote_asset) = &filter.quote_asset {
            builder.push(" AND quote_asset = ").push_bind(quote_asset);
        }
        if let Some(base_asset) = &filter.base_asset {
            builder.push(" AND base_asset = ").push_bind(base_asset);
        }
        if let Some(direction) = filter.direction {
            builder.push(" AND direction = ").push_bind(direction.to_string());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.to_string());
        }
        builder.push(" ORDER BY id");

        let rows = builder
            .build_query_as::<PositionRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn order(&self, id: i64) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend_error)?;
        row.try_into()
    }

    async fn insert_order(&self, mut order: Order) -> Result<Order, StoreError> {
        order.id = insert_order_row(&self.pool, &order).await?;
        Ok(order)
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE orders SET exchange_order_id = $1, price = $2, quantity = $3, \
             quantity_filled = $4, status = $5, take_profit = $6, stop_loss = $7, \
             updated_at = $8 WHERE id = $9",
        )
        .bind(&order.exchange_order_id)
        .bind(order.price)
        .bind(order.quantity)
        .bind(order.quantity_filled)
        .bind(order.status.to_string())
        .bind(order.take_profit)
        .bind(order.stop_loss)
        .bind(order.updated_at)
        .bind(order.id)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("주문 {}", order.id)));
        }
        Ok(())
    }

    async fn active_orders(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status IN ('created', 'partially_filled', 'cancel_in_progress') ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn orders_for_position(&self, position_id: i64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE position_id = $1 ORDER BY id"
        ))
        .bind(position_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn active_orders_for_symbol(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
        side: Option<Side>,
    ) -> Result<Vec<Order>, StoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status NOT IN ('rejected', 'filled', 'cancelled', 'cancelled_partially_filled')"
        ));
        builder.push(" AND account_id = ").push_bind(account_id);
        builder.push(" AND quote_asset = ").push_bind(quote_asset);
        builder.push(" AND base_asset = ").push_bind(base_asset);
        if let Some(side) = side {
            builder.push(" AND side = ").push_bind(side.to_string());
        }
        builder.push(" ORDER BY id");

        let rows = builder
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

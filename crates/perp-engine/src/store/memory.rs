//! 인메모리 저장소.
//!
//! 외부 데이터베이스 없이 엔진을 구동하기 위한 구현입니다. 테스트와
//! 페이퍼 트레이딩에서 사용합니다.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use perp_core::{
    Account, Direction, Order, OrderStatus, Position, PositionFilter, Side, Store, StoreError,
};

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<i64, Account>,
    positions: HashMap<i64, Position>,
    orders: HashMap<i64, Order>,
    next_position_id: i64,
    next_order_id: i64,
}

/// 인메모리 저장소.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 계좌 등록. id가 0이면 새로 부여합니다.
    pub async fn insert_account(&self, mut account: Account) -> Account {
        let mut inner = self.inner.lock().await;
        if account.id == 0 {
            account.id = inner.accounts.len() as i64 + 1;
        }
        inner.accounts.insert(account.id, account.clone());
        account
    }
}

fn reconcilable(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Created | OrderStatus::PartiallyFilled | OrderStatus::CancelInProgress
    )
}

#[async_trait]
impl Store for MemoryStore {
    async fn account(&self, id: i64) -> Result<Account, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("계좌 {id}")))
    }

    async fn position(&self, id: i64) -> Result<Position, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .positions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("포지션 {id}")))
    }

    async fn create_position_with_order(
        &self,
        mut position: Position,
        mut order: Order,
    ) -> Result<(Position, Order), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_position_id += 1;
        position.id = inner.next_position_id;
        inner.next_order_id += 1;
        order.id = inner.next_order_id;
        order.position_id = position.id;

        inner.positions.insert(position.id, position.clone());
        inner.orders.insert(order.id, order.clone());
        Ok((position, order))
    }

    async fn update_position(&self, position: &Position) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.positions.contains_key(&position.id) {
            return Err(StoreError::NotFound(format!("포지션 {}", position.id)));
        }
        inner.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn active_positions(&self) -> Result<Vec<Position>, StoreError> {
        let inner = self.inner.lock().await;
        let mut positions: Vec<Position> = inner
            .positions
            .values()
            .filter(|p| !p.is_complete())
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.id);
        Ok(positions)
    }

    async fn find_open_position(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
        direction: Direction,
    ) -> Result<Option<Position>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .positions
            .values()
            .find(|p| {
                p.account_id == account_id
                    && p.quote_asset == quote_asset
                    && p.base_asset == base_asset
                    && p.direction == direction
                    && !p.is_complete()
            })
            .cloned())
    }

    async fn terminal_positions(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
    ) -> Result<Vec<Position>, StoreError> {
        let inner = self.inner.lock().await;
        let mut positions: Vec<Position> = inner
            .positions
            .values()
            .filter(|p| {
                p.account_id == account_id
                    && p.quote_asset == quote_asset
                    && p.base_asset == base_asset
                    && p.is_complete()
            })
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.id);
        Ok(positions)
    }

    async fn list_positions(
        &self,
        filter: &PositionFilter,
    ) -> Result<Vec<Position>, StoreError> {
        let inner = self.inner.lock().await;
        let mut positions: Vec<Position> = inner
            .positions
            .values()
            .filter(|p| {
                filter.account_id.map_or(true, |id| p.account_id == id)
                    && filter.exchange.map_or(true, |e| p.exchange == e)
                    && filter
                        .quote_asset
                        .as_deref()
                        .map_or(true, |q| p.quote_asset == q)
                    && filter
                        .base_asset
                        .as_deref()
                        .map_or(true, |b| p.base_asset == b)
                    && filter.direction.map_or(true, |d| p.direction == d)
                    && filter.status.map_or(true, |s| p.status == s)
            })
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.id);
        Ok(positions)
    }

    async fn order(&self, id: i64) -> Result<Order, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("주문 {id}")))
    }

    async fn insert_order(&self, mut order: Order) -> Result<Order, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_order_id += 1;
        order.id = inner.next_order_id;
        inner.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.orders.contains_key(&order.id) {
            return Err(StoreError::NotFound(format!("주문 {}", order.id)));
        }
        inner.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn active_orders(&self) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| reconcilable(o.status))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn orders_for_position(&self, position_id: i64) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| o.position_id == position_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn active_orders_for_symbol(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
        side: Option<Side>,
    ) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| {
                o.account_id == account_id
                    && o.quote_asset == quote_asset
                    && o.base_asset == base_asset
                    && !o.is_complete()
                    && side.map_or(true, |s| o.side == s)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use perp_core::{ExchangeKind, OrderType, PositionStatus};
    use rust_decimal_macros::dec;

    use super::*;

    fn sample_position() -> Position {
        Position::new(1, ExchangeKind::Paper, "USDT", "BTC", Direction::Long)
    }

    fn sample_order() -> Order {
        Order::new(
            1,
            0,
            ExchangeKind::Paper,
            "USDT",
            "BTC",
            Side::Buy,
            OrderType::Market,
            None,
            dec!(1),
        )
    }

    #[tokio::test]
    async fn test_create_position_assigns_ids() {
        let store = MemoryStore::new();
        let (position, order) = store
            .create_position_with_order(sample_position(), sample_order())
            .await
            .unwrap();

        assert_eq!(position.id, 1);
        assert_eq!(order.position_id, 1);
        assert_eq!(store.position(position.id).await.unwrap().id, position.id);
    }

    #[tokio::test]
    async fn test_active_orders_excludes_complete() {
        let store = MemoryStore::new();
        let (_, mut order) = store
            .create_position_with_order(sample_position(), sample_order())
            .await
            .unwrap();

        assert_eq!(store.active_orders().await.unwrap().len(), 1);

        order.status = OrderStatus::Filled;
        store.update_order(&order).await.unwrap();
        assert!(store.active_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_open_position_by_direction() {
        let store = MemoryStore::new();
        store
            .create_position_with_order(sample_position(), sample_order())
            .await
            .unwrap();

        let found = store
            .find_open_position(1, "USDT", "BTC", Direction::Long)
            .await
            .unwrap();
        assert!(found.is_some());

        let other = store
            .find_open_position(1, "USDT", "BTC", Direction::Short)
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_list_positions_by_exchange_and_direction() {
        let store = MemoryStore::new();
        store
            .create_position_with_order(sample_position(), sample_order())
            .await
            .unwrap();
        let short = Position::new(1, ExchangeKind::Paper, "USDT", "ETH", Direction::Short);
        store
            .create_position_with_order(short, sample_order())
            .await
            .unwrap();

        let filter = PositionFilter {
            exchange: Some(ExchangeKind::Paper),
            direction: Some(Direction::Short),
            ..PositionFilter::default()
        };
        let found = store.list_positions(&filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].base_asset, "ETH");

        let filter = PositionFilter {
            exchange: Some(ExchangeKind::BybitUsdtPerpetual),
            ..PositionFilter::default()
        };
        assert!(store.list_positions(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_positions_filter() {
        let store = MemoryStore::new();
        let (mut position, _) = store
            .create_position_with_order(sample_position(), sample_order())
            .await
            .unwrap();

        assert!(store
            .terminal_positions(1, "USDT", "BTC")
            .await
            .unwrap()
            .is_empty());

        position.complete(PositionStatus::Closed);
        store.update_position(&position).await.unwrap();
        assert_eq!(
            store.terminal_positions(1, "USDT", "BTC").await.unwrap().len(),
            1
        );
    }
}

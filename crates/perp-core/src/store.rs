//! 영속 저장소 추상화.
//!
//! 엔진은 이 트레이트만 바라봅니다. 운영 환경에서는 PostgreSQL 구현을,
//! 테스트에서는 인메모리 구현을 주입합니다.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Account, Direction, ExchangeKind, Order, Position, PositionStatus, Side};

/// 저장소 오류.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("레코드를 찾을 수 없음: {0}")]
    NotFound(String),

    #[error("저장소 오류: {0}")]
    Backend(String),
}

/// 포지션 목록 조회 필터. `None` 필드는 조건에서 제외됩니다.
#[derive(Debug, Clone, Default)]
pub struct PositionFilter {
    pub account_id: Option<i64>,
    pub exchange: Option<ExchangeKind>,
    pub quote_asset: Option<String>,
    pub base_asset: Option<String>,
    pub direction: Option<Direction>,
    pub status: Option<PositionStatus>,
}

/// 영속 저장소.
#[async_trait]
pub trait Store: Send + Sync {
    // ====== 계좌 ======

    async fn account(&self, id: i64) -> Result<Account, StoreError>;

    // ====== 포지션 ======

    async fn position(&self, id: i64) -> Result<Position, StoreError>;

    /// 포지션과 진입 주문을 하나의 트랜잭션으로 생성합니다.
    ///
    /// 반환값은 id가 부여된 (포지션, 주문) 쌍입니다. 주문 제출이 실패한
    /// 경우에는 호출되지 않으므로 레코드가 남지 않습니다.
    async fn create_position_with_order(
        &self,
        position: Position,
        order: Order,
    ) -> Result<(Position, Order), StoreError>;

    async fn update_position(&self, position: &Position) -> Result<(), StoreError>;

    /// 종결되지 않은 포지션 전체.
    async fn active_positions(&self) -> Result<Vec<Position>, StoreError>;

    /// 같은 계좌/자산쌍/방향의 비종결 포지션 조회.
    async fn find_open_position(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
        direction: Direction,
    ) -> Result<Option<Position>, StoreError>;

    /// 계좌/자산쌍의 종결 포지션 전체 (승률 계산용).
    async fn terminal_positions(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
    ) -> Result<Vec<Position>, StoreError>;

    async fn list_positions(
        &self,
        filter: &PositionFilter,
    ) -> Result<Vec<Position>, StoreError>;

    // ====== 주문 ======

    async fn order(&self, id: i64) -> Result<Order, StoreError>;

    async fn insert_order(&self, order: Order) -> Result<Order, StoreError>;

    async fn update_order(&self, order: &Order) -> Result<(), StoreError>;

    /// 정합성 루프 대상 주문 (Created | PartiallyFilled | CancelInProgress).
    async fn active_orders(&self) -> Result<Vec<Order>, StoreError>;

    async fn orders_for_position(&self, position_id: i64) -> Result<Vec<Order>, StoreError>;

    /// 계좌/자산쌍의 비종결 주문. `side`가 있으면 해당 방향만.
    async fn active_orders_for_symbol(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
        side: Option<Side>,
    ) -> Result<Vec<Order>, StoreError>;
}

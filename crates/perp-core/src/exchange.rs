//! 거래소 추상화.
//!
//! 엔진은 거래소별 REST/WebSocket 세부를 전혀 모릅니다. 이 트레이트가
//! 노출하는 중립 타입만으로 주문을 내고, 체결을 읽고, 포지션 정보를
//! 조회합니다. 어댑터는 호출 사이에 도착한 체결 이벤트를 자체 버퍼에
//! 쌓아 두었다가 `flush_pending_updates`에서 자기 내구 상태에만
//! 반영합니다. 이벤트 발행은 어댑터의 일이 아닙니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Direction, ExchangeKind, LeverageType, OrderStatus, OrderType, Side};

/// 거래소 어댑터 오류.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("네트워크 오류: {0}")]
    Network(String),

    #[error("요청 한도 초과 (재시도 {retry_after_ms}ms 후)")]
    RateLimited { retry_after_ms: u64 },

    #[error("인증 실패: {0}")]
    Authentication(String),

    #[error("거래소 API 오류: {0}")]
    Api(String),

    #[error("잘못된 주문: {0}")]
    InvalidOrder(String),

    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    #[error("지원하지 않는 기능: {0}")]
    Unsupported(String),
}

impl ExchangeError {
    /// 재시도 가능한 오류인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::NotFound(_)
        )
    }

    /// 재시도해도 소용없는 오류인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// 오류별 권장 재시도 대기 시간 (ms).
    pub fn retry_delay_ms(&self) -> u64 {
        match self {
            Self::RateLimited { retry_after_ms } => *retry_after_ms,
            Self::Network(_) => 1_000,
            _ => 500,
        }
    }
}

/// 시세 스냅샷.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
}

/// 지갑 잔고.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalance {
    pub asset: String,
    /// 총 잔고
    pub total: Decimal,
    /// 주문 가능 잔고
    pub available: Decimal,
}

/// 거래소가 보고하는 포지션 정보.
///
/// `direction`이 `None`이면 플랫(무포지션) 상태입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub direction: Option<Direction>,
    pub quantity: Decimal,
    pub entry_price: Option<Decimal>,
    pub leverage_multiplier: Option<Decimal>,
    pub leverage_type: LeverageType,
    pub liquidation_price: Option<Decimal>,
    /// 거래소가 강제 청산을 보고했는지 여부
    pub liquidated: bool,
}

/// 거래소가 보고하는 주문 현황 (권위 있는 상태).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub exchange_order_id: String,
    pub status: OrderStatus,
    pub quantity_filled: Decimal,
    /// 평균 체결가 (체결분이 있을 때)
    pub price: Option<Decimal>,
}

/// 주문 제출 요청.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub quote_asset: String,
    pub base_asset: String,
    pub side: Side,
    pub order_type: OrderType,
    /// 지정가 주문 가격 (시장가는 None)
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub reduce_only: bool,
}

/// 주문 제출 결과.
///
/// `quantity`는 최소 수량/스텝 절사 후 실제 접수된 수량입니다.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub exchange_order_id: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

/// 거래소 어댑터 트레이트.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// 어댑터 이름 (로그용).
    fn name(&self) -> &str;

    /// 자산별 지갑 잔고 조회.
    async fn account_balances(&self) -> Result<Vec<WalletBalance>, ExchangeError>;

    /// 시세 조회. 시세가 없는 심볼은 `Ok(None)`.
    async fn ticker(
        &self,
        quote_asset: &str,
        base_asset: &str,
    ) -> Result<Option<Ticker>, ExchangeError>;

    /// 거래소 측 포지션 정보 조회.
    async fn position_info(
        &self,
        quote_asset: &str,
        base_asset: &str,
    ) -> Result<PositionInfo, ExchangeError>;

    /// 주문 제출.
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlacedOrder, ExchangeError>;

    /// 주문 취소. 이미 종결된 주문 취소는 오류가 아닙니다.
    async fn cancel_order(
        &self,
        quote_asset: &str,
        base_asset: &str,
        exchange_order_id: &str,
    ) -> Result<(), ExchangeError>;

    /// 주문 현황 조회 (권위 있는 상태).
    async fn order_info(
        &self,
        quote_asset: &str,
        base_asset: &str,
        exchange_order_id: &str,
    ) -> Result<OrderInfo, ExchangeError>;

    /// 버퍼에 쌓인 체결 이벤트를 어댑터 자체 내구 상태에 반영.
    ///
    /// 상태 변경 이벤트 발행은 호출자(엔진)의 몫입니다. `is_complete`가
    /// 참이면 버퍼 항목을 정리해도 됩니다.
    async fn flush_pending_updates(
        &self,
        exchange_order_id: &str,
        is_complete: bool,
    ) -> Result<(), ExchangeError>;
}

/// 거래소 어댑터 레지스트리.
#[derive(Default)]
pub struct ExchangeRegistry {
    adapters: HashMap<ExchangeKind, Arc<dyn Exchange>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: ExchangeKind, adapter: Arc<dyn Exchange>) {
        self.adapters.insert(kind, adapter);
    }

    /// 어댑터 조회. 등록되지 않은 거래소는 오류입니다.
    pub fn get(&self, kind: ExchangeKind) -> Result<Arc<dyn Exchange>, ExchangeError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| ExchangeError::Unsupported(format!("등록되지 않은 거래소: {kind}")))
    }
}

impl fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("exchanges", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ExchangeError::Network("timeout".into()).is_retryable());
        assert!(ExchangeError::RateLimited { retry_after_ms: 200 }.is_retryable());
        assert!(ExchangeError::NotFound("order".into()).is_retryable());
        assert!(!ExchangeError::InvalidOrder("qty".into()).is_retryable());

        assert!(ExchangeError::Authentication("bad key".into()).is_fatal());
        assert!(!ExchangeError::Network("timeout".into()).is_fatal());
    }

    #[test]
    fn test_rate_limit_delay() {
        let err = ExchangeError::RateLimited { retry_after_ms: 350 };
        assert_eq!(err.retry_delay_ms(), 350);
        assert_eq!(ExchangeError::Network("x".into()).retry_delay_ms(), 1_000);
    }

    #[test]
    fn test_registry_missing_exchange() {
        let registry = ExchangeRegistry::new();
        let result = registry.get(ExchangeKind::Paper);
        assert!(matches!(result, Err(ExchangeError::Unsupported(_))));
    }
}

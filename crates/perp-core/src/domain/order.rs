//! 주문 엔티티와 주문 상태 머신의 상태 집합.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Direction, ExchangeKind};

/// 매수/매도 구분.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// 반대 방향 반환.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(format!("알 수 없는 주문 방향: {other}")),
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "market"),
            Self::Limit => write!(f, "limit"),
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(Self::Market),
            "limit" => Ok(Self::Limit),
            other => Err(format!("알 수 없는 주문 유형: {other}")),
        }
    }
}

/// 주문 상태.
///
/// 전이 규칙:
/// - Created → PartiallyFilled | Filled | Rejected | CancelInProgress
/// - PartiallyFilled → Filled | CancelInProgress
/// - CancelInProgress → Cancelled | CancelledPartiallyFilled
///
/// 종결 상태: Rejected, Filled, Cancelled, CancelledPartiallyFilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Rejected,
    PartiallyFilled,
    Filled,
    CancelInProgress,
    Cancelled,
    CancelledPartiallyFilled,
}

impl OrderStatus {
    /// 종결 상태 여부.
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Filled | Self::Cancelled | Self::CancelledPartiallyFilled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Created => "created",
            Self::Rejected => "rejected",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::CancelInProgress => "cancel_in_progress",
            Self::Cancelled => "cancelled",
            Self::CancelledPartiallyFilled => "cancelled_partially_filled",
        };
        write!(f, "{text}")
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "rejected" => Ok(Self::Rejected),
            "partially_filled" => Ok(Self::PartiallyFilled),
            "filled" => Ok(Self::Filled),
            "cancel_in_progress" => Ok(Self::CancelInProgress),
            "cancelled" => Ok(Self::Cancelled),
            "cancelled_partially_filled" => Ok(Self::CancelledPartiallyFilled),
            other => Err(format!("알 수 없는 주문 상태: {other}")),
        }
    }
}

/// 거래소 주문.
///
/// 하나의 포지션과 하나의 계좌에 속합니다. 주문 생성은 커맨드 핸들러,
/// 이후 변경은 주문 정합성 루프만 수행합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// 데이터베이스 id
    pub id: i64,
    /// 소유 계좌 id
    pub account_id: i64,
    /// 소유 포지션 id
    pub position_id: i64,
    /// 거래소
    pub exchange: ExchangeKind,
    /// 견적 자산
    pub quote_asset: String,
    /// 기초 자산
    pub base_asset: String,
    /// 거래소가 부여한 주문 id
    pub exchange_order_id: Option<String>,
    /// 매수/매도
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 주문 가격 (시장가 주문은 체결 후 평균가로 채워짐)
    pub price: Option<Decimal>,
    /// 주문 수량
    pub quantity: Decimal,
    /// 체결 수량
    pub quantity_filled: Decimal,
    /// 주문 상태
    pub status: OrderStatus,
    /// 익절 가격
    pub take_profit: Option<Decimal>,
    /// 손절 가격
    pub stop_loss: Option<Decimal>,
    /// 청산 전용(reduce-only) 여부
    pub reduce_only: bool,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 수정 시각
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// 새 주문 생성 (상태 Created, id는 저장소가 부여).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: i64,
        position_id: i64,
        exchange: ExchangeKind,
        quote_asset: impl Into<String>,
        base_asset: impl Into<String>,
        side: Side,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            account_id,
            position_id,
            exchange,
            quote_asset: quote_asset.into(),
            base_asset: base_asset.into(),
            exchange_order_id: None,
            side,
            order_type,
            price,
            quantity,
            quantity_filled: Decimal::ZERO,
            status: OrderStatus::Created,
            take_profit: None,
            stop_loss: None,
            reduce_only: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// 종결 상태 여부.
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// 이 주문이 주어진 방향의 포지션에 대해 진입 주문인지 여부.
    ///
    /// 진입 주문: Long 포지션의 Buy, Short 포지션의 Sell.
    pub fn is_entry_for(&self, direction: Direction) -> bool {
        self.side == direction.entry_side()
    }

    /// 이 주문이 주어진 방향의 포지션에 대해 청산 주문인지 여부.
    pub fn is_exit_for(&self, direction: Direction) -> bool {
        self.side == direction.exit_side()
    }

    /// 거래소 주문 id의 스로틀 키 ("{거래소}:{주문id}").
    pub fn throttle_key(&self) -> Option<String> {
        self.exchange_order_id
            .as_ref()
            .map(|id| format!("{}:{}", self.exchange, id))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn sample_order(side: Side, status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: 1,
            account_id: 1,
            position_id: 1,
            exchange: ExchangeKind::Paper,
            quote_asset: "USDT".to_string(),
            base_asset: "BTC".to_string(),
            exchange_order_id: Some("abc-1".to_string()),
            side,
            order_type: OrderType::Limit,
            price: Some(dec!(50000)),
            quantity: dec!(1),
            quantity_filled: Decimal::ZERO,
            status,
            take_profit: None,
            stop_loss: None,
            reduce_only: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_complete_statuses() {
        let complete = [
            OrderStatus::Rejected,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::CancelledPartiallyFilled,
        ];
        let incomplete = [
            OrderStatus::Created,
            OrderStatus::PartiallyFilled,
            OrderStatus::CancelInProgress,
        ];
        for status in complete {
            assert!(status.is_complete(), "{status} should be complete");
        }
        for status in incomplete {
            assert!(!status.is_complete(), "{status} should not be complete");
        }
    }

    #[test]
    fn test_entry_exit_classification() {
        let buy = sample_order(Side::Buy, OrderStatus::Created);
        assert!(buy.is_entry_for(Direction::Long));
        assert!(buy.is_exit_for(Direction::Short));

        let sell = sample_order(Side::Sell, OrderStatus::Created);
        assert!(sell.is_entry_for(Direction::Short));
        assert!(sell.is_exit_for(Direction::Long));
    }

    #[test]
    fn test_throttle_key() {
        let order = sample_order(Side::Buy, OrderStatus::Created);
        assert_eq!(order.throttle_key().unwrap(), "paper:abc-1");
    }

    #[test]
    fn test_status_roundtrip() {
        let all = [
            OrderStatus::Created,
            OrderStatus::Rejected,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::CancelInProgress,
            OrderStatus::Cancelled,
            OrderStatus::CancelledPartiallyFilled,
        ];
        for status in all {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
    }
}

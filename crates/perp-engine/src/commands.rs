//! 포지션 커맨드 타입.
//!
//! 신호 소스(웹훅, 전략 스크립트 등)가 엔진에 전달하는 진입/청산
//! 명령입니다. 가격/수량/손절은 절대값 또는 시세 기준 상대값으로
//! 지정할 수 있습니다.

use rust_decimal::Decimal;

use perp_core::{Direction, LeverageType, OrderType};

/// 시세 기준 가격.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePrice {
    Bid,
    Ask,
    Last,
}

/// 지정가 주문의 기준 가격.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSpec {
    /// 절대 가격
    Absolute(Decimal),
    /// 시세 참조 (bid/ask/last)
    Reference(ReferencePrice),
}

/// 기준 가격에 더할 오프셋.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// 절대값 (견적 자산 단위)
    Absolute(Decimal),
    /// 기준 가격 대비 백분율
    Percent(Decimal),
}

/// 주문 수량 결정 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sizing {
    /// 기초 자산 수량 직접 지정
    Quantity(Decimal),
    /// 견적 자산 비용 (수량 = 비용 / 진입가)
    Cost(Decimal),
    /// 가용 견적 잔고 대비 백분율 (레버리지 배수까지 허용)
    CostPercent(Decimal),
}

/// 손절 가격 결정 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopLossSpec {
    /// 절대 가격
    Absolute(Decimal),
    /// 진입가 대비 백분율 (롱은 음수, 숏은 양수가 일반적)
    Percent(Decimal),
}

/// 포지션 진입 커맨드.
#[derive(Debug, Clone)]
pub struct OpenPositionCommand {
    pub account_id: i64,
    pub quote_asset: String,
    pub base_asset: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub leverage_multiplier: Decimal,
    pub leverage_type: LeverageType,
    pub sizing: Sizing,
    /// 지정가 주문의 가격 (지정가일 때 필수)
    pub price: Option<PriceSpec>,
    pub offset: Option<Offset>,
    pub stop_loss: Option<StopLossSpec>,
}

/// 포지션 청산 커맨드.
#[derive(Debug, Clone)]
pub struct ClosePositionCommand {
    pub account_id: i64,
    pub quote_asset: String,
    pub base_asset: String,
    pub direction: Direction,
    pub order_type: OrderType,
    /// 지정가 주문의 가격 (지정가일 때 필수)
    pub price: Option<PriceSpec>,
    pub offset: Option<Offset>,
}

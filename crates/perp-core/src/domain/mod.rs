//! 거래소 중립 도메인 엔티티.
//!
//! 계좌, 포지션, 주문 엔티티와 상태 enum을 정의합니다.
//! 모든 금액/수량은 `rust_decimal::Decimal`을 사용합니다.

pub mod account;
pub mod order;
pub mod position;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use account::Account;
pub use order::{Order, OrderStatus, OrderType, Side};
pub use position::{Direction, LeverageType, Position, PositionStatus};

/// 지원 거래소 식별자.
///
/// 계좌마다 하나의 거래소에 연결되며, 엔진은 이 값으로
/// `ExchangeRegistry`에서 해당 거래소 어댑터를 찾습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Bybit USDT 무기한 선물
    BybitUsdtPerpetual,
    /// 인프로세스 페이퍼 거래소 (드라이런/테스트)
    Paper,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BybitUsdtPerpetual => write!(f, "bybit_usdt_perpetual"),
            Self::Paper => write!(f, "paper"),
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bybit_usdt_perpetual" => Ok(Self::BybitUsdtPerpetual),
            "paper" => Ok(Self::Paper),
            other => Err(format!("알 수 없는 거래소: {other}")),
        }
    }
}

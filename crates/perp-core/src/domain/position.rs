//! 포지션 엔티티와 포지션 상태 머신의 상태 집합.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ExchangeKind, Side};

/// 포지션 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// 진입 주문 방향 (Long→Buy, Short→Sell).
    pub fn entry_side(self) -> Side {
        match self {
            Self::Long => Side::Buy,
            Self::Short => Side::Sell,
        }
    }

    /// 청산 주문 방향 (Long→Sell, Short→Buy).
    pub fn exit_side(self) -> Side {
        self.entry_side().opposite()
    }

    /// PnL 계산에 사용하는 부호 (Long=+1, Short=-1).
    pub fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(format!("알 수 없는 포지션 방향: {other}")),
        }
    }
}

/// 레버리지 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeverageType {
    Isolated,
    Cross,
    Unspecified,
}

impl fmt::Display for LeverageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isolated => write!(f, "isolated"),
            Self::Cross => write!(f, "cross"),
            Self::Unspecified => write!(f, "unspecified"),
        }
    }
}

impl FromStr for LeverageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(Self::Isolated),
            "cross" => Ok(Self::Cross),
            "unspecified" => Ok(Self::Unspecified),
            other => Err(format!("알 수 없는 레버리지 유형: {other}")),
        }
    }
}

/// 포지션 상태.
///
/// 전이 규칙:
/// - Created → Open | Closed
/// - Open → CloseInProgress | StopLossInProgress
/// - CloseInProgress → Closed
/// - StopLossInProgress → StopLoss
/// - 비종결 상태 → Liquidated (거래소 청산 이벤트)
///
/// 종결 상태: Closed, StopLoss, Liquidated. 종결 후 상태는 되돌아가지
/// 않으며, 종결 포지션은 승률 통계를 위해 영구 보존됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Created,
    Open,
    CloseInProgress,
    Closed,
    StopLossInProgress,
    StopLoss,
    Liquidated,
}

impl PositionStatus {
    /// 종결 상태 여부.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Closed | Self::StopLoss | Self::Liquidated)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Created => "created",
            Self::Open => "open",
            Self::CloseInProgress => "close_in_progress",
            Self::Closed => "closed",
            Self::StopLossInProgress => "stop_loss_in_progress",
            Self::StopLoss => "stop_loss",
            Self::Liquidated => "liquidated",
        };
        write!(f, "{text}")
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "open" => Ok(Self::Open),
            "close_in_progress" => Ok(Self::CloseInProgress),
            "closed" => Ok(Self::Closed),
            "stop_loss_in_progress" => Ok(Self::StopLossInProgress),
            "stop_loss" => Ok(Self::StopLoss),
            "liquidated" => Ok(Self::Liquidated),
            other => Err(format!("알 수 없는 포지션 상태: {other}")),
        }
    }
}

/// 포지션.
///
/// 한 계좌의 한 자산쌍에 대한 단방향 노출입니다. Open 커맨드가 생성하고,
/// 이후 상태/PnL/청산가 변경은 포지션 정합성 루프만 수행합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// 데이터베이스 id
    pub id: i64,
    /// 소유 계좌 id
    pub account_id: i64,
    /// 거래소
    pub exchange: ExchangeKind,
    /// 견적 자산
    pub quote_asset: String,
    /// 기초 자산
    pub base_asset: String,
    /// 방향
    pub direction: Direction,
    /// 레버리지 배수
    pub leverage_multiplier: Option<Decimal>,
    /// 레버리지 유형
    pub leverage_type: LeverageType,
    /// 수량 (>= 0)
    pub quantity: Decimal,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 미실현 손익률 (%)
    pub unrealized_pnl_percent: Decimal,
    /// 실현 손익
    pub realized_pnl: Decimal,
    /// 실현 손익률 (%)
    pub realized_pnl_percent: Decimal,
    /// 손절 가격
    pub stop_loss: Option<Decimal>,
    /// 청산 가격 (거래소 보고값)
    pub liquidation_price: Option<Decimal>,
    /// 포지션 상태
    pub status: PositionStatus,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 수정 시각
    pub updated_at: DateTime<Utc>,
    /// 종결 시각
    pub completed_at: Option<DateTime<Utc>>,
}

impl Position {
    /// 새 포지션 생성 (상태 Created, id는 저장소가 부여).
    pub fn new(
        account_id: i64,
        exchange: ExchangeKind,
        quote_asset: impl Into<String>,
        base_asset: impl Into<String>,
        direction: Direction,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            account_id,
            exchange,
            quote_asset: quote_asset.into(),
            base_asset: base_asset.into(),
            direction,
            leverage_multiplier: None,
            leverage_type: LeverageType::Unspecified,
            quantity: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_percent: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            realized_pnl_percent: Decimal::ZERO,
            stop_loss: None,
            liquidation_price: None,
            status: PositionStatus::Created,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// 종결 상태 여부.
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// 심볼 표기 ("{기초}{견적}", 예: "BTCUSDT").
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base_asset, self.quote_asset)
    }

    /// 종결 처리: 상태를 바꾸고 완료 시각을 기록합니다.
    pub fn complete(&mut self, status: PositionStatus) {
        debug_assert!(status.is_complete());
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

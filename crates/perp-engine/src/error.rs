//! 엔진 에러 타입 정의.

use perp_core::{Direction, ExchangeError, StoreError};
use thiserror::Error;

/// 엔진 에러 타입.
#[derive(Debug, Error)]
pub enum EngineError {
    /// 저장소 에러
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 거래소 에러
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// 설정 에러
    #[error("설정 오류: {0}")]
    Config(String),

    /// 잘못된 커맨드 입력
    #[error("잘못된 커맨드: {0}")]
    InvalidCommand(String),

    /// 반대 방향 포지션이 이미 열려 있음
    #[error("반대 방향({existing}) 포지션이 이미 열려 있어 {requested} 진입 불가")]
    OppositePositionOpen {
        existing: Direction,
        requested: Direction,
    },

    /// 가격을 결정할 수 없음 (시세 없음 등)
    #[error("가격 결정 실패: {0}")]
    PriceUnavailable(String),

    /// 주문 수량을 결정할 수 없음
    #[error("수량 결정 실패: {0}")]
    QuantityUnavailable(String),

    /// 잘못된 상태 전이 요청
    #[error("잘못된 상태: {0}")]
    InvalidState(String),
}

/// Result 타입 별칭.
pub type Result<T> = std::result::Result<T, EngineError>;

//! perp-exchange: 거래소 어댑터 구현.
//!
//! `perp_core::Exchange` 트레이트를 구현하는 어댑터들과 재시도
//! 유틸리티를 제공합니다. 현재는 페이퍼 트레이딩 어댑터가 기본이며,
//! 실거래소 어댑터도 같은 트레이트를 구현해 레지스트리에 등록합니다.

pub mod paper;
pub mod retry;

pub use paper::{PaperConfig, PaperExchange};
pub use retry::{with_retry, RetryConfig};

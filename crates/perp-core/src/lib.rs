//! perp-core: 도메인 타입과 엔진 경계 트레이트.
//!
//! 무기한 선물 포지션/주문 생명주기의 공용 어휘입니다. 거래소 어댑터와
//! 저장소 구현은 이 크레이트의 트레이트만 구현하고, 엔진은 이 크레이트의
//! 타입만 소비합니다.

pub mod decimal;
pub mod domain;
pub mod events;
pub mod exchange;
pub mod notify;
pub mod store;

pub use decimal::{truncate_to_decimal_places, truncate_to_step};
pub use domain::{
    Account, Direction, ExchangeKind, LeverageType, Order, OrderStatus, OrderType, Position,
    PositionStatus, Side,
};
pub use events::{EngineEvent, EventBus};
pub use exchange::{
    Exchange, ExchangeError, ExchangeRegistry, OrderInfo, PlaceOrderRequest, PlacedOrder,
    PositionInfo, Ticker, WalletBalance,
};
pub use notify::{NoopNotifier, Notifier};
pub use store::{PositionFilter, Store, StoreError};

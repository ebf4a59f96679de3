//! 포지션/주문 생명주기 및 거래소 정합성 엔진.
//!
//! 이 crate는 다음을 제공합니다:
//! - 포지션 개시/청산/손절 명령 처리
//! - 거래소 보고 상태를 단일 기록원으로 삼는 주문·포지션 정합성 루프
//! - 평균단가 기반 실현/미실현 PnL 및 적중률 계산
//! - 메모리/PostgreSQL 저장소 구현
//!
//! # 예제
//!
//! ```rust,ignore
//! use perp_engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::from_env()?;
//! let engine = Engine::new(store, exchanges, notifier, config);
//! let handles = engine.spawn_workers(&shutdown);
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod orders;
pub mod pnl;
pub mod positions;
pub mod store;
pub mod worker;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use perp_core::{EventBus, ExchangeRegistry, Notifier, Store};

// 주요 타입 재내보내기
pub use commands::{
    ClosePositionCommand, Offset, OpenPositionCommand, PriceSpec, ReferencePrice, Sizing,
    StopLossSpec,
};
pub use config::{EngineConfig, FillWarningConfig, OrderWaitConfig, ReconcileConfig};
pub use error::{EngineError, Result};
pub use orders::{OrderWaitType, OrdersService};
pub use pnl::{Accuracy, PnlError, ProfitAndLoss};
pub use positions::PositionsService;
pub use store::{MemoryStore, PgStore};
pub use worker::spawn_workers;

/// 서비스 묶음을 한 번에 조립하는 파사드.
///
/// 주문 서비스와 포지션 서비스는 같은 이벤트 버스를 공유합니다.
pub struct Engine {
    orders: Arc<OrdersService>,
    positions: Arc<PositionsService>,
    events: EventBus,
    reconcile: ReconcileConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        exchanges: Arc<ExchangeRegistry>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::default();
        let orders = Arc::new(OrdersService::new(
            store.clone(),
            exchanges.clone(),
            events.clone(),
            notifier.clone(),
            config.order_wait,
            config.fill_warning,
        ));
        let positions = Arc::new(PositionsService::new(
            store,
            exchanges,
            orders.clone(),
            events.clone(),
            notifier,
        ));
        Self {
            orders,
            positions,
            events,
            reconcile: config.reconcile,
        }
    }

    pub fn orders(&self) -> Arc<OrdersService> {
        self.orders.clone()
    }

    pub fn positions(&self) -> Arc<PositionsService> {
        self.positions.clone()
    }

    /// 엔진 이벤트 구독.
    pub fn subscribe(&self) -> broadcast::Receiver<perp_core::EngineEvent> {
        self.events.subscribe()
    }

    /// 설정된 주기로 정합성 워커를 기동합니다.
    pub fn spawn_workers(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        worker::spawn_workers(
            &self.reconcile,
            self.orders.clone(),
            self.positions.clone(),
            shutdown,
        )
    }
}

//! 엔진 이벤트 버스.
//!
//! 주문/포지션 상태 전이마다 정확히 한 번 발행됩니다. tokio broadcast
//! 채널 기반이므로 구독자가 없어도 발행은 실패하지 않습니다.

use tokio::sync::broadcast;

use crate::domain::{Order, OrderStatus, Position, PositionStatus};

/// 엔진이 발행하는 이벤트.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// 주문 상태 전이 (저장된 상태 != 거래소 보고 상태일 때 한 번).
    OrderStatusChanged {
        order: Order,
        previous: OrderStatus,
    },
    /// 포지션 상태 전이.
    PositionStatusChanged {
        position: Position,
        previous: PositionStatus,
    },
    /// 부분 체결 경고 (지정가 주문이 임계 시간 이상 미완료).
    PartialFillWarning { order: Order, minutes_open: i64 },
}

/// 이벤트 버스.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 이벤트 발행. 구독자가 없으면 조용히 버립니다.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

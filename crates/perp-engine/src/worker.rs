//! 백그라운드 정합성 워커.
//!
//! 주문 루프와 포지션 루프를 각각 독립 태스크로 돌립니다. 주기를 0으로
//! 설정한 루프는 기동하지 않습니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ReconcileConfig;
use crate::orders::OrdersService;
use crate::positions::PositionsService;

/// 정합성 워커를 기동합니다.
///
/// 반환된 핸들을 await하면 해당 루프가 종료 신호를 받고 끝날 때까지
/// 기다립니다.
pub fn spawn_workers(
    config: &ReconcileConfig,
    orders: Arc<OrdersService>,
    positions: Arc<PositionsService>,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if config.update_orders_interval_secs > 0 {
        let interval = Duration::from_secs(config.update_orders_interval_secs);
        let mut shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "주문 정합성 루프 시작");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // 첫 tick 즉시 반환 (소비)

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("주문 정합성 루프 종료 신호 수신");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = orders.update_orders().await {
                            error!(error = %e, "주문 정합성 루프 틱 실패");
                        }
                    }
                }
            }
        }));
    } else {
        info!("주문 정합성 루프 비활성화 (주기 0)");
    }

    if config.update_positions_interval_secs > 0 {
        let interval = Duration::from_secs(config.update_positions_interval_secs);
        let mut shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                "포지션 정합성 루프 시작"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // 첫 tick 즉시 반환 (소비)

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("포지션 정합성 루프 종료 신호 수신");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = positions.update_positions().await {
                            error!(error = %e, "포지션 정합성 루프 틱 실패");
                        }
                    }
                }
            }
        }));
    } else {
        info!("포지션 정합성 루프 비활성화 (주기 0)");
    }

    handles
}

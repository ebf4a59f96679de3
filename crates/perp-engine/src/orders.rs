//! 주문 생명주기 서비스.
//!
//! 주문 상태의 단일 기록원은 거래소입니다. 이 서비스는 거래소가 보고한
//! 상태를 저장소에 반영하고, 상태가 실제로 바뀐 경우에만 이벤트를
//! 발행합니다. 주문 갱신은 전역 뮤텍스 아래에서 수행되어 정합성 루프와
//! 완료 대기가 동시에 같은 주문을 건드려도 안전합니다.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use perp_core::{
    EngineEvent, EventBus, ExchangeRegistry, Notifier, Order, OrderStatus, Side, Store,
};
use perp_exchange::{with_retry, RetryConfig};

use crate::config::{FillWarningConfig, OrderWaitConfig};
use crate::error::Result;

/// 주문 완료 대기의 목적 (로그/알림 문구용).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderWaitType {
    /// 체결 대기
    Fill,
    /// 취소 대기
    Cancel,
}

impl fmt::Display for OrderWaitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fill => write!(f, "체결"),
            Self::Cancel => write!(f, "취소"),
        }
    }
}

/// 주문 생명주기 서비스.
pub struct OrdersService {
    store: Arc<dyn Store>,
    exchanges: Arc<ExchangeRegistry>,
    events: EventBus,
    notifier: Arc<dyn Notifier>,
    wait_config: OrderWaitConfig,
    fill_warning: FillWarningConfig,
    update_lock: Mutex<()>,
    /// 부분 체결 경고를 이미 보낸 주문 키 ("{거래소}:{주문id}")
    fill_warnings_sent: Mutex<HashSet<String>>,
}

impl OrdersService {
    pub fn new(
        store: Arc<dyn Store>,
        exchanges: Arc<ExchangeRegistry>,
        events: EventBus,
        notifier: Arc<dyn Notifier>,
        wait_config: OrderWaitConfig,
        fill_warning: FillWarningConfig,
    ) -> Self {
        Self {
            store,
            exchanges,
            events,
            notifier,
            wait_config,
            fill_warning,
            update_lock: Mutex::new(()),
            fill_warnings_sent: Mutex::new(HashSet::new()),
        }
    }

    /// 정합성 루프 한 틱: 비종결 주문 전체를 거래소와 대조합니다.
    ///
    /// 개별 주문의 실패는 다음 주문 처리를 막지 않습니다.
    pub async fn update_orders(&self) -> Result<()> {
        let active_orders = self.store.active_orders().await?;
        for order in active_orders {
            if let Err(e) = self.update_order_from_exchange(order.id).await {
                error!(
                    order_id = order.id,
                    error = %e,
                    "주문 갱신 실패, 다음 주문으로 진행"
                );
            }
        }
        Ok(())
    }

    /// 주문 하나를 거래소 기준으로 갱신합니다.
    ///
    /// 순서: 체결 버퍼 플러시 → 저장소에서 재로드 → 거래소 현황 조회 →
    /// 변경분 반영. 상태가 바뀐 경우에만 `OrderStatusChanged`를 정확히
    /// 한 번 발행합니다. 체결 수량은 단조 증가만 허용합니다.
    pub async fn update_order_from_exchange(&self, order_id: i64) -> Result<Order> {
        let _guard = self.update_lock.lock().await;

        let order = self.store.order(order_id).await?;
        let Some(exchange_order_id) = order.exchange_order_id.clone() else {
            // 거래소에 제출되지 않은 주문은 대조할 대상이 없음
            return Ok(order);
        };
        let exchange = self.exchanges.get(order.exchange)?;

        exchange
            .flush_pending_updates(&exchange_order_id, order.is_complete())
            .await?;

        // 플러시가 다른 경로로 저장소를 바꿨을 수 있으므로 재로드
        let mut order = self.store.order(order_id).await?;
        let previous_status = order.status;

        // 일시적 오류는 짧게 재시도 (치명/비재시도 오류는 즉시 전파)
        let info = with_retry(&RetryConfig::fast(), || {
            exchange.order_info(&order.quote_asset, &order.base_asset, &exchange_order_id)
        })
        .await?;

        let new_filled = order.quantity_filled.max(info.quantity_filled);
        let fills_changed = new_filled != order.quantity_filled;
        let status_changed = order.status != info.status;

        if status_changed || fills_changed {
            order.quantity_filled = new_filled;
            order.status = info.status;
            if let Some(price) = info.price {
                order.price = Some(price);
            }
            order.updated_at = Utc::now();
            self.store.update_order(&order).await?;
        }

        if status_changed {
            debug!(
                order_id = order.id,
                previous = %previous_status,
                current = %order.status,
                "주문 상태 변경"
            );
            self.events.publish(EngineEvent::OrderStatusChanged {
                order: order.clone(),
                previous: previous_status,
            });
        }

        self.check_fill_warning(&order).await;

        Ok(order)
    }

    /// 주문이 종결될 때까지 폴링하며 대기합니다.
    ///
    /// 최대 대기 시간을 넘기면 경고만 남기고 정상 반환합니다. 주문은
    /// 이후 정합성 루프가 계속 관리합니다.
    pub async fn wait_for_order_completion(
        &self,
        order: Order,
        wait_type: OrderWaitType,
    ) -> Result<Order> {
        let start = tokio::time::Instant::now();
        let mut order = order;

        loop {
            if !order.is_complete() {
                tokio::time::sleep(self.wait_config.poll_interval).await;
            }
            order = self.update_order_from_exchange(order.id).await?;

            if start.elapsed() >= self.wait_config.timeout || order.is_complete() {
                break;
            }
        }

        if !order.is_complete() {
            warn!(
                order_id = order.id,
                timeout_secs = self.wait_config.timeout.as_secs(),
                wait_type = %wait_type,
                "주문 완료 대기 시간 초과"
            );
            self.notifier
                .send(&format!(
                    "주문 {}:{} {} 대기가 {}초 안에 끝나지 않았습니다",
                    order.exchange,
                    order.exchange_order_id.as_deref().unwrap_or("-"),
                    wait_type,
                    self.wait_config.timeout.as_secs()
                ))
                .await;
        }

        Ok(order)
    }

    /// 계좌/자산쌍의 비종결 주문을 전부 취소합니다.
    ///
    /// `side`가 지정되면 해당 방향 주문만 취소합니다. 취소 접수 후에는
    /// 실제 취소가 끝날 때까지 잠시 대기합니다.
    pub async fn cancel_orders(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
        side: Option<Side>,
    ) -> Result<()> {
        let result = self
            .cancel_orders_inner(account_id, quote_asset, base_asset, side)
            .await;
        if let Err(e) = &result {
            error!(account_id, quote_asset, base_asset, error = %e, "주문 취소 실패");
            self.notifier
                .send(&format!(
                    "{base_asset}{quote_asset} 활성 주문 취소 실패: {e}"
                ))
                .await;
        }
        result
    }

    async fn cancel_orders_inner(
        &self,
        account_id: i64,
        quote_asset: &str,
        base_asset: &str,
        side: Option<Side>,
    ) -> Result<()> {
        let account = self.store.account(account_id).await?;
        let exchange = self.exchanges.get(account.exchange)?;

        let active_orders = self
            .store
            .active_orders_for_symbol(account_id, quote_asset, base_asset, side)
            .await?;

        for mut order in active_orders {
            let Some(exchange_order_id) = order.exchange_order_id.clone() else {
                continue;
            };
            info!(
                order_id = order.id,
                exchange_order_id = %exchange_order_id,
                "활성 주문 취소"
            );
            exchange
                .cancel_order(quote_asset, base_asset, &exchange_order_id)
                .await?;

            order.status = OrderStatus::CancelInProgress;
            order.updated_at = Utc::now();
            self.store.update_order(&order).await?;

            self.wait_for_order_completion(order, OrderWaitType::Cancel)
                .await?;
        }
        Ok(())
    }

    /// 미완료 주문(Created | PartiallyFilled)이 임계 시간을 넘기면 한 번만
    /// 경고를 보냅니다.
    async fn check_fill_warning(&self, order: &Order) {
        let Some(throttle_key) = order.throttle_key() else {
            return;
        };

        if order.is_complete() {
            // 종결된 주문은 더 이상 스로틀할 필요가 없음
            self.fill_warnings_sent.lock().await.remove(&throttle_key);
            return;
        }

        let open_for = Utc::now() - order.created_at;
        let warnable = matches!(
            order.status,
            OrderStatus::Created | OrderStatus::PartiallyFilled
        );
        if !warnable || open_for.num_minutes() <= self.fill_warning.threshold_minutes {
            return;
        }

        let mut sent = self.fill_warnings_sent.lock().await;
        if sent.contains(&throttle_key) {
            return;
        }
        sent.insert(throttle_key);
        drop(sent);

        warn!(
            order_id = order.id,
            minutes = open_for.num_minutes(),
            "주문이 임계 시간 내에 체결되지 않음"
        );
        self.notifier
            .send(&format!(
                "{} {} 주문({} {}{})이 {}분 내에 체결되지 않았습니다",
                order.order_type,
                order.side,
                order.quantity,
                order.base_asset,
                order.quote_asset,
                self.fill_warning.threshold_minutes
            ))
            .await;
        self.events.publish(EngineEvent::PartialFillWarning {
            order: order.clone(),
            minutes_open: open_for.num_minutes(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::result::Result;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use perp_core::{
        Account, Exchange, ExchangeError, ExchangeKind, NoopNotifier, OrderInfo, OrderType,
        PlaceOrderRequest, PlacedOrder, Position, PositionInfo, Ticker, WalletBalance,
    };
    use perp_core::Direction;
    use perp_exchange::PaperExchange;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::config::{FillWarningConfig, OrderWaitConfig};
    use crate::store::MemoryStore;

    use super::*;

    /// 주문 현황 조회 횟수를 세는 래퍼 (폴링 횟수 검증용).
    struct CountingExchange {
        inner: PaperExchange,
        order_info_calls: AtomicU32,
    }

    impl CountingExchange {
        fn new() -> Self {
            Self {
                inner: PaperExchange::default(),
                order_info_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Exchange for CountingExchange {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn account_balances(&self) -> Result<Vec<WalletBalance>, ExchangeError> {
            self.inner.account_balances().await
        }

        async fn ticker(
            &self,
            quote_asset: &str,
            base_asset: &str,
        ) -> Result<Option<Ticker>, ExchangeError> {
            self.inner.ticker(quote_asset, base_asset).await
        }

        async fn position_info(
            &self,
            quote_asset: &str,
            base_asset: &str,
        ) -> Result<PositionInfo, ExchangeError> {
            self.inner.position_info(quote_asset, base_asset).await
        }

        async fn place_order(
            &self,
            request: PlaceOrderRequest,
        ) -> Result<PlacedOrder, ExchangeError> {
            self.inner.place_order(request).await
        }

        async fn cancel_order(
            &self,
            quote_asset: &str,
            base_asset: &str,
            exchange_order_id: &str,
        ) -> Result<(), ExchangeError> {
            self.inner
                .cancel_order(quote_asset, base_asset, exchange_order_id)
                .await
        }

        async fn order_info(
            &self,
            quote_asset: &str,
            base_asset: &str,
            exchange_order_id: &str,
        ) -> Result<OrderInfo, ExchangeError> {
            self.order_info_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .order_info(quote_asset, base_asset, exchange_order_id)
                .await
        }

        async fn flush_pending_updates(
            &self,
            exchange_order_id: &str,
            is_complete: bool,
        ) -> Result<(), ExchangeError> {
            self.inner
                .flush_pending_updates(exchange_order_id, is_complete)
                .await
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        exchange: Arc<CountingExchange>,
        events: EventBus,
        service: OrdersService,
    }

    async fn harness(wait_config: OrderWaitConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_account(Account::new(1, "테스트 계좌", ExchangeKind::Paper, "USDT"))
            .await;

        let exchange = Arc::new(CountingExchange::new());
        let mut registry = ExchangeRegistry::new();
        registry.register(ExchangeKind::Paper, exchange.clone());

        let events = EventBus::new(64);
        let service = OrdersService::new(
            store.clone(),
            Arc::new(registry),
            events.clone(),
            Arc::new(NoopNotifier),
            wait_config,
            FillWarningConfig {
                threshold_minutes: 15,
            },
        );

        Harness {
            store,
            exchange,
            events,
            service,
        }
    }

    fn default_wait() -> OrderWaitConfig {
        OrderWaitConfig {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// 페이퍼 거래소에 주문을 넣고 저장소 레코드를 만듭니다.
    async fn seed_order(h: &Harness, quantity: Decimal) -> Order {
        let placed = h
            .exchange
            .place_order(PlaceOrderRequest {
                quote_asset: "USDT".to_string(),
                base_asset: "BTC".to_string(),
                side: Side::Buy,
                order_type: OrderType::Limit,
                price: Some(dec!(100)),
                quantity,
                stop_loss: None,
                take_profit: None,
                reduce_only: false,
            })
            .await
            .unwrap();

        let position = Position::new(1, ExchangeKind::Paper, "USDT", "BTC", Direction::Long);
        let mut order = Order::new(
            1,
            0,
            ExchangeKind::Paper,
            "USDT",
            "BTC",
            Side::Buy,
            OrderType::Limit,
            Some(dec!(100)),
            quantity,
        );
        order.exchange_order_id = Some(placed.exchange_order_id);
        let (_, order) = h
            .store
            .create_position_with_order(position, order)
            .await
            .unwrap();
        order
    }

    /// 최대 2초, 1초 폴링이면 정확히 2번만 조회하고 빠져나온다.
    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_polls_exactly_twice() {
        let h = harness(default_wait()).await;
        let order = seed_order(&h, dec!(1)).await;

        // 체결이 전혀 없는 주문
        let result = h
            .service
            .wait_for_order_completion(order, OrderWaitType::Fill)
            .await
            .unwrap();

        assert!(!result.is_complete());
        assert_eq!(h.exchange.order_info_calls.load(Ordering::SeqCst), 2);
    }

    /// 저장된 체결 수량은 거래소 보고값이 더 작아도 줄지 않는다.
    #[tokio::test]
    async fn test_quantity_filled_is_monotonic() {
        let h = harness(default_wait()).await;
        let order = seed_order(&h, dec!(1)).await;
        let exchange_order_id = order.exchange_order_id.clone().unwrap();

        h.exchange
            .inner
            .push_fill(&exchange_order_id, dec!(0.4), dec!(100))
            .await;
        let updated = h.service.update_order_from_exchange(order.id).await.unwrap();
        assert_eq!(updated.quantity_filled, dec!(0.4));

        // 저장소가 앞서 있는 상황 (예: 다른 경로의 선반영)
        let mut ahead = updated.clone();
        ahead.quantity_filled = dec!(0.5);
        h.store.update_order(&ahead).await.unwrap();

        let updated = h.service.update_order_from_exchange(order.id).await.unwrap();
        assert_eq!(updated.quantity_filled, dec!(0.5));
    }

    /// 상태가 같으면 이벤트가 다시 발행되지 않는다.
    #[tokio::test]
    async fn test_status_event_published_once() {
        let h = harness(default_wait()).await;
        let order = seed_order(&h, dec!(1)).await;
        let exchange_order_id = order.exchange_order_id.clone().unwrap();

        h.exchange
            .inner
            .push_fill(&exchange_order_id, dec!(1), dec!(100))
            .await;

        let mut rx = h.events.subscribe();
        h.service.update_order_from_exchange(order.id).await.unwrap();
        assert!(matches!(
            rx.try_recv(),
            Ok(EngineEvent::OrderStatusChanged {
                previous: OrderStatus::Created,
                ..
            })
        ));

        // 같은 상태로 다시 대조해도 이벤트 없음
        h.service.update_order_from_exchange(order.id).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    /// 부분 체결 경고는 주문당 한 번만 나간다.
    #[tokio::test]
    async fn test_fill_warning_throttled() {
        let h = harness(default_wait()).await;
        let order = seed_order(&h, dec!(1)).await;

        // 생성 시각을 임계 너머로 되돌림
        let mut stale = h.store.order(order.id).await.unwrap();
        stale.created_at = Utc::now() - ChronoDuration::minutes(20);
        h.store.update_order(&stale).await.unwrap();

        let mut rx = h.events.subscribe();
        h.service.update_order_from_exchange(order.id).await.unwrap();
        let first: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            first
                .iter()
                .filter(|e| matches!(e, EngineEvent::PartialFillWarning { .. }))
                .count(),
            1
        );

        h.service.update_order_from_exchange(order.id).await.unwrap();
        let second: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(second
            .iter()
            .all(|e| !matches!(e, EngineEvent::PartialFillWarning { .. })));
    }

    /// 취소 흐름: 접수 → CancelInProgress → 거래소 취소 확인 → Cancelled.
    #[tokio::test(start_paused = true)]
    async fn test_cancel_orders_flow() {
        let h = harness(default_wait()).await;
        let order = seed_order(&h, dec!(1)).await;

        h.service
            .cancel_orders(1, "USDT", "BTC", Some(Side::Buy))
            .await
            .unwrap();

        let order = h.store.order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }
}

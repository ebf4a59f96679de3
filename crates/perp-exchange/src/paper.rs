//! 페이퍼 트레이딩 거래소 어댑터.
//!
//! 실거래소 없이 엔진 전체 흐름을 검증하는 가상 거래소입니다.
//! 테스트 코드가 시세/잔고/포지션 정보를 직접 설정하고, 체결 이벤트를
//! `push_fill`로 밀어 넣으면 `flush_pending_updates`가 실거래소 어댑터와
//! 같은 방식으로 자체 주문 장부에 반영합니다.
//!
//! # 거래소 중립성
//!
//! 페이퍼 어댑터는 실제 거래소 어댑터와 동일한 `Exchange` 인터페이스를
//! 제공하므로 엔진 코드는 거래소 종류와 무관하게 동일하게 동작합니다.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use perp_core::{
    Exchange, ExchangeError, OrderInfo, OrderStatus, PlaceOrderRequest, PlacedOrder, PositionInfo,
    Ticker, WalletBalance,
};
use perp_core::truncate_to_step;

/// 페이퍼 거래소 설정.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// 주문 수량 스텝 크기
    pub quantity_step: Decimal,
    /// 최소 주문 수량
    pub min_quantity: Decimal,
    /// 호출마다 주입할 인위적 지연 (동시성 테스트용)
    pub call_latency: Option<Duration>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            quantity_step: dec!(0.001),
            min_quantity: dec!(0.001),
            call_latency: None,
        }
    }
}

/// 체결 이벤트 (스트림 수신분을 흉내낸 것).
#[derive(Debug, Clone)]
struct Fill {
    quantity: Decimal,
    price: Decimal,
}

/// 어댑터 내부 주문 장부 항목.
#[derive(Debug, Clone)]
struct PaperOrder {
    quantity: Decimal,
    quantity_filled: Decimal,
    total_cost: Decimal,
    avg_price: Option<Decimal>,
    status: OrderStatus,
}

#[derive(Debug, Default)]
struct PaperState {
    tickers: HashMap<String, Ticker>,
    balances: Vec<WalletBalance>,
    position_infos: HashMap<String, PositionInfo>,
    orders: HashMap<String, PaperOrder>,
    pending_fills: HashMap<String, Vec<Fill>>,
    next_order_id: u64,
}

/// 페이퍼 거래소.
#[derive(Debug)]
pub struct PaperExchange {
    config: PaperConfig,
    state: RwLock<PaperState>,
}

impl PaperExchange {
    pub fn new(config: PaperConfig) -> Self {
        Self {
            config,
            state: RwLock::new(PaperState::default()),
        }
    }

    fn symbol(quote_asset: &str, base_asset: &str) -> String {
        format!("{base_asset}{quote_asset}")
    }

    async fn inject_latency(&self) {
        if let Some(latency) = self.config.call_latency {
            tokio::time::sleep(latency).await;
        }
    }

    // ====== 테스트 제어용 설정 함수 ======

    /// 심볼 시세 설정.
    pub async fn set_ticker(&self, quote_asset: &str, base_asset: &str, ticker: Ticker) {
        let mut state = self.state.write().await;
        state
            .tickers
            .insert(Self::symbol(quote_asset, base_asset), ticker);
    }

    /// 지갑 잔고 설정.
    pub async fn set_balances(&self, balances: Vec<WalletBalance>) {
        let mut state = self.state.write().await;
        state.balances = balances;
    }

    /// 거래소 측 포지션 정보 설정.
    pub async fn set_position_info(&self, quote_asset: &str, base_asset: &str, info: PositionInfo) {
        let mut state = self.state.write().await;
        state
            .position_infos
            .insert(Self::symbol(quote_asset, base_asset), info);
    }

    /// 체결 이벤트 버퍼에 추가.
    ///
    /// 실거래소의 체결 스트림 수신에 해당합니다. 다음
    /// `flush_pending_updates` 호출 전까지는 주문 장부에 보이지 않습니다.
    pub async fn push_fill(&self, exchange_order_id: &str, quantity: Decimal, price: Decimal) {
        let mut state = self.state.write().await;
        state
            .pending_fills
            .entry(exchange_order_id.to_string())
            .or_default()
            .push(Fill { quantity, price });
    }

    /// 주문을 거래소 측에서 취소된 상태로 만듭니다.
    pub async fn force_cancel(&self, exchange_order_id: &str) {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(exchange_order_id) {
            order.status = if order.quantity_filled > Decimal::ZERO {
                OrderStatus::CancelledPartiallyFilled
            } else {
                OrderStatus::Cancelled
            };
        }
    }

    /// 체결 버퍼에 남은 항목 수 (테스트 검증용).
    pub async fn pending_fill_count(&self, exchange_order_id: &str) -> usize {
        let state = self.state.read().await;
        state
            .pending_fills
            .get(exchange_order_id)
            .map(|fills| fills.len())
            .unwrap_or(0)
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new(PaperConfig::default())
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn account_balances(&self) -> Result<Vec<WalletBalance>, ExchangeError> {
        self.inject_latency().await;
        let state = self.state.read().await;
        Ok(state.balances.clone())
    }

    async fn ticker(
        &self,
        quote_asset: &str,
        base_asset: &str,
    ) -> Result<Option<Ticker>, ExchangeError> {
        self.inject_latency().await;
        let state = self.state.read().await;
        Ok(state.tickers.get(&Self::symbol(quote_asset, base_asset)).cloned())
    }

    async fn position_info(
        &self,
        quote_asset: &str,
        base_asset: &str,
    ) -> Result<PositionInfo, ExchangeError> {
        self.inject_latency().await;
        let state = self.state.read().await;
        // 설정된 정보가 없으면 플랫 상태로 간주
        Ok(state
            .position_infos
            .get(&Self::symbol(quote_asset, base_asset))
            .cloned()
            .unwrap_or(PositionInfo {
                direction: None,
                quantity: Decimal::ZERO,
                entry_price: None,
                leverage_multiplier: None,
                leverage_type: perp_core::LeverageType::Unspecified,
                liquidation_price: None,
                liquidated: false,
            }))
    }

    async fn place_order(&self, request: PlaceOrderRequest) -> Result<PlacedOrder, ExchangeError> {
        self.inject_latency().await;

        let quantity = truncate_to_step(request.quantity, self.config.quantity_step);
        if quantity < self.config.min_quantity {
            return Err(ExchangeError::InvalidOrder(format!(
                "최소 주문 수량 미달: {} < {}",
                quantity, self.config.min_quantity
            )));
        }

        let mut state = self.state.write().await;
        state.next_order_id += 1;
        let exchange_order_id = format!("paper-{}", state.next_order_id);

        state.orders.insert(
            exchange_order_id.clone(),
            PaperOrder {
                quantity,
                quantity_filled: Decimal::ZERO,
                total_cost: Decimal::ZERO,
                avg_price: None,
                status: OrderStatus::Created,
            },
        );

        debug!(
            order_id = %exchange_order_id,
            side = %request.side,
            %quantity,
            "페이퍼 주문 접수"
        );

        Ok(PlacedOrder {
            exchange_order_id,
            quantity,
            price: request.price,
        })
    }

    async fn cancel_order(
        &self,
        _quote_asset: &str,
        _base_asset: &str,
        exchange_order_id: &str,
    ) -> Result<(), ExchangeError> {
        self.inject_latency().await;
        let mut state = self.state.write().await;

        let order = state
            .orders
            .get_mut(exchange_order_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("주문 없음: {exchange_order_id}")))?;

        // 이미 종결된 주문 취소는 무해한 no-op
        if order.status.is_complete() {
            debug!(order_id = %exchange_order_id, "이미 종결된 주문, 취소 생략");
            return Ok(());
        }

        order.status = if order.quantity_filled > Decimal::ZERO {
            OrderStatus::CancelledPartiallyFilled
        } else {
            OrderStatus::Cancelled
        };
        Ok(())
    }

    async fn order_info(
        &self,
        _quote_asset: &str,
        _base_asset: &str,
        exchange_order_id: &str,
    ) -> Result<OrderInfo, ExchangeError> {
        self.inject_latency().await;
        let state = self.state.read().await;

        let order = state
            .orders
            .get(exchange_order_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("주문 없음: {exchange_order_id}")))?;

        Ok(OrderInfo {
            exchange_order_id: exchange_order_id.to_string(),
            status: order.status,
            quantity_filled: order.quantity_filled,
            price: order.avg_price,
        })
    }

    async fn flush_pending_updates(
        &self,
        exchange_order_id: &str,
        is_complete: bool,
    ) -> Result<(), ExchangeError> {
        self.inject_latency().await;
        let mut state = self.state.write().await;

        let fills = if is_complete {
            state.pending_fills.remove(exchange_order_id).unwrap_or_default()
        } else {
            state
                .pending_fills
                .get_mut(exchange_order_id)
                .map(std::mem::take)
                .unwrap_or_default()
        };

        if fills.is_empty() {
            return Ok(());
        }

        let Some(order) = state.orders.get_mut(exchange_order_id) else {
            warn!(order_id = %exchange_order_id, "알 수 없는 주문의 체결 이벤트, 무시");
            return Ok(());
        };

        // 종결 주문에는 새 체결을 반영하지 않음
        if order.status.is_complete() {
            return Ok(());
        }

        for fill in fills {
            order.quantity_filled += fill.quantity;
            order.total_cost += fill.quantity * fill.price;
        }
        if order.quantity_filled > Decimal::ZERO {
            order.avg_price = Some(order.total_cost / order.quantity_filled);
        }
        order.status = if order.quantity_filled >= order.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        Ok(())
    }
}

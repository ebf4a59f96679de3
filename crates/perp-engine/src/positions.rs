//! 포지션 생명주기 서비스.
//!
//! 진입/청산 커맨드 처리와 포지션 정합성 루프를 담당합니다. 포지션
//! 상태의 기준은 거래소가 보고하는 포지션 정보이며, 상태 전이는 모두
//! 전역 뮤텍스 아래의 `update_position`에서만 일어납니다.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use perp_core::{
    Direction, EngineEvent, EventBus, ExchangeRegistry, Notifier, Order, OrderType,
    PlaceOrderRequest, Position, PositionFilter, PositionStatus, Store, Ticker,
};

use crate::commands::{
    ClosePositionCommand, Offset, OpenPositionCommand, PriceSpec, ReferencePrice, Sizing,
    StopLossSpec,
};
use crate::error::{EngineError, Result};
use crate::orders::{OrderWaitType, OrdersService};
use crate::pnl;

/// 포지션 생명주기 서비스.
pub struct PositionsService {
    store: Arc<dyn Store>,
    exchanges: Arc<ExchangeRegistry>,
    orders: Arc<OrdersService>,
    events: EventBus,
    notifier: Arc<dyn Notifier>,
    update_lock: Mutex<()>,
}

impl PositionsService {
    pub fn new(
        store: Arc<dyn Store>,
        exchanges: Arc<ExchangeRegistry>,
        orders: Arc<OrdersService>,
        events: EventBus,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            exchanges,
            orders,
            events,
            notifier,
            update_lock: Mutex::new(()),
        }
    }

    /// 포지션 진입.
    ///
    /// 거래소 포지션이 플랫일 때만 진입합니다. 같은 방향 포지션이 이미
    /// 있으면 (중복 신호로 간주하고) 아무것도 하지 않고 `Ok(None)`,
    /// 반대 방향 포지션이 있으면 오류입니다. 오류 시 레코드는 생성되지
    /// 않습니다.
    pub async fn open_position(
        &self,
        command: OpenPositionCommand,
    ) -> Result<Option<(Position, Order)>> {
        let result = self.open_position_inner(&command).await;
        if let Err(e) = &result {
            error!(
                account_id = command.account_id,
                direction = %command.direction,
                error = %e,
                "포지션 진입 실패"
            );
            self.notifier
                .send(&format!(
                    "{}{} {} 포지션 진입 실패: {e}",
                    command.base_asset, command.quote_asset, command.direction
                ))
                .await;
        }
        result
    }

    async fn open_position_inner(
        &self,
        command: &OpenPositionCommand,
    ) -> Result<Option<(Position, Order)>> {
        if command.leverage_multiplier < Decimal::ONE {
            return Err(EngineError::InvalidCommand(
                "레버리지 배수는 1.0 이상이어야 합니다".to_string(),
            ));
        }
        if command.order_type == OrderType::Limit && command.price.is_none() {
            return Err(EngineError::InvalidCommand(
                "지정가 주문에는 가격이 필요합니다".to_string(),
            ));
        }

        let account = self.store.account(command.account_id).await?;
        let exchange = self.exchanges.get(account.exchange)?;

        let info = exchange
            .position_info(&command.quote_asset, &command.base_asset)
            .await?;

        match info.direction {
            Some(existing) if existing == command.direction => {
                // 동일 신호 중복 수신으로 보고 기존 포지션을 그대로 둠
                info!(
                    symbol = %format!("{}{}", command.base_asset, command.quote_asset),
                    direction = %command.direction,
                    "이미 같은 방향 포지션이 열려 있어 진입 생략"
                );
                Ok(None)
            }
            Some(existing) => {
                // 이전 포지션 청산이 끝나지 않은 상태, 수동 확인 필요
                Err(EngineError::OppositePositionOpen {
                    existing,
                    requested: command.direction,
                })
            }
            None => {
                let balances = exchange.account_balances().await?;
                let available = balances
                    .iter()
                    .find(|b| b.asset == command.quote_asset)
                    .map(|b| b.available)
                    .ok_or_else(|| {
                        EngineError::QuantityUnavailable(format!(
                            "{} 잔고를 찾을 수 없음",
                            command.quote_asset
                        ))
                    })?;

                let ticker = exchange
                    .ticker(&command.quote_asset, &command.base_asset)
                    .await?
                    .ok_or_else(|| {
                        EngineError::PriceUnavailable(format!(
                            "{}{} 시세 없음",
                            command.base_asset, command.quote_asset
                        ))
                    })?;

                let price = determine_price(
                    &ticker,
                    command.order_type,
                    command.price.as_ref(),
                    command.offset.as_ref(),
                )?;
                let quantity = determine_quantity(
                    &ticker,
                    command.sizing,
                    price,
                    command.leverage_multiplier,
                    available,
                )?;
                let stop_loss =
                    determine_stop_loss(&ticker, command.direction, price, command.stop_loss);

                let placed = exchange
                    .place_order(PlaceOrderRequest {
                        quote_asset: command.quote_asset.clone(),
                        base_asset: command.base_asset.clone(),
                        side: command.direction.entry_side(),
                        order_type: command.order_type,
                        price,
                        quantity,
                        stop_loss,
                        take_profit: None,
                        reduce_only: false,
                    })
                    .await?;

                let mut position = Position::new(
                    account.id,
                    account.exchange,
                    command.quote_asset.clone(),
                    command.base_asset.clone(),
                    command.direction,
                );
                // 거래소가 절사한 수량이 기준
                position.quantity = placed.quantity;
                position.stop_loss = stop_loss;
                position.leverage_multiplier = Some(command.leverage_multiplier);
                position.leverage_type = command.leverage_type;

                let mut order = Order::new(
                    account.id,
                    0,
                    account.exchange,
                    command.quote_asset.clone(),
                    command.base_asset.clone(),
                    command.direction.entry_side(),
                    command.order_type,
                    price,
                    placed.quantity,
                );
                order.exchange_order_id = Some(placed.exchange_order_id);
                order.stop_loss = stop_loss;

                let (position, order) =
                    self.store.create_position_with_order(position, order).await?;

                info!(
                    position_id = position.id,
                    order_id = order.id,
                    direction = %position.direction,
                    quantity = %position.quantity,
                    "포지션 진입 주문 접수"
                );
                self.notifier
                    .send(&format!(
                        "{} {} {} 포지션 진입 ({}x 레버리지)",
                        position.quantity,
                        position.symbol(),
                        position.direction,
                        command.leverage_multiplier
                    ))
                    .await;

                Ok(Some((position, order)))
            }
        }
    }

    /// 포지션 청산.
    ///
    /// 거래소 보고 수량 전체를 반대 방향 reduce-only 주문으로 청산하고
    /// 주문이 끝날 때까지 잠시 대기합니다. 거래소가 플랫이거나 반대
    /// 방향이면 아무것도 하지 않습니다.
    pub async fn close_position(
        &self,
        command: ClosePositionCommand,
    ) -> Result<Option<(Position, Order)>> {
        let result = self.close_position_inner(&command).await;
        if let Err(e) = &result {
            error!(
                account_id = command.account_id,
                direction = %command.direction,
                error = %e,
                "포지션 청산 실패"
            );
            self.notifier
                .send(&format!(
                    "{}{} {} 포지션 청산 실패: {e}",
                    command.base_asset, command.quote_asset, command.direction
                ))
                .await;
        }
        result
    }

    async fn close_position_inner(
        &self,
        command: &ClosePositionCommand,
    ) -> Result<Option<(Position, Order)>> {
        if command.order_type == OrderType::Limit && command.price.is_none() {
            return Err(EngineError::InvalidCommand(
                "지정가 주문에는 가격이 필요합니다".to_string(),
            ));
        }

        let account = self.store.account(command.account_id).await?;
        let exchange = self.exchanges.get(account.exchange)?;

        let info = exchange
            .position_info(&command.quote_asset, &command.base_asset)
            .await?;

        // 저장소의 열린 포지션 (Created | Open 상태만)
        let position = self
            .store
            .find_open_position(
                command.account_id,
                &command.quote_asset,
                &command.base_asset,
                command.direction,
            )
            .await?
            .filter(|p| matches!(p.status, PositionStatus::Created | PositionStatus::Open));

        match info.direction {
            Some(existing) if existing == command.direction => {
                let mut position = position.ok_or_else(|| {
                    EngineError::InvalidState(format!(
                        "{}{} 열린 포지션 레코드를 찾을 수 없음",
                        command.base_asset, command.quote_asset
                    ))
                })?;

                let ticker = exchange
                    .ticker(&command.quote_asset, &command.base_asset)
                    .await?
                    .ok_or_else(|| {
                        EngineError::PriceUnavailable(format!(
                            "{}{} 시세 없음",
                            command.base_asset, command.quote_asset
                        ))
                    })?;

                let price = determine_price(
                    &ticker,
                    command.order_type,
                    command.price.as_ref(),
                    command.offset.as_ref(),
                )?;

                // 거래소 보고 수량 전체 청산
                let placed = exchange
                    .place_order(PlaceOrderRequest {
                        quote_asset: command.quote_asset.clone(),
                        base_asset: command.base_asset.clone(),
                        side: command.direction.exit_side(),
                        order_type: command.order_type,
                        price,
                        quantity: info.quantity,
                        stop_loss: None,
                        take_profit: None,
                        reduce_only: true,
                    })
                    .await?;

                position.status = PositionStatus::CloseInProgress;
                position.updated_at = Utc::now();
                self.store.update_position(&position).await?;

                let mut order = Order::new(
                    account.id,
                    position.id,
                    account.exchange,
                    command.quote_asset.clone(),
                    command.base_asset.clone(),
                    command.direction.exit_side(),
                    command.order_type,
                    price,
                    placed.quantity,
                );
                order.exchange_order_id = Some(placed.exchange_order_id);
                order.reduce_only = true;
                let order = self.store.insert_order(order).await?;

                info!(
                    position_id = position.id,
                    order_id = order.id,
                    quantity = %placed.quantity,
                    "포지션 청산 주문 접수"
                );
                self.notifier
                    .send(&format!(
                        "{} {} {} 포지션 청산 시작",
                        placed.quantity,
                        position.symbol(),
                        position.direction
                    ))
                    .await;

                // 체결을 잠시 대기 (시간 초과는 정합성 루프가 이어받음)
                let order = self
                    .orders
                    .wait_for_order_completion(order, OrderWaitType::Fill)
                    .await?;

                let position = self.store.position(position.id).await?;
                Ok(Some((position, order)))
            }
            None => {
                info!(
                    symbol = %format!("{}{}", command.base_asset, command.quote_asset),
                    direction = %command.direction,
                    "거래소 포지션이 플랫이어서 청산할 것이 없음"
                );
                if let Some(position) = position {
                    warn!(
                        position_id = position.id,
                        "거래소는 플랫인데 저장소에 열린 포지션 레코드가 남아 있음"
                    );
                }
                Ok(None)
            }
            Some(existing) => {
                info!(
                    requested = %command.direction,
                    actual = %existing,
                    "반대 방향 포지션이라 청산 생략"
                );
                Ok(None)
            }
        }
    }

    /// 정합성 루프 한 틱: 비종결 포지션 전체를 거래소와 대조합니다.
    pub async fn update_positions(&self) -> Result<()> {
        let positions = self.store.active_positions().await?;
        for position in positions {
            if let Err(e) = self.update_position(position.id).await {
                error!(
                    position_id = position.id,
                    error = %e,
                    "포지션 갱신 실패, 다음 포지션으로 진행"
                );
            }
        }
        Ok(())
    }

    /// 포지션 하나를 거래소 기준으로 갱신합니다.
    ///
    /// 상태 머신 전이와 손익 재계산을 수행합니다. 종결 포지션은 다시
    /// 건드리지 않으며, 상태가 바뀐 경우에만 `PositionStatusChanged`를
    /// 정확히 한 번 발행합니다.
    pub async fn update_position(&self, position_id: i64) -> Result<Position> {
        let _guard = self.update_lock.lock().await;

        let mut position = self.store.position(position_id).await?;
        if position.is_complete() {
            return Ok(position);
        }

        let exchange = self.exchanges.get(position.exchange)?;
        let info = exchange
            .position_info(&position.quote_asset, &position.base_asset)
            .await?;
        let orders = self.store.orders_for_position(position.id).await?;

        let previous_status = position.status;
        let mut status_changed = false;

        // 거래소가 같은 포지션을 보고 있을 때만 청산가를 채택
        if info.direction == Some(position.direction)
            && info.quantity == position.quantity
            && info.leverage_multiplier == position.leverage_multiplier
        {
            position.liquidation_price = info.liquidation_price;
        }

        if info.liquidated {
            position.complete(PositionStatus::Liquidated);
            status_changed = true;
        } else {
            match position.status {
                PositionStatus::Created => {
                    // 진입 주문이 하나라도 체결되면 Open,
                    // 전부 체결 없이 취소/거부되면 바로 Closed
                    let entry_orders: Vec<&Order> = orders
                        .iter()
                        .filter(|o| o.is_entry_for(position.direction))
                        .collect();
                    let any_fills = entry_orders
                        .iter()
                        .any(|o| o.quantity_filled > Decimal::ZERO);
                    let all_cancelled_no_fills = entry_orders.iter().all(|o| {
                        matches!(
                            o.status,
                            perp_core::OrderStatus::Rejected | perp_core::OrderStatus::Cancelled
                        ) && o.quantity_filled.is_zero()
                    });

                    if all_cancelled_no_fills {
                        position.complete(PositionStatus::Closed);
                        status_changed = true;
                    } else if any_fills {
                        position.status = PositionStatus::Open;
                        status_changed = true;
                    }
                }
                PositionStatus::CloseInProgress | PositionStatus::StopLossInProgress => {
                    let all_exits_complete = orders
                        .iter()
                        .filter(|o| o.is_exit_for(position.direction))
                        .all(Order::is_complete);
                    if all_exits_complete {
                        let terminal = if position.status == PositionStatus::CloseInProgress {
                            PositionStatus::Closed
                        } else {
                            PositionStatus::StopLoss
                        };
                        position.complete(terminal);
                        status_changed = true;
                    }
                }
                _ => {}
            }
        }

        // 손익 재계산 (상태 변화와 무관하게 매 틱)
        match exchange
            .ticker(&position.quote_asset, &position.base_asset)
            .await?
        {
            Some(ticker) => match pnl::calculate(&position, &orders, ticker.last) {
                Ok(result) => {
                    position.unrealized_pnl = result.unrealized_pnl;
                    position.unrealized_pnl_percent = result.unrealized_pnl_percent;
                    position.realized_pnl = result.realized_pnl;
                    position.realized_pnl_percent = result.realized_pnl_percent;
                }
                Err(e) => {
                    error!(position_id = position.id, error = %e, "손익 계산 실패");
                }
            },
            None => {
                error!(position_id = position.id, "시세가 없어 손익 계산 생략");
            }
        }

        position.updated_at = Utc::now();
        self.store.update_position(&position).await?;

        if status_changed {
            debug!(
                position_id = position.id,
                previous = %previous_status,
                current = %position.status,
                "포지션 상태 변경"
            );
            self.events.publish(EngineEvent::PositionStatusChanged {
                position: position.clone(),
                previous: previous_status,
            });

            if position.is_complete() {
                self.notify_completed(&position).await;
            }
        }

        Ok(position)
    }

    /// 거래소 체결 스트림이 손절 발동을 보고했을 때 호출됩니다.
    ///
    /// 거래소가 생성한 청산 주문을 저장소에 등록하고 포지션을
    /// StopLossInProgress로 전이합니다.
    pub async fn register_stop_loss_order(
        &self,
        position_id: i64,
        exchange_order_id: &str,
        quantity: Decimal,
    ) -> Result<Order> {
        let mut position = self.store.position(position_id).await?;
        if position.is_complete() {
            return Err(EngineError::InvalidState(format!(
                "종결된 포지션 {position_id}에 손절 주문 등록 불가"
            )));
        }

        let mut order = Order::new(
            position.account_id,
            position.id,
            position.exchange,
            position.quote_asset.clone(),
            position.base_asset.clone(),
            position.direction.exit_side(),
            OrderType::Market,
            None,
            quantity,
        );
        order.exchange_order_id = Some(exchange_order_id.to_string());
        order.reduce_only = true;
        let order = self.store.insert_order(order).await?;

        let previous_status = position.status;
        position.status = PositionStatus::StopLossInProgress;
        position.updated_at = Utc::now();
        self.store.update_position(&position).await?;

        warn!(
            position_id = position.id,
            order_id = order.id,
            "손절 발동, 청산 주문 등록"
        );
        self.events.publish(EngineEvent::PositionStatusChanged {
            position: position.clone(),
            previous: previous_status,
        });
        self.notifier
            .send(&format!(
                "{} {} 포지션 손절 발동",
                position.symbol(),
                position.direction
            ))
            .await;

        Ok(order)
    }

    /// 포지션 단건 조회.
    pub async fn get_position(&self, position_id: i64) -> Result<Position> {
        Ok(self.store.position(position_id).await?)
    }

    /// 포지션 목록 조회.
    pub async fn list_positions(&self, filter: &PositionFilter) -> Result<Vec<Position>> {
        Ok(self.store.list_positions(filter).await?)
    }

    /// 종결 알림: 실현 손익과 누적 승률을 함께 보냅니다.
    async fn notify_completed(&self, position: &Position) {
        let status_text = match position.status {
            PositionStatus::Closed => "청산 완료",
            PositionStatus::StopLoss => "손절 완료",
            PositionStatus::Liquidated => "강제 청산됨",
            _ => return,
        };

        let mut message = format!(
            "{} {} 포지션 {status_text}: 실현 손익 {} {} ({}%)",
            position.symbol(),
            position.direction,
            position.realized_pnl,
            position.quote_asset,
            position.realized_pnl_percent
        );

        match self.completed_accuracy(position).await {
            Ok(accuracy) if accuracy.filled_positions > 0 => {
                message.push_str(&format!(
                    "\n승률 {}% ({}승 {}패)",
                    accuracy.accuracy, accuracy.winners, accuracy.losers
                ));
            }
            Ok(_) => {}
            Err(e) => {
                error!(position_id = position.id, error = %e, "승률 계산 실패");
            }
        }

        self.notifier.send(&message).await;
    }

    /// 같은 계좌/자산쌍의 종결 포지션 전체에 대한 승률.
    async fn completed_accuracy(&self, position: &Position) -> Result<pnl::Accuracy> {
        let terminal = self
            .store
            .terminal_positions(position.account_id, &position.quote_asset, &position.base_asset)
            .await?;

        let mut with_orders = Vec::with_capacity(terminal.len());
        for p in terminal {
            let orders = self.store.orders_for_position(p.id).await?;
            with_orders.push((p, orders));
        }
        Ok(pnl::calculate_accuracy(&with_orders))
    }
}

// ====== 가격/수량/손절 결정 ======

/// 지정가 주문의 주문 가격을 결정합니다. 시장가 주문은 `None`.
fn determine_price(
    ticker: &Ticker,
    order_type: OrderType,
    price: Option<&PriceSpec>,
    offset: Option<&Offset>,
) -> Result<Option<Decimal>> {
    if order_type != OrderType::Limit {
        return Ok(None);
    }
    let spec = price.ok_or_else(|| {
        EngineError::InvalidCommand("지정가 주문에는 가격이 필요합니다".to_string())
    })?;

    let mut price = match spec {
        PriceSpec::Absolute(value) => *value,
        PriceSpec::Reference(ReferencePrice::Bid) => ticker.bid,
        PriceSpec::Reference(ReferencePrice::Ask) => ticker.ask,
        PriceSpec::Reference(ReferencePrice::Last) => ticker.last,
    };

    if let Some(offset) = offset {
        price += match offset {
            Offset::Absolute(value) => *value,
            Offset::Percent(percent) => price / Decimal::ONE_HUNDRED * percent,
        };
    }

    Ok(Some(price))
}

/// 주문 수량(기초 자산)을 결정합니다.
///
/// 비용 기반 지정은 진입가(지정가 또는 현재가)로 나눠 수량으로
/// 환산합니다. 백분율 비용은 레버리지 배수 한도까지 허용됩니다.
fn determine_quantity(
    ticker: &Ticker,
    sizing: Sizing,
    price: Option<Decimal>,
    leverage_multiplier: Decimal,
    available_quote: Decimal,
) -> Result<Decimal> {
    let entry_price = price.unwrap_or(ticker.last);
    match sizing {
        Sizing::Quantity(quantity) => Ok(quantity),
        Sizing::Cost(cost) => Ok(cost / entry_price),
        Sizing::CostPercent(percent) => {
            let max_percent = Decimal::ONE_HUNDRED * leverage_multiplier;
            if percent <= Decimal::ZERO || percent > max_percent {
                return Err(EngineError::QuantityUnavailable(format!(
                    "비용 백분율은 0%보다 크고 {max_percent}% 이하여야 합니다"
                )));
            }
            let cost = available_quote * (percent / Decimal::ONE_HUNDRED);
            Ok(cost / entry_price)
        }
    }
}

/// 손절 가격을 결정합니다.
///
/// 백분율 지정은 진입가 기준입니다. 롱은 `entry * (100 + pct) / 100`
/// (pct가 음수일 때 진입가 아래), 숏은 `entry * (100 - pct) / 100`.
fn determine_stop_loss(
    ticker: &Ticker,
    direction: Direction,
    price: Option<Decimal>,
    spec: Option<StopLossSpec>,
) -> Option<Decimal> {
    let spec = spec?;
    match spec {
        StopLossSpec::Absolute(value) => Some(value),
        StopLossSpec::Percent(percent) => {
            let entry_price = price.unwrap_or(ticker.last);
            let factor = match direction {
                Direction::Long => Decimal::ONE_HUNDRED + percent,
                Direction::Short => Decimal::ONE_HUNDRED - percent,
            };
            Some(entry_price * factor / Decimal::ONE_HUNDRED)
        }
    }
}

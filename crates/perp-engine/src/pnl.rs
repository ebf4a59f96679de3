//! 손익(PnL)과 승률 계산.
//!
//! 평균 단가 방식으로 실현/미실현 손익을 계산합니다. 저장소나 거래소에
//! 직접 접근하지 않는 순수 함수이므로 그대로 단위 테스트할 수 있습니다.

use rust_decimal::Decimal;
use thiserror::Error;

use perp_core::{truncate_to_decimal_places, Order, Position};

/// 손익률 표기 자릿수.
const PERCENT_DECIMAL_PLACES: u32 = 4;

/// 손익 계산 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfitAndLoss {
    /// 진입 주문 체결 수량 합계
    pub quantity_filled: Decimal,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 미실현 손익률 (%) - 소수점 4자리 내림 절사
    pub unrealized_pnl_percent: Decimal,
    /// 실현 손익
    pub realized_pnl: Decimal,
    /// 실현 손익률 (%) - 소수점 4자리 내림 절사
    pub realized_pnl_percent: Decimal,
}

/// 승률 계산 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accuracy {
    /// 승률 (%) - 소수점 4자리 내림 절사
    pub accuracy: Decimal,
    /// 체결된 종결 포지션 수
    pub filled_positions: usize,
    /// 수익 포지션 수 (실현 손익 >= 0)
    pub winners: usize,
    /// 손실 포지션 수
    pub losers: usize,
}

/// 손익 계산 오류.
#[derive(Debug, Error)]
pub enum PnlError {
    #[error("진입 주문이 없어 손익을 계산할 수 없음")]
    NoEntryOrders,

    #[error("체결된 주문에 가격이 없음 (주문 id {order_id})")]
    MissingPrice { order_id: i64 },
}

/// 평균 단가 방식 손익 계산.
///
/// `orders`는 포지션의 전체 주문, `last_price`는 현재 시세의 종가입니다.
/// 진입 주문 누적 수량은 방향 부호를 곱해 관리하므로 롱/숏이 같은
/// 계산식을 공유합니다. 가격이 없는 주문은 체결분이 없으면 건너뛰고,
/// 체결분이 있으면 오류입니다.
pub fn calculate(
    position: &Position,
    orders: &[Order],
    last_price: Decimal,
) -> Result<ProfitAndLoss, PnlError> {
    let entry_side = position.direction.entry_side();
    let exit_side = position.direction.exit_side();
    let sign = position.direction.sign();

    // 1단계: 진입 원가 계산
    let mut quantity_filled = Decimal::ZERO;
    let mut entry_quantity = Decimal::ZERO;
    let mut entry_cost = Decimal::ZERO;
    let mut saw_entry_order = false;

    for order in orders.iter().filter(|o| o.side == entry_side) {
        saw_entry_order = true;
        match order.price {
            Some(price) if price > Decimal::ZERO => {
                quantity_filled += order.quantity_filled;
                entry_quantity += sign * order.quantity_filled;
                entry_cost += entry_quantity * price;
            }
            _ if order.quantity_filled.is_zero() => continue,
            _ => return Err(PnlError::MissingPrice { order_id: order.id }),
        }
    }

    if !saw_entry_order {
        return Err(PnlError::NoEntryOrders);
    }

    let mut unrealized_pnl = Decimal::ZERO;
    let mut unrealized_pnl_percent = Decimal::ZERO;
    let mut realized_pnl = Decimal::ZERO;
    let mut realized_pnl_percent = Decimal::ZERO;

    // 체결분이 있을 때만 손익이 존재
    if quantity_filled > Decimal::ZERO && !entry_quantity.is_zero() {
        let average_entry_price = entry_cost / entry_quantity;

        // 2단계: 실현 손익
        let mut exit_quantity = Decimal::ZERO;
        let mut exit_amount = Decimal::ZERO;

        for order in orders.iter().filter(|o| o.side == exit_side) {
            match order.price {
                Some(price) if price > Decimal::ZERO => {
                    exit_quantity += sign * order.quantity_filled;
                    exit_amount += exit_quantity * price;
                }
                _ if order.quantity_filled.is_zero() => continue,
                _ => return Err(PnlError::MissingPrice { order_id: order.id }),
            }
        }

        let average_exit_price = if exit_quantity.is_zero() {
            Decimal::ZERO
        } else {
            exit_amount / exit_quantity
        };

        realized_pnl = (average_exit_price - average_entry_price) * exit_quantity;
        if !exit_quantity.is_zero() {
            realized_pnl_percent =
                sign * ((average_exit_price / average_entry_price) - Decimal::ONE)
                    * Decimal::ONE_HUNDRED;
        }

        // 3단계: 미실현 손익
        let remaining_quantity = entry_quantity - exit_quantity;
        unrealized_pnl = (last_price - average_entry_price) * remaining_quantity;
        if !remaining_quantity.is_zero() {
            unrealized_pnl_percent = sign
                * ((last_price / average_entry_price) - Decimal::ONE)
                * Decimal::ONE_HUNDRED;
        }
    }

    Ok(ProfitAndLoss {
        quantity_filled,
        unrealized_pnl,
        unrealized_pnl_percent: truncate_to_decimal_places(
            unrealized_pnl_percent,
            PERCENT_DECIMAL_PLACES,
        ),
        realized_pnl,
        realized_pnl_percent: truncate_to_decimal_places(
            realized_pnl_percent,
            PERCENT_DECIMAL_PLACES,
        ),
    })
}

/// 종결 포지션들의 승률 계산.
///
/// 진입 체결이 전혀 없는 포지션은 모수에서 제외합니다. 실현 손익이
/// 0 이상이면 수익 포지션으로 셉니다.
pub fn calculate_accuracy(completed: &[(Position, Vec<Order>)]) -> Accuracy {
    let filled: Vec<&Position> = completed
        .iter()
        .filter(|(position, orders)| {
            let entry_side = position.direction.entry_side();
            let entry_filled: Decimal = orders
                .iter()
                .filter(|o| o.side == entry_side)
                .map(|o| o.quantity_filled)
                .sum();
            entry_filled > Decimal::ZERO
        })
        .map(|(position, _)| position)
        .collect();

    let filled_positions = filled.len();
    let winners = filled
        .iter()
        .filter(|p| p.realized_pnl >= Decimal::ZERO)
        .count();

    let accuracy = if filled_positions > 0 {
        let ratio = Decimal::from(winners as u64) / Decimal::from(filled_positions as u64);
        truncate_to_decimal_places(ratio * Decimal::ONE_HUNDRED, PERCENT_DECIMAL_PLACES)
    } else {
        Decimal::ZERO
    };

    Accuracy {
        accuracy,
        filled_positions,
        winners,
        losers: filled_positions - winners,
    }
}

#[cfg(test)]
mod tests {
    use perp_core::{
        Direction, ExchangeKind, OrderStatus, OrderType, PositionStatus, Side,
    };
    use rust_decimal_macros::dec;

    use super::*;

    fn position(direction: Direction) -> Position {
        let mut p = Position::new(1, ExchangeKind::Paper, "USDT", "BTC", direction);
        p.id = 1;
        p
    }

    fn filled_order(side: Side, price: Decimal, quantity: Decimal) -> Order {
        let mut order = Order::new(
            1,
            1,
            ExchangeKind::Paper,
            "USDT",
            "BTC",
            side,
            OrderType::Limit,
            Some(price),
            quantity,
        );
        order.quantity_filled = quantity;
        order.status = OrderStatus::Filled;
        order
    }

    #[test]
    fn test_long_round_trip() {
        let position = position(Direction::Long);
        let orders = vec![
            filled_order(Side::Buy, dec!(100), dec!(10)),
            filled_order(Side::Sell, dec!(110), dec!(10)),
        ];

        let pnl = calculate(&position, &orders, dec!(110)).unwrap();
        assert_eq!(pnl.quantity_filled, dec!(10));
        assert_eq!(pnl.realized_pnl, dec!(100));
        assert_eq!(pnl.realized_pnl_percent, dec!(10.0000));
        assert_eq!(pnl.unrealized_pnl, dec!(0));
        assert_eq!(pnl.unrealized_pnl_percent, dec!(0));
    }

    #[test]
    fn test_short_round_trip() {
        let position = position(Direction::Short);
        let orders = vec![
            filled_order(Side::Sell, dec!(100), dec!(10)),
            filled_order(Side::Buy, dec!(90), dec!(10)),
        ];

        let pnl = calculate(&position, &orders, dec!(90)).unwrap();
        assert_eq!(pnl.realized_pnl, dec!(100));
        assert_eq!(pnl.realized_pnl_percent, dec!(10.0000));
        assert_eq!(pnl.unrealized_pnl, dec!(0));
    }

    #[test]
    fn test_open_long_unrealized() {
        let position = position(Direction::Long);
        let orders = vec![filled_order(Side::Buy, dec!(100), dec!(2))];

        let pnl = calculate(&position, &orders, dec!(105)).unwrap();
        assert_eq!(pnl.realized_pnl, dec!(0));
        assert_eq!(pnl.unrealized_pnl, dec!(10));
        assert_eq!(pnl.unrealized_pnl_percent, dec!(5.0000));
    }

    #[test]
    fn test_percent_truncates_down() {
        let position = position(Direction::Long);
        let orders = vec![filled_order(Side::Buy, dec!(3), dec!(3))];

        // (3.1/3 - 1) * 100 = 3.3333... → 3.3333으로 절사
        let pnl = calculate(&position, &orders, dec!(3.1)).unwrap();
        assert_eq!(pnl.unrealized_pnl_percent, dec!(3.3333));
    }

    #[test]
    fn test_no_entry_orders_is_error() {
        let position = position(Direction::Long);
        let orders = vec![filled_order(Side::Sell, dec!(110), dec!(10))];

        let result = calculate(&position, &orders, dec!(110));
        assert!(matches!(result, Err(PnlError::NoEntryOrders)));
    }

    #[test]
    fn test_priceless_unfilled_order_skipped() {
        let position = position(Direction::Long);
        let mut unfilled = filled_order(Side::Buy, dec!(100), dec!(1));
        unfilled.price = None;
        unfilled.quantity_filled = Decimal::ZERO;
        let orders = vec![unfilled, filled_order(Side::Buy, dec!(100), dec!(1))];

        let pnl = calculate(&position, &orders, dec!(100)).unwrap();
        assert_eq!(pnl.quantity_filled, dec!(1));
    }

    #[test]
    fn test_priceless_filled_order_is_error() {
        let position = position(Direction::Long);
        let mut bad = filled_order(Side::Buy, dec!(100), dec!(1));
        bad.price = None;
        let orders = vec![bad];

        let result = calculate(&position, &orders, dec!(100));
        assert!(matches!(result, Err(PnlError::MissingPrice { .. })));
    }

    #[test]
    fn test_zero_fill_position_has_zero_pnl() {
        let position = position(Direction::Long);
        let mut unfilled = filled_order(Side::Buy, dec!(100), dec!(1));
        unfilled.quantity_filled = Decimal::ZERO;
        unfilled.status = OrderStatus::Cancelled;

        let pnl = calculate(&position, &[unfilled], dec!(120)).unwrap();
        assert_eq!(pnl.quantity_filled, dec!(0));
        assert_eq!(pnl.realized_pnl, dec!(0));
        assert_eq!(pnl.unrealized_pnl, dec!(0));
    }

    fn completed_position(realized_pnl: Decimal) -> (Position, Vec<Order>) {
        let mut p = position(Direction::Long);
        p.realized_pnl = realized_pnl;
        p.status = PositionStatus::Closed;
        (p, vec![filled_order(Side::Buy, dec!(100), dec!(1))])
    }

    #[test]
    fn test_accuracy_two_winners_one_loser() {
        let completed = vec![
            completed_position(dec!(5)),
            completed_position(dec!(-3)),
            completed_position(dec!(1)),
        ];

        let accuracy = calculate_accuracy(&completed);
        assert_eq!(accuracy.filled_positions, 3);
        assert_eq!(accuracy.winners, 2);
        assert_eq!(accuracy.losers, 1);
        assert_eq!(accuracy.accuracy, dec!(66.6666));
    }

    #[test]
    fn test_accuracy_ignores_unfilled_positions() {
        let mut unfilled = completed_position(dec!(0));
        unfilled.1[0].quantity_filled = Decimal::ZERO;
        let completed = vec![unfilled, completed_position(dec!(5))];

        let accuracy = calculate_accuracy(&completed);
        assert_eq!(accuracy.filled_positions, 1);
        assert_eq!(accuracy.winners, 1);
        assert_eq!(accuracy.accuracy, dec!(100.0000));
    }

    #[test]
    fn test_accuracy_empty_set() {
        let accuracy = calculate_accuracy(&[]);
        assert_eq!(accuracy.filled_positions, 0);
        assert_eq!(accuracy.accuracy, dec!(0));
    }
}

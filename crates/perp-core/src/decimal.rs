//! Decimal 보조 함수.

use rust_decimal::Decimal;

/// 소수점 아래 `places`자리로 내림 절사합니다.
///
/// 반올림이 아니라 항상 작은 쪽으로 내립니다 (음수는 더 작은 값으로).
/// 손익률과 승률 표기는 전부 이 절사를 거칩니다.
pub fn truncate_to_decimal_places(value: Decimal, places: u32) -> Decimal {
    let factor = Decimal::from(10_i64.pow(places));
    (value * factor).floor() / factor
}

/// 수량을 거래소 스텝 크기의 배수로 내림 절사합니다.
///
/// 스텝이 0 이하이면 원래 값을 그대로 반환합니다.
pub fn truncate_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_truncate_positive() {
        assert_eq!(truncate_to_decimal_places(dec!(10.00009), 4), dec!(10.0000));
        assert_eq!(truncate_to_decimal_places(dec!(66.66666), 4), dec!(66.6666));
    }

    #[test]
    fn test_truncate_negative_rounds_down() {
        // floor 절사이므로 음수는 더 작은 쪽으로 갑니다.
        assert_eq!(truncate_to_decimal_places(dec!(-1.00001), 4), dec!(-1.0001));
    }

    #[test]
    fn test_truncate_to_step() {
        assert_eq!(truncate_to_step(dec!(0.1279), dec!(0.001)), dec!(0.127));
        assert_eq!(truncate_to_step(dec!(5), dec!(0)), dec!(5));
    }
}

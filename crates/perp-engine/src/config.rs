//! 환경변수 기반 설정 모듈.

use std::time::Duration;

use crate::error::{EngineError, Result};

/// 엔진 전체 설정.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 데이터베이스 URL (PostgreSQL 저장소 사용 시)
    pub database_url: Option<String>,
    /// 주문 완료 대기 설정
    pub order_wait: OrderWaitConfig,
    /// 정합성 루프 설정
    pub reconcile: ReconcileConfig,
    /// 부분 체결 경고 설정
    pub fill_warning: FillWarningConfig,
}

/// 주문 완료 대기 설정.
#[derive(Debug, Clone)]
pub struct OrderWaitConfig {
    /// 최대 대기 시간
    pub timeout: Duration,
    /// 폴링 간격
    pub poll_interval: Duration,
}

/// 정합성 루프 주기 설정. 0이면 해당 루프를 비활성화합니다.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// 주문 정합성 루프 주기 (초)
    pub update_orders_interval_secs: u64,
    /// 포지션 정합성 루프 주기 (초)
    pub update_positions_interval_secs: u64,
}

/// 부분 체결 경고 설정.
#[derive(Debug, Clone)]
pub struct FillWarningConfig {
    /// 미완료 주문이 이 시간(분) 이상 열려 있으면 경고
    pub threshold_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            order_wait: OrderWaitConfig {
                timeout: Duration::from_secs(30),
                poll_interval: Duration::from_secs(1),
            },
            reconcile: ReconcileConfig {
                update_orders_interval_secs: 5,
                update_positions_interval_secs: 5,
            },
            fill_warning: FillWarningConfig {
                threshold_minutes: 15,
            },
        }
    }
}

impl EngineConfig {
    /// 환경변수에서 설정을 읽습니다. `.env` 파일이 있으면 먼저 로드합니다.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let timeout_secs: u64 = env_var_parse("ORDER_WAIT_TIMEOUT_SECS", 30);
        let poll_secs: u64 = env_var_parse("ORDER_WAIT_INTERVAL_SECS", 1);
        if poll_secs == 0 {
            return Err(EngineError::Config(
                "ORDER_WAIT_INTERVAL_SECS는 0일 수 없습니다".to_string(),
            ));
        }

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            order_wait: OrderWaitConfig {
                timeout: Duration::from_secs(timeout_secs),
                poll_interval: Duration::from_secs(poll_secs),
            },
            reconcile: ReconcileConfig {
                update_orders_interval_secs: env_var_parse("UPDATE_ORDERS_INTERVAL_SECS", 5),
                update_positions_interval_secs: env_var_parse(
                    "UPDATE_POSITIONS_INTERVAL_SECS",
                    5,
                ),
            },
            fill_warning: FillWarningConfig {
                threshold_minutes: env_var_parse("FILL_WARNING_THRESHOLD_MINS", 15),
            },
        })
    }
}

fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.order_wait.timeout, Duration::from_secs(30));
        assert_eq!(config.order_wait.poll_interval, Duration::from_secs(1));
        assert_eq!(config.fill_warning.threshold_minutes, 15);
    }
}

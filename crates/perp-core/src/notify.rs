//! 운영 알림 인터페이스.

use async_trait::async_trait;

/// 알림 채널 트레이트. 텔레그램/슬랙 등 구현체를 주입합니다.
///
/// 알림 실패는 엔진 동작을 막지 않으므로 구현체는 오류를 자체
/// 로깅으로 처리하고 반환하지 않습니다.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str);
}

/// 알림을 보내지 않는 구현 (테스트와 로컬 실행용).
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, message: &str) {
        tracing::debug!("알림 생략: {message}");
    }
}

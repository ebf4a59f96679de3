//! 계좌 엔티티.
//!
//! 거래소 API 자격증명을 가진 하나의 거래소 연결을 표현합니다.
//! 계좌의 생성/수정/암호화는 외부 협력자의 책임이며,
//! 엔진은 계좌를 읽기 전용으로만 사용합니다.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use super::ExchangeKind;

/// 거래소 계좌.
///
/// API 자격증명은 `secrecy::SecretString`으로 감싸 로그/디버그 출력에
/// 노출되지 않습니다.
#[derive(Debug)]
pub struct Account {
    /// 데이터베이스 id
    pub id: i64,
    /// 계좌 이름 (운영자 알림에 사용)
    pub name: String,
    /// 연결된 거래소
    pub exchange: ExchangeKind,
    /// 기준 견적 자산 (예: "USDT")
    pub quote_asset: String,
    /// API 키
    pub api_key: Option<SecretString>,
    /// API 시크릿
    pub api_secret: Option<SecretString>,
    /// API 패스프레이즈 (거래소별 선택)
    pub api_passphrase: Option<SecretString>,
    /// 생성 시각
    pub created_at: DateTime<Utc>,
    /// 수정 시각
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// 새 계좌 생성 (자격증명 없이).
    pub fn new(id: i64, name: impl Into<String>, exchange: ExchangeKind, quote_asset: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            exchange,
            quote_asset: quote_asset.into(),
            api_key: None,
            api_secret: None,
            api_passphrase: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// SecretString은 CloneableSecret 구현이 없어 수동 Clone이 필요합니다.
impl Clone for Account {
    fn clone(&self) -> Self {
        let clone_secret = |s: &Option<SecretString>| {
            s.as_ref()
                .map(|v| SecretString::from(v.expose_secret().to_owned()))
        };
        Self {
            id: self.id,
            name: self.name.clone(),
            exchange: self.exchange,
            quote_asset: self.quote_asset.clone(),
            api_key: clone_secret(&self.api_key),
            api_secret: clone_secret(&self.api_secret),
            api_passphrase: clone_secret(&self.api_passphrase),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_debug_redacts_credentials() {
        let mut account = Account::new(1, "main", ExchangeKind::Paper, "USDT");
        account.api_key = Some(SecretString::from("super-secret-key".to_string()));

        let debug = format!("{:?}", account);
        assert!(!debug.contains("super-secret-key"));
    }

    #[test]
    fn test_account_clone_preserves_credentials() {
        let mut account = Account::new(1, "main", ExchangeKind::Paper, "USDT");
        account.api_key = Some(SecretString::from("key".to_string()));

        let cloned = account.clone();
        assert_eq!(cloned.api_key.unwrap().expose_secret(), "key");
    }
}

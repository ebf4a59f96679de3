//! 저장소 구현.
//!
//! 운영 환경은 PostgreSQL, 테스트는 인메모리 구현을 사용합니다.
//! 두 구현 모두 `perp_core::Store` 트레이트를 구현합니다.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

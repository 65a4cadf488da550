//! IdGenerator port - リクエスト ID 生成の抽象化
//!
//! Clock を使って ULID を生成する。テストでは FixedClock で timestamp 部分を固定できる。

use crate::domain::RequestId;
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn next_request_id(&self) -> RequestId;
}

/// ULID ベースの ID 生成器
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn next_request_id(&self) -> RequestId {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        RequestId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::ScheduleId;
use crate::ports::Clock;

/// IdGenerator は複数プロセスで衝突しない ScheduleId を生成
pub trait IdGenerator: Send + Sync {
    fn generate_schedule_id(&self) -> ScheduleId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// FixedClock を渡せば timestamp 部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_schedule_id(&self) -> ScheduleId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        ScheduleId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

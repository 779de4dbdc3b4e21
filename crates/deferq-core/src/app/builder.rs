//! SchedulerServiceBuilder - サービスの構築とワイヤリング
//!
//! 起動前に不足や不正な設定を検出します（Fail-fast 設計）。

use std::sync::Arc;

use super::scheduler_service::SchedulerService;
use crate::config::{ConfigError, SchedulerConfig};
use crate::ports::{Clock, IdGenerator, MessageBus, ScheduleStore, SystemClock, UlidGenerator};
use crate::typed::Conventions;

/// SchedulerServiceBuilder は SchedulerService を構築
///
/// # 使用例
/// ```ignore
/// let service = SchedulerServiceBuilder::new()
///     .store(Arc::new(SqliteScheduleStore::open(&config.database_path, config.delete_timeout()).await?))
///     .bus(bus)
///     .config(config)
///     .build()?;
/// ```
///
/// # 既定値
/// - clock: SystemClock
/// - ids: UlidGenerator（clock ベース）
/// - conventions: プレフィックスなし
#[derive(Default)]
pub struct SchedulerServiceBuilder {
    store: Option<Arc<dyn ScheduleStore>>,
    bus: Option<Arc<dyn MessageBus>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    conventions: Conventions,
    config: SchedulerConfig,
}

/// BuildError はサービス構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no schedule store configured")]
    MissingStore,

    #[error("no message bus configured")]
    MissingBus,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl SchedulerServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn conventions(mut self, conventions: Conventions) -> Self {
        self.conventions = conventions;
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<SchedulerService, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let bus = self.bus.ok_or(BuildError::MissingBus)?;
        self.config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(Arc::clone(&clock))),
        };

        Ok(SchedulerService::new(
            store,
            bus,
            clock,
            ids,
            self.conventions,
            self.config,
        ))
    }
}

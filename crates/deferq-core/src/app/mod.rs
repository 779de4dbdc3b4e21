//! App - アプリケーション層
//!
//! ports を組み合わせてスケジューリングサービスを実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerServiceBuilder**: サービスの構築とワイヤリング
//! - **SchedulerService**: 各ループの起動・停止
//! - **CommandLoop**: schedule / cancel コマンドの消費
//! - **PublishLoop**: 期限の来たスケジュールの再 publish
//! - **ReaperLoop**: publish timeout 切れの回収

pub mod builder;
pub mod command_loop;
pub mod publish_loop;
pub mod reaper_loop;
pub mod scheduler_service;
pub mod status;

pub use self::builder::{BuildError, SchedulerServiceBuilder};
pub use self::command_loop::CommandLoop;
pub use self::publish_loop::PublishLoop;
pub use self::reaper_loop::ReaperLoop;
pub use self::scheduler_service::{SchedulerService, ServiceState};
pub use self::status::ScheduleCounts;

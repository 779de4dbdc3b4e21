//! Ports - 抽象化レイヤー
//!
//! 外部システム（永続ストア、メッセージバス、時計）へのインターフェースを定義します。
//!
//! # 設計原則
//! - ScheduleStore が source of truth（正本）
//! - プロデューサとサービスはバス経由でのみ通信する（ストアを共有しない）

pub mod clock;
pub mod id_generator;
pub mod message_bus;
pub mod schedule_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::message_bus::{MessageBus, Subscription};
pub use self::schedule_store::ScheduleStore;

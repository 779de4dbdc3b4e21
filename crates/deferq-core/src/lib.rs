//! deferq-core
//!
//! Durable, at-least-once delayed message delivery over a message bus.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, schedule, message, command, errors）
//! - **ports**: 抽象化レイヤー（ScheduleStore, MessageBus, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryScheduleStore, SqliteScheduleStore, InMemoryBus）
//! - **typed**: 型付きメッセージ API（Message trait, MessageSerializer, Conventions）
//! - **client**: プロデューサ側の FuturePublisher
//! - **app**: スケジューリングサービス（builder, command / publish / reaper loop）
//! - **config**: SchedulerConfig

pub mod app;
pub mod client;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use self::app::{SchedulerService, SchedulerServiceBuilder};
pub use self::client::{BlockingFuturePublisher, FuturePublisher};
pub use self::config::SchedulerConfig;
pub use self::domain::SchedulerError;

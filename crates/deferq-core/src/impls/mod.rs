//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryScheduleStore**: テスト・デモ用のストア（非永続）
//! - **SqliteScheduleStore**: 単一ファイルの永続ストア（複数プロセスで共有可）
//! - **InMemoryBus**: ブローカー無しで動くプロセス内バス

pub mod inmem_bus;
pub mod inmem_store;
pub mod sqlite_store;

pub use self::inmem_bus::InMemoryBus;
pub use self::inmem_store::InMemoryScheduleStore;
pub use self::sqlite_store::SqliteScheduleStore;

//! Message trait - 型付きメッセージの定義
//!
//! `TYPE` がメッセージ型の識別子（binding key / type name）になり、
//! そこからエクスチェンジ名やルーティングが決まります。

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Message は型と type name を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: u64,
/// }
///
/// impl Message for OrderPlaced {
///     const TYPE: &'static str = "shop.order.placed.v1";
/// }
/// ```
///
/// # 命名規約
/// - `{namespace}.{domain}.{event}.v{major}`
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type identity, also the default exchange name.
    const TYPE: &'static str;

    /// Whether the broker should persist this message to disk.
    const PERSISTENT: bool = true;
}

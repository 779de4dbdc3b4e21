//! Typed - 型付きメッセージ API
//!
//! 型（`Message`）からシリアライズ結果と宛先を決めるので、
//! プロデューサは文字列のエクスチェンジ名を直接扱いません。

pub mod codec;
pub mod conventions;
pub mod message;

pub use self::codec::{MessageSerializer, SerializedMessage};
pub use self::conventions::Conventions;
pub use self::message::Message;

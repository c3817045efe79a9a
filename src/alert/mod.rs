//! アラート通知システム
//!
//! ルール駆動のマルチチャンネル通知。リトライ・重複抑制付きの
//! ベストエフォート配送。

mod channel;
mod dispatcher;
mod types;

pub use channel::{build_channels, AlertChannel, EmailChannel, SlackChannel, WebhookChannel};
pub use dispatcher::{AlertDispatcher, DispatcherConfig};
pub use types::{AlertRule, ChannelKind, DeliveryResult};

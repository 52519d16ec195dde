//! `arena_node` 协调节点核心库。
//!
//! 本 Crate 实现 RoverArena 多设备通道/会话协调层，中枢与叶子设备共用同一套代码，
//! 运行时按拓扑中的设备角色决定行为。
//!
//! 主要模块包括：
//! - `config`: 应用配置的加载与默认值。
//! - `error`: 启动阶段错误 `AppError` 与单条消息错误 `ChannelError`。
//! - `channels`: 子通道、处理器注册表、通道复用器。
//! - `state`: 设备状态表与星型传播协议。
//! - `session`: 服务发布、连接建立、断线处理与重连。
//! - `command_router`: 点对点命令的分发。
//! - `image_feed`: 图像帧的接收方计算与限速发送。
//! - `heartbeat_monitor`: 服务端连接的超时检测。
//! - `node`: 把以上模块组装成 `ArenaNode`。

pub mod channels;
pub mod command_router;
pub mod config;
pub mod error;
pub mod heartbeat_monitor;
pub mod image_feed;
pub mod node;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use command_router::{ArenaActions, CommandRouter, NoopArenaActions};
pub use error::{AppError, ChannelError};
pub use node::ArenaNode;

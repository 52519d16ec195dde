//! `arena_transport` 是 RoverArena 设备间通信的传输层 crate。
//!
//! 它把底层的服务发现与有序字节流（WebSocket over TCP）封装成上层会话管理器
//! 可以直接使用的原语。
//!
//! 主要模块包括：
//! - `frame`: 线路格式，子通道帧 `ChannelFrame` 与控制信封 `ControlEnvelope`。
//! - `connection`: 服务端与客户端共用的读写辅助函数。
//! - `queue`: 图像子通道使用的有界“丢弃最旧”队列。
//! - `discovery`: 服务目录（发布、浏览、撤回）。
//! - `error`: 统一错误类型 `TransportError`。
//! - `server`: 服务端监听与握手。
//! - `client`: 客户端连接。

pub mod client;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod queue;
pub mod server;

pub use discovery::ServiceDirectory;
pub use error::TransportError;
pub use frame::{ChannelFrame, ControlEnvelope, WireMessage};
pub use queue::FrameQueue;

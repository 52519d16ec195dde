// arena_transport/src/server/mod.rs

//! 服务端模块。
//!
//! 负责在指定地址上监听、完成 WebSocket 握手，并把每条新连接交给上层回调处理。
//! 上层（`arena_node` 的会话管理器）在回调中完成设备宣告、子通道挂载与读写循环。

pub mod transport; // 服务端传输层：监听与接受连接

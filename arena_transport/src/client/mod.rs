// arena_transport/src/client/mod.rs

//! 客户端模块。
//!
//! 负责连接到已发现的服务地址并完成 WebSocket 握手。

pub mod transport; // 客户端传输层：建立连接

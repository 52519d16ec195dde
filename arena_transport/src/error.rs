// arena_transport/src/error.rs

//! 定义传输库相关的错误类型。

use std::net::SocketAddr;

use thiserror::Error; // 引入 thiserror 来简化错误类型的定义

/// 传输库的统一错误类型。
#[derive(Error, Debug)]
pub enum TransportError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 当 serde 反序列化失败时返回。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// 二进制帧携带了未知的内容类型标识符。
    #[error("未知的子通道标识符: {0}")]
    UnknownContentType(u8),

    /// 收到空的二进制帧，无法读取子通道标识符。
    #[error("收到空的二进制帧")]
    EmptyFrame,

    /// WebSocket 协议相关的错误，例如连接问题、握手失败。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 监听地址绑定失败。
    #[error("无法绑定监听地址 {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 连接建立后未按约定完成设备宣告。
    #[error("握手失败 ({peer}): {reason}")]
    HandshakeFailed { peer: SocketAddr, reason: String },

    /// 连接或握手超时。
    #[error("连接超时")]
    ConnectionTimeout,

    /// 无效的 URL 格式。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 未连接错误，当尝试在未建立连接时进行操作。
    #[error("未连接")]
    NotConnected,
}

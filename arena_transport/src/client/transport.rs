// arena_transport/src/client/transport.rs

//! 客户端传输层核心逻辑。
//!
//! 提供连接到已发现服务地址的能力。连接成功后，WebSocket 流被拆分为发送端与接收端，
//! 封装在 `ClientConnection` 中交给上层的会话管理器。

use std::net::SocketAddr;

use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url; // 用于构造和校验连接 URL

use crate::connection::{WireSink, WireStream, send_wire_message};
use crate::error::TransportError;
use crate::frame::WireMessage;

/// 客户端连接成功后返回的流类型。
pub type ClientWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 一个活动的客户端连接。
pub struct ClientConnection {
    /// 用于向服务端发送消息的发送端。
    pub ws_sender: WireSink<MaybeTlsStream<TcpStream>>,
    /// 用于从服务端接收消息的接收端。
    pub ws_receiver: WireStream<MaybeTlsStream<TcpStream>>,
    /// 服务端地址。
    pub server_addr: SocketAddr,
}

impl ClientConnection {
    /// 发送一条应用层消息。
    pub async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        send_wire_message(&mut self.ws_sender, message).await
    }
}

/// 根据服务地址构造 `ws://` URL。
pub fn service_url(addr: SocketAddr) -> Result<Url, TransportError> {
    let url_str = format!("ws://{}/", addr);
    Url::parse(&url_str).map_err(|e| TransportError::InvalidUrl(format!("无效的服务 URL '{}': {}", url_str, e)))
}

/// 异步连接到指定的服务地址。
///
/// # Returns
/// * `Ok(ClientConnection)`: 连接与握手成功。
/// * `Err(TransportError)`: URL 构造失败、TCP 连接失败或握手失败。
pub async fn connect_client(addr: SocketAddr) -> Result<ClientConnection, TransportError> {
    let url = service_url(addr)?;
    info!("客户端：开始尝试连接到服务，URL: {}", url);
    match connect_async(url.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("客户端：已成功连接到 {} (HTTP 状态码: {})", url, response.status());
            debug!("客户端：连接响应头: {:?}", response.headers());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection {
                ws_sender,
                ws_receiver,
                server_addr: addr,
            })
        }
        Err(e) => {
            error!("客户端：连接到 {} 失败，错误: {}", url, e);
            Err(TransportError::WebSocketProtocolError(e))
        }
    }
}

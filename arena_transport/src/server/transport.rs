// arena_transport/src/server/transport.rs

//! 包含服务端监听、接受连接和 WebSocket 握手逻辑。

use std::net::SocketAddr;

use log::{error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::error::TransportError;

/// `WsStream` 是一个类型别名，代表服务端经过 WebSocket 握手后的 TCP 流。
pub type WsStream = WebSocketStream<TcpStream>;

/// `ServerTransport` 负责处理服务端的监听和连接接受。
pub struct ServerTransport;

impl ServerTransport {
    /// 绑定监听地址。端口为 0 时由系统分配，可通过 `TcpListener::local_addr` 获取实际地址。
    pub async fn bind(addr: &str) -> Result<TcpListener, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailed {
                addr: addr.to_string(),
                source,
            })?;
        if let Ok(local) = listener.local_addr() {
            info!("服务端正在监听地址: {}", local);
        }
        Ok(listener)
    }

    /// 在已绑定的监听器上持续接受连接。
    ///
    /// 每条连接在独立的 Tokio 任务中完成握手，成功后调用 `on_connect`。
    /// 接受或握手失败只记录日志，不会终止监听。此函数不会主动返回，
    /// 调用方通过丢弃/中止其所在的 future 来停止监听。
    pub async fn start<F, Fut>(listener: TcpListener, on_connect: F)
    where
        F: Fn(WsStream, SocketAddr) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match listener.accept().await {
                Ok((tcp_stream, peer_addr)) => {
                    info!("从 {} 接受了新的 TCP 连接", peer_addr);
                    let on_connect_callback = on_connect.clone();
                    tokio::spawn(async move {
                        match accept_async(tcp_stream).await {
                            Ok(ws_stream) => {
                                info!("与 {} 的 WebSocket 握手成功", peer_addr);
                                on_connect_callback(ws_stream, peer_addr).await;
                            }
                            Err(e) => {
                                error!("与 {} 的 WebSocket 握手失败: {}", peer_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    // 接受失败通常是暂时性的（例如文件描述符耗尽），记录后继续监听
                    error!("接受 TCP 连接失败: {}。服务端将继续运行。", e);
                }
            }
        }
    }
}

// arena_transport/src/connection.rs

//! 服务端与客户端共用的连接读写辅助函数。
//!
//! 一条 WebSocket 连接被拆分为发送端 (`SplitSink`) 与接收端 (`SplitStream`)，
//! 两端分别由写任务与读循环持有。

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::{debug, error};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as TungsteniteError, protocol::Message},
};

use crate::error::TransportError;
use crate::frame::WireMessage;

/// 连接的发送端。
pub type WireSink<S> = SplitSink<WebSocketStream<S>, Message>;
/// 连接的接收端。
pub type WireStream<S> = SplitStream<WebSocketStream<S>>;

/// 发送一条应用层消息。
pub async fn send_wire_message<S>(sink: &mut WireSink<S>, message: WireMessage) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws_message = message.into_ws_message()?;
    sink.send(ws_message).await?;
    Ok(())
}

/// 发送 Close 帧并冲刷发送端，错误只记录不返回。
pub async fn close_sink<S>(sink: &mut WireSink<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = sink.close().await {
        debug!("关闭 WebSocket 发送端时出现错误（通常可以忽略）: {}", e);
    }
}

/// 从接收端读取下一条应用层消息。
///
/// 返回值：
/// - `Some(Ok(message))`: 成功接收并解析了一条消息。
/// - `Some(Err(TransportError::DeserializationError | UnknownContentType | EmptyFrame))`:
///   消息格式错误，调用方应丢弃该消息并继续读取。
/// - `Some(Err(TransportError::WebSocketProtocolError(_)))`: 底层连接出错，调用方应结束读取。
/// - `None`: 连接已关闭。
///
/// Ping/Pong 控制帧由底层库处理，这里直接跳过。
pub async fn receive_wire_message<S>(stream: &mut WireStream<S>) -> Option<Result<WireMessage, TransportError>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                break Some(WireMessage::from_text(&text));
            }
            Some(Ok(Message::Binary(bytes))) => {
                break Some(WireMessage::from_binary(&bytes));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                // 由 tokio-tungstenite 自动应答，继续等待业务消息
                continue;
            }
            Some(Ok(Message::Close(close_frame))) => {
                debug!("收到 Close 控制帧: {:?}", close_frame);
                break None;
            }
            Some(Ok(Message::Frame(_))) => {
                debug!("收到底层原始 Frame，正在跳过。");
                continue;
            }
            Some(Err(TungsteniteError::ConnectionClosed)) | Some(Err(TungsteniteError::AlreadyClosed)) => {
                debug!("连接已关闭 (ConnectionClosed / AlreadyClosed)。");
                break None;
            }
            Some(Err(e)) => {
                error!("从 WebSocket 流接收消息时发生底层错误: {}", e);
                break Some(Err(TransportError::WebSocketProtocolError(e)));
            }
            None => {
                debug!("WebSocket 接收流已结束。");
                break None;
            }
        }
    }
}

/// 判断接收错误是否只影响单条消息（可丢弃后继续读取）。
pub fn is_recoverable(error: &TransportError) -> bool {
    matches!(
        error,
        TransportError::DeserializationError(_)
            | TransportError::UnknownContentType(_)
            | TransportError::EmptyFrame
    )
}

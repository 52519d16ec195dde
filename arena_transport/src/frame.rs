// arena_transport/src/frame.rs

//! 定义线路上的消息格式。
//!
//! 一条设备间连接上流动两类 WebSocket 消息：
//! - **二进制消息**: 子通道帧 `ChannelFrame`。首字节为 `ContentType` 标识符 (1–4)，
//!   其余字节为该子通道的负载（结构化类型为 JSON，图像/协作数据为原始字节）。
//! - **文本消息**: 控制信封 `ControlEnvelope`，用于设备宣告 (Announce) 与心跳 (Ping/Pong)。

use arena_models::ContentType;
use chrono::Utc; // 用于生成消息时间戳
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::protocol::Message;
use uuid::Uuid; // 用于生成唯一的 message_id

use crate::error::TransportError;

/// 设备宣告消息类型：消费端连接后发送的第一条消息。
pub const ANNOUNCE_MESSAGE_TYPE: &str = "Announce";
/// 心跳请求消息类型。
pub const PING_MESSAGE_TYPE: &str = "Ping";
/// 心跳响应消息类型。
pub const PONG_MESSAGE_TYPE: &str = "Pong";

/// 设备宣告负载，携带连接方的显示名称。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AnnouncePayload {
    pub device_name: String,
}

/// 心跳请求负载（当前为空）。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PingPayload {}

/// 心跳响应负载（当前为空）。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PongPayload {}

/// 一个子通道上的一帧数据。
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFrame {
    /// 帧所属的子通道。
    pub content_type: ContentType,
    /// 不透明负载。
    pub payload: Vec<u8>,
}

impl ChannelFrame {
    pub fn new(content_type: ContentType, payload: Vec<u8>) -> Self {
        Self { content_type, payload }
    }

    /// 编码为线路字节：`[标识符][负载...]`。
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 1);
        bytes.push(self.content_type.id());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// 从线路字节解码。空消息与未知标识符都是可恢复的解码错误。
    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let (&id, payload) = bytes.split_first().ok_or(TransportError::EmptyFrame)?;
        let content_type = ContentType::from_id(id).ok_or(TransportError::UnknownContentType(id))?;
        Ok(Self {
            content_type,
            payload: payload.to_vec(),
        })
    }
}

/// 控制信封，作为文本消息在连接上传输。
///
/// # 字段
/// - `message_id`: UUID v4 字符串，用于追踪单条消息。
/// - `message_type`: 控制消息类型，例如 "Announce"、"Ping"。
/// - `payload`: 与 `message_type` 对应的 JSON 字符串负载。
/// - `timestamp`: 创建时的 UTC 毫秒时间戳。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ControlEnvelope {
    pub message_id: String,
    pub message_type: String,
    pub payload: String,
    pub timestamp: i64,
}

impl ControlEnvelope {
    /// 创建一个新的控制信封，`payload_data` 会被序列化为 JSON 字符串。
    pub fn new<T: Serialize>(message_type: &str, payload_data: &T) -> Result<Self, TransportError> {
        let payload = serde_json::to_string(payload_data)
            .map_err(|e| TransportError::SerializationError(format!("序列化控制消息载荷失败: {}", e)))?;
        Ok(Self {
            message_id: Uuid::new_v4().to_string(),
            message_type: message_type.to_string(),
            payload,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// 设备宣告。
    pub fn announce(device_name: &str) -> Result<Self, TransportError> {
        Self::new(
            ANNOUNCE_MESSAGE_TYPE,
            &AnnouncePayload {
                device_name: device_name.to_string(),
            },
        )
    }

    pub fn ping() -> Result<Self, TransportError> {
        Self::new(PING_MESSAGE_TYPE, &PingPayload {})
    }

    pub fn pong() -> Result<Self, TransportError> {
        Self::new(PONG_MESSAGE_TYPE, &PongPayload {})
    }

    /// 将载荷反序列化为目标类型 `T`。
    pub fn deserialize_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.payload).map_err(|e| {
            TransportError::DeserializationError(format!(
                "控制消息 '{}' 的载荷反序列化失败: {}, 原始载荷: '{}'",
                self.message_type, e, self.payload
            ))
        })
    }
}

/// 连接上的一条应用层消息。
#[derive(Debug, Clone)]
pub enum WireMessage {
    Frame(ChannelFrame),
    Control(ControlEnvelope),
}

impl WireMessage {
    /// 转换为底层 WebSocket 消息。
    pub fn into_ws_message(self) -> Result<Message, TransportError> {
        match self {
            WireMessage::Frame(frame) => Ok(Message::Binary(frame.encode())),
            WireMessage::Control(envelope) => {
                let text = serde_json::to_string(&envelope)
                    .map_err(|e| TransportError::SerializationError(format!("控制信封序列化失败: {}", e)))?;
                Ok(Message::Text(text))
            }
        }
    }

    /// 从文本消息解析控制信封。
    pub fn from_text(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str::<ControlEnvelope>(text)
            .map(WireMessage::Control)
            .map_err(|e| TransportError::DeserializationError(format!("文本消息不是有效的控制信封: {}", e)))
    }

    /// 从二进制消息解析子通道帧。
    pub fn from_binary(bytes: &[u8]) -> Result<Self, TransportError> {
        ChannelFrame::decode(bytes).map(WireMessage::Frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// 帧编码后首字节为子通道标识符，解码恢复原帧。
    fn test_frame_layout() {
        let frame = ChannelFrame::new(ContentType::State, b"{}".to_vec());
        let bytes = frame.encode();
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..], b"{}");
        assert_eq!(ChannelFrame::decode(&bytes).unwrap(), frame);

        // 负载为空的帧同样合法
        let empty_image = ChannelFrame::new(ContentType::Image, Vec::new());
        assert_eq!(ChannelFrame::decode(&empty_image.encode()).unwrap(), empty_image);
    }

    #[test]
    /// 空消息与未知标识符返回可恢复的错误。
    fn test_frame_decode_errors() {
        assert!(matches!(ChannelFrame::decode(&[]), Err(TransportError::EmptyFrame)));
        assert!(matches!(
            ChannelFrame::decode(&[9, 1, 2]),
            Err(TransportError::UnknownContentType(9))
        ));
    }

    #[test]
    /// 测试控制信封的创建与载荷提取。
    fn test_announce_envelope() {
        let envelope = ControlEnvelope::announce("RoverPhone").expect("创建宣告消息失败");
        assert_eq!(envelope.message_type, ANNOUNCE_MESSAGE_TYPE);
        assert!(!envelope.message_id.is_empty());
        assert!(envelope.timestamp > 0);
        let payload: AnnouncePayload = envelope.deserialize_payload().unwrap();
        assert_eq!(payload.device_name, "RoverPhone");

        // 载荷类型不匹配时返回反序列化错误
        let mismatched: Result<PingPayload, _> = ControlEnvelope::new(PING_MESSAGE_TYPE, &42u32)
            .unwrap()
            .deserialize_payload();
        assert!(matches!(mismatched, Err(TransportError::DeserializationError(_))));
    }

    #[test]
    /// 文本与二进制消息分别映射为控制信封与帧。
    fn test_wire_message_mapping() {
        let frame = WireMessage::Frame(ChannelFrame::new(ContentType::Command, vec![7]));
        match frame.into_ws_message().unwrap() {
            Message::Binary(bytes) => assert_eq!(bytes, vec![1, 7]),
            other => panic!("子通道帧应当编码为二进制消息，实际为: {:?}", other),
        }

        let ping = WireMessage::Control(ControlEnvelope::ping().unwrap());
        let text = match ping.into_ws_message().unwrap() {
            Message::Text(text) => text,
            other => panic!("控制信封应当编码为文本消息，实际为: {:?}", other),
        };
        match WireMessage::from_text(&text).unwrap() {
            WireMessage::Control(envelope) => assert_eq!(envelope.message_type, PING_MESSAGE_TYPE),
            other => panic!("预期控制信封，实际为: {:?}", other),
        }
        assert!(WireMessage::from_text("not json").is_err());
    }
}

// arena_node/src/channels/handler_table.rs

//! 入站处理器注册表与子通道负载类型。

use std::sync::Arc;

use arena_models::{Command, ContentType, DeviceState, SourceDevice};
use dashmap::DashMap;
use log::{debug, trace};

use crate::error::ChannelError;

/// 解码后的子通道负载。
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Command(Command),
    /// 压缩后的图像帧（JPEG 字节），原样透传。
    Image(Vec<u8>),
    State(DeviceState),
    /// AR 协作数据，原样透传。
    Collaboration(Vec<u8>),
}

impl ChannelPayload {
    pub fn content_type(&self) -> ContentType {
        match self {
            ChannelPayload::Command(_) => ContentType::Command,
            ChannelPayload::Image(_) => ContentType::Image,
            ChannelPayload::State(_) => ContentType::State,
            ChannelPayload::Collaboration(_) => ContentType::Collaboration,
        }
    }

    /// 编码为子通道字节：结构化类型使用 JSON，字节类型原样返回。
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        let encode_error = |e: serde_json::Error| ChannelError::Encode {
            content_type: self.content_type(),
            reason: e.to_string(),
        };
        match self {
            ChannelPayload::Command(command) => serde_json::to_vec(command).map_err(encode_error),
            ChannelPayload::State(state) => serde_json::to_vec(state).map_err(encode_error),
            ChannelPayload::Image(bytes) | ChannelPayload::Collaboration(bytes) => Ok(bytes.clone()),
        }
    }

    /// 按内容类型解码子通道字节。
    pub fn decode(content_type: ContentType, bytes: &[u8]) -> Result<Self, ChannelError> {
        let decode_error = |e: serde_json::Error| ChannelError::Decode {
            content_type,
            reason: e.to_string(),
        };
        match content_type {
            ContentType::Command => serde_json::from_slice(bytes)
                .map(ChannelPayload::Command)
                .map_err(decode_error),
            ContentType::State => serde_json::from_slice(bytes)
                .map(ChannelPayload::State)
                .map_err(decode_error),
            ContentType::Image => Ok(ChannelPayload::Image(bytes.to_vec())),
            ContentType::Collaboration => Ok(ChannelPayload::Collaboration(bytes.to_vec())),
        }
    }
}

/// 入站处理器：参数为发送方设备与解码后的负载。
pub type ChannelHandler = Arc<dyn Fn(SourceDevice, &ChannelPayload) + Send + Sync>;

/// `(ContentType, SourceDevice) -> 处理器` 的并发注册表。
///
/// 注册通常发生在启动阶段，查找发生在任意连接的读循环中。调用前先把处理器克隆出来，
/// 因此处理器内部可以再次注册或移除处理器而不会死锁。
#[derive(Default)]
pub struct HandlerTable {
    handlers: DashMap<(ContentType, SourceDevice), ChannelHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，已有的同键处理器会被替换。
    pub fn set_handler<F>(&self, content_type: ContentType, source: SourceDevice, handler: F)
    where
        F: Fn(SourceDevice, &ChannelPayload) + Send + Sync + 'static,
    {
        debug!("[通道复用] 注册处理器: ({}, {})", content_type, source);
        self.handlers.insert((content_type, source), Arc::new(handler));
    }

    pub fn remove_handler(&self, content_type: ContentType, source: SourceDevice) -> bool {
        self.handlers.remove(&(content_type, source)).is_some()
    }

    pub fn has_handler(&self, content_type: ContentType, source: SourceDevice) -> bool {
        self.handlers.contains_key(&(content_type, source))
    }

    /// 调用匹配的处理器；没有注册时为空操作，返回 `false`。
    pub fn invoke(&self, source: SourceDevice, payload: &ChannelPayload) -> bool {
        let content_type = payload.content_type();
        let handler = self
            .handlers
            .get(&(content_type, source))
            .map(|entry| Arc::clone(entry.value()));
        match handler {
            Some(handler) => {
                handler(source, payload);
                true
            }
            None => {
                trace!("[通道复用] ({}, {}) 没有注册处理器，负载被忽略。", content_type, source);
                false
            }
        }
    }
}

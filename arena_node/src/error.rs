use arena_models::{ContentType, SourceDevice};
use arena_transport::TransportError;
use thiserror::Error;

/// 节点启动与配置阶段的错误类型
///
/// 这些错误只会出现在节点生命周期的边界上（读取配置、解析设备身份、绑定监听端口），
/// 运行期的单条消息失败使用 `ChannelError` 表示，只记录日志，不会向上传播到这里。
#[derive(Error, Debug)]
pub enum AppError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("无法识别的设备名称: '{0}'")]
    UnknownDevice(String),

    #[error("传输层错误: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 通道复用层的单条消息错误
///
/// 所有变体都是可恢复的：调用方记录日志并丢弃该消息，连接本身不受影响。
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("{content_type} 子通道负载解码失败: {reason}")]
    Decode { content_type: ContentType, reason: String },

    #[error("{content_type} 子通道负载编码失败: {reason}")]
    Encode { content_type: ContentType, reason: String },

    #[error("发往 {device} 的 {content_type} 队列已满，消息被丢弃")]
    QueueFull { device: SourceDevice, content_type: ContentType },

    #[error("与 {0} 的连接已关闭")]
    LinkClosed(SourceDevice),

    #[error("没有到 {0} 的可用连接")]
    NoRoute(SourceDevice),
}

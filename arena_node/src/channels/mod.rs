//! 通道复用层。
//!
//! - `handler_table`: `(ContentType, SourceDevice)` 到处理器的注册表，以及解码后的负载类型。
//! - `link`: 设备间连接、预挂接的子通道、出站队列与写任务。
//! - `multiplexer`: 入站分发、出站路由与帧率统计。

pub mod handler_table;
pub mod link;
pub mod multiplexer;

pub use handler_table::{ChannelHandler, ChannelPayload, HandlerTable};
pub use link::{LinkReceiver, LinkRole, PeerLink, SubChannel};
pub use multiplexer::{ChannelMultiplexer, FrameRateMeter};

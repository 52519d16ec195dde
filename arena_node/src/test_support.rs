//! 单元测试共用的辅助函数：挂接一条不经过网络的连接，并读出其出站队列。

use std::sync::Arc;

use arena_models::{Command, ContentType, DeviceState, SourceDevice};
use arena_transport::{ChannelFrame, WireMessage};

use crate::channels::link::{LinkReceiver, LinkRole, PeerLink};
use crate::config::ChannelConfig;
use crate::session::connection_manager::ConnectionManager;

pub(crate) fn attach_link(
    connections: &ConnectionManager,
    peer: SourceDevice,
    role: LinkRole,
) -> (Arc<PeerLink>, LinkReceiver) {
    let (link, receiver) = PeerLink::new(peer, role, "127.0.0.1:9".parse().unwrap(), &ChannelConfig::default());
    connections.register(Arc::clone(&link));
    (link, receiver)
}

pub(crate) fn drain_frames(receiver: &mut LinkReceiver) -> Vec<ChannelFrame> {
    let mut frames = Vec::new();
    while let Some(message) = receiver.try_next() {
        if let WireMessage::Frame(frame) = message {
            frames.push(frame);
        }
    }
    frames
}

pub(crate) fn drain_states(receiver: &mut LinkReceiver) -> Vec<DeviceState> {
    drain_frames(receiver)
        .into_iter()
        .filter(|frame| frame.content_type == ContentType::State)
        .map(|frame| serde_json::from_slice(&frame.payload).unwrap())
        .collect()
}

pub(crate) fn drain_commands(receiver: &mut LinkReceiver) -> Vec<Command> {
    drain_frames(receiver)
        .into_iter()
        .filter(|frame| frame.content_type == ContentType::Command)
        .map(|frame| serde_json::from_slice(&frame.payload).unwrap())
        .collect()
}

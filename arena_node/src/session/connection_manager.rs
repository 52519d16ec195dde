// arena_node/src/session/connection_manager.rs

//! 已连接设备表。

use std::sync::Arc;

use arena_models::SourceDevice;
use dashmap::DashMap;
use log::{debug, info, warn};

use crate::channels::link::{LinkRole, PeerLink};

/// 管理本进程所有活动的设备间连接。
///
/// 服务端连接（对端连入本机服务）与消费端连接（本机连入对端服务）分别存放，
/// 同一设备在两个表中最多各有一条连接。
#[derive(Debug, Default)]
pub struct ConnectionManager {
    server_links: DashMap<SourceDevice, Arc<PeerLink>>,
    consumer_links: DashMap<SourceDevice, Arc<PeerLink>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn links(&self, role: LinkRole) -> &DashMap<SourceDevice, Arc<PeerLink>> {
        match role {
            LinkRole::Server => &self.server_links,
            LinkRole::Consumer => &self.consumer_links,
        }
    }

    /// 记录一条新连接。同一设备同一角色的旧连接会被替换并返回，由调用方负责关闭。
    pub fn register(&self, link: Arc<PeerLink>) -> Option<Arc<PeerLink>> {
        let previous = self.links(link.role).insert(link.peer, Arc::clone(&link));
        info!(
            "[会话管理] 设备 {} 的 {} 连接已登记: link_id={}, addr={}",
            link.peer, link.role, link.link_id, link.addr
        );
        if let Some(previous) = &previous {
            warn!(
                "[会话管理] 设备 {} 的新 {} 连接替换了旧连接 (旧 link_id={})",
                link.peer, link.role, previous.link_id
            );
        }
        debug!(
            "[会话管理] 当前服务端连接数: {}，消费端连接数: {}",
            self.server_links.len(),
            self.consumer_links.len()
        );
        previous
    }

    /// 仅当表中记录的仍是这条连接时才移除它。
    ///
    /// 旧连接在被新连接替换后结束时，不应把新连接从表中删掉。
    pub fn remove_if_current(&self, link: &PeerLink) -> bool {
        let removed = self
            .links(link.role)
            .remove_if(&link.peer, |_, current| current.link_id == link.link_id)
            .is_some();
        if removed {
            info!(
                "[会话管理] 设备 {} 的 {} 连接已移除 (link_id={})",
                link.peer, link.role, link.link_id
            );
        } else {
            debug!(
                "[会话管理] 设备 {} 的 {} 连接 (link_id={}) 已被替换，跳过移除。",
                link.peer, link.role, link.link_id
            );
        }
        removed
    }

    pub fn get(&self, peer: SourceDevice, role: LinkRole) -> Option<Arc<PeerLink>> {
        self.links(role).get(&peer).map(|entry| Arc::clone(entry.value()))
    }

    pub fn has_link(&self, peer: SourceDevice, role: LinkRole) -> bool {
        self.links(role).contains_key(&peer)
    }

    /// 选择发往某设备的连接：优先本机作为服务端的连接，其次作为消费端的连接。
    pub fn route(&self, peer: SourceDevice) -> Option<Arc<PeerLink>> {
        self.get(peer, LinkRole::Server)
            .or_else(|| self.get(peer, LinkRole::Consumer))
    }

    pub fn server_link_count(&self) -> usize {
        self.server_links.len()
    }

    /// 当前所有服务端连接的快照。
    pub fn server_links(&self) -> Vec<Arc<PeerLink>> {
        self.server_links
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 当前所有连接的快照。
    pub fn all_links(&self) -> Vec<Arc<PeerLink>> {
        self.server_links
            .iter()
            .chain(self.consumer_links.iter())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// 请求关闭所有连接。表项由各连接的断线处理流程移除。
    pub fn close_all(&self) {
        let links = self.all_links();
        info!("[会话管理] 正在关闭全部 {} 条连接。", links.len());
        for link in links {
            link.request_close();
        }
    }
}

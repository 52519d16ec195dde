// arena_node/src/heartbeat_monitor.rs

//! 心跳监视器模块。
//!
//! 定期检查所有服务端连接的活跃状态。对端在超时阈值内没有发来任何消息（包括 Ping）时，
//! 监视器请求关闭该连接，随后由正常的断线流程完成清理：从连接表移除、
//! 中枢重置该设备的状态并转发给其他设备、重新计算本机通道状态。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::session::connection_manager::ConnectionManager;

/// 服务端连接的心跳监视器。
pub struct HeartbeatMonitor {
    connections: Arc<ConnectionManager>,
    /// 对端被判定为超时的最大静默时长
    client_timeout_duration: Duration,
    /// 两次检查之间的间隔
    check_interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(connections: Arc<ConnectionManager>, client_timeout_duration: Duration, check_interval: Duration) -> Self {
        info!(
            "[心跳监视器] 正在创建 HeartbeatMonitor 实例。超时阈值: {:?}，检查周期: {:?}",
            client_timeout_duration, check_interval
        );
        Self {
            connections,
            client_timeout_duration,
            check_interval,
        }
    }

    /// 后台运行循环，直到所在任务被中止。
    pub async fn run(self) {
        info!(
            "[心跳监视器] 后台运行循环已启动，将每 {:?} 检查一次服务端连接。",
            self.check_interval
        );
        loop {
            sleep(self.check_interval).await;
            let closed = self.check_for_timed_out_links();
            debug!("[心跳监视器] 本轮检查完成，关闭了 {} 条超时连接。", closed);
        }
    }

    /// 检查一次所有服务端连接，关闭超时的连接，返回关闭的数量。
    pub fn check_for_timed_out_links(&self) -> usize {
        let links = self.connections.server_links();
        if links.is_empty() {
            debug!("[心跳监视器] 当前没有服务端连接，无需检查。");
            return 0;
        }

        let timeout = match chrono::Duration::from_std(self.client_timeout_duration) {
            Ok(duration) => duration,
            Err(e) => {
                warn!(
                    "[心跳监视器] 无法转换超时阈值 {:?}: {}，本轮使用 60 秒。",
                    self.client_timeout_duration, e
                );
                chrono::Duration::seconds(60)
            }
        };

        let now = Utc::now();
        let mut closed = 0;
        for link in links {
            let last_seen = link.last_seen();
            if now.signed_duration_since(last_seen) > timeout {
                warn!(
                    "[心跳监视器] 设备 {} ({}, link_id={}) 已超时！最后活跃时间: {}，超时阈值: {:?}。将关闭连接。",
                    link.peer, link.addr, link.link_id, last_seen, self.client_timeout_duration
                );
                link.request_close();
                closed += 1;
            } else {
                debug!(
                    "[心跳监视器] 设备 {} 状态正常，最后活跃于 {}。",
                    link.peer, last_seen
                );
            }
        }
        closed
    }
}

// arena_transport/src/discovery.rs

//! 服务目录：本地网络服务发布/浏览的替身实现。
//!
//! 目录中的条目有两种来源：
//! - **静态条目**: 来自配置文件（服务名 → `host:port`），始终可解析，永远不会被撤回。
//! - **发布条目**: 由同进程中的服务端在监听成功后发布，并在关闭时撤回。
//!
//! 消费端断线后使用 `wait_withdrawn` 等待旧的服务发布被撤回（或等待超时），
//! 避免重新连接到一个尚未拆除的旧发布。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;

/// 目录的两类条目。同名时发布条目优先，撤回后静态条目重新生效。
#[derive(Debug, Default)]
struct DirectoryEntries {
    statics: HashMap<String, SocketAddr>,
    published: HashMap<String, SocketAddr>,
}

impl DirectoryEntries {
    fn resolve(&self, name: &str) -> Option<SocketAddr> {
        self.published
            .get(name)
            .or_else(|| self.statics.get(name))
            .copied()
    }
}

/// 服务目录。
///
/// 内部使用 `watch` 通道广播一个变更计数，浏览方在每次变更后重新检查目录。
#[derive(Debug)]
pub struct ServiceDirectory {
    entries: Mutex<DirectoryEntries>,
    changes: watch::Sender<u64>,
}

impl ServiceDirectory {
    /// 创建一个空目录。
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            entries: Mutex::new(DirectoryEntries::default()),
            changes,
        }
    }

    /// 创建一个预置静态条目的目录。
    pub fn with_static_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, SocketAddr)>,
    {
        let directory = Self::new();
        {
            let mut map = directory.lock_entries();
            for (name, addr) in entries {
                info!("[服务目录] 静态服务条目: {} -> {}", name, addr);
                map.statics.insert(name, addr);
            }
        }
        directory
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, DirectoryEntries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// 发布服务。同名静态条目在发布期间被遮蔽，但不会被删除。
    pub fn publish(&self, name: &str, addr: SocketAddr) {
        self.lock_entries().published.insert(name.to_string(), addr);
        info!("[服务目录] 服务已发布: {} -> {}", name, addr);
        self.bump();
    }

    /// 撤回已发布的服务，同名静态条目随即恢复生效。静态条目本身不可撤回，返回 `false`。
    pub fn withdraw(&self, name: &str) -> bool {
        let removed = self.lock_entries().published.remove(name).is_some();
        if removed {
            info!("[服务目录] 服务已撤回: {}", name);
            self.bump();
        } else {
            debug!("[服务目录] 撤回请求被忽略（未发布或为静态条目）: {}", name);
        }
        removed
    }

    /// 立即查询服务地址。
    pub fn lookup(&self, name: &str) -> Option<SocketAddr> {
        self.lock_entries().resolve(name)
    }

    fn is_published(&self, name: &str) -> bool {
        self.lock_entries().published.contains_key(name)
    }

    /// 浏览服务：等待直到该服务名可解析。
    pub async fn browse(&self, name: &str) -> SocketAddr {
        loop {
            // 先订阅再检查，避免错过检查与等待之间发生的发布
            let mut changes = self.changes.subscribe();
            if let Some(addr) = self.lookup(name) {
                return addr;
            }
            debug!("[服务目录] 正在等待服务出现: {}", name);
            if changes.changed().await.is_err() {
                // 发送端与目录同生命周期，正常情况下不会到达这里
                std::future::pending::<()>().await;
            }
        }
    }

    /// 等待服务被撤回，最多等待 `settle`。
    ///
    /// 返回 `true` 表示观察到了撤回（或服务本就不存在），`false` 表示等待超时。
    /// 只有静态条目的服务永远不会被撤回，只能等到超时。
    pub async fn wait_withdrawn(&self, name: &str, settle: Duration) -> bool {
        let had_publication = self.is_published(name);
        let wait = async {
            loop {
                let mut changes = self.changes.subscribe();
                let withdrawn = {
                    let entries = self.lock_entries();
                    !entries.published.contains_key(name)
                        && (had_publication || !entries.statics.contains_key(name))
                };
                if withdrawn {
                    return;
                }
                if changes.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::time::timeout(settle, wait).await.is_ok()
    }
}

impl Default for ServiceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    /// 浏览会一直等待，直到服务被发布。
    async fn test_browse_waits_for_publish() {
        let directory = Arc::new(ServiceDirectory::new());
        let publisher = Arc::clone(&directory);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher.publish("ArenaPadChannel", addr(4100));
        });
        let found = tokio::time::timeout(Duration::from_secs(2), directory.browse("ArenaPadChannel"))
            .await
            .expect("浏览服务超时");
        assert_eq!(found, addr(4100));
        handle.await.unwrap();
    }

    #[tokio::test]
    /// 撤回会提前结束等待；静态条目只能等到超时。
    async fn test_wait_withdrawn() {
        let directory = Arc::new(ServiceDirectory::with_static_entries(vec![(
            "TripodPhoneChannel".to_string(),
            addr(4200),
        )]));
        directory.publish("RoverPhoneChannel", addr(4300));

        let withdrawer = Arc::clone(&directory);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            withdrawer.withdraw("RoverPhoneChannel");
        });
        assert!(directory.wait_withdrawn("RoverPhoneChannel", Duration::from_secs(5)).await);
        handle.await.unwrap();

        assert!(!directory.withdraw("TripodPhoneChannel"), "静态条目不可撤回");
        assert!(!directory.wait_withdrawn("TripodPhoneChannel", Duration::from_millis(30)).await);
        assert_eq!(directory.lookup("TripodPhoneChannel"), Some(addr(4200)));
        assert!(directory.wait_withdrawn("NeverPublished", Duration::from_millis(10)).await);
    }

    #[tokio::test]
    /// 发布会暂时遮蔽同名静态条目，撤回后静态地址重新可解析、可浏览。
    async fn test_withdraw_restores_static_entry() {
        let directory = ServiceDirectory::with_static_entries(vec![("ArenaPadChannel".to_string(), addr(4200))]);
        directory.publish("ArenaPadChannel", addr(4300));
        assert_eq!(directory.lookup("ArenaPadChannel"), Some(addr(4300)));

        assert!(directory.withdraw("ArenaPadChannel"));
        assert_eq!(directory.lookup("ArenaPadChannel"), Some(addr(4200)));
        assert!(!directory.withdraw("ArenaPadChannel"), "静态条目不可撤回");

        let found = tokio::time::timeout(Duration::from_secs(1), directory.browse("ArenaPadChannel"))
            .await
            .expect("静态条目应当立即可浏览");
        assert_eq!(found, addr(4200));
    }

    #[tokio::test]
    /// 覆盖在静态条目之上的发布被撤回时，等待方能观察到撤回。
    async fn test_wait_withdrawn_sees_publication_over_static_entry() {
        let directory = Arc::new(ServiceDirectory::with_static_entries(vec![(
            "RoverPhoneChannel".to_string(),
            addr(4200),
        )]));
        directory.publish("RoverPhoneChannel", addr(4300));

        let withdrawer = Arc::clone(&directory);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            withdrawer.withdraw("RoverPhoneChannel");
        });
        assert!(directory.wait_withdrawn("RoverPhoneChannel", Duration::from_secs(5)).await);
        handle.await.unwrap();
        assert_eq!(directory.lookup("RoverPhoneChannel"), Some(addr(4200)));
    }
}

// arena_node/src/node.rs

//! `ArenaNode`：把会话管理、通道复用、状态传播、命令路由与图像推送组装成一个节点。
//!
//! 节点不使用任何全局单例，所有依赖都在构造时显式传入，因此同一进程中可以同时运行多个节点
//! （集成测试就是这样模拟整个星型拓扑的）。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use arena_models::topology::{default_consumed_services, publishes_service};
use arena_models::{Command, ContentType, DeviceState, SourceDevice};
use arena_transport::ServiceDirectory;
use log::{info, warn};
use tokio::task::JoinHandle;

use crate::channels::handler_table::ChannelPayload;
use crate::channels::multiplexer::{ChannelMultiplexer, FRAME_RATE_WINDOW};
use crate::command_router::{ArenaActions, CommandRouter};
use crate::config::AppConfig;
use crate::error::{AppError, ChannelError};
use crate::heartbeat_monitor::HeartbeatMonitor;
use crate::image_feed::ImageFeedPublisher;
use crate::session::SessionManager;
use crate::session::connection_manager::ConnectionManager;

/// 一台设备上运行的协调节点。
pub struct ArenaNode {
    own: SourceDevice,
    config: AppConfig,
    multiplexer: Arc<ChannelMultiplexer>,
    session: Arc<SessionManager>,
    commands: Arc<CommandRouter>,
    image_feed: ImageFeedPublisher,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    frame_rate_task: Mutex<Option<JoinHandle<()>>>,
}

impl ArenaNode {
    pub fn new(
        own: SourceDevice,
        config: AppConfig,
        directory: Arc<ServiceDirectory>,
        actions: Arc<dyn ArenaActions>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let multiplexer = Arc::new(ChannelMultiplexer::new(own, connections));
        let session = SessionManager::new(
            config.session.clone(),
            config.channel.clone(),
            directory,
            Arc::clone(&multiplexer),
        );
        let commands = CommandRouter::new(Arc::clone(&multiplexer), actions);
        commands.install();
        let image_feed = ImageFeedPublisher::new(Arc::clone(&multiplexer), config.image_feed.target_fps);
        info!("[节点] {} ({:?}) 的协调节点已创建。", own, own.role());
        Self {
            own,
            config,
            multiplexer,
            session,
            commands,
            image_feed,
            heartbeat_task: Mutex::new(None),
            frame_rate_task: Mutex::new(None),
        }
    }

    /// 启动节点：需要发布服务的设备启动服务端与心跳监视器，然后连接拓扑中默认消费的服务。
    ///
    /// 返回本机服务发布的地址（不发布服务的设备为 `None`）。
    pub async fn start(&self) -> Result<Option<SocketAddr>, AppError> {
        let published = if publishes_service(self.own) {
            let addr = self
                .session
                .start_server(&self.config.network.listen_addr())
                .await?;
            let monitor = HeartbeatMonitor::new(
                Arc::clone(self.session.connections()),
                self.config.session.client_timeout(),
                self.config.session.heartbeat_check_interval(),
            );
            let handle = tokio::spawn(monitor.run());
            if let Some(previous) = self
                .heartbeat_task
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .replace(handle)
            {
                previous.abort();
            }
            Some(addr)
        } else {
            None
        };

        let multiplexer = Arc::clone(&self.multiplexer);
        let decay = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_RATE_WINDOW);
            loop {
                ticker.tick().await;
                multiplexer.decay_frame_rate();
            }
        });
        if let Some(previous) = self
            .frame_rate_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(decay)
        {
            previous.abort();
        }

        for target in default_consumed_services(self.own) {
            self.session.ensure_consuming(target);
        }
        info!("[节点] {} 已启动。", self.own);
        Ok(published)
    }

    /// 关闭节点：停止心跳监视器与帧率衰减任务、撤回服务、关闭所有连接。
    pub async fn shutdown(&self) {
        for task in [&self.heartbeat_task, &self.frame_rate_task] {
            let handle = task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
            if let Some(handle) = handle {
                handle.abort();
            }
        }
        self.session.shutdown().await;
        info!("[节点] {} 已关闭。", self.own);
    }

    pub fn own_device(&self) -> SourceDevice {
        self.own
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn multiplexer(&self) -> &Arc<ChannelMultiplexer> {
        &self.multiplexer
    }

    pub fn commands(&self) -> &Arc<CommandRouter> {
        &self.commands
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// 本机服务发布的地址。
    pub fn published_addr(&self) -> Option<SocketAddr> {
        self.session.published_addr()
    }

    /// 某设备最近一次已知的状态。
    pub fn state_of(&self, device: SourceDevice) -> DeviceState {
        self.multiplexer.store().get(device)
    }

    /// 修改本机状态并按星型拓扑传播。
    pub fn update_local_state<F>(&self, mutate: F) -> DeviceState
    where
        F: FnOnce(&mut DeviceState),
    {
        self.multiplexer.update_local_state(mutate)
    }

    /// 设置本机希望接收图像的设备列表。
    ///
    /// 列表中本机尚未连接的相机来源会被自动连接，以便接收它们直接发来的图像帧。
    pub fn request_image_feeds(&self, sources: Vec<SourceDevice>) -> DeviceState {
        let mut requested = Vec::with_capacity(sources.len());
        for source in sources {
            if source == self.own {
                warn!("[节点] 忽略对本机图像的请求。");
                continue;
            }
            if !requested.contains(&source) {
                requested.push(source);
            }
        }
        for source in &requested {
            if source.role().is_camera_source() {
                self.session.ensure_consuming(*source);
            }
        }
        self.update_local_state(|state| state.requested_image_feed_sources = requested)
    }

    /// 发布一帧图像，返回接收方数量；被限速跳过时返回 `None`。
    pub fn publish_frame(&self, encoded: Vec<u8>) -> Option<usize> {
        self.image_feed.publish_frame(encoded)
    }

    pub fn active_image_feeds(&self) -> usize {
        self.image_feed.active_image_feeds()
    }

    pub fn send_command(&self, to: SourceDevice, command: Command) -> Result<(), ChannelError> {
        self.commands.send_command(to, command)
    }

    /// 发送 AR 协作数据。
    pub fn send_collaboration(&self, to: SourceDevice, data: Vec<u8>) -> Result<(), ChannelError> {
        let result = self.multiplexer.send_to(to, &ChannelPayload::Collaboration(data));
        if let Err(e) = &result {
            self.multiplexer.log_send_failure(to, ContentType::Collaboration, e);
        }
        result
    }

    /// 注册入站处理器。命令子通道的处理器已由命令路由器注册，覆盖后命令将不再经过路由器。
    pub fn set_handler<F>(&self, content_type: ContentType, source: SourceDevice, handler: F)
    where
        F: Fn(SourceDevice, &ChannelPayload) + Send + Sync + 'static,
    {
        self.multiplexer.handlers().set_handler(content_type, source, handler);
    }
}

// arena_node/src/command_router.rs

//! 负责处理从其他设备收到的点对点命令，并根据命令种类进行分发处理。
//!
//! 命令从不广播：发送方通过与目标设备之间的 `command` 子通道单独发送。
//! 具体的 AR / 电机动作由 `ArenaActions` 协作方实现，本模块只负责分发与会话标识表的维护。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use arena_models::topology::peers_of;
use arena_models::{Command, CommandKind, ContentType, Point2, SourceDevice};
use log::{debug, info, warn};

use crate::channels::handler_table::ChannelPayload;
use crate::channels::multiplexer::ChannelMultiplexer;
use crate::error::ChannelError;

/// 命令的执行方（AR 场景与小车电机层）。
///
/// 每个方法都有只记录日志的默认实现，未接入执行层的设备可以直接使用 `NoopArenaActions`。
pub trait ArenaActions: Send + Sync {
    fn scan_world(&self, from: SourceDevice) {
        info!("[命令路由] 收到来自 {} 的 scanWorld，当前没有执行方，忽略。", from);
    }

    fn build_arena(&self, from: SourceDevice) {
        info!("[命令路由] 收到来自 {} 的 buildArena，当前没有执行方，忽略。", from);
    }

    fn rover_return_home(&self, from: SourceDevice) {
        info!("[命令路由] 收到来自 {} 的 roverReturnHome，当前没有执行方，忽略。", from);
    }

    fn rover_rotate_degrees(&self, from: SourceDevice, degrees: f32) {
        info!(
            "[命令路由] 收到来自 {} 的 roverRotateDegrees({})，当前没有执行方，忽略。",
            from, degrees
        );
    }

    /// 开始驶向目标点。执行方应在行驶循环中轮询 `transit_active`，标志被清除时停止。
    fn begin_transit_to_point(&self, from: SourceDevice, target: Point2, _transit_active: Arc<AtomicBool>) {
        info!(
            "[命令路由] 收到来自 {} 的 beginTransitToPoint({}, {})，当前没有执行方，忽略。",
            from, target.x, target.y
        );
    }

    fn world_status_update(&self, from: SourceDevice, mapped: bool, payload: &[u8]) {
        info!(
            "[命令路由] 收到来自 {} 的 worldStatusUpdate(mapped={}, {} 字节)，当前没有执行方，忽略。",
            from,
            mapped,
            payload.len()
        );
    }
}

/// 不执行任何动作的默认执行方。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopArenaActions;

impl ArenaActions for NoopArenaActions {}

/// 命令路由器。
pub struct CommandRouter {
    multiplexer: Arc<ChannelMultiplexer>,
    actions: Arc<dyn ArenaActions>,
    /// AR 会话标识 -> 宣告该标识的设备
    session_owners: RwLock<HashMap<String, SourceDevice>>,
    transit_active: Arc<AtomicBool>,
}

impl CommandRouter {
    pub fn new(multiplexer: Arc<ChannelMultiplexer>, actions: Arc<dyn ArenaActions>) -> Arc<Self> {
        Arc::new(Self {
            multiplexer,
            actions,
            session_owners: RwLock::new(HashMap::new()),
            transit_active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 为每个对端设备注册命令处理器。
    ///
    /// 处理器只持有路由器的弱引用，避免 复用器 -> 处理器 -> 路由器 -> 复用器 的引用环。
    pub fn install(self: &Arc<Self>) {
        let own = self.multiplexer.own_device();
        for peer in peers_of(own) {
            let router: Weak<CommandRouter> = Arc::downgrade(self);
            self.multiplexer
                .handlers()
                .set_handler(ContentType::Command, peer, move |from, payload| {
                    if let (Some(router), ChannelPayload::Command(command)) = (router.upgrade(), payload) {
                        router.dispatch(from, command);
                    }
                });
        }
        info!("[命令路由] 已为 {} 的所有对端设备注册命令处理器。", own);
    }

    /// 根据命令种类分发一条收到的命令。
    pub fn dispatch(&self, from: SourceDevice, command: &Command) {
        debug!("[命令路由] 收到来自 {} 的命令: {:?}", from, command.kind);
        match command.kind {
            CommandKind::BroadcastSessionId => {
                let previous = self
                    .session_owners
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(command.string_value.clone(), from);
                if previous != Some(from) {
                    info!("[命令路由] AR 会话 '{}' 归属于 {}", command.string_value, from);
                }
            }
            CommandKind::BeginTransitToPoint => {
                self.transit_active.store(true, Ordering::SeqCst);
                self.actions
                    .begin_transit_to_point(from, command.point, Arc::clone(&self.transit_active));
            }
            CommandKind::CancelTransitToPoint => {
                self.transit_active.store(false, Ordering::SeqCst);
                info!("[命令路由] {} 取消了驶向目标点。", from);
            }
            CommandKind::ScanWorld => self.actions.scan_world(from),
            CommandKind::BuildArena => self.actions.build_arena(from),
            CommandKind::RoverReturnHome => self.actions.rover_return_home(from),
            CommandKind::RoverRotateDegrees => self.actions.rover_rotate_degrees(from, command.float_value),
            CommandKind::WorldStatusUpdate => {
                self.actions
                    .world_status_update(from, command.bool_value, &command.binary_payload)
            }
            CommandKind::Unknown => {
                warn!("[命令路由] 收到来自 {} 的未知命令种类，已忽略。", from);
            }
        }
    }

    /// 向单个设备发送命令。
    pub fn send_command(&self, to: SourceDevice, command: Command) -> Result<(), ChannelError> {
        let payload = ChannelPayload::Command(command);
        let result = self.multiplexer.send_to(to, &payload);
        if let Err(e) = &result {
            self.multiplexer.log_send_failure(to, ContentType::Command, e);
        }
        result
    }

    /// 查询宣告了某个 AR 会话标识的设备。
    pub fn session_owner(&self, session_id: &str) -> Option<SourceDevice> {
        self.session_owners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .copied()
    }

    pub fn is_transit_active(&self) -> bool {
        self.transit_active.load(Ordering::SeqCst)
    }

    pub fn transit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.transit_active)
    }
}

// arena_node/src/state/store.rs

//! 设备状态表。

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use arena_models::{DeviceState, SourceDevice};
use chrono::Utc;
use log::debug;

/// 所有设备最近一次已知状态的表。
///
/// 键集合固定为 `SourceDevice::ALL`，启动时每个设备都是默认（未知）状态。
/// 对端状态只会被整体替换；本机状态通过 `mutate_local` 修改。
#[derive(Debug)]
pub struct DeviceStateStore {
    own: SourceDevice,
    states: RwLock<HashMap<SourceDevice, DeviceState>>,
}

impl DeviceStateStore {
    pub fn new(own: SourceDevice) -> Self {
        let states = SourceDevice::ALL
            .into_iter()
            .map(|device| (device, DeviceState::new(device)))
            .collect();
        Self {
            own,
            states: RwLock::new(states),
        }
    }

    pub fn own_device(&self) -> SourceDevice {
        self.own
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SourceDevice, DeviceState>> {
        self.states.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SourceDevice, DeviceState>> {
        self.states.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, device: SourceDevice) -> DeviceState {
        self.read()
            .get(&device)
            .cloned()
            .unwrap_or_else(|| DeviceState::new(device))
    }

    pub fn local(&self) -> DeviceState {
        self.get(self.own)
    }

    /// 所有设备状态的有序快照。
    pub fn snapshot(&self) -> BTreeMap<SourceDevice, DeviceState> {
        self.read()
            .iter()
            .map(|(device, state)| (*device, state.clone()))
            .collect()
    }

    /// 以收到的状态整体替换 `state.source_device` 的记录，返回内容是否发生变化。
    pub fn replace(&self, state: DeviceState) -> bool {
        let device = state.source_device;
        let previous = self.write().insert(device, state.clone());
        let changed = previous.as_ref() != Some(&state);
        if !changed {
            debug!("[状态同步] 收到与现有记录相同的 {} 状态，内容不变。", device);
        }
        changed
    }

    /// 把设备的记录重置为全新的默认状态。
    pub fn reset(&self, device: SourceDevice) -> DeviceState {
        let fresh = DeviceState::new(device);
        self.write().insert(device, fresh.clone());
        debug!("[状态同步] {} 的状态已重置为默认值。", device);
        fresh
    }

    /// 修改本机状态并刷新时间戳，返回修改后的副本。
    pub fn mutate_local<F>(&self, mutate: F) -> DeviceState
    where
        F: FnOnce(&mut DeviceState),
    {
        let mut states = self.write();
        let state = states
            .entry(self.own)
            .or_insert_with(|| DeviceState::new(self.own));
        mutate(state);
        state.source_device = self.own;
        state.updated_at = Utc::now();
        state.clone()
    }
}

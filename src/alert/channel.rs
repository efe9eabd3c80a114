use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// 广播选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastOptions {
    /// 订阅者需要满足的最低权限等级
    pub authority: u8,
    pub immediate: bool,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            authority: 3,
            immediate: true,
        }
    }
}

/// 宿主提供的观察通道（发布/订阅）
pub trait ObservationChannel: Send + Sync {
    fn broadcast(
        &self,
        event: &str,
        payload: JsonValue,
        options: BroadcastOptions,
    ) -> anyhow::Result<()>;
}

type Continuation = Box<dyn FnOnce(Arc<dyn ObservationChannel>) + Send>;

enum Slot {
    Waiting(Vec<Continuation>),
    Ready(Arc<dyn ObservationChannel>),
}

/// 观察通道的延迟可用能力
///
/// 通道就绪前登记的每个续延都会在 [`ChannelCapability::provide`] 时各执行一次，
/// 互不合并；就绪后登记的续延立即执行。续延总是在锁外执行。
pub struct ChannelCapability {
    slot: Mutex<Slot>,
}

impl ChannelCapability {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Waiting(Vec::new())),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    pub fn pending(&self) -> usize {
        match &*self.slot.lock() {
            Slot::Waiting(queue) => queue.len(),
            Slot::Ready(_) => 0,
        }
    }

    /// 宿主通道就绪，返回本次冲刷的续延数量
    pub fn provide(&self, channel: Arc<dyn ObservationChannel>) -> usize {
        let previous = mem::replace(&mut *self.slot.lock(), Slot::Ready(channel.clone()));
        let queued = match previous {
            Slot::Waiting(queue) => queue,
            Slot::Ready(_) => Vec::new(),
        };

        let flushed = queued.len();
        for continuation in queued {
            continuation(channel.clone());
        }
        flushed
    }

    /// 通道可用时执行 `continuation`，否则登记为一次性续延
    pub fn when_available<F>(&self, continuation: F)
    where
        F: FnOnce(Arc<dyn ObservationChannel>) + Send + 'static,
    {
        let channel = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Ready(channel) => channel.clone(),
                Slot::Waiting(queue) => {
                    queue.push(Box::new(continuation));
                    return;
                }
            }
        };

        continuation(channel);
    }
}

impl Default for ChannelCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChannelCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelCapability")
            .field("available", &self.is_available())
            .field("pending", &self.pending())
            .finish()
    }
}

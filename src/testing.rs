//! 测试用的宿主替身

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::alert::{BroadcastOptions, ObservationChannel};
use crate::error::Result;
use crate::guard::{DisposeListener, ForkListener, RuntimeHandle, Scope, UnloadOperation};
use crate::hooks::SyncOperation;

/// 记录每次广播的观察通道
#[derive(Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<(String, JsonValue, BroadcastOptions)>>,
    failing: bool,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 每次广播都失败的通道
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            failing: true,
        })
    }

    pub fn events(&self) -> Vec<(String, JsonValue, BroadcastOptions)> {
        self.events.lock().clone()
    }
}

impl ObservationChannel for RecordingChannel {
    fn broadcast(
        &self,
        event: &str,
        payload: JsonValue,
        options: BroadcastOptions,
    ) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("console disconnected");
        }
        self.events
            .lock()
            .push((event.to_string(), payload, options));
        Ok(())
    }
}

/// 宿主作用域替身
pub struct MockScope {
    runtime: Arc<RuntimeHandle>,
    parent: Option<Arc<MockScope>>,
    me: Weak<MockScope>,
    dispose_listeners: Mutex<Vec<DisposeListener>>,
    fork_listeners: Mutex<Vec<ForkListener>>,
    observer: Mutex<Option<Observer>>,
}

type Observer = Arc<dyn Fn() + Send + Sync>;

impl MockScope {
    pub fn root(name: &str) -> Arc<Self> {
        Self::build(name, None)
    }

    pub fn child(parent: &Arc<MockScope>, name: &str) -> Arc<Self> {
        Self::build(name, Some(parent.clone()))
    }

    fn build(name: &str, parent: Option<Arc<MockScope>>) -> Arc<Self> {
        let runtime = RuntimeHandle::new(name);
        Arc::new_cyclic(|me| Self {
            runtime,
            parent,
            me: me.clone(),
            dispose_listeners: Mutex::new(Vec::new()),
            fork_listeners: Mutex::new(Vec::new()),
            observer: Mutex::new(None),
        })
    }

    /// 每次注册监听器时同步调用 `observer`
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.observer.lock() = Some(Arc::new(observer));
    }

    fn notify(&self) {
        let observer = self.observer.lock().clone();
        if let Some(observer) = observer {
            observer();
        }
    }

    /// 触发销毁事件，返回每个监听器的结果
    pub fn dispose(&self) -> Vec<Result<()>> {
        self.dispose_listeners
            .lock()
            .iter()
            .map(|listener| listener())
            .collect()
    }

    pub fn fork(&self, child: &Arc<RuntimeHandle>) {
        for listener in self.fork_listeners.lock().iter() {
            listener(child);
        }
    }
}

impl Scope for MockScope {
    fn runtime(&self) -> Arc<RuntimeHandle> {
        self.runtime.clone()
    }

    fn parent(&self) -> Option<Arc<dyn Scope>> {
        self.parent
            .clone()
            .map(|parent| parent as Arc<dyn Scope>)
    }

    fn root(&self) -> Arc<dyn Scope> {
        let mut current = match self.me.upgrade() {
            Some(me) => me,
            None => panic!("scope dropped while in use"),
        };
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    fn on_dispose(&self, listener: DisposeListener) {
        self.notify();
        self.dispose_listeners.lock().push(listener);
    }

    fn on_fork(&self, listener: ForkListener) {
        self.notify();
        self.fork_listeners.lock().push(listener);
    }
}

/// 模块注册表替身
#[derive(Default)]
pub struct MockRegistry {
    handles: Mutex<Vec<Arc<RuntimeHandle>>>,
}

impl MockRegistry {
    pub fn register(&self, handle: Arc<RuntimeHandle>) {
        self.handles.lock().push(handle);
    }

    pub fn contains(&self, handle: &Arc<RuntimeHandle>) -> bool {
        self.handles
            .lock()
            .iter()
            .any(|h| RuntimeHandle::same(h, handle))
    }

    pub fn handles(&self) -> Vec<Arc<RuntimeHandle>> {
        self.handles.lock().clone()
    }

    /// 注册表的删除入口：移除成功返回 true
    pub fn delete_operation() -> SyncOperation<MockRegistry, Arc<RuntimeHandle>, bool> {
        SyncOperation::new(
            "Registry",
            "delete",
            |registry: &MockRegistry, target: &Arc<RuntimeHandle>| {
                let mut handles = registry.handles.lock();
                let before = handles.len();
                handles.retain(|h| !RuntimeHandle::same(h, target));
                Ok(handles.len() != before)
            },
        )
    }
}

/// 记录 `(作用域, 目标)` 的卸载例程
pub fn unload_spy() -> (UnloadOperation, Arc<Mutex<Vec<(String, String)>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();
    let op: UnloadOperation = SyncOperation::new(
        "Loader",
        "unloadPlugin",
        move |scope: &(dyn Scope + 'static), target: &Arc<RuntimeHandle>| {
            recorded
                .lock()
                .push((scope.runtime().name().to_string(), target.name().to_string()));
            Ok(true)
        },
    );
    (op, calls)
}

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use crate::error::{GuardError, Result};

/// 同步操作：接收者与参数均以引用传入
pub type SyncFn<R: ?Sized, A, T> = Arc<dyn Fn(&R, &A) -> Result<T> + Send + Sync>;

/// 异步操作：返回值可能是立即值，也可能是挂起的 future
pub type AsyncFn<R: ?Sized, A, T> = Arc<dyn Fn(Arc<R>, A) -> Deferred<T> + Send + Sync>;

/// 异步操作的返回值
///
/// 宿主声明为异步的操作也可能直接返回普通值（`Ready`），调用方统一通过 `.await` 获取结果。
pub enum Deferred<T> {
    Ready(Result<T>),
    Pending(BoxFuture<'static, Result<T>>),
}

impl<T> Deferred<T> {
    pub fn ready(value: T) -> Self {
        Deferred::Ready(Ok(value))
    }

    pub fn failed(error: GuardError) -> Self {
        Deferred::Ready(Err(error))
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Deferred::Pending(Box::pin(future))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Deferred::Pending(_))
    }
}

impl<T: Send + 'static> IntoFuture for Deferred<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Deferred::Ready(result) => Box::pin(futures::future::ready(result)),
            Deferred::Pending(future) => future,
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Ready(result) => write!(f, "Deferred::Ready(ok={})", result.is_ok()),
            Deferred::Pending(_) => write!(f, "Deferred::Pending"),
        }
    }
}

/// 操作槽上的 hook 占用标记
///
/// 标记随操作槽本身存在，与哪个引擎安装无关。
#[derive(Debug, Default)]
pub struct HookSlot {
    claimed: AtomicBool,
}

impl HookSlot {
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// 占用成功返回 true，已被占用返回 false
    pub(crate) fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}

/// 可被替换实现的宿主操作
pub trait Patchable {
    /// 所属对象的类型名，如 `Context`
    fn owner(&self) -> &str;

    /// 操作名，如 `emit`
    fn name(&self) -> &str;

    fn slot(&self) -> &HookSlot;

    fn hooked_name(&self) -> String {
        format!("{}.{}", self.owner(), self.name())
    }

    /// 是否已被任一引擎安装 hook
    fn is_hooked(&self) -> bool {
        self.slot().is_claimed()
    }
}

/// 宿主声明的同步操作槽
pub struct SyncOperation<R: ?Sized, A, T> {
    owner: String,
    name: String,
    current: RwLock<SyncFn<R, A, T>>,
    slot: HookSlot,
}

impl<R: ?Sized, A, T> SyncOperation<R, A, T> {
    pub fn new<O, N, F>(owner: O, name: N, operation: F) -> Self
    where
        O: Into<String>,
        N: Into<String>,
        F: Fn(&R, &A) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            owner: owner.into(),
            name: name.into(),
            current: RwLock::new(Arc::new(operation)),
            slot: HookSlot::default(),
        }
    }

    /// 调用当前实现；调用期间不持有锁
    pub fn call(&self, receiver: &R, args: &A) -> Result<T> {
        let operation = self.current();
        operation(receiver, args)
    }

    pub(crate) fn current(&self) -> SyncFn<R, A, T> {
        self.current.read().clone()
    }

    pub(crate) fn replace(&self, operation: SyncFn<R, A, T>) {
        *self.current.write() = operation;
    }
}

impl<R: ?Sized, A, T> Patchable for SyncOperation<R, A, T> {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn slot(&self) -> &HookSlot {
        &self.slot
    }
}

/// 宿主声明的异步操作槽
pub struct AsyncOperation<R: ?Sized, A, T> {
    owner: String,
    name: String,
    current: RwLock<AsyncFn<R, A, T>>,
    slot: HookSlot,
}

impl<R: ?Sized, A, T> AsyncOperation<R, A, T> {
    pub fn new<O, N, F>(owner: O, name: N, operation: F) -> Self
    where
        O: Into<String>,
        N: Into<String>,
        F: Fn(Arc<R>, A) -> Deferred<T> + Send + Sync + 'static,
    {
        Self {
            owner: owner.into(),
            name: name.into(),
            current: RwLock::new(Arc::new(operation)),
            slot: HookSlot::default(),
        }
    }

    pub fn call(&self, receiver: Arc<R>, args: A) -> Deferred<T> {
        let operation = self.current();
        operation(receiver, args)
    }

    pub(crate) fn current(&self) -> AsyncFn<R, A, T> {
        self.current.read().clone()
    }

    pub(crate) fn replace(&self, operation: AsyncFn<R, A, T>) {
        *self.current.write() = operation;
    }
}

impl<R: ?Sized, A, T> Patchable for AsyncOperation<R, A, T> {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn slot(&self) -> &HookSlot {
        &self.slot
    }
}

/// 按名称登记的同签名操作集合（如观察通道上的监听器）
pub struct OperationTable<O> {
    operations: DashMap<String, Arc<O>>,
}

impl<O: Patchable> OperationTable<O> {
    pub fn new() -> Self {
        Self {
            operations: DashMap::new(),
        }
    }

    pub fn insert(&self, operation: O) -> Arc<O> {
        let operation = Arc::new(operation);
        self.operations
            .insert(operation.name().to_string(), operation.clone());
        operation
    }

    pub fn get(&self, name: &str) -> Option<Arc<O>> {
        self.operations.get(name).map(|entry| entry.value().clone())
    }

    /// 查找操作，缺失时返回配置错误
    pub fn require(&self, name: &str) -> Result<Arc<O>> {
        self.get(name).ok_or_else(|| {
            GuardError::configuration(format!("interceptable operation not found: {name}"))
        })
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl<O: Patchable> Default for OperationTable<O> {
    fn default() -> Self {
        Self::new()
    }
}

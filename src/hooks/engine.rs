use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use tracing::debug;

use crate::context::GuardContext;
use crate::error::{GuardError, Result};
use crate::feature::{naming, validate_name};

use super::operation::{
    AsyncFn, AsyncOperation, Deferred, OperationTable, Patchable, SyncFn, SyncOperation,
};

/// 未提供消息时的默认拦截文案
pub const DEFAULT_HOOK_MESSAGE: &str = "已为您阻止了一个危险操作";

/// 同步结果变换：拦截时入参为 `None`
pub type SyncTransform<A, T> = Arc<dyn Fn(Option<T>, &A) -> Result<T> + Send + Sync>;

/// 异步结果变换
pub type AsyncTransform<A, T> = Arc<dyn Fn(Option<T>, A) -> BoxFuture<'static, Result<T>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HookKey {
    owner: String,
    operation: String,
}

/// 已安装 hook 的元信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRecord {
    pub owner: String,
    pub operation: String,
    /// `Owner.operation`
    pub hooked_name: String,
    /// 绑定的开关名，告警中作为 registryName
    pub registry_name: String,
    pub message: String,
}

/// 前置检查的结论
pub enum HookPass<T> {
    /// 继续调用原始实现
    Proceed,
    /// 跳过原始实现，直接以该结果返回
    Return(Result<T>),
}

/// hook 安装结果：原始实现只捕获一次，之后不再变动
pub struct Hooked<F> {
    pub record: HookRecord,
    pub origin: F,
    pub hooked: F,
}

/// hook 安装参数
pub struct HookSpec<X> {
    flag: Option<String>,
    message: Option<String>,
    default_enabled: Option<bool>,
    transform: Option<X>,
}

impl<X> HookSpec<X> {
    pub fn new() -> Self {
        Self {
            flag: None,
            message: None,
            default_enabled: None,
            transform: None,
        }
    }

    /// 绑定的开关名，缺省为 `owner` 与操作名的小驼峰拼接
    pub fn flag<S: Into<String>>(mut self, flag: S) -> Self {
        self.flag = Some(flag.into());
        self
    }

    pub fn message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    /// 开关尚未配置时的初始值，缺省为关闭（放行）
    pub fn default_enabled(mut self, enabled: bool) -> Self {
        self.default_enabled = Some(enabled);
        self
    }
}

impl<X> Default for HookSpec<X> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, T> HookSpec<SyncTransform<A, T>> {
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Option<T>, &A) -> Result<T> + Send + Sync + 'static,
    {
        let transform: SyncTransform<A, T> = Arc::new(transform);
        self.transform = Some(transform);
        self
    }
}

impl<A, T> HookSpec<AsyncTransform<A, T>> {
    pub fn transform_async<F, Fut>(mut self, transform: F) -> Self
    where
        F: Fn(Option<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let transform: AsyncTransform<A, T> = Arc::new(move |result: Option<T>, args: A| {
            Box::pin(transform(result, args)) as BoxFuture<'static, Result<T>>
        });
        self.transform = Some(transform);
        self
    }
}

/// 拦截引擎
///
/// 每个操作槽最多安装一次 hook，无论由哪个引擎安装；重复安装返回配置错误。
pub struct InterceptionEngine {
    ctx: Arc<GuardContext>,
    records: DashMap<HookKey, HookRecord>,
}

impl InterceptionEngine {
    pub fn new(ctx: Arc<GuardContext>) -> Self {
        Self {
            ctx,
            records: DashMap::new(),
        }
    }

    pub fn context(&self) -> &Arc<GuardContext> {
        &self.ctx
    }

    pub fn is_hooked(&self, owner: &str, operation: &str) -> bool {
        self.records.contains_key(&HookKey {
            owner: owner.to_string(),
            operation: operation.to_string(),
        })
    }

    pub fn records(&self) -> Vec<HookRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.hooked_name.cmp(&b.hooked_name));
        records
    }

    /// 以开关控制同步操作
    pub fn wrap<R, A, T>(
        &self,
        operation: &SyncOperation<R, A, T>,
        spec: HookSpec<SyncTransform<A, T>>,
    ) -> Result<Hooked<SyncFn<R, A, T>>>
    where
        R: ?Sized + 'static,
        A: 'static,
        T: Default + 'static,
    {
        let record = self.prepare(operation, spec.flag, spec.message, spec.default_enabled)?;
        let transform = spec.transform.unwrap_or_else(default_sync_transform::<A, T>);
        let origin = operation.current();

        let ctx = self.ctx.clone();
        let registry_name = record.registry_name.clone();
        let hooked_name = record.hooked_name.clone();
        let message = record.message.clone();
        let guarded = origin.clone();

        let hooked: SyncFn<R, A, T> = Arc::new(move |receiver: &R, args: &A| {
            debug!(hook = %hooked_name, "called hooked operation");

            if !ctx.features().is_enabled(&registry_name) {
                ctx.metrics().record_passthrough(&registry_name);
                let result = guarded(receiver, args)?;
                return transform(Some(result), args);
            }

            ctx.alerts()
                .protect(&registry_name, &hooked_name, Some(message.as_str()));
            debug!(hook = %hooked_name, "blocked hooked operation");
            transform(None, args)
        });

        operation.replace(hooked.clone());
        debug!(
            hook = %record.hooked_name,
            registry = %record.registry_name,
            "installed sync hook"
        );

        Ok(Hooked {
            record,
            origin,
            hooked,
        })
    }

    /// 以开关控制异步操作
    ///
    /// 放行时先等待原始实现完成再执行异步变换；拦截时不会启动原始实现。
    pub fn wrap_async<R, A, T>(
        &self,
        operation: &AsyncOperation<R, A, T>,
        spec: HookSpec<AsyncTransform<A, T>>,
    ) -> Result<Hooked<AsyncFn<R, A, T>>>
    where
        R: ?Sized + Send + Sync + 'static,
        A: Clone + Send + 'static,
        T: Default + Send + 'static,
    {
        self.wrap_async_gated(operation, spec, |_: &A| HookPass::Proceed)
    }

    /// 同 [`Self::wrap_async`]，但每次调用先经过 `gate`
    ///
    /// `gate` 返回 [`HookPass::Return`] 时直接返回该结果，既不检查开关也不启动原始实现。
    pub fn wrap_async_gated<R, A, T, G>(
        &self,
        operation: &AsyncOperation<R, A, T>,
        spec: HookSpec<AsyncTransform<A, T>>,
        gate: G,
    ) -> Result<Hooked<AsyncFn<R, A, T>>>
    where
        R: ?Sized + Send + Sync + 'static,
        A: Clone + Send + 'static,
        T: Default + Send + 'static,
        G: Fn(&A) -> HookPass<T> + Send + Sync + 'static,
    {
        let record = self.prepare(operation, spec.flag, spec.message, spec.default_enabled)?;
        let transform = spec.transform.unwrap_or_else(default_async_transform::<A, T>);
        let origin = operation.current();

        let ctx = self.ctx.clone();
        let registry_name = record.registry_name.clone();
        let hooked_name = record.hooked_name.clone();
        let message = record.message.clone();
        let guarded = origin.clone();

        let hooked: AsyncFn<R, A, T> = Arc::new(move |receiver: Arc<R>, args: A| {
            debug!(hook = %hooked_name, "called hooked async operation");
            if let HookPass::Return(result) = gate(&args) {
                debug!(hook = %hooked_name, "gate returned early");
                return Deferred::Ready(result);
            }
            let transform = transform.clone();

            if !ctx.features().is_enabled(&registry_name) {
                ctx.metrics().record_passthrough(&registry_name);
                let pending = guarded(receiver, args.clone());
                return Deferred::pending(async move {
                    let result = pending.await?;
                    transform(Some(result), args).await
                });
            }

            ctx.alerts()
                .protect(&registry_name, &hooked_name, Some(message.as_str()));
            debug!(hook = %hooked_name, "blocked hooked async operation");
            Deferred::Pending(transform(None, args))
        });

        operation.replace(hooked.clone());
        debug!(
            hook = %record.hooked_name,
            registry = %record.registry_name,
            "installed async hook"
        );

        Ok(Hooked {
            record,
            origin,
            hooked,
        })
    }

    /// 按名称包装操作表中的同步操作，名称不存在时返回配置错误
    pub fn wrap_named<R, A, T>(
        &self,
        table: &OperationTable<SyncOperation<R, A, T>>,
        name: &str,
        spec: HookSpec<SyncTransform<A, T>>,
    ) -> Result<Hooked<SyncFn<R, A, T>>>
    where
        R: ?Sized + 'static,
        A: 'static,
        T: Default + 'static,
    {
        let operation = table.require(name)?;
        self.wrap(&operation, spec)
    }

    /// 以自定义决策替换同步操作，不绑定开关
    ///
    /// `build` 接收原始实现并返回替换实现。
    pub fn install<R, A, T, B>(
        &self,
        operation: &SyncOperation<R, A, T>,
        registry_name: &str,
        message: &str,
        build: B,
    ) -> Result<Hooked<SyncFn<R, A, T>>>
    where
        R: ?Sized,
        B: FnOnce(SyncFn<R, A, T>) -> SyncFn<R, A, T>,
    {
        let record = custom_record(operation, registry_name, message);
        self.reserve(operation, &record)?;

        let origin = operation.current();
        let hooked = build(origin.clone());
        operation.replace(hooked.clone());
        debug!(hook = %record.hooked_name, "installed custom hook");

        Ok(Hooked {
            record,
            origin,
            hooked,
        })
    }

    /// 异步版本的 [`Self::install`]
    pub fn install_async<R, A, T, B>(
        &self,
        operation: &AsyncOperation<R, A, T>,
        registry_name: &str,
        message: &str,
        build: B,
    ) -> Result<Hooked<AsyncFn<R, A, T>>>
    where
        R: ?Sized,
        B: FnOnce(AsyncFn<R, A, T>) -> AsyncFn<R, A, T>,
    {
        let record = custom_record(operation, registry_name, message);
        self.reserve(operation, &record)?;

        let origin = operation.current();
        let hooked = build(origin.clone());
        operation.replace(hooked.clone());
        debug!(hook = %record.hooked_name, "installed custom async hook");

        Ok(Hooked {
            record,
            origin,
            hooked,
        })
    }

    /// 前后置 hook
    ///
    /// `before` 返回 [`HookPass::Return`] 时跳过原始实现；否则原始实现的结果交给 `after`。
    pub fn hook<R, A, T, B, F>(
        &self,
        operation: &SyncOperation<R, A, T>,
        registry_name: &str,
        message: &str,
        before: B,
        after: F,
    ) -> Result<Hooked<SyncFn<R, A, T>>>
    where
        R: ?Sized + 'static,
        A: 'static,
        T: 'static,
        B: Fn(&R, &A) -> HookPass<T> + Send + Sync + 'static,
        F: Fn(T, &A) -> Result<T> + Send + Sync + 'static,
    {
        self.install(operation, registry_name, message, move |origin| {
            let hooked: SyncFn<R, A, T> = Arc::new(move |receiver: &R, args: &A| {
                if let HookPass::Return(result) = before(receiver, args) {
                    return result;
                }
                let result = origin(receiver, args)?;
                after(result, args)
            });
            hooked
        })
    }

    /// 异步前后置 hook：`after` 在原始实现完成后执行
    pub fn hook_async<R, A, T, B, F, Fut>(
        &self,
        operation: &AsyncOperation<R, A, T>,
        registry_name: &str,
        message: &str,
        before: B,
        after: F,
    ) -> Result<Hooked<AsyncFn<R, A, T>>>
    where
        R: ?Sized + Send + Sync + 'static,
        A: Clone + Send + 'static,
        T: Send + 'static,
        B: Fn(&Arc<R>, &A) -> HookPass<T> + Send + Sync + 'static,
        F: Fn(T, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let after = Arc::new(after);
        self.install_async(operation, registry_name, message, move |origin| {
            let hooked: AsyncFn<R, A, T> = Arc::new(move |receiver: Arc<R>, args: A| {
                if let HookPass::Return(result) = before(&receiver, &args) {
                    return Deferred::Ready(result);
                }
                let pending = origin(receiver, args.clone());
                let after = after.clone();
                Deferred::pending(async move {
                    let result = pending.await?;
                    after(result, args).await
                })
            });
            hooked
        })
    }

    /// 操作槽尚未被任何引擎安装 hook 时返回 Ok
    pub fn ensure_unhooked<O: Patchable + ?Sized>(&self, operation: &O) -> Result<()> {
        if operation.is_hooked() || self.is_hooked(operation.owner(), operation.name()) {
            return Err(already_hooked(&operation.hooked_name()));
        }
        Ok(())
    }

    /// 撤销本引擎安装的同步 hook，恢复原始实现并释放操作槽
    pub(crate) fn rollback<R, A, T>(
        &self,
        operation: &SyncOperation<R, A, T>,
        hooked: Hooked<SyncFn<R, A, T>>,
    ) where
        R: ?Sized,
    {
        operation.replace(hooked.origin);
        self.release(operation, &hooked.record);
        debug!(hook = %hooked.record.hooked_name, "rolled back hook");
    }

    fn prepare<O: Patchable + ?Sized>(
        &self,
        operation: &O,
        flag: Option<String>,
        message: Option<String>,
        default_enabled: Option<bool>,
    ) -> Result<HookRecord> {
        if operation.owner().is_empty() || operation.name().is_empty() {
            return Err(GuardError::configuration(
                "interceptable operation must declare an owner and a name",
            ));
        }

        let flag =
            flag.unwrap_or_else(|| naming::camel_case(&[operation.owner(), operation.name()]));
        let registry_name = naming::normalize(&flag);
        let record = HookRecord {
            owner: operation.owner().to_string(),
            operation: operation.name().to_string(),
            hooked_name: operation.hooked_name(),
            registry_name,
            message: message.unwrap_or_else(|| DEFAULT_HOOK_MESSAGE.to_string()),
        };

        validate_name(&record.registry_name)?;
        self.reserve(operation, &record)?;
        if let Err(err) = self
            .ctx
            .features()
            .seed(&record.registry_name, Some(default_enabled.unwrap_or(false)))
        {
            self.release(operation, &record);
            return Err(err);
        }
        Ok(record)
    }

    fn reserve<O: Patchable + ?Sized>(&self, operation: &O, record: &HookRecord) -> Result<()> {
        match self.records.entry(HookKey::of(record)) {
            Entry::Occupied(_) => Err(already_hooked(&record.hooked_name)),
            Entry::Vacant(vacant) => {
                if !operation.slot().try_claim() {
                    return Err(already_hooked(&record.hooked_name));
                }
                vacant.insert(record.clone());
                Ok(())
            }
        }
    }

    fn release<O: Patchable + ?Sized>(&self, operation: &O, record: &HookRecord) {
        self.records.remove(&HookKey::of(record));
        operation.slot().release();
    }
}

impl HookKey {
    fn of(record: &HookRecord) -> Self {
        Self {
            owner: record.owner.clone(),
            operation: record.operation.clone(),
        }
    }
}

fn already_hooked(hooked_name: &str) -> GuardError {
    GuardError::configuration(format!("operation {hooked_name} is already hooked"))
}

fn custom_record<O: Patchable + ?Sized>(operation: &O, registry_name: &str, message: &str) -> HookRecord {
    HookRecord {
        owner: operation.owner().to_string(),
        operation: operation.name().to_string(),
        hooked_name: operation.hooked_name(),
        registry_name: registry_name.to_string(),
        message: message.to_string(),
    }
}

fn default_sync_transform<A: 'static, T: Default + 'static>() -> SyncTransform<A, T> {
    Arc::new(|result: Option<T>, _: &A| Ok(result.unwrap_or_default()))
}

fn default_async_transform<A: 'static, T: Default + Send + 'static>() -> AsyncTransform<A, T> {
    Arc::new(|result: Option<T>, _: A| {
        Box::pin(async move { Ok(result.unwrap_or_default()) }) as BoxFuture<'static, Result<T>>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::oneshot;

    struct Emitter {
        id: u32,
    }

    fn engine() -> InterceptionEngine {
        InterceptionEngine::new(GuardContext::in_memory().unwrap())
    }

    fn spy_emit(calls: Arc<AtomicUsize>) -> SyncOperation<Emitter, (u32, u32, u32), u32> {
        SyncOperation::new("Context", "emit", move |emitter: &Emitter, args: &(u32, u32, u32)| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(emitter.id * 1000 + args.0 * 100 + args.1 * 10 + args.2)
        })
    }

    #[test]
    fn test_passthrough_fidelity() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        let op = spy_emit(calls.clone());

        engine
            .wrap(
                &op,
                HookSpec::new().transform(|result: Option<u32>, args: &(u32, u32, u32)| {
                    Ok(result.unwrap_or_default() + args.0)
                }),
            )
            .unwrap();

        let result = op.call(&Emitter { id: 4 }, &(1, 2, 3)).unwrap();
        assert_eq!(result, 4123 + 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.context().alerts().protection_times(), 0);
    }

    #[test]
    fn test_block_fidelity() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        let op = spy_emit(calls.clone());

        let hooked = engine
            .wrap(&op, HookSpec::new().message("已为您阻止插件发出 Koishi 事件"))
            .unwrap();
        assert_eq!(hooked.record.registry_name, "contextEmit");
        engine.context().features().enable("contextEmit").unwrap();

        let before = engine.context().alerts().protection_times();
        let result = op.call(&Emitter { id: 1 }, &(1, 2, 3)).unwrap();

        assert_eq!(result, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "拦截时不应调用原始实现");
        assert_eq!(engine.context().alerts().protection_times(), before + 1);
    }

    #[test]
    fn test_wrap_twice_is_rejected() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        let op = spy_emit(calls.clone());

        engine.wrap(&op, HookSpec::new()).unwrap();
        let second = engine.wrap(&op, HookSpec::new());
        assert!(matches!(second, Err(GuardError::Configuration(_))));

        op.call(&Emitter { id: 0 }, &(0, 0, 1)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "原始实现只应被调用一次");
        assert_eq!(engine.records().len(), 1);
        assert!(engine.is_hooked("Context", "emit"));
    }

    #[test]
    fn test_unset_flag_defaults_to_disabled() {
        let engine = engine();
        let op = spy_emit(Arc::new(AtomicUsize::new(0)));
        engine.wrap(&op, HookSpec::new().flag("optionBlockContextEmit")).unwrap();

        let features = engine.context().features();
        assert_eq!(features.get("contextEmit"), Some(false));
    }

    #[test]
    fn test_preseeded_flag_is_kept() {
        let engine = engine();
        engine.context().features().enable("contextEmit").unwrap();

        let op = spy_emit(Arc::new(AtomicUsize::new(0)));
        engine.wrap(&op, HookSpec::new()).unwrap();
        assert!(engine.context().features().is_enabled("contextEmit"));
    }

    #[test]
    fn test_default_enabled_option() {
        let engine = engine();
        let op = spy_emit(Arc::new(AtomicUsize::new(0)));
        engine
            .wrap(&op, HookSpec::new().flag("contextPlugin").default_enabled(true))
            .unwrap();
        assert!(engine.context().features().is_enabled("contextPlugin"));
    }

    #[test]
    fn test_sync_errors_propagate() {
        let engine = engine();
        let op: SyncOperation<(), (), u32> = SyncOperation::new("Loader", "resolve", |_: &(), _: &()| {
            Err(GuardError::Operation(anyhow::anyhow!("resolve failed")))
        });
        engine.wrap(&op, HookSpec::new()).unwrap();

        assert!(matches!(op.call(&(), &()), Err(GuardError::Operation(_))));
    }

    #[test]
    fn test_origin_is_unguarded() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        let op = spy_emit(calls.clone());

        let hooked = engine.wrap(&op, HookSpec::new()).unwrap();
        engine.context().features().enable("contextEmit").unwrap();

        let result = (hooked.origin)(&Emitter { id: 0 }, &(0, 0, 5)).unwrap();
        assert_eq!(result, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_block_never_starts_original() {
        let engine = engine();
        let started = Arc::new(AtomicUsize::new(0));
        let started_in_op = started.clone();
        let op = AsyncOperation::new("NodeLoader", "writeConfig", move |_: Arc<()>, _: String| {
            started_in_op.fetch_add(1, Ordering::SeqCst);
            Deferred::pending(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(true)
            })
        });

        engine.wrap_async(&op, HookSpec::new()).unwrap();
        engine
            .context()
            .features()
            .enable("nodeLoaderWriteConfig")
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            op.call(Arc::new(()), "config".to_string()),
        )
        .await
        .expect("拦截应立即完成")
        .unwrap();

        assert!(!result);
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(engine.context().alerts().protection_times(), 1);
    }

    #[tokio::test]
    async fn test_async_passthrough_waits_for_original() {
        let engine = engine();
        let (tx, rx) = oneshot::channel::<String>();
        let rx = Arc::new(parking_lot::Mutex::new(Some(rx)));
        let op = AsyncOperation::new("Loader", "resolve", move |_: Arc<()>, name: String| {
            let rx = rx.lock().take();
            Deferred::pending(async move {
                let suffix = match rx {
                    Some(rx) => rx.await.unwrap_or_default(),
                    None => String::new(),
                };
                Ok(format!("{name}{suffix}"))
            })
        });

        engine
            .wrap_async(
                &op,
                HookSpec::new().transform_async(|result: Option<String>, _: String| async move {
                    Ok(result.map(|r| r.to_uppercase()).unwrap_or_default())
                }),
            )
            .unwrap();

        let handle = tokio::spawn(op.call(Arc::new(()), "plugin".to_string()).into_future());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished(), "原始实现完成前不应结束");

        tx.send("-ok".to_string()).unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), "PLUGIN-OK");
    }

    #[tokio::test]
    async fn test_async_plain_value_is_deferred() {
        let engine = engine();
        let op = AsyncOperation::new("I18n", "count", |_: Arc<()>, n: u32| Deferred::ready(n * 2));
        engine.wrap_async(&op, HookSpec::new()).unwrap();

        let deferred = op.call(Arc::new(()), 21);
        assert!(deferred.is_pending());
        assert_eq!(deferred.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_async_transform_failure_rejects() {
        let engine = engine();
        let op = AsyncOperation::new("Loader", "reloadPlugin", |_: Arc<()>, _: ()| {
            Deferred::ready(1u8)
        });
        engine
            .wrap_async(
                &op,
                HookSpec::new().transform_async(|_: Option<u8>, _: ()| async {
                    Err(GuardError::Operation(anyhow::anyhow!("transform failed")))
                }),
            )
            .unwrap();

        assert!(op.call(Arc::new(()), ()).await.is_err());
    }

    #[tokio::test]
    async fn test_async_original_failure_rejects() {
        let engine = engine();
        let op: AsyncOperation<(), (), u8> = AsyncOperation::new("Loader", "unload", |_, _| {
            Deferred::pending(async { Err(GuardError::configuration("boom")) })
        });
        engine.wrap_async(&op, HookSpec::new()).unwrap();

        assert!(matches!(
            op.call(Arc::new(()), ()).await,
            Err(GuardError::Configuration(_))
        ));
    }

    #[test]
    fn test_wrap_named_listener() {
        let engine = engine();
        let table: OperationTable<SyncOperation<(), u32, u32>> = OperationTable::new();
        table.insert(SyncOperation::new("console", "market/install", |_: &(), id: &u32| Ok(*id)));

        engine
            .wrap_named(
                &table,
                "market/install",
                HookSpec::new()
                    .flag("marketInstall")
                    .message("已为您阻止安装插件"),
            )
            .unwrap();
        engine.context().features().enable("marketInstall").unwrap();

        let listener = table.require("market/install").unwrap();
        assert_eq!(listener.call(&(), &9).unwrap(), 0);
        assert!(matches!(
            engine.wrap_named(&table, "explorer/read", HookSpec::new()),
            Err(GuardError::Configuration(_))
        ));
    }

    #[test]
    fn test_install_custom_decision() {
        let engine = engine();
        let op: SyncOperation<(), u32, bool> =
            SyncOperation::new("Registry", "delete", |_: &(), id: &u32| Ok(*id != 0));

        engine
            .install(&op, "unloadProtect", "已为您阻止意外操作", |origin| {
                let hooked: SyncFn<(), u32, bool> = Arc::new(move |receiver: &(), id: &u32| {
                    if *id == 7 {
                        return Ok(false);
                    }
                    origin(receiver, id)
                });
                hooked
            })
            .unwrap();

        assert!(!op.call(&(), &7).unwrap());
        assert!(op.call(&(), &3).unwrap());
        assert!(
            engine
                .install(&op, "unloadProtect", "", |origin| origin)
                .is_err()
        );
    }

    #[test]
    fn test_second_engine_cannot_stack_on_hooked_slot() {
        let ctx = GuardContext::in_memory().unwrap();
        let first = InterceptionEngine::new(ctx.clone());
        let second = InterceptionEngine::new(ctx.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let op = spy_emit(calls.clone());

        first.wrap(&op, HookSpec::new()).unwrap();
        assert!(op.is_hooked());
        assert!(matches!(
            second.wrap(&op, HookSpec::new()),
            Err(GuardError::Configuration(_))
        ));
        assert!(second.ensure_unhooked(&op).is_err());
        assert!(second.records().is_empty());

        ctx.features().enable("contextEmit").unwrap();
        op.call(&Emitter { id: 0 }, &(0, 0, 1)).unwrap();
        assert_eq!(ctx.alerts().protection_times(), 1, "只应有一层拦截");
    }

    #[test]
    fn test_rejected_wrap_does_not_seed_flag() {
        let engine = engine();
        let op = spy_emit(Arc::new(AtomicUsize::new(0)));
        engine.wrap(&op, HookSpec::new()).unwrap();

        let again = engine.wrap(&op, HookSpec::new().flag("neverSeeded"));
        assert!(again.is_err());
        assert!(!engine.context().features().has("neverSeeded"));
    }

    #[test]
    fn test_malformed_flag_leaves_slot_free() {
        let engine = engine();
        let op = spy_emit(Arc::new(AtomicUsize::new(0)));

        assert!(engine.wrap(&op, HookSpec::new().flag("context emit")).is_err());
        assert!(!op.is_hooked());
        engine.wrap(&op, HookSpec::new()).unwrap();
    }

    #[test]
    fn test_hook_before_and_after() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        let op = spy_emit(calls.clone());

        engine
            .hook(
                &op,
                "contextEmit",
                DEFAULT_HOOK_MESSAGE,
                |emitter: &Emitter, _: &(u32, u32, u32)| {
                    if emitter.id == 9 {
                        HookPass::Return(Ok(99))
                    } else {
                        HookPass::Proceed
                    }
                },
                |result: u32, args: &(u32, u32, u32)| Ok(result + args.2),
            )
            .unwrap();

        assert_eq!(op.call(&Emitter { id: 9 }, &(1, 1, 1)).unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(op.call(&Emitter { id: 1 }, &(0, 0, 2)).unwrap(), 1004);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_async_short_circuit() {
        let engine = engine();
        let started = Arc::new(AtomicUsize::new(0));
        let started_in_op = started.clone();
        let op = AsyncOperation::new("Loader", "resolve", move |_: Arc<()>, name: String| {
            started_in_op.fetch_add(1, Ordering::SeqCst);
            Deferred::ready(name)
        });

        engine
            .hook_async(
                &op,
                "loaderResolve",
                DEFAULT_HOOK_MESSAGE,
                |_: &Arc<()>, name: &String| {
                    if name.is_empty() {
                        HookPass::Return(Err(GuardError::configuration("empty name")))
                    } else {
                        HookPass::Proceed
                    }
                },
                |result: String, _: String| async move { Ok(format!("{result}!")) },
            )
            .unwrap();

        assert!(op.call(Arc::new(()), String::new()).await.is_err());
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(op.call(Arc::new(()), "echo".to_string()).await.unwrap(), "echo!");
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_runs_before_flag() {
        let engine = engine();
        let op = AsyncOperation::new("console", "explorer/read", |_: Arc<()>, path: String| {
            Deferred::ready(format!("content of {path}"))
        });

        let hooked = engine
            .wrap_async_gated(&op, HookSpec::new().flag("explorerRead"), |path: &String| {
                if path.contains("secret") {
                    HookPass::Return(Ok("refused".to_string()))
                } else {
                    HookPass::Proceed
                }
            })
            .unwrap();
        assert_eq!(engine.records().len(), 1);
        assert_eq!(hooked.record.registry_name, "explorerRead");

        engine.context().features().enable("explorerRead").unwrap();
        assert_eq!(op.call(Arc::new(()), "secret".to_string()).await.unwrap(), "refused");
        assert_eq!(engine.context().alerts().protection_times(), 0);
        assert_eq!(op.call(Arc::new(()), "notes".to_string()).await.unwrap(), "");
        assert_eq!(engine.context().alerts().protection_times(), 1);
    }

    #[test]
    fn test_rollback_restores_origin() {
        let engine = engine();
        let calls = Arc::new(AtomicUsize::new(0));
        let op = spy_emit(calls.clone());

        let hooked = engine.wrap(&op, HookSpec::new().default_enabled(true)).unwrap();
        engine.rollback(&op, hooked);

        assert!(!op.is_hooked());
        assert!(!engine.is_hooked("Context", "emit"));
        assert_eq!(op.call(&Emitter { id: 0 }, &(0, 0, 3)).unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

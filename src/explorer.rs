//! 文件浏览器守护
//!
//! 宿主控制台暴露的文件读写能力按路径分类把关：
//! - 不安全路径的读取返回固定拒绝文本，不报错
//! - 不安全路径的写入、删除、重命名返回 [`DenialError`](crate::error::DenialError)
//! - 每个操作另外绑定一个开关，开启后整体拦截

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::error::Result;
use crate::hooks::{AsyncOperation, Deferred, HookPass, HookRecord, HookSpec, InterceptionEngine};
use crate::path::PathClassifier;

/// 拒绝读取时返回的文本
pub const REFUSAL_TEXT: &str = "拒绝访问";

const OWNER: &str = "console";

/// 读取请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub path: String,
    /// 为 true 时内容以 base64 返回
    pub binary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
    pub binary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    pub from: String,
    pub to: String,
}

/// 宿主的文件浏览器能力
pub struct FileExplorer {
    pub read: AsyncOperation<(), ReadRequest, String>,
    pub write: AsyncOperation<(), WriteRequest, ()>,
    pub rename: AsyncOperation<(), RenameRequest, ()>,
    pub remove: AsyncOperation<(), String, ()>,
}

impl FileExplorer {
    pub fn new<RD, WR, RN, RM>(read: RD, write: WR, rename: RN, remove: RM) -> Self
    where
        RD: Fn(Arc<()>, ReadRequest) -> Deferred<String> + Send + Sync + 'static,
        WR: Fn(Arc<()>, WriteRequest) -> Deferred<()> + Send + Sync + 'static,
        RN: Fn(Arc<()>, RenameRequest) -> Deferred<()> + Send + Sync + 'static,
        RM: Fn(Arc<()>, String) -> Deferred<()> + Send + Sync + 'static,
    {
        Self {
            read: AsyncOperation::new(OWNER, "explorer/read", read),
            write: AsyncOperation::new(OWNER, "explorer/write", write),
            rename: AsyncOperation::new(OWNER, "explorer/rename", rename),
            remove: AsyncOperation::new(OWNER, "explorer/remove", remove),
        }
    }

    pub async fn read_file(&self, path: &str, binary: bool) -> Result<String> {
        self.read
            .call(
                Arc::new(()),
                ReadRequest {
                    path: path.to_string(),
                    binary,
                },
            )
            .await
    }

    pub async fn write_file(&self, path: &str, content: &str, binary: bool) -> Result<()> {
        self.write
            .call(
                Arc::new(()),
                WriteRequest {
                    path: path.to_string(),
                    content: content.to_string(),
                    binary,
                },
            )
            .await
    }

    pub async fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        self.rename
            .call(
                Arc::new(()),
                RenameRequest {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            )
            .await
    }

    pub async fn remove_file(&self, path: &str) -> Result<()> {
        self.remove.call(Arc::new(()), path.to_string()).await
    }
}

/// 拒绝读取时的返回内容
pub fn refusal_payload(binary: bool) -> String {
    if binary {
        STANDARD.encode(REFUSAL_TEXT)
    } else {
        REFUSAL_TEXT.to_string()
    }
}

/// 已安装的文件浏览器守护
#[derive(Debug)]
pub struct ExplorerGuard {
    classifier: Arc<PathClassifier>,
    records: Vec<HookRecord>,
}

impl ExplorerGuard {
    /// 为四个操作各安装一次 hook：先做路径检查，再由开关决定是否拦截
    ///
    /// 任一操作槽已被安装 hook 时不修改任何操作槽。
    pub fn install(
        engine: &InterceptionEngine,
        explorer: &FileExplorer,
        classifier: PathClassifier,
    ) -> Result<Self> {
        engine.ensure_unhooked(&explorer.read)?;
        engine.ensure_unhooked(&explorer.write)?;
        engine.ensure_unhooked(&explorer.rename)?;
        engine.ensure_unhooked(&explorer.remove)?;

        let classifier = Arc::new(classifier);
        let ctx = engine.context().clone();

        let read = {
            let classifier = classifier.clone();
            let ctx = ctx.clone();
            engine.wrap_async_gated(
                &explorer.read,
                HookSpec::new().flag("explorerRead"),
                move |request: &ReadRequest| {
                    if classifier.is_safe(&request.path) {
                        return HookPass::Proceed;
                    }
                    debug!(path = %request.path, "refused explorer read");
                    ctx.alerts().protect(
                        "explorerRead",
                        "explorer/read",
                        Some("已为您阻止了一个核心数据的读取"),
                    );
                    HookPass::Return(Ok(refusal_payload(request.binary)))
                },
            )?
        };

        let write = {
            let classifier = classifier.clone();
            let ctx = ctx.clone();
            engine.wrap_async_gated(
                &explorer.write,
                HookSpec::new().flag("explorerWrite"),
                move |request: &WriteRequest| {
                    if classifier.is_safe(&request.path) {
                        return HookPass::Proceed;
                    }
                    HookPass::Return(Err(ctx.alerts().deny(
                        "explorerWrite",
                        "explorer/write",
                        "已为您阻止篡改关键性数据",
                    )))
                },
            )?
        };

        let rename = {
            let classifier = classifier.clone();
            let ctx = ctx.clone();
            engine.wrap_async_gated(
                &explorer.rename,
                HookSpec::new().flag("explorerRename"),
                move |request: &RenameRequest| {
                    if classifier.is_rename_safe(&request.from, &request.to) {
                        return HookPass::Proceed;
                    }
                    HookPass::Return(Err(ctx.alerts().deny(
                        "explorerRename",
                        "explorer/rename",
                        "已为您阻止篡改文件名称",
                    )))
                },
            )?
        };

        let remove = {
            let classifier = classifier.clone();
            engine.wrap_async_gated(
                &explorer.remove,
                HookSpec::new().flag("explorerRemove"),
                move |path: &String| {
                    if classifier.is_safe(path) {
                        return HookPass::Proceed;
                    }
                    HookPass::Return(Err(ctx.alerts().deny(
                        "explorerRemove",
                        "explorer/remove",
                        "已为您阻止移除关键性数据",
                    )))
                },
            )?
        };

        Ok(Self {
            classifier,
            records: vec![read.record, write.record, rename.record, remove.record],
        })
    }

    pub fn classifier(&self) -> &PathClassifier {
        &self.classifier
    }

    pub fn records(&self) -> &[HookRecord] {
        &self.records
    }
}

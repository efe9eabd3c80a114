use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::error::Result;

/// 宿主对已加载模块实例的身份标识，按 `Arc` 指针比较
pub struct RuntimeHandle {
    id: Uuid,
    name: String,
    pinned: AtomicBool,
}

impl RuntimeHandle {
    pub fn new<S: Into<String>>(name: S) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            pinned: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 标记为受保护，注册表删除时会被拒绝
    pub fn pin(&self) {
        self.pinned.store(true, Ordering::SeqCst);
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::SeqCst)
    }

    pub fn same(a: &Arc<Self>, b: &Arc<Self>) -> bool {
        Arc::ptr_eq(a, b)
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

/// 作用域销毁监听器；返回的错误由宿主呈现给触发方
pub type DisposeListener = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// 作用域派生子实例监听器
pub type ForkListener = Box<dyn Fn(&Arc<RuntimeHandle>) + Send + Sync>;

/// 宿主作用域
pub trait Scope: Send + Sync {
    fn runtime(&self) -> Arc<RuntimeHandle>;

    fn parent(&self) -> Option<Arc<dyn Scope>>;

    fn root(&self) -> Arc<dyn Scope>;

    fn on_dispose(&self, listener: DisposeListener);

    fn on_fork(&self, listener: ForkListener);
}

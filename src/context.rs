//! 拦截层上下文
//!
//! 持有功能开关、告警广播与指标，构造一次后以 `Arc` 传入各组件，
//! 生命周期与守护模块实例绑定。

use std::fmt;
use std::sync::Arc;

use crate::alert::{AlertBroadcaster, ChannelCapability};
use crate::error::Result;
use crate::feature::{ConfigStore, FeatureRegistry, MemoryConfigStore};
use crate::metrics::GuardMetrics;

pub struct GuardContext {
    features: FeatureRegistry,
    alerts: AlertBroadcaster,
    metrics: Arc<GuardMetrics>,
}

impl GuardContext {
    pub fn new(store: Arc<dyn ConfigStore>) -> Result<Arc<Self>> {
        let metrics = Arc::new(GuardMetrics::new()?);
        let channel = Arc::new(ChannelCapability::new());

        Ok(Arc::new(Self {
            features: FeatureRegistry::new(store),
            alerts: AlertBroadcaster::new(channel, metrics.clone()),
            metrics,
        }))
    }

    /// 使用进程内配置存储构造
    pub fn in_memory() -> Result<Arc<Self>> {
        Self::new(Arc::new(MemoryConfigStore::new()))
    }

    pub fn features(&self) -> &FeatureRegistry {
        &self.features
    }

    pub fn alerts(&self) -> &AlertBroadcaster {
        &self.alerts
    }

    pub fn metrics(&self) -> &GuardMetrics {
        &self.metrics
    }

    pub fn channel(&self) -> &Arc<ChannelCapability> {
        self.alerts.channel()
    }
}

impl fmt::Debug for GuardContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardContext")
            .field("features", &self.features)
            .field("protection_times", &self.alerts.protection_times())
            .field("channel", self.channel())
            .finish()
    }
}

//! 告警广播模块
//!
//! - 每次拦截累加保护计数并记录 info 日志
//! - 向宿主观察通道广播结构化事件；通道未就绪时逐条排队，就绪后各自广播一次
//! - 广播失败只记录告警日志，绝不影响被拦截的调用

mod channel;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DenialError, GuardError};
use crate::metrics::GuardMetrics;

pub use channel::{BroadcastOptions, ChannelCapability, ObservationChannel};

/// 广播事件名
pub const ALERT_EVENT: &str = "k2345-defended";
/// 告警消息前缀
pub const ALERT_PREFIX: &str = "k2345Security - ";
/// 未提供消息时的默认告警文案
pub const DEFAULT_PROTECT_MESSAGE: &str = "已保护你的 Koishi 免受一次威胁";

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// 拦截告警，订阅方短暂展示
    Protect,
    /// 通知（如启动横幅），订阅方持续展示直到关闭
    Notice,
}

/// 一次拦截或通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertEvent {
    pub kind: AlertKind,
    /// 触发时的累计保护次数
    pub protection_count: u64,
    pub registry_name: String,
    pub hooked_name: String,
    pub title: Option<String>,
    pub message: String,
    /// 毫秒时间戳
    pub timestamp: i64,
}

impl AlertEvent {
    pub fn payload(&self) -> AlertPayload {
        AlertPayload {
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            registry_name: self.registry_name.clone(),
            hooked_name: self.hooked_name.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// 广播载荷
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message: String,
    pub registry_name: String,
    pub hooked_name: String,
    pub timestamp: i64,
}

/// 告警广播器
pub struct AlertBroadcaster {
    protection_times: AtomicU64,
    channel: Arc<ChannelCapability>,
    metrics: Arc<GuardMetrics>,
}

impl AlertBroadcaster {
    pub fn new(channel: Arc<ChannelCapability>, metrics: Arc<GuardMetrics>) -> Self {
        Self {
            protection_times: AtomicU64::new(0),
            channel,
            metrics,
        }
    }

    pub fn channel(&self) -> &Arc<ChannelCapability> {
        &self.channel
    }

    pub fn protection_times(&self) -> u64 {
        self.protection_times.load(Ordering::SeqCst)
    }

    /// 记录一次拦截并广播
    pub fn protect(
        &self,
        registry_name: &str,
        hooked_name: &str,
        message: Option<&str>,
    ) -> AlertEvent {
        let count = self.protection_times.fetch_add(1, Ordering::SeqCst) + 1;
        let message = format!(
            "{ALERT_PREFIX}{}",
            message.unwrap_or(DEFAULT_PROTECT_MESSAGE)
        );
        info!(
            registry = %registry_name,
            hook = %hooked_name,
            protection_times = count,
            "{message} (已保护 {count} 次)"
        );
        self.metrics.record_protection(registry_name);

        let event = AlertEvent {
            kind: AlertKind::Protect,
            protection_count: count,
            registry_name: registry_name.to_string(),
            hooked_name: hooked_name.to_string(),
            title: None,
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.dispatch(&event);
        event
    }

    /// 记录一次拦截并生成拒绝错误
    pub fn deny(&self, registry_name: &str, hooked_name: &str, message: &str) -> GuardError {
        self.protect(registry_name, hooked_name, Some(message));
        DenialError::new(registry_name, hooked_name, message).into()
    }

    /// 广播一条通知，不计入保护次数
    pub fn notice(&self, title: &str, message: &str) -> AlertEvent {
        let event = AlertEvent {
            kind: AlertKind::Notice,
            protection_count: self.protection_times(),
            registry_name: "notice".to_string(),
            hooked_name: "notice".to_string(),
            title: Some(title.to_string()),
            message: format!("{ALERT_PREFIX}{message}"),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        self.dispatch(&event);
        event
    }

    fn dispatch(&self, event: &AlertEvent) {
        let payload = event.payload();
        if !self.channel.is_available() {
            debug!(
                registry = %payload.registry_name,
                "observation channel unavailable, alert queued"
            );
        }

        self.channel.when_available(move |channel| {
            let value = match serde_json::to_value(&payload) {
                Ok(value) => value,
                Err(err) => {
                    warn!(registry = %payload.registry_name, "failed to encode alert: {err}");
                    return;
                }
            };
            if let Err(err) = channel.broadcast(ALERT_EVENT, value, BroadcastOptions::default()) {
                warn!(registry = %payload.registry_name, "failed to broadcast alert: {err}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingChannel;

    fn broadcaster() -> AlertBroadcaster {
        AlertBroadcaster::new(
            Arc::new(ChannelCapability::new()),
            Arc::new(GuardMetrics::new().unwrap()),
        )
    }

    #[test]
    fn test_protect_increments_counter_and_broadcasts() {
        let alerts = broadcaster();
        let channel = RecordingChannel::new();
        alerts.channel().provide(channel.clone());

        let event = alerts.protect("contextEmit", "Context.emit", Some("已为您阻止插件发出 Koishi 事件"));
        assert_eq!(event.protection_count, 1);
        assert_eq!(alerts.protection_times(), 1);

        let sent = channel.events();
        assert_eq!(sent.len(), 1);
        let (name, payload, options) = &sent[0];
        assert_eq!(name, ALERT_EVENT);
        assert_eq!(payload["registryName"], "contextEmit");
        assert_eq!(payload["hookedName"], "Context.emit");
        assert_eq!(payload["type"], "protect");
        assert_eq!(
            payload["message"],
            "k2345Security - 已为您阻止插件发出 Koishi 事件"
        );
        assert!(payload["timestamp"].as_i64().unwrap() > 0);
        assert!(payload.get("title").is_none());
        assert_eq!(*options, BroadcastOptions::default());
    }

    #[test]
    fn test_default_message() {
        let alerts = broadcaster();
        let event = alerts.protect("loaderResolve", "Loader.resolve", None);
        assert_eq!(event.message, format!("{ALERT_PREFIX}{DEFAULT_PROTECT_MESSAGE}"));
    }

    #[test]
    fn test_alerts_before_channel_are_delivered_individually() {
        let alerts = broadcaster();
        alerts.protect("contextEmit", "Context.emit", Some("first"));
        alerts.protect("contextOn", "Context.on", Some("second"));
        assert_eq!(alerts.channel().pending(), 2);

        let channel = RecordingChannel::new();
        assert_eq!(alerts.channel().provide(channel.clone()), 2);

        let sent = channel.events();
        assert_eq!(sent.len(), 2, "每条告警都应单独广播");
        assert_eq!(sent[0].1["registryName"], "contextEmit");
        assert_eq!(sent[1].1["registryName"], "contextOn");
        assert_eq!(alerts.channel().pending(), 0);
    }

    #[test]
    fn test_broadcast_failure_is_swallowed() {
        let alerts = broadcaster();
        alerts.channel().provide(RecordingChannel::failing());

        let event = alerts.protect("contextEmit", "Context.emit", None);
        assert_eq!(event.protection_count, 1);
    }

    #[test]
    fn test_deny_raises_one_alert() {
        let alerts = broadcaster();
        let err = alerts.deny("explorerRemove", "explorer/remove", "已为您阻止移除关键性数据");

        assert_eq!(alerts.protection_times(), 1);
        let denial = err.as_denial().unwrap();
        assert_eq!(denial.registry_name, "explorerRemove");
        assert_eq!(denial.message, "已为您阻止移除关键性数据");
    }

    #[test]
    fn test_notice_does_not_count() {
        let alerts = broadcaster();
        let channel = RecordingChannel::new();
        alerts.channel().provide(channel.clone());

        alerts.notice("k2345 Security", "已加载");
        assert_eq!(alerts.protection_times(), 0);

        let sent = channel.events();
        assert_eq!(sent[0].1["type"], "notice");
        assert_eq!(sent[0].1["title"], "k2345 Security");
    }
}

// ==========================================
// 住院医师排班系统 - 引擎层事件发布
// ==========================================
// 职责: 定义排班事件发布 trait，实现依赖倒置
// 说明: 引擎只发布事件，不调度也不持有下游消费者
//       （通知、预测、应急预案等后台任务由外部订阅）
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

// ==========================================
// 排班事件类型
// ==========================================

/// 排班事件触发类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEventType {
    /// 排班生成完成
    ScheduleGenerated,
    /// 排班生成失败
    GenerationFailed,
    /// 换班已执行
    SwapExecuted,
    /// 换班已回滚
    SwapRolledBack,
}

impl ScheduleEventType {
    /// 转换为字符串标识
    pub fn as_str(&self) -> &str {
        match self {
            ScheduleEventType::ScheduleGenerated => "ScheduleGenerated",
            ScheduleEventType::GenerationFailed => "GenerationFailed",
            ScheduleEventType::SwapExecuted => "SwapExecuted",
            ScheduleEventType::SwapRolledBack => "SwapRolledBack",
        }
    }
}

/// 排班事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub event_id: String,
    /// 生成运行ID 或 换班记录ID
    pub reference_id: String,
    pub event_type: ScheduleEventType,
    /// 事件来源描述
    pub source: Option<String>,
    /// 受影响的人员（None 表示全部）
    pub affected_people: Option<Vec<String>>,
    /// 受影响的日期范围
    pub affected_date_range: Option<(NaiveDate, NaiveDate)>,
    /// 是否需要全量处理
    pub is_full_scope: bool,
}

impl ScheduleEvent {
    /// 创建全量事件（排班生成）
    pub fn full_scope(
        reference_id: &str,
        event_type: ScheduleEventType,
        source: Option<String>,
        date_range: (NaiveDate, NaiveDate),
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            reference_id: reference_id.to_string(),
            event_type,
            source,
            affected_people: None,
            affected_date_range: Some(date_range),
            is_full_scope: true,
        }
    }

    /// 创建增量事件（换班）
    pub fn incremental(
        reference_id: &str,
        event_type: ScheduleEventType,
        source: Option<String>,
        people: Vec<String>,
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            reference_id: reference_id.to_string(),
            event_type,
            source,
            affected_people: Some(people),
            affected_date_range: date_range,
            is_full_scope: false,
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 排班事件发布者 Trait
///
/// # 返回
/// - `Ok(id)`: 下游任务/事件 ID（如果支持）或空字符串
/// - `Err`: 发布失败（调用方只记录，不影响已提交的结果）
pub trait ScheduleEventPublisher: Send + Sync {
    fn publish(&self, event: ScheduleEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
///
/// 用于不需要事件发布的场景（如单元测试）
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl ScheduleEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: ScheduleEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpEventPublisher: 跳过事件发布 - reference_id={}, event_type={}",
            event.reference_id,
            event.event_type.as_str()
        );
        Ok(String::new())
    }
}

/// 通道事件发布者: 事件推送到 tokio mpsc 通道，由外部后台任务消费
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<ScheduleEvent>,
}

impl ChannelEventPublisher {
    /// 创建发布者与对应的接收端
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ScheduleEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl ScheduleEventPublisher for ChannelEventPublisher {
    fn publish(&self, event: ScheduleEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let event_id = event.event_id.clone();
        self.sender
            .try_send(event)
            .map_err(|e| format!("事件通道发送失败: {}", e))?;
        Ok(event_id)
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn ScheduleEventPublisher>> 的使用
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn ScheduleEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn ScheduleEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件（如果有发布者）
    pub fn publish(&self, event: ScheduleEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => {
                tracing::debug!(
                    "OptionalEventPublisher: 未配置发布者，跳过事件 - reference_id={}, event_type={}",
                    event.reference_id,
                    event.event_type.as_str()
                );
                Ok(String::new())
            }
        }
    }

    /// 发布并吞掉错误（只记录告警）
    pub fn publish_or_warn(&self, event: ScheduleEvent) {
        let event_type = event.event_type;
        if let Err(e) = self.publish(event) {
            tracing::warn!(event_type = event_type.as_str(), error = %e, "事件发布失败");
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
        )
    }

    #[test]
    fn test_schedule_event_full_scope() {
        let event = ScheduleEvent::full_scope(
            "RUN-1",
            ScheduleEventType::ScheduleGenerated,
            Some("ScheduleEngine".to_string()),
            range(),
        );

        assert_eq!(event.reference_id, "RUN-1");
        assert!(event.is_full_scope);
        assert!(event.affected_people.is_none());
        assert_eq!(event.affected_date_range, Some(range()));
    }

    #[test]
    fn test_schedule_event_incremental() {
        let event = ScheduleEvent::incremental(
            "SWAP-1",
            ScheduleEventType::SwapExecuted,
            None,
            vec!["R1".to_string(), "R2".to_string()],
            Some(range()),
        );

        assert!(!event.is_full_scope);
        assert_eq!(event.affected_people.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_optional_publisher_none() {
        let publisher = OptionalEventPublisher::none();
        assert!(!publisher.is_configured());

        let event = ScheduleEvent::full_scope("RUN-1", ScheduleEventType::ScheduleGenerated, None, range());
        assert!(publisher.publish(event).is_ok());
    }

    #[test]
    fn test_optional_publisher_with_noop() {
        let noop = Arc::new(NoOpEventPublisher) as Arc<dyn ScheduleEventPublisher>;
        let publisher = OptionalEventPublisher::with_publisher(noop);
        assert!(publisher.is_configured());

        let event = ScheduleEvent::full_scope("RUN-1", ScheduleEventType::GenerationFailed, None, range());
        assert!(publisher.publish(event).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_channel_publisher_delivers_and_reports_full_channel() {
        let (publisher, mut receiver) = ChannelEventPublisher::new(1);

        let first = ScheduleEvent::full_scope("RUN-1", ScheduleEventType::ScheduleGenerated, None, range());
        let id = publisher.publish(first).unwrap();

        let second = ScheduleEvent::full_scope("RUN-2", ScheduleEventType::ScheduleGenerated, None, range());
        assert!(publisher.publish(second).is_err());

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_id, id);
        assert_eq!(received.reference_id, "RUN-1");
    }
}

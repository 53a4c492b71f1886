// ==========================================
// 住院医师排班系统 - 换班领域模型
// ==========================================
// 状态机: PROPOSED → VALIDATED → EXECUTING → EXECUTED → [ROLLED_BACK]
// 回滚: 单级逆操作重放（非通用日志重放）
// ==========================================

use crate::domain::types::{AssignmentSource, SwapStatus, SwapType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ==========================================
// SwapRequest - 换班请求
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub swap_type: SwapType,
    pub source_person_id: String,        // 发起人
    pub source_block_id: String,         // 发起人让出的块
    pub target_person_id: String,        // 接收人
    pub target_block_id: Option<String>, // 接收人让出的块（ABSORB 时为空）
    pub requested_by: String,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>, // 客户端幂等键
}

impl SwapRequest {
    /// 一对一互换
    pub fn one_to_one(
        source_person_id: &str,
        source_block_id: &str,
        target_person_id: &str,
        target_block_id: &str,
    ) -> Self {
        Self {
            swap_type: SwapType::OneToOne,
            source_person_id: source_person_id.to_string(),
            source_block_id: source_block_id.to_string(),
            target_person_id: target_person_id.to_string(),
            target_block_id: Some(target_block_id.to_string()),
            requested_by: source_person_id.to_string(),
            reason: None,
            idempotency_key: None,
        }
    }

    /// 承接（接收人接手发起人的排班）
    pub fn absorb(source_person_id: &str, source_block_id: &str, target_person_id: &str) -> Self {
        Self {
            swap_type: SwapType::Absorb,
            source_person_id: source_person_id.to_string(),
            source_block_id: source_block_id.to_string(),
            target_person_id: target_person_id.to_string(),
            target_block_id: None,
            requested_by: source_person_id.to_string(),
            reason: None,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

// ==========================================
// SwapOperation - 单条排班变更（含逆操作所需信息）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapOperation {
    pub assignment_id: String,
    pub block_id: String,
    pub prior_person_id: String,        // 换班前持有人
    pub prior_source: AssignmentSource, // 换班前来源（回滚时恢复）
    pub new_person_id: String,          // 换班后持有人
    pub post_revision: i32,             // 换班提交后的 revision（回滚时乐观校验）
}

impl SwapOperation {
    /// 提交换班时期望的原 revision
    pub fn expected_revision(&self) -> i32 {
        self.post_revision - 1
    }
}

/// 非法的换班状态转换
#[derive(Error, Debug, Clone, PartialEq)]
#[error("无效的换班状态转换: from={from} to={to}")]
pub struct InvalidSwapTransition {
    pub from: SwapStatus,
    pub to: SwapStatus,
}

// ==========================================
// SwapRecord - 换班记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: String,
    pub swap_type: SwapType,
    pub source_person_id: String,
    pub source_block_id: String,
    pub target_person_id: String,
    pub target_block_id: Option<String>,
    pub status: SwapStatus,
    pub idempotency_key: Option<String>,
    pub requested_by: String,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub rollback_reason: Option<String>,
    pub operations: Vec<SwapOperation>,
}

impl SwapRecord {
    /// 由请求创建 PROPOSED 记录
    pub fn proposed(request: &SwapRequest) -> Self {
        Self {
            swap_id: Uuid::new_v4().to_string(),
            swap_type: request.swap_type,
            source_person_id: request.source_person_id.clone(),
            source_block_id: request.source_block_id.clone(),
            target_person_id: request.target_person_id.clone(),
            target_block_id: request.target_block_id.clone(),
            status: SwapStatus::Proposed,
            idempotency_key: request.idempotency_key.clone(),
            requested_by: request.requested_by.clone(),
            reason: request.reason.clone(),
            requested_at: Utc::now(),
            executed_at: None,
            rolled_back_at: None,
            rollback_reason: None,
            operations: Vec::new(),
        }
    }

    /// 推进状态（非法转换返回错误，状态不变）
    pub fn transition_to(&mut self, next: SwapStatus) -> Result<(), InvalidSwapTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidSwapTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// 是否仍在回滚窗口内（窗口为 0 表示禁止回滚）
    pub fn within_rollback_window(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self.executed_at {
            Some(executed_at) => now.signed_duration_since(executed_at) < window,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_swap_record_lifecycle() {
        let request = SwapRequest::one_to_one("R1", "B1", "R2", "B2");
        let mut record = SwapRecord::proposed(&request);

        assert_eq!(record.status, SwapStatus::Proposed);
        record.transition_to(SwapStatus::Validated).unwrap();
        record.transition_to(SwapStatus::Executing).unwrap();
        record.transition_to(SwapStatus::Executed).unwrap();
        record.transition_to(SwapStatus::RolledBack).unwrap();

        let err = record.transition_to(SwapStatus::Executed).unwrap_err();
        assert_eq!(err.from, SwapStatus::RolledBack);
        assert_eq!(record.status, SwapStatus::RolledBack);
    }

    #[test]
    fn test_rollback_window() {
        let request = SwapRequest::absorb("R1", "B1", "R2");
        let mut record = SwapRecord::proposed(&request);
        let now = Utc::now();

        assert!(!record.within_rollback_window(now, Duration::hours(24)));

        record.executed_at = Some(now - Duration::hours(23));
        assert!(record.within_rollback_window(now, Duration::hours(24)));

        record.executed_at = Some(now - Duration::hours(25));
        assert!(!record.within_rollback_window(now, Duration::hours(24)));

        record.executed_at = Some(now);
        assert!(!record.within_rollback_window(now, Duration::zero()));
    }
}

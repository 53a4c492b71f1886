// ==========================================
// 住院医师排班系统 - 换班执行与回滚
// ==========================================
// 执行: 幂等键查询 → 独占租约 → 幂等键复查 → 锁内重新校验
//       → 单事务提交（排班改写 + 换班记录）→ 释放租约
// 回滚: 状态/窗口检查 → 同一组租约 → 校验换班后持有人与 revision
//       → 单事务恢复原持有人并标记 ROLLED_BACK
// ==========================================

use super::SwapService;
use crate::api::error::{ApiError, ApiResult};
use crate::domain::types::SwapStatus;
use crate::domain::{SwapRecord, SwapRequest};
use crate::engine::events::{ScheduleEvent, ScheduleEventType};
use crate::repository::{acquire_async, LeaseGuard, LockScope};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const EVENT_SOURCE: &str = "swap_service";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapExecution {
    pub status: SwapStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub swap_record_id: String,
    /// 幂等键命中已有记录，本次未做任何修改
    pub replayed: bool,
}

impl SwapExecution {
    fn from_record(record: &SwapRecord, replayed: bool) -> Self {
        Self {
            status: record.status,
            executed_at: record.executed_at,
            swap_record_id: record.swap_id.clone(),
            replayed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRollback {
    pub swap_record_id: String,
    pub status: SwapStatus,
    pub rolled_back_at: Option<DateTime<Utc>>,
}

impl SwapService {
    /// 执行换班
    ///
    /// # 错误
    /// - SwapValidation: 锁内重新校验存在 CRITICAL/HIGH 违规
    /// - LockAcquisitionTimeout: 租约获取超时（可携带幂等键重试）
    /// - SwapConflict: 提交时 revision 不匹配
    #[instrument(skip(self, request), fields(
        swap_type = %request.swap_type,
        source = %request.source_person_id,
        target = %request.target_person_id,
        idempotency_key = ?request.idempotency_key
    ))]
    pub async fn execute_swap(&self, request: &SwapRequest) -> ApiResult<SwapExecution> {
        if let Some(existing) = self.replay(request)? {
            return Ok(existing);
        }

        let config = self.config.load_scheduler_config().await?;
        let plan = match self.plan(request) {
            Ok(plan) => plan,
            // 两次读取之间同一幂等键的请求已提交，原排班已不在原持有人名下
            Err(e) => {
                return match self.replay(request)? {
                    Some(existing) => Ok(existing),
                    None => Err(e),
                }
            }
        };

        let owner_id = format!("swap:{}", Uuid::new_v4());
        let lease = acquire_async(
            &self.locks,
            &owner_id,
            &plan.lock_scopes(),
            chrono::Duration::seconds(config.lock_lease_seconds),
            Duration::from_millis(config.lock_timeout_ms),
        )
        .await?;

        // 等锁期间同一幂等键的请求可能已提交；错误路径由 LeaseGuard 析构释放
        if let Some(existing) = self.replay(request)? {
            release(lease);
            return Ok(existing);
        }

        // 锁内基于已提交状态重新解析与校验
        let plan = self.plan(request).map_err(|e| match e {
            ApiError::NotFound(msg) => ApiError::SwapConflict(format!("排班已被并发修改: {}", msg)),
            other => other,
        })?;
        let validation = self.check_plan(&plan, config)?;
        if !validation.is_valid {
            warn!(violations = validation.violations.len(), "换班校验未通过");
            return Err(ApiError::SwapValidation {
                violations: validation.blocking(),
            });
        }

        let mut record = SwapRecord::proposed(request);
        record.transition_to(SwapStatus::Validated)?;
        record.transition_to(SwapStatus::Executing)?;
        record.operations = plan.operations();
        record.executed_at = Some(Utc::now());
        record.transition_to(SwapStatus::Executed)?;

        let committed = self.assignments.commit_swap(&record, &owner_id);
        release(lease);
        committed?;

        info!(
            swap_id = %record.swap_id,
            operations = record.operations.len(),
            "换班已执行"
        );
        self.events.publish_or_warn(ScheduleEvent::incremental(
            &record.swap_id,
            ScheduleEventType::SwapExecuted,
            Some(EVENT_SOURCE.to_string()),
            plan.affected_people(),
            Some(plan.date_range()),
        ));

        Ok(SwapExecution::from_record(&record, false))
    }

    /// 回滚换班
    ///
    /// # 错误
    /// - AlreadyRolledBack: 记录已回滚
    /// - RollbackWindowExpired: 超出回滚窗口
    /// - SwapConflict: 换班后的排班已被改动
    #[instrument(skip(self, reason), fields(swap_id = %swap_id))]
    pub async fn rollback_swap(&self, swap_id: &str, reason: Option<&str>) -> ApiResult<SwapRollback> {
        let config = self.config.load_scheduler_config().await?;
        let window = config.rollback_window();

        let record = self.get_swap(swap_id)?;
        ensure_rollback_allowed(&record, Utc::now(), window, config.rollback_window_hours)?;

        let scopes = self.rollback_scopes(&record)?;
        let owner_id = format!("rollback:{}", Uuid::new_v4());
        let lease = acquire_async(
            &self.locks,
            &owner_id,
            &scopes,
            chrono::Duration::seconds(config.lock_lease_seconds),
            Duration::from_millis(config.lock_timeout_ms),
        )
        .await?;

        // 锁内复查（并发回滚）
        let mut record = self.get_swap(swap_id)?;
        let now = Utc::now();
        ensure_rollback_allowed(&record, now, window, config.rollback_window_hours)?;

        record.transition_to(SwapStatus::RolledBack)?;
        record.rolled_back_at = Some(now);
        record.rollback_reason = reason.map(str::to_string);

        let committed = self.assignments.commit_rollback(&record, &owner_id);
        release(lease);
        committed?;

        info!(swap_id = %record.swap_id, "换班已回滚");
        let people = record
            .operations
            .iter()
            .flat_map(|op| [op.prior_person_id.clone(), op.new_person_id.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.events.publish_or_warn(ScheduleEvent::incremental(
            &record.swap_id,
            ScheduleEventType::SwapRolledBack,
            Some(EVENT_SOURCE.to_string()),
            people,
            None,
        ));

        Ok(SwapRollback {
            swap_record_id: record.swap_id.clone(),
            status: record.status,
            rolled_back_at: record.rolled_back_at,
        })
    }

    /// 幂等键命中 → 返回已有记录
    fn replay(&self, request: &SwapRequest) -> ApiResult<Option<SwapExecution>> {
        let Some(key) = request.idempotency_key.as_deref() else {
            return Ok(None);
        };
        let existing = self.swaps.find_by_idempotency_key(key)?;
        if let Some(record) = &existing {
            info!(swap_id = %record.swap_id, idempotency_key = key, "幂等键命中，返回已有换班记录");
        }
        Ok(existing.map(|record| SwapExecution::from_record(&record, true)))
    }

    /// 回滚租约: 与执行时相同的 (人员, 块) 集合
    fn rollback_scopes(&self, record: &SwapRecord) -> ApiResult<Vec<LockScope>> {
        let mut pairs: BTreeSet<(String, String, NaiveDate)> = BTreeSet::new();
        for op in &record.operations {
            let block = self
                .snapshots
                .find_block(&op.block_id)?
                .ok_or_else(|| ApiError::NotFound(format!("块(id={})不存在", op.block_id)))?;
            pairs.insert((op.prior_person_id.clone(), op.block_id.clone(), block.date));
            pairs.insert((op.new_person_id.clone(), op.block_id.clone(), block.date));
        }
        Ok(pairs
            .into_iter()
            .map(|(person, block, date)| LockScope::pair(&person, &block, date))
            .collect())
    }
}

fn ensure_rollback_allowed(
    record: &SwapRecord,
    now: DateTime<Utc>,
    window: chrono::Duration,
    window_hours: i64,
) -> ApiResult<()> {
    match record.status {
        SwapStatus::Executed => {}
        SwapStatus::RolledBack => return Err(ApiError::AlreadyRolledBack(record.swap_id.clone())),
        other => {
            return Err(ApiError::InvalidStateTransition {
                from: other.to_string(),
                to: SwapStatus::RolledBack.to_string(),
            })
        }
    }

    if !record.within_rollback_window(now, window) {
        return Err(ApiError::RollbackWindowExpired {
            swap_id: record.swap_id.clone(),
            window_hours,
        });
    }
    Ok(())
}

fn release(lease: LeaseGuard) {
    let owner_id = lease.owner_id().to_string();
    if let Err(e) = lease.release() {
        warn!(owner_id = %owner_id, error = %e, "租约释放失败，等待过期");
    }
}

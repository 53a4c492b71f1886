// ==========================================
// 住院医师排班系统 - 换班 API
// ==========================================
// 职责: 换班校验、执行、回滚与查询
// 红线: 执行前必须校验；失败不留下任何部分修改
// ==========================================

use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::{SwapRecord, SwapRequest};
use crate::engine::swap::{SwapExecution, SwapRollback, SwapService, SwapValidation};

// ==========================================
// SwapApi - 换班 API
// ==========================================
pub struct SwapApi {
    service: Arc<SwapService>,
}

impl SwapApi {
    pub fn new(service: Arc<SwapService>) -> Self {
        Self { service }
    }

    /// 校验换班（不写入）
    pub async fn validate_swap(&self, request: &SwapRequest) -> ApiResult<SwapValidation> {
        check_ids(request)?;
        self.service.validate_swap(request).await
    }

    /// 执行换班
    ///
    /// # 返回
    /// - Ok(SwapExecution): 新执行或幂等重放（replayed = true）
    /// - Err(SwapValidation / LockAcquisitionTimeout / SwapConflict ...)
    pub async fn execute_swap(&self, request: &SwapRequest) -> ApiResult<SwapExecution> {
        check_ids(request)?;
        if request.requested_by.trim().is_empty() {
            return Err(ApiError::InvalidInput("requested_by 不能为空".to_string()));
        }
        self.service.execute_swap(request).await
    }

    /// 回滚换班
    ///
    /// # 错误
    /// - RollbackWindowExpired: 超出回滚窗口
    /// - AlreadyRolledBack: 已回滚
    pub async fn rollback_swap(&self, swap_record_id: &str, reason: Option<&str>) -> ApiResult<SwapRollback> {
        if swap_record_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("换班记录ID不能为空".to_string()));
        }
        self.service.rollback_swap(swap_record_id, reason).await
    }

    pub fn get_swap(&self, swap_id: &str) -> ApiResult<SwapRecord> {
        self.service.get_swap(swap_id)
    }

    pub fn list_swaps_for_person(&self, person_id: &str) -> ApiResult<Vec<SwapRecord>> {
        if person_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("人员ID不能为空".to_string()));
        }
        self.service.list_swaps_for_person(person_id)
    }
}

fn check_ids(request: &SwapRequest) -> ApiResult<()> {
    let required = [
        ("source_person_id", request.source_person_id.as_str()),
        ("source_block_id", request.source_block_id.as_str()),
        ("target_person_id", request.target_person_id.as_str()),
    ];
    match required.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((field, _)) => Err(ApiError::InvalidInput(format!("{} 不能为空", field))),
        None => Ok(()),
    }
}

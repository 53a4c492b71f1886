// ==========================================
// 住院医师排班系统 - 排班 API
// ==========================================
// 职责: 排班生成、合规报告查询
// 红线: 合规报告为只读分析，使用一致性读快照，不加租约
// 范围: 读取两侧延伸到相交滚动窗口的排班，只报告与查询区间相交的违规
// ==========================================

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::config::SchedulerConfigReader;
use crate::domain::ComplianceReport;
use crate::engine::compliance::rules::context_horizon;
use crate::engine::compliance::ComplianceValidator;
use crate::engine::constraints::ConstraintManager;
use crate::engine::context::SchedulingContext;
use crate::engine::orchestrator::{GenerateOutcome, GenerateRequest, ScheduleEngine};
use crate::repository::SnapshotProvider;

/// 合规报告查询范围
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceQuery {
    Person {
        person_id: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    DateRange {
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl ComplianceQuery {
    fn range(&self) -> (NaiveDate, NaiveDate) {
        match self {
            ComplianceQuery::Person { start, end, .. } | ComplianceQuery::DateRange { start, end } => {
                (*start, *end)
            }
        }
    }
}

// ==========================================
// ScheduleApi - 排班 API
// ==========================================

/// 排班API
///
/// 职责：
/// 1. 区间排班生成（求解器选择、超时、约束覆盖、合规豁免）
/// 2. 按人员或日期区间的合规报告
pub struct ScheduleApi {
    engine: Arc<ScheduleEngine>,
    snapshots: Arc<dyn SnapshotProvider>,
    config: Arc<dyn SchedulerConfigReader>,
    constraints: Arc<RwLock<ConstraintManager>>,
}

impl ScheduleApi {
    pub fn new(
        engine: Arc<ScheduleEngine>,
        snapshots: Arc<dyn SnapshotProvider>,
        config: Arc<dyn SchedulerConfigReader>,
    ) -> Self {
        let constraints = engine.constraint_manager();
        Self {
            engine,
            snapshots,
            config,
            constraints,
        }
    }

    /// 生成排班
    ///
    /// # 参数
    /// - algorithm: greedy / exact / hybrid，为空取配置默认
    /// - timeout_seconds: 为空取配置默认
    /// - constraint_overrides: 单次运行的约束启停覆盖
    /// - allow_compliance_override: 允许 CRITICAL/HIGH 违规通过
    pub async fn generate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        algorithm: Option<&str>,
        timeout_seconds: Option<u64>,
        constraint_overrides: HashMap<String, bool>,
        allow_compliance_override: bool,
    ) -> ApiResult<GenerateOutcome> {
        if timeout_seconds == Some(0) {
            return Err(ApiError::InvalidInput("timeout_seconds 必须大于 0".to_string()));
        }

        self.engine
            .generate(GenerateRequest {
                start,
                end,
                algorithm: algorithm.map(str::to_string),
                timeout_seconds,
                constraint_overrides,
                allow_compliance_override,
            })
            .await
    }

    /// 合规报告（违规窗口与查询区间相交；区间外排班只作为窗口上下文）
    pub async fn get_compliance_report(&self, query: ComplianceQuery) -> ApiResult<ComplianceReport> {
        let (start, end) = query.range();
        if end < start {
            return Err(ApiError::InvalidInput(format!(
                "结束日期早于开始日期: {} > {}",
                start, end
            )));
        }

        let config = self.config.load_scheduler_config().await?;
        let constraints = self
            .constraints
            .read()
            .map_err(|e| ApiError::InternalError(format!("约束注册表锁中毒: {}", e)))?
            .snapshot();

        let (horizon_start, horizon_end) = context_horizon(start, end, config.rolling_weeks);
        let snapshot = self.snapshots.load_snapshot(horizon_start, horizon_end)?;
        let assignments = snapshot.assignments.clone();
        let ctx = SchedulingContext::from_snapshot(start, end, snapshot, Vec::new(), constraints, config);
        let mut report = ComplianceValidator::new().validate(&assignments, &ctx);

        if let ComplianceQuery::Person { person_id, .. } = &query {
            if ctx.person_idx(person_id).is_none() {
                return Err(ApiError::NotFound(format!("人员(id={})不存在", person_id)));
            }
            report.violations.retain(|v| v.person_ids.iter().any(|p| p == person_id));
            report.people_checked = 1;
            report.assignments_checked = assignments
                .iter()
                .filter(|a| &a.person_id == person_id && ctx.assignment_in_range(a))
                .count();
        }

        tracing::info!(
            start = %start,
            end = %end,
            violations = report.violations.len(),
            compliant = report.is_compliant(),
            "合规报告已生成"
        );
        Ok(report)
    }
}

// ==========================================
// 住院医师排班系统 - 排班生成引擎
// ==========================================
// 主流程:
//   0. 获取区间锁（生成锁类）
//   1. 读取区间内保留排班
//   2. 读取快照（人员/块/模板/缺勤），两侧延伸到所有相交滚动窗口；
//      区间外已提交排班作为固定上下文，只参与统计
//   3. 构建排班上下文（约束快照 + 单次覆盖）
//   4. 可行性预检
//   5. 求解（工厂分派，调用方时限）
//   6. 合规校验（区间外上下文 + 保留 + 新排班）
//   7. 单事务持久化（仅成功时）
// 红线: 步骤 1-6 任一失败均不落库；不可行不自动重试
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::SchedulerConfigReader;
use crate::domain::types::RunStatus;
use crate::domain::{Assignment, ComplianceReport, GenerationRun};
use crate::engine::compliance::rules::context_horizon;
use crate::engine::compliance::ComplianceValidator;
use crate::engine::constraints::{ids, ConstraintManager, ConstraintSnapshot};
use crate::engine::context::SchedulingContext;
use crate::engine::events::{OptionalEventPublisher, ScheduleEvent, ScheduleEventType};
use crate::engine::feasibility::check_feasibility;
use crate::engine::solver::factory::DEFAULT_GRACE;
use crate::engine::solver::{SolverFactory, SolverKind, SolverOutcome};
use crate::repository::{
    acquire_async, AssignmentRepository, GenerationRunRepository, LockProvider, LockScope,
    ScheduleSnapshot, SnapshotProvider, SqliteAssignmentRepository, SqliteLockProvider, SqliteSnapshotProvider,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const EVENT_SOURCE: &str = "schedule_engine";

/// 求解结束到持久化提交之间的余量（校验 + 写库）
const LEASE_MARGIN: Duration = Duration::from_secs(30);

// ==========================================
// GenerateRequest / GenerateOutcome
// ==========================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// greedy / exact / hybrid；为空时取配置 default_solver
    pub algorithm: Option<String>,
    /// 为空时取配置 default_timeout_seconds
    pub timeout_seconds: Option<u64>,
    /// 单次运行的约束启停覆盖（约束ID → 是否启用）
    pub constraint_overrides: HashMap<String, bool>,
    /// 允许 CRITICAL/HIGH 合规违规通过
    pub allow_compliance_override: bool,
}

impl GenerateRequest {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: &str) -> Self {
        self.algorithm = Some(algorithm.to_string());
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_override(mut self, constraint_id: &str, enabled: bool) -> Self {
        self.constraint_overrides
            .insert(constraint_id.to_string(), enabled);
        self
    }

    pub fn allow_compliance_override(mut self) -> Self {
        self.allow_compliance_override = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// 本次生成的新排班（不含保留排班）
    pub assignments: Vec<Assignment>,
    pub compliance_report: ComplianceReport,
    pub solver_diagnostics: serde_json::Value,
}

// ==========================================
// ScheduleEngine
// ==========================================
pub struct ScheduleEngine {
    snapshots: Arc<dyn SnapshotProvider>,
    assignments: Arc<dyn AssignmentRepository>,
    locks: Arc<dyn LockProvider>,
    config: Arc<dyn SchedulerConfigReader>,
    constraints: Arc<RwLock<ConstraintManager>>,
    runs: Option<GenerationRunRepository>,
    events: OptionalEventPublisher,
    validator: ComplianceValidator,
}

impl ScheduleEngine {
    pub fn new(
        snapshots: Arc<dyn SnapshotProvider>,
        assignments: Arc<dyn AssignmentRepository>,
        locks: Arc<dyn LockProvider>,
        config: Arc<dyn SchedulerConfigReader>,
        constraints: Arc<RwLock<ConstraintManager>>,
    ) -> Self {
        Self {
            snapshots,
            assignments,
            locks,
            config,
            constraints,
            runs: None,
            events: OptionalEventPublisher::none(),
            validator: ComplianceValidator::new(),
        }
    }

    /// 全部协作方使用同一 SQLite 连接
    pub fn from_connection(
        conn: Arc<Mutex<Connection>>,
        config: Arc<dyn SchedulerConfigReader>,
        constraints: Arc<RwLock<ConstraintManager>>,
    ) -> Self {
        Self::new(
            Arc::new(SqliteSnapshotProvider::new(conn.clone())),
            Arc::new(SqliteAssignmentRepository::new(conn.clone())),
            Arc::new(SqliteLockProvider::new(conn.clone())),
            config,
            constraints,
        )
        .with_run_repository(GenerationRunRepository::new(conn))
    }

    /// 失败运行的记录仓储（成功运行随排班同事务写入）
    pub fn with_run_repository(mut self, runs: GenerationRunRepository) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn with_event_publisher(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn constraint_manager(&self) -> Arc<RwLock<ConstraintManager>> {
        Arc::clone(&self.constraints)
    }

    /// 生成区间排班
    #[instrument(skip(self, request), fields(
        start = %request.start,
        end = %request.end,
        algorithm = ?request.algorithm
    ))]
    pub async fn generate(&self, request: GenerateRequest) -> ApiResult<GenerateOutcome> {
        if request.end < request.start {
            return Err(ApiError::InvalidInput(format!(
                "结束日期早于开始日期: {} > {}",
                request.start, request.end
            )));
        }

        let config = self.config.load_scheduler_config().await?;
        let kind: SolverKind = request
            .algorithm
            .as_deref()
            .unwrap_or(&config.default_solver)
            .parse()?;

        let mut run = GenerationRun::start(request.start, request.end, kind.as_str());
        run.config_snapshot = serde_json::to_value(&config).ok();
        info!(run_id = %run.run_id, solver = %kind, "开始排班生成");

        match self.execute(&mut run, kind, &request, config).await {
            Ok(outcome) => {
                self.events.publish_or_warn(ScheduleEvent::full_scope(
                    &run.run_id,
                    ScheduleEventType::ScheduleGenerated,
                    Some(EVENT_SOURCE.to_string()),
                    (request.start, request.end),
                ));
                info!(
                    run_id = %run.run_id,
                    assignments = outcome.assignments.len(),
                    "排班生成完成"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(run_id = %run.run_id, status = %run.status, error = %e, "排班生成失败");
                run.fail();
                attach_error(&mut run, &e);
                self.record_failed_run(&run);
                self.events.publish_or_warn(ScheduleEvent::full_scope(
                    &run.run_id,
                    ScheduleEventType::GenerationFailed,
                    Some(EVENT_SOURCE.to_string()),
                    (request.start, request.end),
                ));
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        run: &mut GenerationRun,
        kind: SolverKind,
        request: &GenerateRequest,
        config: crate::config::SchedulerConfig,
    ) -> ApiResult<GenerateOutcome> {
        let (start, end) = (request.start, request.end);
        let fallback = config
            .fallback_solver
            .as_deref()
            .map(str::parse::<SolverKind>)
            .transpose()?;
        let timeout = Duration::from_secs(
            request
                .timeout_seconds
                .unwrap_or(config.default_timeout_seconds),
        );

        // ==========================================
        // 步骤0: 区间锁
        // ==========================================
        let owner_id = format!("generation:{}", run.run_id);
        let lease = acquire_async(
            &self.locks,
            &owner_id,
            &[LockScope::range(start, end)],
            generation_lease(config.lock_lease_seconds, timeout, fallback.is_some_and(|f| f != kind)),
            Duration::from_millis(config.lock_timeout_ms),
        )
        .await?;

        // ==========================================
        // 步骤1-3: 保留排班 + 快照 + 上下文
        // ==========================================
        let preserved = self.assignments.list_preserved_in_range(start, end)?;
        let (horizon_start, horizon_end) = context_horizon(start, end, config.rolling_weeks);
        let snapshot = self.snapshots.load_snapshot(horizon_start, horizon_end)?;
        let surrounding = surrounding_assignments(&snapshot, start, end);
        let constraints = self.constraint_snapshot(&request.constraint_overrides)?;
        debug!(
            preserved = preserved.len(),
            surrounding = surrounding.len(),
            horizon_start = %horizon_start,
            horizon_end = %horizon_end,
            people = snapshot.people.len(),
            blocks = snapshot.blocks.len(),
            templates = snapshot.templates.len(),
            constraints = ?constraints.enabled_ids(),
            "上下文输入已加载"
        );
        let ctx = Arc::new(
            SchedulingContext::from_snapshot(start, end, snapshot, preserved, constraints, config)
                .with_surrounding(surrounding),
        );

        // ==========================================
        // 步骤4: 可行性预检
        // ==========================================
        run.transition_to(RunStatus::ValidatingFeasibility)?;
        if ctx.constraints.is_enabled(ids::COVERAGE) {
            let diagnostics = check_feasibility(&ctx);
            if let Some(first) = diagnostics.first() {
                warn!(deficits = diagnostics.len(), first = %first.message, "需求超过供给");
                run.diagnostics = Some(serde_json::json!({ "infeasibility": diagnostics }));
                return Err(ApiError::InfeasibleSchedule {
                    diagnostic: first.message.clone(),
                    binding_constraint: Some(ids::COVERAGE.to_string()),
                });
            }
        }

        // ==========================================
        // 步骤5: 求解
        // ==========================================
        run.transition_to(RunStatus::Solving)?;
        let factory = SolverFactory::new(fallback);
        let (result, primary_failure) = match factory.run(kind, Arc::clone(&ctx), timeout).await {
            SolverOutcome::Success(result) => (result, None),
            SolverOutcome::FallbackSuccess {
                result,
                primary_failure,
            } => (result, Some(primary_failure)),
            SolverOutcome::Failure(failure) => {
                run.diagnostics = Some(serde_json::json!({ "solver_failure": failure }));
                return Err(ApiError::SolverFailure(failure.message));
            }
        };

        let mut diagnostics = result.diagnostics();
        if !result.feasible {
            run.diagnostics = Some(diagnostics);
            return Err(ApiError::InfeasibleSchedule {
                diagnostic: format!(
                    "{} 搜索穷尽无可行解（已探索 {} 个节点）",
                    result.solver_name, result.nodes_explored
                ),
                binding_constraint: result.binding_constraint.clone(),
            });
        }

        let mut warnings = Vec::new();
        if result.is_timed_out() {
            let warning = ApiError::SolverTimeoutNonOptimal {
                solver_name: result.solver_name.clone(),
                elapsed_seconds: result.elapsed_seconds,
            };
            warn!(%warning, "采用超时前的最优解");
            warnings.push(warning.to_string());
        }
        diagnostics["warnings"] = serde_json::json!(warnings);
        if let Some(primary_failure) = primary_failure {
            diagnostics["primary_failure"] = serde_json::json!(primary_failure);
        }
        run.diagnostics = Some(diagnostics.clone());

        // ==========================================
        // 步骤6: 合规校验（保留 + 新排班）
        // ==========================================
        run.transition_to(RunStatus::PostValidating)?;
        let mut combined = ctx.surrounding.clone();
        combined.extend(ctx.preserved.iter().cloned());
        combined.extend(result.assignments.iter().cloned());
        let report = self.validator.validate(&combined, &ctx);
        if report.blocks_acceptance(request.allow_compliance_override) {
            warn!(
                critical = report.critical_count(),
                high = report.high_count(),
                "合规校验未通过"
            );
            return Err(ApiError::compliance(report));
        }
        if !report.is_compliant() {
            warn!(
                violations = report.violations.len(),
                override_allowed = request.allow_compliance_override,
                "合规违规已放行"
            );
        }

        // ==========================================
        // 步骤7: 持久化（运行记录与排班同一事务）
        // ==========================================
        run.transition_to(RunStatus::Persisting)?;
        run.assignment_count = result.assignments.len();
        let mut completed = run.clone();
        completed.transition_to(RunStatus::Completed)?;
        let replaced = self
            .assignments
            .persist_generation(&completed, &result.assignments, &owner_id)?;
        *run = completed;
        debug!(replaced, "旧的非保留排班已替换");

        if let Err(e) = lease.release() {
            warn!(owner_id = %owner_id, error = %e, "区间锁释放失败，等待租约过期");
        }

        Ok(GenerateOutcome {
            run_id: run.run_id.clone(),
            status: run.status,
            assignments: result.assignments,
            compliance_report: report,
            solver_diagnostics: diagnostics,
        })
    }

    fn constraint_snapshot(&self, overrides: &HashMap<String, bool>) -> ApiResult<ConstraintSnapshot> {
        let manager = self
            .constraints
            .read()
            .map_err(|e| ApiError::InternalError(format!("约束注册表锁中毒: {}", e)))?;
        Ok(manager.snapshot_with_overrides(overrides)?)
    }

    /// 失败运行尽力记录，记录失败只告警
    fn record_failed_run(&self, run: &GenerationRun) {
        if let Some(runs) = &self.runs {
            if let Err(e) = runs.save(run) {
                warn!(run_id = %run.run_id, error = %e, "失败运行记录写入失败");
            }
        }
    }
}

/// 区间租约时长：不短于配置值，且覆盖主求解 + 备用求解的最长耗时
///
/// 持久化事务内仍会复核租约，过期即放弃提交
fn generation_lease(configured_secs: i64, timeout: Duration, with_fallback: bool) -> chrono::Duration {
    let attempts = if with_fallback { 2 } else { 1 };
    let worst = (timeout + DEFAULT_GRACE) * attempts + LEASE_MARGIN;
    chrono::Duration::seconds(configured_secs.max(worst.as_secs() as i64))
}

/// 快照中区间外的已提交排班（区间内的由保留排班与新解给出）
fn surrounding_assignments(snapshot: &ScheduleSnapshot, start: NaiveDate, end: NaiveDate) -> Vec<Assignment> {
    let dates: HashMap<&str, NaiveDate> = snapshot
        .blocks
        .iter()
        .map(|b| (b.block_id.as_str(), b.date))
        .collect();
    snapshot
        .assignments
        .iter()
        .filter(|a| {
            dates
                .get(a.block_id.as_str())
                .is_some_and(|d| *d < start || *d > end)
        })
        .cloned()
        .collect()
}

fn attach_error(run: &mut GenerationRun, err: &ApiError) {
    let mut diagnostics = run
        .diagnostics
        .take()
        .unwrap_or_else(|| serde_json::json!({}));
    diagnostics["error"] = serde_json::json!(err.to_string());
    run.diagnostics = Some(diagnostics);
}

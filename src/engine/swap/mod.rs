// ==========================================
// 住院医师排班系统 - 换班子系统
// ==========================================
// 状态机: PROPOSED → VALIDATED → EXECUTING → EXECUTED → [ROLLED_BACK]
// 并发: 每个受影响 (人员, 块) 独占租约；锁内基于已提交状态重新校验
// 原子性: 排班改写 + 换班记录同一事务（revision 校验）
// 回滚: 窗口内单级逆操作重放
// ==========================================

pub mod executor;
pub mod validation;

use crate::api::error::{ApiError, ApiResult};
use crate::config::{SchedulerConfig, SchedulerConfigReader};
use crate::domain::types::SwapType;
use crate::domain::{SwapRecord, SwapRequest};
use crate::engine::constraints::{ConstraintManager, ConstraintSnapshot};
use crate::engine::context::SchedulingContext;
use crate::engine::events::OptionalEventPublisher;
use crate::repository::{
    AssignmentRepository, LockProvider, SnapshotProvider, SqliteAssignmentRepository,
    SqliteLockProvider, SqliteSnapshotProvider, SwapRepository,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, instrument};

pub use executor::{SwapExecution, SwapRollback};
pub use validation::{evaluate_post_swap, SwapLeg, SwapPlan, SwapValidation, CONTEXT_WINDOW_DAYS};

// ==========================================
// SwapService
// ==========================================
pub struct SwapService {
    snapshots: Arc<dyn SnapshotProvider>,
    assignments: Arc<dyn AssignmentRepository>,
    swaps: SwapRepository,
    locks: Arc<dyn LockProvider>,
    config: Arc<dyn SchedulerConfigReader>,
    constraints: Arc<RwLock<ConstraintManager>>,
    events: OptionalEventPublisher,
}

impl SwapService {
    pub fn new(
        snapshots: Arc<dyn SnapshotProvider>,
        assignments: Arc<dyn AssignmentRepository>,
        swaps: SwapRepository,
        locks: Arc<dyn LockProvider>,
        config: Arc<dyn SchedulerConfigReader>,
        constraints: Arc<RwLock<ConstraintManager>>,
    ) -> Self {
        Self {
            snapshots,
            assignments,
            swaps,
            locks,
            config,
            constraints,
            events: OptionalEventPublisher::none(),
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
            SwapRepository::new(conn.clone()),
            Arc::new(SqliteLockProvider::new(conn)),
            config,
            constraints,
        )
    }

    pub fn with_event_publisher(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    /// 校验换班（不加锁、不写入）
    #[instrument(skip(self, request), fields(
        swap_type = %request.swap_type,
        source = %request.source_person_id,
        target = %request.target_person_id
    ))]
    pub async fn validate_swap(&self, request: &SwapRequest) -> ApiResult<SwapValidation> {
        let config = self.config.load_scheduler_config().await?;
        let plan = self.plan(request)?;
        self.check_plan(&plan, config)
    }

    pub fn get_swap(&self, swap_id: &str) -> ApiResult<SwapRecord> {
        self.swaps
            .find_by_id(swap_id)?
            .ok_or_else(|| ApiError::NotFound(format!("换班记录(id={})不存在", swap_id)))
    }

    pub fn list_swaps_for_person(&self, person_id: &str) -> ApiResult<Vec<SwapRecord>> {
        Ok(self.swaps.list_for_person(person_id)?)
    }

    // ==========================================
    // 内部: 计划解析与校验
    // ==========================================

    /// 读取当前已提交的排班，解析为换班计划
    fn plan(&self, request: &SwapRequest) -> ApiResult<SwapPlan> {
        validation::check_request(request)?;

        let mut legs = vec![self.leg(
            &request.source_person_id,
            &request.source_block_id,
            &request.target_person_id,
        )?];

        if request.swap_type == SwapType::OneToOne {
            let target_block = request.target_block_id.as_deref().ok_or_else(|| {
                ApiError::InvalidInput("一对一换班缺少接收人让出的块".to_string())
            })?;
            legs.push(self.leg(
                &request.target_person_id,
                target_block,
                &request.source_person_id,
            )?);
        }

        Ok(SwapPlan { legs })
    }

    fn leg(&self, holder_id: &str, block_id: &str, new_person_id: &str) -> ApiResult<SwapLeg> {
        let assignment = self
            .assignments
            .find_by_person_block(holder_id, block_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("排班(person={}, block={})不存在", holder_id, block_id))
            })?;
        let block = self
            .snapshots
            .find_block(block_id)?
            .ok_or_else(|| ApiError::NotFound(format!("块(id={})不存在", block_id)))?;

        Ok(SwapLeg {
            assignment,
            block,
            new_person_id: new_person_id.to_string(),
        })
    }

    /// 在 ±28 天上下文中校验换班后的状态
    fn check_plan(&self, plan: &SwapPlan, config: SchedulerConfig) -> ApiResult<SwapValidation> {
        let (start, end) = plan.context_window();
        let snapshot = self.snapshots.load_snapshot(start, end)?;
        let current = snapshot.assignments.clone();
        let ctx = SchedulingContext::from_snapshot(
            start,
            end,
            snapshot,
            Vec::new(),
            self.constraint_snapshot()?,
            config,
        );

        let result = evaluate_post_swap(&current, plan, &ctx);
        debug!(
            window_start = %start,
            window_end = %end,
            is_valid = result.is_valid,
            violations = result.violations.len(),
            "换班校验完成"
        );
        Ok(result)
    }

    fn constraint_snapshot(&self) -> ApiResult<ConstraintSnapshot> {
        let manager = self
            .constraints
            .read()
            .map_err(|e| ApiError::InternalError(format!("约束注册表锁中毒: {}", e)))?;
        Ok(manager.snapshot())
    }
}

// ==========================================
// 住院医师排班系统 - 引擎层
// ==========================================
// 职责: 约束库、合规校验、求解器、生成编排、换班
// 红线: Engine 不拼 SQL，所有违规必须输出可解释原因
// ==========================================

pub mod compliance;
pub mod constraints;
pub mod context;
pub mod events;
pub mod feasibility;
pub mod orchestrator;
pub mod partial;
pub mod solver;
pub mod swap;

// 重导出核心引擎
pub use compliance::ComplianceValidator;
pub use constraints::{
    Constraint, ConstraintCategory, ConstraintError, ConstraintEvaluation, ConstraintManager,
    ConstraintPreset, ConstraintSnapshot,
};
pub use context::{Placement, SchedulingContext, SlotInstance};
pub use events::{
    ChannelEventPublisher, NoOpEventPublisher, OptionalEventPublisher, ScheduleEvent,
    ScheduleEventPublisher, ScheduleEventType,
};
pub use feasibility::{check_feasibility, InfeasibilityDiagnostic};
pub use orchestrator::{GenerateOutcome, GenerateRequest, ScheduleEngine};
pub use partial::PartialSchedule;
pub use solver::{
    Solver, SolverError, SolverFactory, SolverFailure, SolverKind, SolverOutcome, SolverResult,
    SolveStatus, UnfilledSlot,
};
pub use swap::{SwapExecution, SwapPlan, SwapRollback, SwapService, SwapValidation};

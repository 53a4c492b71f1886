// ==========================================
// 住院医师排班系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod assignment_repo;
pub mod error;
pub mod generation_run_repo;
pub mod lock_repo;
pub mod snapshot_repo;
pub mod swap_repo;

// 重导出核心仓储
pub use assignment_repo::{AssignmentRepository, SqliteAssignmentRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use generation_run_repo::GenerationRunRepository;
pub use lock_repo::{acquire_async, LeaseGuard, LockProvider, LockScope, SqliteLockProvider};
pub use snapshot_repo::{ScheduleSnapshot, SnapshotProvider, SqliteSnapshotProvider};
pub use swap_repo::SwapRepository;

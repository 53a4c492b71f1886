// ==========================================
// 住院医师排班系统 - 排班仓储
// ==========================================
// 红线: 每个 (person, block) 至多一条排班（UNIQUE 约束兜底）
// 并发控制: 所有变更均带 revision 校验，revision 每次变更 +1
// 原子性: 生成结果/换班/回滚 各自在单个事务内提交
// ==========================================

use crate::domain::run::GenerationRun;
use crate::domain::swap::SwapRecord;
use crate::domain::types::AssignmentSource;
use crate::domain::Assignment;
use crate::repository::error::{format_date, format_timestamp, RepositoryError, RepositoryResult};
use crate::repository::generation_run_repo::upsert_run;
use crate::repository::lock_repo::ensure_lease_held;
use crate::repository::snapshot_repo::{insert_assignment, map_assignment};
use crate::repository::swap_repo::{insert_swap_record, mark_swap_rolled_back};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SELECT_COLUMNS: &str = r#"a.assignment_id, a.person_id, a.block_id, a.template_id,
    a.source, a.locked, a.revision, a.created_at, a.updated_at"#;

// ==========================================
// AssignmentRepository Trait
// ==========================================
pub trait AssignmentRepository: Send + Sync {
    fn find_by_id(&self, assignment_id: &str) -> RepositoryResult<Option<Assignment>>;

    /// 按 (person, block) 唯一键查询
    fn find_by_person_block(
        &self,
        person_id: &str,
        block_id: &str,
    ) -> RepositoryResult<Option<Assignment>>;

    /// 区间内全部排班
    fn list_in_range(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<Vec<Assignment>>;

    /// 区间内保留排班（locked = 1）
    fn list_preserved_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<Vec<Assignment>>;

    fn insert(&self, assignment: &Assignment) -> RepositoryResult<()>;

    /// 人工改派（乐观锁）
    fn reassign(
        &self,
        assignment_id: &str,
        new_person_id: &str,
        expected_revision: i32,
    ) -> RepositoryResult<Assignment>;

    /// 单事务: 确认区间租约 → 删除区间内非保留排班 → 写入新排班 → 写入运行记录
    ///
    /// # 返回
    /// 被替换的旧排班条数
    ///
    /// # 错误
    /// - LeaseLost: lease_owner 的租约已过期或被回收
    fn persist_generation(
        &self,
        run: &GenerationRun,
        assignments: &[Assignment],
        lease_owner: &str,
    ) -> RepositoryResult<usize>;

    /// 单事务: 确认换班租约后按 record.operations 改写排班（revision 校验）并写入换班记录
    fn commit_swap(&self, record: &SwapRecord, lease_owner: &str) -> RepositoryResult<()>;

    /// 单事务: 确认租约并校验换班后状态未被改动，恢复原持有人并标记记录已回滚
    fn commit_rollback(&self, record: &SwapRecord, lease_owner: &str) -> RepositoryResult<()>;
}

// ==========================================
// SqliteAssignmentRepository
// ==========================================
pub struct SqliteAssignmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAssignmentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        preserved_only: bool,
    ) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM assignment a
               JOIN block b ON b.block_id = a.block_id
               WHERE b.block_date BETWEEN ? AND ? {}
               ORDER BY b.block_date, b.session, a.person_id"#,
            SELECT_COLUMNS,
            if preserved_only { "AND a.locked = 1" } else { "" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![format_date(&start), format_date(&end)], map_assignment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// 带 revision 校验的持有人改写
///
/// # 错误
/// - OptimisticLockFailure: 记录存在但 revision/持有人不匹配
/// - NotFound: 记录不存在
fn update_holder_checked(
    conn: &Connection,
    assignment_id: &str,
    expected_person_id: &str,
    expected_revision: i32,
    new_person_id: &str,
    new_source: AssignmentSource,
) -> RepositoryResult<()> {
    let rows = conn.execute(
        r#"UPDATE assignment
           SET person_id = ?, source = ?, revision = revision + 1, updated_at = ?
           WHERE assignment_id = ? AND person_id = ? AND revision = ?"#,
        params![
            new_person_id,
            new_source.to_db_str(),
            format_timestamp(&Utc::now()),
            assignment_id,
            expected_person_id,
            expected_revision,
        ],
    )?;

    if rows == 0 {
        // 判断是记录不存在还是已被并发修改
        let actual: Option<i32> = conn
            .query_row(
                "SELECT revision FROM assignment WHERE assignment_id = ?",
                params![assignment_id],
                |row| row.get(0),
            )
            .optional()?;

        return Err(match actual {
            Some(actual) => RepositoryError::OptimisticLockFailure {
                entity_id: assignment_id.to_string(),
                expected: expected_revision,
                actual,
            },
            None => RepositoryError::NotFound {
                entity: "Assignment".to_string(),
                id: assignment_id.to_string(),
            },
        });
    }
    Ok(())
}

impl AssignmentRepository for SqliteAssignmentRepository {
    fn find_by_id(&self, assignment_id: &str) -> RepositoryResult<Option<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM assignment a WHERE a.assignment_id = ?",
            SELECT_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![assignment_id], map_assignment)
            .optional()?;
        Ok(row)
    }

    fn find_by_person_block(
        &self,
        person_id: &str,
        block_id: &str,
    ) -> RepositoryResult<Option<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM assignment a WHERE a.person_id = ? AND a.block_id = ?",
            SELECT_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![person_id, block_id], map_assignment)
            .optional()?;
        Ok(row)
    }

    fn list_in_range(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<Vec<Assignment>> {
        self.query_range(start, end, false)
    }

    fn list_preserved_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<Vec<Assignment>> {
        self.query_range(start, end, true)
    }

    fn insert(&self, assignment: &Assignment) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        insert_assignment(&conn, assignment)?;
        Ok(())
    }

    fn reassign(
        &self,
        assignment_id: &str,
        new_person_id: &str,
        expected_revision: i32,
    ) -> RepositoryResult<Assignment> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let sql = format!(
            "SELECT {} FROM assignment a WHERE a.assignment_id = ?",
            SELECT_COLUMNS
        );
        let current = tx
            .query_row(&sql, params![assignment_id], map_assignment)
            .optional()?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Assignment".to_string(),
                id: assignment_id.to_string(),
            })?;

        update_holder_checked(
            &tx,
            assignment_id,
            &current.person_id,
            expected_revision,
            new_person_id,
            AssignmentSource::Manual,
        )?;

        let updated = tx.query_row(&sql, params![assignment_id], map_assignment)?;
        tx.commit()?;
        Ok(updated)
    }

    fn persist_generation(
        &self,
        run: &GenerationRun,
        assignments: &[Assignment],
        lease_owner: &str,
    ) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        ensure_lease_held(&tx, lease_owner)?;

        let replaced = tx.execute(
            r#"DELETE FROM assignment
               WHERE locked = 0
                 AND block_id IN (SELECT block_id FROM block WHERE block_date BETWEEN ? AND ?)"#,
            params![format_date(&run.start_date), format_date(&run.end_date)],
        )?;

        for assignment in assignments {
            insert_assignment(&tx, assignment)?;
        }

        upsert_run(&tx, run)?;
        tx.commit()?;

        info!(
            run_id = %run.run_id,
            replaced,
            inserted = assignments.len(),
            "生成结果已持久化"
        );
        Ok(replaced)
    }

    fn commit_swap(&self, record: &SwapRecord, lease_owner: &str) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        ensure_lease_held(&tx, lease_owner)?;

        for op in &record.operations {
            update_holder_checked(
                &tx,
                &op.assignment_id,
                &op.prior_person_id,
                op.expected_revision(),
                &op.new_person_id,
                AssignmentSource::Swap,
            )?;
        }

        insert_swap_record(&tx, record)?;
        tx.commit()?;

        debug!(swap_id = %record.swap_id, operations = record.operations.len(), "换班事务已提交");
        Ok(())
    }

    fn commit_rollback(&self, record: &SwapRecord, lease_owner: &str) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        ensure_lease_held(&tx, lease_owner)?;

        for op in record.operations.iter().rev() {
            update_holder_checked(
                &tx,
                &op.assignment_id,
                &op.new_person_id,
                op.post_revision,
                &op.prior_person_id,
                op.prior_source,
            )?;
        }

        mark_swap_rolled_back(&tx, record)?;
        tx.commit()?;

        debug!(swap_id = %record.swap_id, "回滚事务已提交");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::domain::types::{SeniorityTier, Session};
    use crate::domain::{Block, Person, RotationTemplate};
    use crate::repository::lock_repo::{LockProvider, LockScope, SqliteLockProvider};
    use crate::repository::snapshot_repo::SqliteSnapshotProvider;

    fn setup() -> SqliteAssignmentRepository {
        setup_with_locks().0
    }

    fn setup_with_locks() -> (SqliteAssignmentRepository, SqliteLockProvider) {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let snapshots = SqliteSnapshotProvider::new(conn.clone());
        snapshots
            .save_person(&Person::resident("R1", "R1", SeniorityTier::Pgy1))
            .unwrap();
        snapshots
            .save_person(&Person::resident("R2", "R2", SeniorityTier::Pgy2))
            .unwrap();
        snapshots
            .save_block(&Block::new(
                "B1",
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                Session::Am,
                1,
            ))
            .unwrap();
        snapshots
            .save_template(&RotationTemplate::new("T1", "Clinic", 1, 4))
            .unwrap();

        (
            SqliteAssignmentRepository::new(conn.clone()),
            SqliteLockProvider::new(conn),
        )
    }

    fn hold_range(locks: &SqliteLockProvider, owner: &str, start: NaiveDate, end: NaiveDate) {
        assert!(locks
            .try_acquire(owner, &[LockScope::range(start, end)], chrono::Duration::seconds(60))
            .unwrap());
    }

    #[test]
    fn test_unique_person_block() {
        let repo = setup();
        repo.insert(&Assignment::generated("R1", "B1", "T1")).unwrap();
        let err = repo
            .insert(&Assignment::generated("R1", "B1", "T1"))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueConstraintViolation(_)));
    }

    #[test]
    fn test_reassign_checks_revision() {
        let repo = setup();
        let a = Assignment::generated("R1", "B1", "T1");
        repo.insert(&a).unwrap();

        let updated = repo.reassign(&a.assignment_id, "R2", 1).unwrap();
        assert_eq!(updated.person_id, "R2");
        assert_eq!(updated.revision, 2);
        assert_eq!(updated.source, AssignmentSource::Manual);

        let err = repo.reassign(&a.assignment_id, "R1", 1).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::OptimisticLockFailure { expected: 1, actual: 2, .. }
        ));

        let err = repo.reassign("missing", "R1", 1).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }

    #[test]
    fn test_persist_generation_keeps_locked() {
        let (repo, locks) = setup_with_locks();
        let preserved = Assignment::new("R1", "B1", "T1", AssignmentSource::Preserved);
        repo.insert(&preserved).unwrap();

        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        hold_range(&locks, "generation:1", start, end);
        let run = GenerationRun::start(start, end, "greedy");
        let replaced = repo
            .persist_generation(&run, &[Assignment::generated("R2", "B1", "T1")], "generation:1")
            .unwrap();
        assert_eq!(replaced, 0);

        let all = repo.list_in_range(start, end).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(repo.list_preserved_in_range(start, end).unwrap().len(), 1);

        // 再次生成只替换非保留排班
        let run = GenerationRun::start(start, end, "greedy");
        let replaced = repo.persist_generation(&run, &[], "generation:1").unwrap();
        assert_eq!(replaced, 1);
        assert_eq!(repo.list_in_range(start, end).unwrap().len(), 1);
    }

    #[test]
    fn test_persist_generation_rejects_lost_lease() {
        let (repo, locks) = setup_with_locks();
        let start = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let existing = Assignment::generated("R1", "B1", "T1");
        repo.insert(&existing).unwrap();

        // 租约在求解期间过期，区间被换班占用后原持有者不得覆盖
        assert!(locks
            .try_acquire(
                "generation:slow",
                &[LockScope::range(start, end)],
                chrono::Duration::seconds(-1)
            )
            .unwrap());
        assert!(locks
            .try_acquire(
                "swap:1",
                &[LockScope::pair("R1", "B1", NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())],
                chrono::Duration::seconds(60)
            )
            .unwrap());

        let run = GenerationRun::start(start, end, "greedy");
        let err = repo
            .persist_generation(&run, &[Assignment::generated("R2", "B1", "T1")], "generation:slow")
            .unwrap_err();
        assert!(matches!(err, RepositoryError::LeaseLost { .. }));

        // 事务未生效
        let all = repo.list_in_range(start, end).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].assignment_id, existing.assignment_id);
    }
}

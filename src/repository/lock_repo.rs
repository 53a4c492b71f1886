// ==========================================
// 住院医师排班系统 - 租约锁仓储
// ==========================================
// 职责: 基于 lock_lease 表的排他租约（可跨进程共享同一数据库）
// 锁类别:
// - PAIR(person, block): 换班影响的 (人员, 块)
// - RANGE(start, end): 生成运行锁定的日期区间
// 冲突规则:
// - PAIR/PAIR: 同一 (person, block)
// - PAIR/RANGE: 块日期落在区间内
// - RANGE/RANGE: 区间相交
// 租约到期自动失效，持有者崩溃不会永久阻塞
// ==========================================

use crate::repository::error::{format_date, format_timestamp, RepositoryError, RepositoryResult};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 200;

// ==========================================
// LockScope - 锁定范围
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockScope {
    Pair {
        person_id: String,
        block_id: String,
        date: NaiveDate,
    },
    Range {
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl LockScope {
    pub fn pair(person_id: &str, block_id: &str, date: NaiveDate) -> Self {
        LockScope::Pair {
            person_id: person_id.to_string(),
            block_id: block_id.to_string(),
            date,
        }
    }

    pub fn range(start: NaiveDate, end: NaiveDate) -> Self {
        LockScope::Range { start, end }
    }

    fn class_str(&self) -> &'static str {
        match self {
            LockScope::Pair { .. } => "PAIR",
            LockScope::Range { .. } => "RANGE",
        }
    }

    /// 主键：PAIR 以 (person, block) 唯一；RANGE 附带持有者避免相同区间主键碰撞
    fn lock_key(&self, owner_id: &str) -> String {
        match self {
            LockScope::Pair {
                person_id,
                block_id,
                ..
            } => format!("PAIR:{}:{}", person_id, block_id),
            LockScope::Range { start, end } => {
                format!("RANGE:{}:{}:{}", format_date(start), format_date(end), owner_id)
            }
        }
    }
}

// ==========================================
// LockProvider Trait
// ==========================================
pub trait LockProvider: Send + Sync {
    /// 尝试一次性获取全部租约（全有或全无）
    ///
    /// # 返回
    /// - Ok(true): 获取成功
    /// - Ok(false): 存在冲突租约
    fn try_acquire(
        &self,
        owner_id: &str,
        scopes: &[LockScope],
        lease: chrono::Duration,
    ) -> RepositoryResult<bool>;

    /// 释放持有者的全部租约
    fn release(&self, owner_id: &str) -> RepositoryResult<usize>;
}

// ==========================================
// SqliteLockProvider
// ==========================================
pub struct SqliteLockProvider {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLockProvider {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

fn has_conflict(conn: &Connection, owner_id: &str, scope: &LockScope) -> RepositoryResult<bool> {
    let count: i64 = match scope {
        LockScope::Pair { date, .. } => {
            let date_s = format_date(date);
            conn.query_row(
                r#"SELECT COUNT(*) FROM lock_lease
                   WHERE owner_id != ?1
                     AND ((lock_class = 'PAIR' AND lock_key = ?2)
                       OR (lock_class = 'RANGE' AND range_start <= ?3 AND range_end >= ?3))"#,
                params![owner_id, scope.lock_key(owner_id), date_s],
                |row| row.get(0),
            )?
        }
        LockScope::Range { start, end } => conn.query_row(
            r#"SELECT COUNT(*) FROM lock_lease
               WHERE owner_id != ?1
                 AND ((lock_class = 'PAIR' AND lock_date BETWEEN ?2 AND ?3)
                   OR (lock_class = 'RANGE' AND range_start <= ?3 AND range_end >= ?2))"#,
            params![owner_id, format_date(start), format_date(end)],
            |row| row.get(0),
        )?,
    };
    Ok(count > 0)
}

impl LockProvider for SqliteLockProvider {
    fn try_acquire(
        &self,
        owner_id: &str,
        scopes: &[LockScope],
        lease: chrono::Duration,
    ) -> RepositoryResult<bool> {
        let mut ordered: Vec<&LockScope> = scopes.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = Utc::now();
        let now_s = format_timestamp(&now);
        tx.execute("DELETE FROM lock_lease WHERE expires_at < ?", params![&now_s])?;

        for scope in &ordered {
            if has_conflict(&tx, owner_id, scope)? {
                debug!(owner_id, scope = ?scope, "租约冲突");
                return Ok(false);
            }
        }

        let expires_s = format_timestamp(&(now + lease));
        for scope in &ordered {
            let (person_id, block_id, lock_date, range_start, range_end) = match scope {
                LockScope::Pair {
                    person_id,
                    block_id,
                    date,
                } => (
                    Some(person_id.as_str()),
                    Some(block_id.as_str()),
                    Some(format_date(date)),
                    None,
                    None,
                ),
                LockScope::Range { start, end } => (
                    None,
                    None,
                    None,
                    Some(format_date(start)),
                    Some(format_date(end)),
                ),
            };

            tx.execute(
                r#"INSERT OR REPLACE INTO lock_lease (
                    lock_key, lock_class, owner_id, person_id, block_id, lock_date,
                    range_start, range_end, acquired_at, expires_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    scope.lock_key(owner_id),
                    scope.class_str(),
                    owner_id,
                    person_id,
                    block_id,
                    lock_date,
                    range_start,
                    range_end,
                    &now_s,
                    &expires_s,
                ],
            )?;
        }

        tx.commit()?;
        debug!(owner_id, leases = ordered.len(), "租约获取成功");
        Ok(true)
    }

    fn release(&self, owner_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let released = conn.execute("DELETE FROM lock_lease WHERE owner_id = ?", params![owner_id])?;
        debug!(owner_id, released, "租约已释放");
        Ok(released)
    }
}

// ==========================================
// LeaseGuard - 作用域租约（Drop 时释放）
// ==========================================
pub struct LeaseGuard {
    provider: Arc<dyn LockProvider>,
    owner_id: String,
    released: bool,
}

impl LeaseGuard {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// 显式释放（可观察错误）
    pub fn release(mut self) -> RepositoryResult<()> {
        self.released = true;
        self.provider.release(&self.owner_id).map(|_| ())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.provider.release(&self.owner_id) {
                warn!(owner_id = %self.owner_id, error = %e, "租约释放失败，等待过期");
            }
        }
    }
}

/// 事务内确认持有者仍持有未过期租约
///
/// 写入前调用：租约过期后区间可能已被其他持有者占用
pub(crate) fn ensure_lease_held(conn: &Connection, owner_id: &str) -> RepositoryResult<()> {
    let now_s = format_timestamp(&Utc::now());
    let live: i64 = conn.query_row(
        "SELECT COUNT(*) FROM lock_lease WHERE owner_id = ? AND expires_at >= ?",
        params![owner_id, &now_s],
        |row| row.get(0),
    )?;
    if live == 0 {
        warn!(owner_id, "租约已失效，拒绝提交");
        return Err(RepositoryError::LeaseLost {
            owner_id: owner_id.to_string(),
        });
    }
    Ok(())
}

fn next_backoff(current: u64) -> u64 {
    (current * 2).min(MAX_BACKOFF_MS)
}

/// 异步获取（tokio 定时器退避）
pub async fn acquire_async(
    provider: &Arc<dyn LockProvider>,
    owner_id: &str,
    scopes: &[LockScope],
    lease: chrono::Duration,
    timeout: Duration,
) -> RepositoryResult<LeaseGuard> {
    let started = Instant::now();
    let mut backoff = INITIAL_BACKOFF_MS;

    loop {
        if provider.try_acquire(owner_id, scopes, lease)? {
            return Ok(LeaseGuard {
                provider: provider.clone(),
                owner_id: owner_id.to_string(),
                released: false,
            });
        }
        if started.elapsed() >= timeout {
            return Err(RepositoryError::LeaseTimeout {
                owner_id: owner_id.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(Duration::from_millis(backoff)).await;
        backoff = next_backoff(backoff);
    }
}

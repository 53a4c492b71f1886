// ==========================================
// 住院医师排班系统 - 换班记录仓储
// ==========================================
// 幂等: idempotency_key 唯一索引
// 写入: 与排班变更同一事务完成（见 assignment_repo）
// ==========================================

use crate::domain::swap::{SwapOperation, SwapRecord};
use crate::domain::types::{SwapStatus, SwapType};
use crate::repository::error::{
    format_timestamp, parse_timestamp_column, RepositoryError, RepositoryResult,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"swap_id, swap_type, source_person_id, source_block_id,
    target_person_id, target_block_id, status, idempotency_key, requested_by, reason,
    requested_at, executed_at, rolled_back_at, rollback_reason, operations_json"#;

// ==========================================
// SwapRepository - 换班记录仓储
// ==========================================
pub struct SwapRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SwapRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按 swap_id 查询
    pub fn find_by_id(&self, swap_id: &str) -> RepositoryResult<Option<SwapRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM swap_record WHERE swap_id = ?", SELECT_COLUMNS);
        let record = conn.query_row(&sql, params![swap_id], map_row).optional()?;
        Ok(record)
    }

    /// 按幂等键查询
    pub fn find_by_idempotency_key(&self, key: &str) -> RepositoryResult<Option<SwapRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM swap_record WHERE idempotency_key = ?",
            SELECT_COLUMNS
        );
        let record = conn.query_row(&sql, params![key], map_row).optional()?;
        Ok(record)
    }

    /// 查询某人参与的全部换班（发起或接收），按申请时间倒序
    pub fn list_for_person(&self, person_id: &str) -> RepositoryResult<Vec<SwapRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM swap_record
               WHERE source_person_id = ?1 OR target_person_id = ?1
               ORDER BY requested_at DESC"#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![person_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

// ==========================================
// 事务内写入
// ==========================================

pub(crate) fn insert_swap_record(conn: &Connection, record: &SwapRecord) -> RepositoryResult<()> {
    conn.execute(
        r#"INSERT INTO swap_record (
            swap_id, swap_type, source_person_id, source_block_id, target_person_id,
            target_block_id, status, idempotency_key, requested_by, reason,
            requested_at, executed_at, rolled_back_at, rollback_reason, operations_json
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        params![
            &record.swap_id,
            record.swap_type.to_db_str(),
            &record.source_person_id,
            &record.source_block_id,
            &record.target_person_id,
            &record.target_block_id,
            record.status.to_db_str(),
            &record.idempotency_key,
            &record.requested_by,
            &record.reason,
            format_timestamp(&record.requested_at),
            record.executed_at.as_ref().map(format_timestamp),
            record.rolled_back_at.as_ref().map(format_timestamp),
            &record.rollback_reason,
            serde_json::to_string(&record.operations)?,
        ],
    )?;
    Ok(())
}

/// 更新状态与回滚信息（仅允许从 EXECUTED 推进）
pub(crate) fn mark_swap_rolled_back(conn: &Connection, record: &SwapRecord) -> RepositoryResult<()> {
    let rows = conn.execute(
        r#"UPDATE swap_record
           SET status = ?, rolled_back_at = ?, rollback_reason = ?
           WHERE swap_id = ? AND status = ?"#,
        params![
            record.status.to_db_str(),
            record.rolled_back_at.as_ref().map(format_timestamp),
            &record.rollback_reason,
            &record.swap_id,
            SwapStatus::Executed.to_db_str(),
        ],
    )?;

    if rows == 0 {
        return Err(RepositoryError::NotFound {
            entity: "SwapRecord(EXECUTED)".to_string(),
            id: record.swap_id.clone(),
        });
    }
    Ok(())
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<SwapRecord> {
    let optional_ts = |idx: usize| -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
        match row.get::<_, Option<String>>(idx)? {
            Some(s) => parse_timestamp_column(idx, &s).map(Some),
            None => Ok(None),
        }
    };

    let operations_json: String = row.get(14)?;
    let operations: Vec<SwapOperation> = serde_json::from_str(&operations_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(14, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(SwapRecord {
        swap_id: row.get(0)?,
        swap_type: SwapType::from_str(&row.get::<_, String>(1)?),
        source_person_id: row.get(2)?,
        source_block_id: row.get(3)?,
        target_person_id: row.get(4)?,
        target_block_id: row.get(5)?,
        status: SwapStatus::from_str(&row.get::<_, String>(6)?),
        idempotency_key: row.get(7)?,
        requested_by: row.get(8)?,
        reason: row.get(9)?,
        requested_at: parse_timestamp_column(10, &row.get::<_, String>(10)?)?,
        executed_at: optional_ts(11)?,
        rolled_back_at: optional_ts(12)?,
        rollback_reason: row.get(13)?,
        operations,
    })
}

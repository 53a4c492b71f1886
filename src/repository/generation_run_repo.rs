// ==========================================
// 住院医师排班系统 - 生成运行记录仓储
// ==========================================
// 用途: 运行记录（状态转换 + 诊断信息）落库，供事后查看
// ==========================================

use crate::domain::run::{GenerationRun, StatusTransition};
use crate::domain::types::RunStatus;
use crate::repository::error::{
    format_date, format_timestamp, parse_date_column, parse_timestamp_column, RepositoryError,
    RepositoryResult,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// GenerationRunRepository
// ==========================================
pub struct GenerationRunRepository {
    conn: Arc<Mutex<Connection>>,
}

impl GenerationRunRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入（或覆盖）运行记录
    pub fn save(&self, run: &GenerationRun) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        upsert_run(&conn, run)
    }

    pub fn find_by_id(&self, run_id: &str) -> RepositoryResult<Option<GenerationRun>> {
        let conn = self.get_conn()?;
        let run = conn
            .query_row(
                r#"SELECT run_id, start_date, end_date, algorithm, status, transitions_json,
                          diagnostics_json, config_snapshot_json, assignment_count,
                          created_at, finished_at
                   FROM generation_run WHERE run_id = ?"#,
                params![run_id],
                map_row,
            )
            .optional()?;
        Ok(run)
    }

    /// 按创建时间倒序列出最近的运行
    pub fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<GenerationRun>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT run_id, start_date, end_date, algorithm, status, transitions_json,
                      diagnostics_json, config_snapshot_json, assignment_count,
                      created_at, finished_at
               FROM generation_run
               ORDER BY created_at DESC
               LIMIT ?"#,
        )?;
        let runs = stmt
            .query_map(params![limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

/// 事务内写入运行记录
pub(crate) fn upsert_run(conn: &Connection, run: &GenerationRun) -> RepositoryResult<()> {
    conn.execute(
        r#"INSERT OR REPLACE INTO generation_run (
            run_id, start_date, end_date, algorithm, status, transitions_json,
            diagnostics_json, config_snapshot_json, assignment_count, created_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        params![
            &run.run_id,
            format_date(&run.start_date),
            format_date(&run.end_date),
            &run.algorithm,
            run.status.to_db_str(),
            serde_json::to_string(&run.transitions)?,
            run.diagnostics.as_ref().map(|v| v.to_string()),
            run.config_snapshot.as_ref().map(|v| v.to_string()),
            run.assignment_count as i64,
            format_timestamp(&run.created_at),
            run.finished_at.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(())
}

fn map_row(row: &rusqlite::Row) -> rusqlite::Result<GenerationRun> {
    let json_column = |idx: usize| -> rusqlite::Result<Option<serde_json::Value>> {
        match row.get::<_, Option<String>>(idx)? {
            Some(s) => serde_json::from_str(&s).map(Some).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
            None => Ok(None),
        }
    };

    let transitions_json: String = row.get(5)?;
    let transitions: Vec<StatusTransition> =
        serde_json::from_str(&transitions_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let finished_at = match row.get::<_, Option<String>>(10)? {
        Some(s) => Some(parse_timestamp_column(10, &s)?),
        None => None,
    };

    Ok(GenerationRun {
        run_id: row.get(0)?,
        start_date: parse_date_column(1, &row.get::<_, String>(1)?)?,
        end_date: parse_date_column(2, &row.get::<_, String>(2)?)?,
        algorithm: row.get(3)?,
        status: RunStatus::from_str(&row.get::<_, String>(4)?),
        transitions,
        diagnostics: json_column(6)?,
        config_snapshot: json_column(7)?,
        assignment_count: row.get::<_, i64>(8)? as usize,
        created_at: parse_timestamp_column(9, &row.get::<_, String>(9)?)?,
        finished_at,
    })
}

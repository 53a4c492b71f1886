// ==========================================
// 住院医师排班系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 统一建表（人员/日历/模板/缺勤为外部系统快照，排班/换班/锁为本系统数据）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 日期存储格式
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 初始化数据库 schema（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    configure_sqlite_connection(conn)?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_scope (
            scope_id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(scope_type, scope_key)
        );

        INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
        VALUES ('global', 'GLOBAL', 'global');

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS person (
            person_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL,
            tier TEXT NOT NULL,
            specialties_json TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS block (
            block_id TEXT PRIMARY KEY,
            block_date TEXT NOT NULL,
            session TEXT NOT NULL,
            block_number INTEGER NOT NULL DEFAULT 0,
            is_weekend INTEGER NOT NULL DEFAULT 0,
            is_holiday INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_block_date ON block(block_date, session);

        CREATE TABLE IF NOT EXISTS rotation_template (
            template_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            activity_type TEXT NOT NULL,
            min_coverage INTEGER NOT NULL DEFAULT 0,
            capacity INTEGER NOT NULL,
            hours_per_block REAL NOT NULL,
            required_specialty TEXT,
            supervision_required INTEGER NOT NULL DEFAULT 1,
            pgy1_per_faculty INTEGER NOT NULL DEFAULT 2,
            senior_per_faculty INTEGER NOT NULL DEFAULT 4,
            applies_on_weekends INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS absence (
            absence_id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL REFERENCES person(person_id) ON DELETE CASCADE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            absence_type TEXT NOT NULL,
            is_blocking INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_absence_person ON absence(person_id, start_date);

        CREATE TABLE IF NOT EXISTS assignment (
            assignment_id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL REFERENCES person(person_id),
            block_id TEXT NOT NULL REFERENCES block(block_id),
            template_id TEXT NOT NULL REFERENCES rotation_template(template_id),
            source TEXT NOT NULL,
            locked INTEGER NOT NULL DEFAULT 0,
            revision INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(person_id, block_id)
        );

        CREATE INDEX IF NOT EXISTS idx_assignment_block ON assignment(block_id);

        CREATE TABLE IF NOT EXISTS swap_record (
            swap_id TEXT PRIMARY KEY,
            swap_type TEXT NOT NULL,
            source_person_id TEXT NOT NULL,
            source_block_id TEXT NOT NULL,
            target_person_id TEXT NOT NULL,
            target_block_id TEXT,
            status TEXT NOT NULL,
            idempotency_key TEXT UNIQUE,
            requested_by TEXT NOT NULL,
            reason TEXT,
            requested_at TEXT NOT NULL,
            executed_at TEXT,
            rolled_back_at TEXT,
            rollback_reason TEXT,
            operations_json TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_swap_source ON swap_record(source_person_id);
        CREATE INDEX IF NOT EXISTS idx_swap_target ON swap_record(target_person_id);

        CREATE TABLE IF NOT EXISTS lock_lease (
            lock_key TEXT PRIMARY KEY,
            lock_class TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            person_id TEXT,
            block_id TEXT,
            lock_date TEXT,
            range_start TEXT,
            range_end TEXT,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_lock_owner ON lock_lease(owner_id);

        CREATE TABLE IF NOT EXISTS generation_run (
            run_id TEXT PRIMARY KEY,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            algorithm TEXT NOT NULL,
            status TEXT NOT NULL,
            transitions_json TEXT NOT NULL,
            diagnostics_json TEXT,
            config_snapshot_json TEXT,
            assignment_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            finished_at TEXT
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

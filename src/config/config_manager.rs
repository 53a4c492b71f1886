// ==========================================
// 住院医师排班系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::config_reader::SchedulerConfigReader;
use crate::config::scheduler_config::{config_keys, SchedulerConfig};
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// 配置层错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("配置读取失败: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("配置值格式错误 (key={key}): {value}")]
    InvalidValue { key: String, value: String },

    #[error("配置校验失败: {0}")]
    Validation(String),

    #[error("配置快照格式错误: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Result 类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> ConfigResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.get_conn()?;

        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    /// 写入单个配置值（UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;

        Ok(())
    }

    fn parse_value<T: std::str::FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
        raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        })
    }

    /// 读取完整配置
    ///
    /// # 规则
    /// - 以 SchedulerConfig::default() 为基础
    /// - config_kv 中存在的键覆盖默认值
    /// - 最终结果必须通过 validate()
    pub fn load_config(&self) -> ConfigResult<SchedulerConfig> {
        let mut config = SchedulerConfig::default();

        if let Some(v) = self.get_config_value(config_keys::MAX_WEEKLY_HOURS)? {
            config.max_weekly_hours = Self::parse_value(config_keys::MAX_WEEKLY_HOURS, &v)?;
        }
        if let Some(v) = self.get_config_value(config_keys::ROLLING_WEEKS)? {
            config.rolling_weeks = Self::parse_value(config_keys::ROLLING_WEEKS, &v)?;
        }
        if let Some(v) = self.get_config_value(config_keys::REST_PERIOD_HOURS)? {
            config.rest_period_hours = Self::parse_value(config_keys::REST_PERIOD_HOURS, &v)?;
        }
        if let Some(v) = self.get_config_value(config_keys::MAX_CONSECUTIVE_DAYS)? {
            config.max_consecutive_days = Self::parse_value(config_keys::MAX_CONSECUTIVE_DAYS, &v)?;
        }
        if let Some(v) = self.get_config_value(config_keys::ROLLBACK_WINDOW_HOURS)? {
            config.rollback_window_hours =
                Self::parse_value(config_keys::ROLLBACK_WINDOW_HOURS, &v)?;
        }
        if let Some(v) = self.get_config_value(config_keys::LOCK_TIMEOUT_MS)? {
            config.lock_timeout_ms = Self::parse_value(config_keys::LOCK_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = self.get_config_value(config_keys::LOCK_LEASE_SECONDS)? {
            config.lock_lease_seconds = Self::parse_value(config_keys::LOCK_LEASE_SECONDS, &v)?;
        }
        if let Some(v) = self.get_config_value(config_keys::DEFAULT_SOLVER)? {
            config.default_solver = v.trim().to_lowercase();
        }
        if let Some(v) = self.get_config_value(config_keys::FALLBACK_SOLVER)? {
            let v = v.trim().to_lowercase();
            config.fallback_solver = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = self.get_config_value(config_keys::DEFAULT_TIMEOUT_SECONDS)? {
            config.default_timeout_seconds =
                Self::parse_value(config_keys::DEFAULT_TIMEOUT_SECONDS, &v)?;
        }
        if let Some(v) = self.get_config_value(config_keys::CONSTRAINT_PRESET)? {
            config.constraint_preset = v.trim().to_lowercase();
        }

        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// 保存完整配置（单事务写入全部键）
    pub fn save_config(&self, config: &SchedulerConfig) -> ConfigResult<()> {
        config.validate().map_err(ConfigError::Validation)?;

        let values = Self::config_to_map(config);
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for (key, value) in values.iter() {
            tx.execute(
                "INSERT INTO config_kv (scope_id, key, value, updated_at)
                 VALUES ('global', ?1, ?2, datetime('now'))
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
                params![key, value],
            )?;
        }
        tx.commit()?;

        tracing::info!(keys = values.len(), "排班配置已保存");
        Ok(())
    }

    fn config_to_map(config: &SchedulerConfig) -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        map.insert(config_keys::MAX_WEEKLY_HOURS, config.max_weekly_hours.to_string());
        map.insert(config_keys::ROLLING_WEEKS, config.rolling_weeks.to_string());
        map.insert(config_keys::REST_PERIOD_HOURS, config.rest_period_hours.to_string());
        map.insert(config_keys::MAX_CONSECUTIVE_DAYS, config.max_consecutive_days.to_string());
        map.insert(config_keys::ROLLBACK_WINDOW_HOURS, config.rollback_window_hours.to_string());
        map.insert(config_keys::LOCK_TIMEOUT_MS, config.lock_timeout_ms.to_string());
        map.insert(config_keys::LOCK_LEASE_SECONDS, config.lock_lease_seconds.to_string());
        map.insert(config_keys::DEFAULT_SOLVER, config.default_solver.clone());
        map.insert(
            config_keys::FALLBACK_SOLVER,
            config.fallback_solver.clone().unwrap_or_default(),
        );
        map.insert(
            config_keys::DEFAULT_TIMEOUT_SECONDS,
            config.default_timeout_seconds.to_string(),
        );
        map.insert(config_keys::CONSTRAINT_PRESET, config.constraint_preset.clone());
        map
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 生成运行记录中保存配置快照，保证结果可复现
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key",
        )?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    ///
    /// # 注意
    /// - 仅恢复已知配置键，未知键忽略
    /// - 恢复后的配置必须仍能通过校验，否则整体回滚
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> ConfigResult<usize> {
        let config_map: HashMap<String, String> = serde_json::from_str(snapshot_json)?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            if !config_keys::ALL.contains(&key.as_str()) {
                continue;
            }
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value, updated_at)
                 VALUES ('global', ?1, ?2, datetime('now'))
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
                params![key, value],
            )?;
        }

        tx.commit()?;
        drop(conn);

        // 恢复后校验（不合法时不影响已提交结果，但向调用方报告）
        self.load_config()?;
        Ok(count)
    }
}

#[async_trait]
impl SchedulerConfigReader for ConfigManager {
    async fn load_scheduler_config(&self) -> ConfigResult<SchedulerConfig> {
        self.load_config()
    }
}

// ==========================================
// 住院医师排班系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// 装配: 单一共享连接 → 仓储 → 引擎/换班服务 → API
// ==========================================

use std::sync::{Arc, Mutex, RwLock};

use crate::api::{ApiError, ApiResult, ScheduleApi, SwapApi};
use crate::config::{ConfigManager, SchedulerConfig, SchedulerConfigReader};
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::constraints::{ConstraintManager, ConstraintPreset};
use crate::engine::events::OptionalEventPublisher;
use crate::engine::orchestrator::ScheduleEngine;
use crate::engine::swap::SwapService;
use crate::repository::SqliteSnapshotProvider;

/// 默认数据库文件
pub const DEFAULT_DB_PATH: &str = "residency_scheduler.db";

/// 应用状态
///
/// 包含所有API实例和共享资源
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 排班API
    pub schedule_api: Arc<ScheduleApi>,

    /// 换班API
    pub swap_api: Arc<SwapApi>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 约束注册表（引擎与换班服务共享）
    pub constraints: Arc<RwLock<ConstraintManager>>,
}

impl AppState {
    /// 创建新的AppState实例
    pub fn new(db_path: &str) -> ApiResult<Self> {
        Self::with_event_publisher(db_path, OptionalEventPublisher::none())
    }

    /// 创建AppState并注入事件发布者（后台消费方自行持有接收端）
    pub fn with_event_publisher(db_path: &str, events: OptionalEventPublisher) -> ApiResult<Self> {
        tracing::info!(db_path, "初始化AppState");

        let conn = open_sqlite_connection(db_path)
            .map_err(|e| ApiError::PersistenceFailure(format!("无法打开数据库: {}", e)))?;
        init_schema(&conn)
            .map_err(|e| ApiError::PersistenceFailure(format!("数据库初始化失败: {}", e)))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 配置与约束注册表
        // ==========================================
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let config = config_manager.load_config()?;
        let constraints = Arc::new(RwLock::new(constraint_manager_for(&config)?));
        let config_reader: Arc<dyn SchedulerConfigReader> = config_manager.clone();

        // ==========================================
        // 引擎与服务
        // ==========================================
        let engine = Arc::new(
            ScheduleEngine::from_connection(conn.clone(), config_reader.clone(), constraints.clone())
                .with_event_publisher(events.clone()),
        );
        let swap_service = Arc::new(
            SwapService::from_connection(conn.clone(), config_reader.clone(), constraints.clone())
                .with_event_publisher(events),
        );

        // ==========================================
        // API
        // ==========================================
        let schedule_api = Arc::new(ScheduleApi::new(
            engine,
            Arc::new(SqliteSnapshotProvider::new(conn)),
            config_reader,
        ));
        let swap_api = Arc::new(SwapApi::new(swap_service));

        tracing::info!(
            preset = %config.constraint_preset,
            default_solver = %config.default_solver,
            "AppState初始化完成"
        );

        Ok(Self {
            db_path: db_path.to_string(),
            schedule_api,
            swap_api,
            config_manager,
            constraints,
        })
    }
}

/// 按配置中的预设构建约束注册表
fn constraint_manager_for(config: &SchedulerConfig) -> ApiResult<ConstraintManager> {
    let preset: ConstraintPreset = config.constraint_preset.parse()?;
    let mut manager = ConstraintManager::with_defaults();
    manager.apply_preset(preset);
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_app_state_bootstraps_fresh_database() {
        let db = NamedTempFile::new().unwrap();
        let state = AppState::new(db.path().to_str().unwrap()).unwrap();

        let manager = state.constraints.read().unwrap();
        assert_eq!(manager.enabled().len(), 10);
        assert_eq!(
            state.config_manager.load_config().unwrap(),
            SchedulerConfig::default()
        );
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let config = SchedulerConfig {
            constraint_preset: "lenient".to_string(),
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            constraint_manager_for(&config),
            Err(ApiError::InvalidInput(_))
        ));
    }
}

// ==========================================
// 住院医师排班系统 - 配置读取 Trait
// ==========================================
// 职责: 定义引擎所需的配置读取接口（不包含实现）
// 实现者: ConfigManager（config_kv 表）/ SchedulerConfig（静态配置）
// ==========================================

use crate::config::config_manager::ConfigResult;
use crate::config::scheduler_config::SchedulerConfig;
use async_trait::async_trait;

// ==========================================
// SchedulerConfigReader Trait
// ==========================================
// 用途: 生成运行开始时读取一次配置，形成本次运行的快照
#[async_trait]
pub trait SchedulerConfigReader: Send + Sync {
    /// 读取完整排班配置（缺省项使用默认值）
    async fn load_scheduler_config(&self) -> ConfigResult<SchedulerConfig>;
}

/// 静态配置：直接返回自身副本（测试与嵌入场景）
#[async_trait]
impl SchedulerConfigReader for SchedulerConfig {
    async fn load_scheduler_config(&self) -> ConfigResult<SchedulerConfig> {
        Ok(self.clone())
    }
}

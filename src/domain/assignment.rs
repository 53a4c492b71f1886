// ==========================================
// 住院医师排班系统 - 排班领域模型
// ==========================================
// 红线: 每个 (person, block) 至多一条有效排班
// 并发控制: revision 字段用于乐观锁
// ==========================================

use crate::domain::types::AssignmentSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// Assignment - 排班记录（核心可变输出）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: String,    // 排班ID
    pub person_id: String,        // 人员ID
    pub block_id: String,         // 块ID
    pub template_id: String,      // 轮转模板ID
    pub source: AssignmentSource, // 来源
    pub locked: bool,             // 保留标记（生成不得改动）
    pub revision: i32,            // 乐观锁：修订号
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// 创建一条新排班（revision 从 1 开始）
    pub fn new(
        person_id: &str,
        block_id: &str,
        template_id: &str,
        source: AssignmentSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            assignment_id: Uuid::new_v4().to_string(),
            person_id: person_id.to_string(),
            block_id: block_id.to_string(),
            template_id: template_id.to_string(),
            source,
            locked: source == AssignmentSource::Preserved,
            revision: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// 求解器生成的排班
    pub fn generated(person_id: &str, block_id: &str, template_id: &str) -> Self {
        Self::new(person_id, block_id, template_id, AssignmentSource::Generated)
    }

    /// (person, block) 唯一键
    pub fn key(&self) -> (&str, &str) {
        (self.person_id.as_str(), self.block_id.as_str())
    }
}

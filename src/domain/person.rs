// ==========================================
// 住院医师排班系统 - 人员领域模型
// ==========================================
// 说明: 人员由外部系统维护，本系统只读
// ==========================================

use crate::domain::types::{PersonRole, SeniorityTier};
use serde::{Deserialize, Serialize};

// ==========================================
// Person - 排班人员
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,        // 人员ID
    pub name: String,             // 姓名
    pub role: PersonRole,         // 角色 (RESIDENT/FACULTY)
    pub tier: SeniorityTier,      // 年资层级
    pub specialties: Vec<String>, // 专科资质
}

impl Person {
    pub fn resident(person_id: &str, name: &str, tier: SeniorityTier) -> Self {
        Self {
            person_id: person_id.to_string(),
            name: name.to_string(),
            role: PersonRole::Resident,
            tier,
            specialties: Vec::new(),
        }
    }

    pub fn faculty(person_id: &str, name: &str) -> Self {
        Self {
            person_id: person_id.to_string(),
            name: name.to_string(),
            role: PersonRole::Faculty,
            tier: SeniorityTier::Faculty,
            specialties: Vec::new(),
        }
    }

    pub fn with_specialties(mut self, specialties: &[&str]) -> Self {
        self.specialties = specialties.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn is_resident(&self) -> bool {
        self.role == PersonRole::Resident
    }

    pub fn is_faculty(&self) -> bool {
        self.role == PersonRole::Faculty
    }

    /// 是否具备指定专科资质（大小写不敏感）
    pub fn has_specialty(&self, specialty: &str) -> bool {
        self.specialties
            .iter()
            .any(|s| s.eq_ignore_ascii_case(specialty.trim()))
    }
}

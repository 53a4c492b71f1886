// ==========================================
// 住院医师排班系统 - 时段块领域模型
// ==========================================
// 红线: 学年日历建立后 Block 不可变
// ==========================================

use crate::domain::types::Session;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

// ==========================================
// Block - 最小排班单元 (日期 + 时段)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: String,  // 块ID
    pub date: NaiveDate,   // 日期
    pub session: Session,  // 时段 (AM/PM)
    pub block_number: u32, // 学年轮转块序号
    pub is_weekend: bool,  // 是否周末
    pub is_holiday: bool,  // 是否节假日
}

impl Block {
    /// 按日期与时段创建（周末标记由日期推导）
    pub fn new(block_id: &str, date: NaiveDate, session: Session, block_number: u32) -> Self {
        let is_weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        Self {
            block_id: block_id.to_string(),
            date,
            session,
            block_number,
            is_weekend,
            is_holiday: false,
        }
    }

    /// 时间槽键：同日期同时段的两个块在时间上重叠
    pub fn time_key(&self) -> (NaiveDate, Session) {
        (self.date, self.session)
    }

    pub fn overlaps(&self, other: &Block) -> bool {
        self.time_key() == other.time_key()
    }
}

// ==========================================
// 住院医师排班系统 - 排班快照仓储
// ==========================================
// 职责: 读取人员/日历/模板/缺勤（外部系统维护的只读输入）
// 一致性: 单次快照在同一个 DEFERRED 读事务内完成
// ==========================================

use crate::domain::{Absence, Assignment, Block, Person, RotationTemplate};
use crate::domain::types::{AssignmentSource, PersonRole, SeniorityTier, Session};
use crate::repository::error::{
    format_date, format_timestamp, parse_date_column, parse_timestamp_column, RepositoryError,
    RepositoryResult,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Arc, Mutex};
use tracing::debug;

// ==========================================
// ScheduleSnapshot - 某日期区间的一致性快照
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ScheduleSnapshot {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub people: Vec<Person>,
    pub blocks: Vec<Block>,                // 区间内的块，按 (date, session) 排序
    pub templates: Vec<RotationTemplate>,
    pub absences: Vec<Absence>,            // 与区间相交的缺勤
    pub assignments: Vec<Assignment>,      // 区间内已有排班（含保留排班）
}

// ==========================================
// SnapshotProvider Trait
// ==========================================
pub trait SnapshotProvider: Send + Sync {
    /// 读取 [start, end] 区间的一致性快照
    fn load_snapshot(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<ScheduleSnapshot>;

    /// 按ID查询块
    fn find_block(&self, block_id: &str) -> RepositoryResult<Option<Block>>;
}

// ==========================================
// SqliteSnapshotProvider
// ==========================================
pub struct SqliteSnapshotProvider {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotProvider {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 外部数据写入（导入/测试夹具）
    // ==========================================

    pub fn save_person(&self, person: &Person) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO person (person_id, name, role, tier, specialties_json)
               VALUES (?, ?, ?, ?, ?)"#,
            params![
                &person.person_id,
                &person.name,
                person.role.to_db_str(),
                person.tier.to_db_str(),
                serde_json::to_string(&person.specialties)?,
            ],
        )?;
        Ok(())
    }

    pub fn save_block(&self, block: &Block) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO block (
                block_id, block_date, session, block_number, is_weekend, is_holiday
            ) VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                &block.block_id,
                format_date(&block.date),
                block.session.to_db_str(),
                block.block_number,
                block.is_weekend,
                block.is_holiday,
            ],
        )?;
        Ok(())
    }

    pub fn save_template(&self, template: &RotationTemplate) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO rotation_template (
                template_id, name, activity_type, min_coverage, capacity, hours_per_block,
                required_specialty, supervision_required, pgy1_per_faculty,
                senior_per_faculty, applies_on_weekends
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &template.template_id,
                &template.name,
                &template.activity_type,
                template.min_coverage,
                template.capacity,
                template.hours_per_block,
                &template.required_specialty,
                template.supervision_required,
                template.pgy1_per_faculty,
                template.senior_per_faculty,
                template.applies_on_weekends,
            ],
        )?;
        Ok(())
    }

    pub fn save_absence(&self, absence: &Absence) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO absence (
                absence_id, person_id, start_date, end_date, absence_type, is_blocking
            ) VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                &absence.absence_id,
                &absence.person_id,
                format_date(&absence.start_date),
                format_date(&absence.end_date),
                &absence.absence_type,
                absence.is_blocking,
            ],
        )?;
        Ok(())
    }
}

impl SnapshotProvider for SqliteSnapshotProvider {
    fn load_snapshot(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<ScheduleSnapshot> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;

        let start_s = format_date(&start);
        let end_s = format_date(&end);

        let people = {
            let mut stmt = tx.prepare(
                r#"SELECT person_id, name, role, tier, specialties_json
                   FROM person ORDER BY person_id"#,
            )?;
            let rows = stmt
                .query_map([], map_person)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let blocks = {
            let mut stmt = tx.prepare(
                r#"SELECT block_id, block_date, session, block_number, is_weekend, is_holiday
                   FROM block
                   WHERE block_date BETWEEN ? AND ?
                   ORDER BY block_date, session, block_id"#,
            )?;
            let rows = stmt
                .query_map(params![&start_s, &end_s], map_block)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let templates = {
            let mut stmt = tx.prepare(
                r#"SELECT template_id, name, activity_type, min_coverage, capacity,
                          hours_per_block, required_specialty, supervision_required,
                          pgy1_per_faculty, senior_per_faculty, applies_on_weekends
                   FROM rotation_template ORDER BY template_id"#,
            )?;
            let rows = stmt
                .query_map([], map_template)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let absences = {
            let mut stmt = tx.prepare(
                r#"SELECT absence_id, person_id, start_date, end_date, absence_type, is_blocking
                   FROM absence
                   WHERE start_date <= ? AND end_date >= ?
                   ORDER BY person_id, start_date"#,
            )?;
            let rows = stmt
                .query_map(params![&end_s, &start_s], map_absence)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let assignments = {
            let mut stmt = tx.prepare(
                r#"SELECT a.assignment_id, a.person_id, a.block_id, a.template_id, a.source,
                          a.locked, a.revision, a.created_at, a.updated_at
                   FROM assignment a
                   JOIN block b ON b.block_id = a.block_id
                   WHERE b.block_date BETWEEN ? AND ?
                   ORDER BY b.block_date, b.session, a.person_id"#,
            )?;
            let rows = stmt
                .query_map(params![&start_s, &end_s], map_assignment)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        tx.commit()?;

        debug!(
            start = %start,
            end = %end,
            people = people.len(),
            blocks = blocks.len(),
            templates = templates.len(),
            absences = absences.len(),
            assignments = assignments.len(),
            "快照读取完成"
        );

        Ok(ScheduleSnapshot {
            start_date: Some(start),
            end_date: Some(end),
            people,
            blocks,
            templates,
            absences,
            assignments,
        })
    }

    fn find_block(&self, block_id: &str) -> RepositoryResult<Option<Block>> {
        let conn = self.get_conn()?;
        let block = conn
            .query_row(
                r#"SELECT block_id, block_date, session, block_number, is_weekend, is_holiday
                   FROM block WHERE block_id = ?"#,
                params![block_id],
                map_block,
            )
            .optional()?;
        Ok(block)
    }
}

// ==========================================
// 行映射
// ==========================================

fn map_person(row: &rusqlite::Row) -> rusqlite::Result<Person> {
    let specialties_json: String = row.get(4)?;
    let specialties: Vec<String> = serde_json::from_str(&specialties_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Person {
        person_id: row.get(0)?,
        name: row.get(1)?,
        role: PersonRole::from_str(&row.get::<_, String>(2)?),
        tier: SeniorityTier::from_str(&row.get::<_, String>(3)?),
        specialties,
    })
}

pub(crate) fn map_block(row: &rusqlite::Row) -> rusqlite::Result<Block> {
    Ok(Block {
        block_id: row.get(0)?,
        date: parse_date_column(1, &row.get::<_, String>(1)?)?,
        session: Session::from_str(&row.get::<_, String>(2)?),
        block_number: row.get(3)?,
        is_weekend: row.get(4)?,
        is_holiday: row.get(5)?,
    })
}

fn map_template(row: &rusqlite::Row) -> rusqlite::Result<RotationTemplate> {
    Ok(RotationTemplate {
        template_id: row.get(0)?,
        name: row.get(1)?,
        activity_type: row.get(2)?,
        min_coverage: row.get(3)?,
        capacity: row.get(4)?,
        hours_per_block: row.get(5)?,
        required_specialty: row.get(6)?,
        supervision_required: row.get(7)?,
        pgy1_per_faculty: row.get(8)?,
        senior_per_faculty: row.get(9)?,
        applies_on_weekends: row.get(10)?,
    })
}

fn map_absence(row: &rusqlite::Row) -> rusqlite::Result<Absence> {
    Ok(Absence {
        absence_id: row.get(0)?,
        person_id: row.get(1)?,
        start_date: parse_date_column(2, &row.get::<_, String>(2)?)?,
        end_date: parse_date_column(3, &row.get::<_, String>(3)?)?,
        absence_type: row.get(4)?,
        is_blocking: row.get(5)?,
    })
}

/// 排班行映射（列顺序: id, person, block, template, source, locked, revision, created, updated）
pub(crate) fn map_assignment(row: &rusqlite::Row) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        assignment_id: row.get(0)?,
        person_id: row.get(1)?,
        block_id: row.get(2)?,
        template_id: row.get(3)?,
        source: AssignmentSource::from_str(&row.get::<_, String>(4)?),
        locked: row.get(5)?,
        revision: row.get(6)?,
        created_at: parse_timestamp_column(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_timestamp_column(8, &row.get::<_, String>(8)?)?,
    })
}

/// 排班写入（事务内复用）
pub(crate) fn insert_assignment(conn: &Connection, a: &Assignment) -> rusqlite::Result<usize> {
    conn.execute(
        r#"INSERT INTO assignment (
            assignment_id, person_id, block_id, template_id, source,
            locked, revision, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        params![
            &a.assignment_id,
            &a.person_id,
            &a.block_id,
            &a.template_id,
            a.source.to_db_str(),
            a.locked,
            a.revision,
            format_timestamp(&a.created_at),
            format_timestamp(&a.updated_at),
        ],
    )
}

// ==========================================
// 排班生成集成测试
// ==========================================
// 覆盖: 精确/贪心求解落库、缺勤、不可行诊断、保留排班、重复生成、
//       约束覆盖、相邻区间滚动工时、合规报告查询
// ==========================================


#[cfg(test)]
mod engine_generation_test {
    use crate::test_helpers::*;
    use residency_scheduler::app::AppState;
    use residency_scheduler::domain::{Person, RotationTemplate, RunStatus, SeniorityTier, Severity};
    use residency_scheduler::repository::{
        AssignmentRepository, GenerationRunRepository, SqliteAssignmentRepository,
    };
    use residency_scheduler::{ApiError, ComplianceQuery};
    use std::collections::{HashMap, HashSet};

    fn clinic() -> RotationTemplate {
        RotationTemplate::new("T1", "Clinic", 1, 3)
    }

    // ==========================================
    // 正常生成
    // ==========================================

    #[tokio::test]
    async fn test_exact_week_persists_compliant_schedule() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &standard_people(), &daily_blocks(7), &[clinic()]).unwrap();

        let state = AppState::new(&db_path).unwrap();
        let outcome = state
            .schedule_api
            .generate(day(0), day(6), Some("exact"), Some(30), HashMap::new(), false)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.compliance_report.count_by_severity(Severity::Critical), 0);
        assert!(outcome.compliance_report.is_compliant());

        // 每个 (person, block) 至多一条
        let stored = SqliteAssignmentRepository::new(conn.clone())
            .list_in_range(day(0), day(6))
            .unwrap();
        let keys: HashSet<(String, String)> = stored
            .iter()
            .map(|a| (a.person_id.clone(), a.block_id.clone()))
            .collect();
        assert_eq!(keys.len(), stored.len());
        assert_eq!(stored.len(), outcome.assignments.len());

        // 每天至少一名住院医师
        for offset in 0..7 {
            let block = block_id(offset);
            assert!(
                stored
                    .iter()
                    .any(|a| a.block_id == block && a.person_id.starts_with('R')),
                "{} 缺少住院医师",
                block
            );
        }

        let run = GenerationRunRepository::new(conn)
            .find_by_id(&outcome.run_id)
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.assignment_count, outcome.assignments.len());
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_absent_resident_is_never_assigned() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &standard_people(), &daily_blocks(7), &[clinic()]).unwrap();
        seed_absence(&conn, "A1", "R3", day(0), day(6)).unwrap();

        let state = AppState::new(&db_path).unwrap();
        let outcome = state
            .schedule_api
            .generate(day(0), day(6), Some("exact"), None, HashMap::new(), false)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.assignments.iter().all(|a| a.person_id != "R3"));
    }

    // ==========================================
    // 不可行
    // ==========================================

    #[tokio::test]
    async fn test_coverage_shortfall_is_infeasible_and_nothing_persisted() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        let template = RotationTemplate::new("T1", "Ward", 4, 6);
        seed_calendar(&conn, &standard_people(), &daily_blocks(7), &[template]).unwrap();

        let state = AppState::new(&db_path).unwrap();
        let err = state
            .schedule_api
            .generate(day(0), day(6), Some("greedy"), None, HashMap::new(), false)
            .await
            .unwrap_err();

        match err {
            ApiError::InfeasibleSchedule {
                binding_constraint, ..
            } => assert_eq!(binding_constraint.as_deref(), Some("coverage")),
            other => panic!("期望 InfeasibleSchedule，实际 {:?}", other),
        }

        let stored = SqliteAssignmentRepository::new(conn.clone())
            .list_in_range(day(0), day(6))
            .unwrap();
        assert!(stored.is_empty());

        let runs = GenerationRunRepository::new(conn).list_recent(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_missing_faculty_exact_reports_supervision_binding() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &standard_people(), &daily_blocks(2), &[clinic()]).unwrap();
        seed_absence(&conn, "A1", "F1", day(0), day(1)).unwrap();
        seed_absence(&conn, "A2", "F2", day(0), day(1)).unwrap();

        let state = AppState::new(&db_path).unwrap();
        let err = state
            .schedule_api
            .generate(day(0), day(1), Some("exact"), None, HashMap::new(), false)
            .await
            .unwrap_err();

        match err {
            ApiError::InfeasibleSchedule {
                binding_constraint, ..
            } => assert_eq!(binding_constraint.as_deref(), Some("supervision_ratio")),
            other => panic!("期望 InfeasibleSchedule，实际 {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_faculty_greedy_completes_with_advisory() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &standard_people(), &daily_blocks(2), &[clinic()]).unwrap();
        seed_absence(&conn, "A1", "F1", day(0), day(1)).unwrap();
        seed_absence(&conn, "A2", "F2", day(0), day(1)).unwrap();

        let state = AppState::new(&db_path).unwrap();
        let outcome = state
            .schedule_api
            .generate(day(0), day(1), Some("greedy"), None, HashMap::new(), false)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        let report = &outcome.compliance_report;
        assert_eq!(report.critical_count(), 0);
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == "supervision_ratio" && v.severity == Severity::Medium));
    }

    #[tokio::test]
    async fn test_constraint_override_applies_to_single_run() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &standard_people(), &daily_blocks(2), &[clinic()]).unwrap();
        seed_absence(&conn, "A1", "F1", day(0), day(1)).unwrap();
        seed_absence(&conn, "A2", "F2", day(0), day(1)).unwrap();

        let state = AppState::new(&db_path).unwrap();
        let mut overrides = HashMap::new();
        overrides.insert("supervision_ratio".to_string(), false);
        let outcome = state
            .schedule_api
            .generate(day(0), day(1), Some("exact"), None, overrides, false)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(outcome.assignments.iter().all(|a| a.person_id.starts_with('R')));

        // 覆盖只作用于本次运行
        assert!(state
            .constraints
            .read()
            .unwrap()
            .is_enabled("supervision_ratio"));
    }

    // ==========================================
    // 保留排班与重复生成
    // ==========================================

    #[tokio::test]
    async fn test_preserved_assignment_survives_generation() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &standard_people(), &daily_blocks(7), &[clinic()]).unwrap();
        let preserved = seed_preserved(&conn, "R3", "B01", "T1").unwrap();

        let state = AppState::new(&db_path).unwrap();
        let outcome = state
            .schedule_api
            .generate(day(0), day(6), Some("exact"), None, HashMap::new(), false)
            .await
            .unwrap();

        let kept = holding(&conn, "R3", "B01").unwrap().unwrap();
        assert_eq!(kept.assignment_id, preserved.assignment_id);
        assert!(kept.locked);
        assert_eq!(kept.revision, 1);
        assert!(outcome
            .assignments
            .iter()
            .all(|a| a.assignment_id != preserved.assignment_id));
    }

    #[tokio::test]
    async fn test_regeneration_replaces_previous_rows() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &standard_people(), &daily_blocks(7), &[clinic()]).unwrap();

        let state = AppState::new(&db_path).unwrap();
        let first = state
            .schedule_api
            .generate(day(0), day(6), Some("greedy"), None, HashMap::new(), false)
            .await
            .unwrap();
        let second = state
            .schedule_api
            .generate(day(0), day(6), Some("greedy"), None, HashMap::new(), false)
            .await
            .unwrap();
        assert_ne!(first.run_id, second.run_id);

        let stored = SqliteAssignmentRepository::new(conn)
            .list_in_range(day(0), day(6))
            .unwrap();
        assert_eq!(stored.len(), second.assignments.len());

        let first_ids: HashSet<&str> = first
            .assignments
            .iter()
            .map(|a| a.assignment_id.as_str())
            .collect();
        assert!(stored
            .iter()
            .all(|a| !first_ids.contains(a.assignment_id.as_str())));
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let state = AppState::new(&db_path).unwrap();
        let err = state
            .schedule_api
            .generate(day(0), day(6), None, Some(0), HashMap::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    // ==========================================
    // 相邻区间
    // ==========================================

    /// 仅工作日开放的 64 小时门诊，一名 PGY2 做满一周即 320 小时
    fn heavy_weekday_clinic() -> RotationTemplate {
        let mut template = unsupervised_template("T64", 64.0);
        template.applies_on_weekends = false;
        template
    }

    fn lone_senior() -> Vec<Person> {
        vec![Person::resident("R3", "Resident Three", SeniorityTier::Pgy2)]
    }

    #[tokio::test]
    async fn test_adjacent_ranges_share_rolling_hours() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &lone_senior(), &daily_blocks(14), &[heavy_weekday_clinic()]).unwrap();

        let state = AppState::new(&db_path).unwrap();
        let first = state
            .schedule_api
            .generate(day(0), day(6), Some("exact"), Some(30), HashMap::new(), false)
            .await
            .unwrap();
        assert_eq!(first.status, RunStatus::Completed);
        assert_eq!(first.assignments.len(), 5);

        // 第二周任何一班都会让 3/2 起的四周窗口超过 320 小时
        let err = state
            .schedule_api
            .generate(day(7), day(13), Some("exact"), Some(30), HashMap::new(), false)
            .await
            .unwrap_err();
        match err {
            ApiError::InfeasibleSchedule {
                binding_constraint, ..
            } => assert_eq!(binding_constraint.as_deref(), Some("work_hours")),
            other => panic!("期望 InfeasibleSchedule，实际 {:?}", other),
        }

        let repo = SqliteAssignmentRepository::new(conn.clone());
        assert!(repo.list_in_range(day(7), day(13)).unwrap().is_empty());
        // 第一周作为上下文参与求解，但未被改写
        assert_eq!(repo.list_in_range(day(0), day(6)).unwrap().len(), 5);

        let report = state
            .schedule_api
            .get_compliance_report(ComplianceQuery::DateRange {
                start: day(0),
                end: day(13),
            })
            .await
            .unwrap();
        assert_eq!(report.count_by_severity(Severity::Critical), 0);
    }

    #[tokio::test]
    async fn test_report_counts_hours_before_queried_range() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &lone_senior(), &daily_blocks(14), &[heavy_weekday_clinic()]).unwrap();
        for offset in [0, 1, 2, 3, 4, 7] {
            seed_assignment(&conn, "R3", &block_id(offset), "T64").unwrap();
        }

        let state = AppState::new(&db_path).unwrap();
        let report = state
            .schedule_api
            .get_compliance_report(ComplianceQuery::DateRange {
                start: day(7),
                end: day(13),
            })
            .await
            .unwrap();

        // 仅 B08 属于查询区间，但第一周的 320 小时计入同一窗口
        assert_eq!(report.assignments_checked, 1);
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == "work_hours" && v.severity == Severity::Critical));

        let first_week = state
            .schedule_api
            .get_compliance_report(ComplianceQuery::DateRange {
                start: day(0),
                end: day(6),
            })
            .await
            .unwrap();
        assert_eq!(first_week.assignments_checked, 5);
    }

    // ==========================================
    // 合规报告
    // ==========================================

    #[tokio::test]
    async fn test_compliance_report_by_range_and_person() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        seed_calendar(&conn, &standard_people(), &daily_blocks(7), &[clinic()]).unwrap();

        let state = AppState::new(&db_path).unwrap();
        state
            .schedule_api
            .generate(day(0), day(6), Some("exact"), None, HashMap::new(), false)
            .await
            .unwrap();

        let report = state
            .schedule_api
            .get_compliance_report(ComplianceQuery::DateRange {
                start: day(0),
                end: day(6),
            })
            .await
            .unwrap();
        assert!(report.is_compliant());
        assert_eq!(report.period_start, Some(day(0)));
        assert_eq!(report.period_end, Some(day(6)));

        let person_report = state
            .schedule_api
            .get_compliance_report(ComplianceQuery::Person {
                person_id: "R1".to_string(),
                start: day(0),
                end: day(6),
            })
            .await
            .unwrap();
        assert_eq!(person_report.people_checked, 1);
        assert!(person_report.assignments_checked <= report.assignments_checked);

        let err = state
            .schedule_api
            .get_compliance_report(ComplianceQuery::Person {
                person_id: "NOBODY".to_string(),
                start: day(0),
                end: day(6),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_compliance_report_flags_hour_breach() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        let heavy = unsupervised_template("T24", 24.0);
        seed_calendar(&conn, &standard_people(), &daily_blocks(28), &[heavy]).unwrap();
        // 14 个 24 小时班 = 336 小时 > 4 × 80
        for offset in (0..28).step_by(2) {
            seed_assignment(&conn, "R1", &block_id(offset), "T24").unwrap();
        }

        let state = AppState::new(&db_path).unwrap();
        let report = state
            .schedule_api
            .get_compliance_report(ComplianceQuery::Person {
                person_id: "R1".to_string(),
                start: day(0),
                end: day(27),
            })
            .await
            .unwrap();

        assert!(!report.is_compliant());
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule_id == "work_hours" && v.severity == Severity::Critical));
    }
}

// ==========================================
// 换班执行集成测试
// ==========================================
// 覆盖: 校验（含覆盖人数）、执行、幂等重放、回滚（窗口/重复/冲突）、
//       提交失败原子性、锁超时可重试、查询
// ==========================================


#[cfg(test)]
mod swap_execution_test {
    use crate::test_helpers::*;
    use residency_scheduler::app::AppState;
    use residency_scheduler::config::SchedulerConfig;
    use residency_scheduler::domain::{AssignmentSource, Severity, SwapRequest, SwapStatus};
    use residency_scheduler::repository::{
        AssignmentRepository, LockProvider, LockScope, SqliteAssignmentRepository,
        SqliteLockProvider,
    };
    use residency_scheduler::ApiError;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    struct Fixture {
        _temp_file: NamedTempFile,
        conn: Arc<Mutex<Connection>>,
        state: AppState,
    }

    /// 一周日历，R1@B01 / R2@B02 / R3@B03
    fn week_fixture() -> Fixture {
        let (temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        let template = unsupervised_template("T1", 6.0);
        seed_calendar(&conn, &standard_people(), &daily_blocks(7), &[template]).unwrap();
        seed_assignment(&conn, "R1", "B01", "T1").unwrap();
        seed_assignment(&conn, "R2", "B02", "T1").unwrap();
        seed_assignment(&conn, "R3", "B03", "T1").unwrap();

        let state = AppState::new(&db_path).unwrap();
        Fixture {
            _temp_file: temp_file,
            conn,
            state,
        }
    }

    fn update_config(state: &AppState, apply: impl FnOnce(&mut SchedulerConfig)) {
        let mut config = state.config_manager.load_config().unwrap();
        apply(&mut config);
        state.config_manager.save_config(&config).unwrap();
    }

    // ==========================================
    // 校验与执行
    // ==========================================

    #[tokio::test]
    async fn test_one_to_one_swap_executes() {
        let fx = week_fixture();
        let request = SwapRequest::one_to_one("R1", "B01", "R2", "B02");

        let validation = fx.state.swap_api.validate_swap(&request).await.unwrap();
        assert!(validation.is_valid, "{:?}", validation.violations);

        let execution = fx.state.swap_api.execute_swap(&request).await.unwrap();
        assert_eq!(execution.status, SwapStatus::Executed);
        assert!(execution.executed_at.is_some());
        assert!(!execution.replayed);

        let moved = holding(&fx.conn, "R2", "B01").unwrap().unwrap();
        assert_eq!(moved.revision, 2);
        assert_eq!(moved.source, AssignmentSource::Swap);
        assert!(holding(&fx.conn, "R1", "B02").unwrap().is_some());
        assert!(holding(&fx.conn, "R1", "B01").unwrap().is_none());

        let record = fx.state.swap_api.get_swap(&execution.swap_record_id).unwrap();
        assert_eq!(record.status, SwapStatus::Executed);
        assert_eq!(record.operations.len(), 2);
    }

    #[tokio::test]
    async fn test_swap_into_absence_is_rejected() {
        let fx = week_fixture();
        seed_absence(&fx.conn, "A1", "R3", day(0), day(0)).unwrap();
        let request = SwapRequest::absorb("R1", "B01", "R3");

        let validation = fx.state.swap_api.validate_swap(&request).await.unwrap();
        assert!(!validation.is_valid);
        assert!(validation
            .violations
            .iter()
            .any(|v| v.constraint_id == "availability" && v.severity == Severity::Critical));

        let err = fx.state.swap_api.execute_swap(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::SwapValidation { .. }));
        assert!(holding(&fx.conn, "R1", "B01").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_absorb_into_faculty_leaves_block_uncovered() {
        let fx = week_fixture();
        // B01 仅 R1 一名住院医师，转给带教后住院医师覆盖归零
        let request = SwapRequest::absorb("R1", "B01", "F1");

        let validation = fx.state.swap_api.validate_swap(&request).await.unwrap();
        assert!(!validation.is_valid);
        assert!(validation
            .violations
            .iter()
            .any(|v| v.constraint_id == "coverage" && v.block_ids.contains(&"B01".to_string())));

        let err = fx.state.swap_api.execute_swap(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::SwapValidation { .. }));
        assert!(holding(&fx.conn, "R1", "B01").unwrap().is_some());
        assert!(holding(&fx.conn, "F1", "B01").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_swap_exceeding_work_hours_is_rejected() {
        let (_temp_file, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path).unwrap();
        let heavy = unsupervised_template("T24", 24.0);
        seed_calendar(&conn, &standard_people(), &daily_blocks(28), &[heavy]).unwrap();
        // R1: 13 个 24 小时班 = 312 小时，再接 1 个即超 4 × 80
        for offset in (0..26).step_by(2) {
            seed_assignment(&conn, "R1", &block_id(offset), "T24").unwrap();
        }
        seed_assignment(&conn, "R2", "B02", "T24").unwrap();

        let state = AppState::new(&db_path).unwrap();
        let request = SwapRequest::absorb("R2", "B02", "R1");
        let validation = state.swap_api.validate_swap(&request).await.unwrap();

        assert!(!validation.is_valid);
        assert!(validation
            .violations
            .iter()
            .any(|v| v.constraint_id == "work_hours"
                && v.severity == Severity::Critical
                && v.person_ids.contains(&"R1".to_string())));

        let err = state.swap_api.execute_swap(&request).await.unwrap_err();
        match err {
            ApiError::SwapValidation { violations } => assert!(!violations.is_empty()),
            other => panic!("期望 SwapValidation，实际 {:?}", other),
        }
        assert!(holding(&conn, "R2", "B02").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_assignment_is_not_found() {
        let fx = week_fixture();
        let request = SwapRequest::one_to_one("R1", "B05", "R2", "B02");
        let err = fx.state.swap_api.execute_swap(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_same_person_swap_rejected() {
        let fx = week_fixture();
        let request = SwapRequest::absorb("R1", "B01", "R1");
        let err = fx.state.swap_api.execute_swap(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    // ==========================================
    // 幂等
    // ==========================================

    #[tokio::test]
    async fn test_idempotent_replay_returns_same_record() {
        let fx = week_fixture();
        let request = SwapRequest::absorb("R1", "B01", "R2").with_idempotency_key("req-001");

        let first = fx.state.swap_api.execute_swap(&request).await.unwrap();
        let second = fx.state.swap_api.execute_swap(&request).await.unwrap();

        assert_eq!(first.swap_record_id, second.swap_record_id);
        assert!(!first.replayed);
        assert!(second.replayed);

        // 只执行了一次
        let moved = holding(&fx.conn, "R2", "B01").unwrap().unwrap();
        assert_eq!(moved.revision, 2);
        assert_eq!(fx.state.swap_api.list_swaps_for_person("R1").unwrap().len(), 1);
    }

    // ==========================================
    // 回滚
    // ==========================================

    #[tokio::test]
    async fn test_rollback_restores_prior_holders() {
        let fx = week_fixture();
        let before_b01 = holding(&fx.conn, "R1", "B01").unwrap().unwrap();
        let request = SwapRequest::one_to_one("R1", "B01", "R2", "B02");
        let execution = fx.state.swap_api.execute_swap(&request).await.unwrap();

        let rollback = fx
            .state
            .swap_api
            .rollback_swap(&execution.swap_record_id, Some("误操作"))
            .await
            .unwrap();
        assert_eq!(rollback.status, SwapStatus::RolledBack);
        assert!(rollback.rolled_back_at.is_some());

        let restored = holding(&fx.conn, "R1", "B01").unwrap().unwrap();
        assert_eq!(restored.assignment_id, before_b01.assignment_id);
        assert_eq!(restored.source, AssignmentSource::Generated);
        assert_eq!(restored.revision, 3);
        assert!(holding(&fx.conn, "R2", "B02").unwrap().is_some());

        let record = fx.state.swap_api.get_swap(&execution.swap_record_id).unwrap();
        assert_eq!(record.status, SwapStatus::RolledBack);
        assert_eq!(record.rollback_reason.as_deref(), Some("误操作"));

        let err = fx
            .state
            .swap_api
            .rollback_swap(&execution.swap_record_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AlreadyRolledBack(_)));
    }

    #[tokio::test]
    async fn test_zero_rollback_window_disables_rollback() {
        let fx = week_fixture();
        update_config(&fx.state, |c| c.rollback_window_hours = 0);

        let execution = fx
            .state
            .swap_api
            .execute_swap(&SwapRequest::absorb("R1", "B01", "R2"))
            .await
            .unwrap();
        let err = fx
            .state
            .swap_api
            .rollback_swap(&execution.swap_record_id, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::RollbackWindowExpired { window_hours: 0, .. }));
        assert!(holding(&fx.conn, "R2", "B01").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_conflicts_after_later_change() {
        let fx = week_fixture();
        let execution = fx
            .state
            .swap_api
            .execute_swap(&SwapRequest::absorb("R1", "B01", "R2"))
            .await
            .unwrap();

        // 换班后人工改派
        let moved = holding(&fx.conn, "R2", "B01").unwrap().unwrap();
        SqliteAssignmentRepository::new(fx.conn.clone())
            .reassign(&moved.assignment_id, "R3", moved.revision)
            .unwrap();

        let err = fx
            .state
            .swap_api
            .rollback_swap(&execution.swap_record_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SwapConflict(_)));

        assert!(holding(&fx.conn, "R3", "B01").unwrap().is_some());
        let record = fx.state.swap_api.get_swap(&execution.swap_record_id).unwrap();
        assert_eq!(record.status, SwapStatus::Executed);
    }

    // ==========================================
    // 原子性与锁
    // ==========================================

    #[tokio::test]
    async fn test_failed_commit_leaves_no_partial_change() {
        let fx = week_fixture();
        {
            let conn = fx.conn.lock().unwrap();
            conn.execute_batch(
                r#"CREATE TRIGGER fail_swap_insert BEFORE INSERT ON swap_record
                   BEGIN SELECT RAISE(ABORT, 'injected failure'); END;"#,
            )
            .unwrap();
        }

        let request = SwapRequest::one_to_one("R1", "B01", "R2", "B02");
        let err = fx.state.swap_api.execute_swap(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::PersistenceFailure(_)));

        let b01 = holding(&fx.conn, "R1", "B01").unwrap().unwrap();
        let b02 = holding(&fx.conn, "R2", "B02").unwrap().unwrap();
        assert_eq!(b01.revision, 1);
        assert_eq!(b02.revision, 1);
        assert!(fx.state.swap_api.list_swaps_for_person("R1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_timeout_is_retryable_with_idempotency_key() {
        let fx = week_fixture();
        update_config(&fx.state, |c| c.lock_timeout_ms = 200);

        let blocker = SqliteLockProvider::new(fx.conn.clone());
        let acquired = blocker
            .try_acquire(
                "blocker",
                &[LockScope::pair("R1", "B01", day(0))],
                chrono::Duration::seconds(60),
            )
            .unwrap();
        assert!(acquired);

        let request = SwapRequest::absorb("R1", "B01", "R2").with_idempotency_key("req-lock");
        let err = fx.state.swap_api.execute_swap(&request).await.unwrap_err();
        assert!(matches!(err, ApiError::LockAcquisitionTimeout { .. }));
        assert!(err.is_retryable());

        blocker.release("blocker").unwrap();
        let execution = fx.state.swap_api.execute_swap(&request).await.unwrap();
        assert_eq!(execution.status, SwapStatus::Executed);
        assert!(!execution.replayed);
    }

    // ==========================================
    // 查询
    // ==========================================

    #[tokio::test]
    async fn test_swap_queries() {
        let fx = week_fixture();
        let execution = fx
            .state
            .swap_api
            .execute_swap(&SwapRequest::absorb("R1", "B01", "R2").with_reason("会议"))
            .await
            .unwrap();

        let record = fx.state.swap_api.get_swap(&execution.swap_record_id).unwrap();
        assert_eq!(record.reason.as_deref(), Some("会议"));
        assert_eq!(record.requested_by, "R1");

        assert_eq!(fx.state.swap_api.list_swaps_for_person("R2").unwrap().len(), 1);
        assert!(fx.state.swap_api.list_swaps_for_person("R3").unwrap().is_empty());

        let err = fx.state.swap_api.get_swap("missing").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}

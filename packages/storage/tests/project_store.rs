// ABOUTME: Integration tests for ProjectStore against an in-memory SQLite database
// ABOUTME: Covers uniqueness, quotas, soft delete, cost accounting and the recovery sweep

use codebox_core::{ProjectStatus, TaskRecord};
use codebox_storage::{connect_in_memory, ProjectStore, StorageError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tempfile::TempDir;

async fn create_test_store(max_projects: usize) -> (ProjectStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let pool = connect_in_memory().await.unwrap();
    let store = ProjectStore::new(pool, temp_dir.path().join("workspace"), max_projects);
    (store, temp_dir)
}

fn record(prompt: &str, cost: f64, success: bool) -> TaskRecord {
    TaskRecord {
        prompt: prompt.to_string(),
        result_text: format!("done: {}", prompt),
        success,
        duration_ms: 1500,
        num_turns: 3,
        cost_usd: cost,
        exit_code: Some(if success { 0 } else { 1 }),
    }
}

#[tokio::test]
async fn test_create_project_creates_row_and_directory() {
    let (store, _dir) = create_test_store(10).await;

    let project = store.create_project("demo-app", "user-1").await.unwrap();

    assert!(project.id.starts_with("prj_"));
    assert_eq!(project.name, "demo-app");
    assert_eq!(project.status, ProjectStatus::Active);
    assert_eq!(project.user_id, "user-1");
    assert_eq!(project.total_cost_usd, 0.0);
    assert!(project.last_task_prompt.is_none());
    assert!(store.workspace_root().join("demo-app").is_dir());
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let (store, _dir) = create_test_store(10).await;

    store.create_project("demo", "user-1").await.unwrap();
    let err = store.create_project("demo", "user-2").await.unwrap_err();

    assert!(matches!(err, StorageError::AlreadyExists(name) if name == "demo"));
}

#[tokio::test]
async fn test_invalid_name_is_rejected_before_touching_storage() {
    let (store, _dir) = create_test_store(10).await;

    let err = store.create_project("../escape", "user-1").await.unwrap_err();

    assert!(matches!(err, StorageError::Validation(_)));
    assert!(store.list_projects(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_project_quota_is_per_user_and_ignores_deleted() {
    let (store, _dir) = create_test_store(2).await;

    store.create_project("one", "alice").await.unwrap();
    store.create_project("two", "alice").await.unwrap();

    let err = store.create_project("three", "alice").await.unwrap_err();
    assert!(matches!(err, StorageError::QuotaExceeded { limit: 2, .. }));

    // Other users have their own quota
    store.create_project("bobs", "bob").await.unwrap();

    // Deleting frees a slot
    store.soft_delete("one").await.unwrap();
    store.create_project("three", "alice").await.unwrap();
}

#[tokio::test]
async fn test_soft_delete_hides_project_but_keeps_history() {
    let (store, _dir) = create_test_store(10).await;

    let project = store.create_project("demo", "user-1").await.unwrap();
    store
        .record_task_result(&project.id, &record("first", 0.02, true), Some(ProjectStatus::Completed))
        .await
        .unwrap();

    store.soft_delete("demo").await.unwrap();

    assert!(store.get_project("demo").await.unwrap().is_none());
    assert!(store.list_projects(None).await.unwrap().is_empty());

    let tasks = store.list_tasks(&project.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].prompt, "first");

    let by_id = store.get_project_by_id(&project.id).await.unwrap().unwrap();
    assert!(by_id.is_deleted());
}

#[tokio::test]
async fn test_deleted_name_can_be_reused() {
    let (store, _dir) = create_test_store(10).await;

    let first = store.create_project("demo", "user-1").await.unwrap();
    store.soft_delete("demo").await.unwrap();
    let second = store.create_project("demo", "user-1").await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(store.get_project("demo").await.unwrap().unwrap().id, second.id);
}

#[tokio::test]
async fn test_soft_delete_unknown_project() {
    let (store, _dir) = create_test_store(10).await;
    let err = store.soft_delete("ghost").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_costs_accumulate_exactly() {
    let (store, _dir) = create_test_store(10).await;
    let project = store.create_project("demo", "user-1").await.unwrap();

    store
        .record_task_result(&project.id, &record("a", 0.12, true), Some(ProjectStatus::Completed))
        .await
        .unwrap();
    store
        .record_task_result(&project.id, &record("b", 0.05, false), Some(ProjectStatus::Error))
        .await
        .unwrap();

    let project = store.get_project("demo").await.unwrap().unwrap();
    assert!((project.total_cost_usd - 0.17).abs() < 1e-9);
    assert_eq!(project.status, ProjectStatus::Error);
    assert_eq!(project.last_task_prompt.as_deref(), Some("b"));
    assert_eq!(project.last_task_cost_usd, Some(0.05));
    assert_eq!(project.last_task_turns, Some(3));
    assert_eq!(store.count_tasks(&project.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_task_history_is_append_only_in_call_order() {
    let (store, _dir) = create_test_store(10).await;
    let project = store.create_project("demo", "user-1").await.unwrap();

    for prompt in ["first", "second", "third"] {
        store
            .record_task_result(&project.id, &record(prompt, 0.01, true), Some(ProjectStatus::Completed))
            .await
            .unwrap();
    }

    let prompts: Vec<String> = store
        .list_tasks(&project.id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.prompt)
        .collect();
    assert_eq!(prompts, vec!["first", "second", "third"]);

    // Rows cannot be rewritten
    let result = sqlx::query("UPDATE tasks SET prompt = 'tampered'")
        .execute(store.pool())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_recording_after_delete_keeps_project_deleted() {
    let (store, _dir) = create_test_store(10).await;
    let project = store.create_project("demo", "user-1").await.unwrap();

    store.soft_delete("demo").await.unwrap();
    store
        .record_task_result(&project.id, &record("late", 0.01, true), Some(ProjectStatus::Completed))
        .await
        .unwrap();

    let project = store.get_project_by_id(&project.id).await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Deleted);
    assert_eq!(store.count_tasks(&project.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_recording_without_status_leaves_status_alone() {
    let (store, _dir) = create_test_store(10).await;
    let project = store.create_project("demo", "user-1").await.unwrap();
    store
        .update_status("demo", ProjectStatus::Running)
        .await
        .unwrap();

    store
        .record_task_result(&project.id, &record("stale", 0.03, false), None)
        .await
        .unwrap();

    let project = store.get_project("demo").await.unwrap().unwrap();
    assert_eq!(project.status, ProjectStatus::Running);
    assert_eq!(project.last_task_prompt.as_deref(), Some("stale"));
    assert!((project.total_cost_usd - 0.03).abs() < 1e-9);
}

#[tokio::test]
async fn test_record_for_unknown_project_fails() {
    let (store, _dir) = create_test_store(10).await;
    let err = store
        .record_task_result("prj_missing", &record("x", 0.0, true), Some(ProjectStatus::Completed))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_negative_cost_never_decreases_total() {
    let (store, _dir) = create_test_store(10).await;
    let project = store.create_project("demo", "user-1").await.unwrap();

    store
        .record_task_result(&project.id, &record("a", 0.10, true), Some(ProjectStatus::Completed))
        .await
        .unwrap();
    store
        .record_task_result(&project.id, &record("b", -5.0, true), Some(ProjectStatus::Completed))
        .await
        .unwrap();

    let project = store.get_project("demo").await.unwrap().unwrap();
    assert!((project.total_cost_usd - 0.10).abs() < 1e-9);
}

#[tokio::test]
async fn test_update_status() {
    let (store, _dir) = create_test_store(10).await;
    store.create_project("demo", "user-1").await.unwrap();

    store
        .update_status("demo", ProjectStatus::Running)
        .await
        .unwrap();
    assert_eq!(
        store.get_project("demo").await.unwrap().unwrap().status,
        ProjectStatus::Running
    );

    let err = store
        .update_status("demo", ProjectStatus::Deleted)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidStatus(_)));

    let err = store
        .update_status("ghost", ProjectStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

#[tokio::test]
async fn test_reset_stuck_projects_is_idempotent() {
    let (store, _dir) = create_test_store(10).await;
    store.create_project("stuck-a", "user-1").await.unwrap();
    store.create_project("stuck-b", "user-1").await.unwrap();
    store.create_project("idle", "user-1").await.unwrap();

    // Simulated crash: persisted as running with no live process
    store
        .update_status("stuck-a", ProjectStatus::Running)
        .await
        .unwrap();
    store
        .update_status("stuck-b", ProjectStatus::Running)
        .await
        .unwrap();

    assert_eq!(store.reset_stuck_projects().await.unwrap(), 2);
    assert_eq!(
        store.get_project("stuck-a").await.unwrap().unwrap().status,
        ProjectStatus::Error
    );
    assert_eq!(
        store.get_project("idle").await.unwrap().unwrap().status,
        ProjectStatus::Active
    );

    assert_eq!(store.reset_stuck_projects().await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_projects_filters_by_user_and_orders_by_recency() {
    let (store, _dir) = create_test_store(10).await;
    store.create_project("older", "alice").await.unwrap();
    store.create_project("newer", "alice").await.unwrap();
    store.create_project("other", "bob").await.unwrap();

    // Touching a project moves it to the front
    store
        .update_status("older", ProjectStatus::Completed)
        .await
        .unwrap();

    let names: Vec<String> = store
        .list_projects(Some("alice"))
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["older", "newer"]);

    assert_eq!(store.list_projects(None).await.unwrap().len(), 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_valid_names_create_exactly_once(name in "[a-z0-9][a-z0-9-]{0,30}[a-z0-9]") {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (store, _dir) = create_test_store(10).await;

            let created = store.create_project(&name, "user-1").await;
            prop_assert!(created.is_ok(), "first create failed: {:?}", created.err());

            let duplicate = store.create_project(&name, "user-1").await;
            prop_assert!(matches!(duplicate, Err(StorageError::AlreadyExists(_))));
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_project_dir_follows_translator_local_root() {
    let temp_dir = TempDir::new().unwrap();
    let local = temp_dir.path().join("local");
    let translator = codebox_core::PathTranslator::new(&local, "/host/workspace");
    let store = ProjectStore::with_translator(connect_in_memory().await.unwrap(), translator, 10);

    store.create_project("demo", "user-1").await.unwrap();

    assert_eq!(store.project_dir("demo"), local.join("demo"));
    assert!(local.join("demo").is_dir());
    assert_eq!(
        store.translator().to_mount_path(&store.project_dir("demo")),
        std::path::PathBuf::from("/host/workspace/demo")
    );
}

//! Task Module Tests
//!
//! ## Test Scopes
//! - **Aggregation**: all-success, partial-failure and all-fail outcomes.
//! - **Concurrency**: concurrent reports finish a task exactly once.
//! - **Admission**: duplicate ids and the running-task limit.
//! - **Deadlines**: expiry, force-close, departed nodes.
//! - **Persistence**: in-memory store and the guarded `TaskUpdater`.

#[cfg(test)]
mod tests {
    use crate::cluster::types::NodeId;
    use crate::registry::types::{ModelId, ModelState};
    use crate::task::cache::{CacheError, NodeReport, TaskStateCache};
    use crate::task::store::{MemoryTaskStore, TaskStore, TaskUpdater};
    use crate::task::types::{Task, TaskId, TaskState, TaskType, TaskUpdate};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(600);

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|id| NodeId::from(*id)).collect()
    }

    fn tracked(cache: &TaskStateCache, ids: &[&str]) -> TaskId {
        let task_id = TaskId::new();
        cache
            .add(
                task_id.clone(),
                TaskType::LoadModel,
                ModelId::from("m"),
                &nodes(ids),
                &[],
                None,
                TIMEOUT,
            )
            .unwrap();
        task_id
    }

    // ============================================================
    // AGGREGATION
    // ============================================================

    #[test]
    fn test_all_nodes_succeed() {
        let cache = TaskStateCache::new();
        let task_id = tracked(&cache, &["a", "b", "c"]);

        assert_eq!(
            cache.record_node_done(&task_id, &NodeId::from("a"), None),
            NodeReport::Pending { remaining: 2 }
        );
        cache.record_node_done(&task_id, &NodeId::from("b"), None);
        let NodeReport::Finished(outcome) = cache.record_node_done(&task_id, &NodeId::from("c"), None)
        else {
            panic!("Task should finish on last report");
        };

        assert_eq!(outcome.state, TaskState::Completed);
        assert_eq!(outcome.model_state, ModelState::Loaded);
        assert_eq!(outcome.succeeded, nodes(&["a", "b", "c"]));
        assert_eq!(outcome.error_summary(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_partial_failure() {
        // ARRANGE
        let cache = TaskStateCache::new();
        let task_id = tracked(&cache, &["a", "b", "c"]);

        // ACT
        cache.record_node_done(&task_id, &NodeId::from("a"), None);
        cache.record_node_done(&task_id, &NodeId::from("b"), Some("out of memory".to_string()));
        let report = cache.record_node_done(&task_id, &NodeId::from("c"), None);

        // ASSERT
        let NodeReport::Finished(outcome) = report else {
            panic!("Expected finished task, got {:?}", report);
        };
        assert_eq!(outcome.state, TaskState::CompletedWithError);
        assert_eq!(outcome.model_state, ModelState::PartiallyLoaded);
        assert_eq!(outcome.succeeded, nodes(&["a", "c"]));
        assert_eq!(
            outcome.errors,
            BTreeMap::from([(NodeId::from("b"), "out of memory".to_string())])
        );
        assert_eq!(
            outcome.error_summary().as_deref(),
            Some(r#"{"b":"out of memory"}"#)
        );
    }

    #[test]
    fn test_all_nodes_fail() {
        let cache = TaskStateCache::new();
        let task_id = tracked(&cache, &["a", "b", "c"]);

        cache.record_node_done(&task_id, &NodeId::from("a"), Some("e1".to_string()));
        cache.record_node_done(&task_id, &NodeId::from("b"), Some("e2".to_string()));
        let report = cache.record_node_done(&task_id, &NodeId::from("c"), Some("e3".to_string()));

        let NodeReport::Finished(outcome) = report else {
            panic!("Expected finished task, got {:?}", report);
        };
        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(outcome.model_state, ModelState::LoadFailed);
        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.errors.len(), 3);
    }

    #[test]
    fn test_duplicate_and_late_reports_are_ignored() {
        let cache = TaskStateCache::new();
        let task_id = tracked(&cache, &["a", "b"]);

        cache.record_node_done(&task_id, &NodeId::from("a"), None);
        assert_eq!(
            cache.record_node_done(&task_id, &NodeId::from("a"), None),
            NodeReport::NotExpected
        );
        assert_eq!(
            cache.record_node_done(&task_id, &NodeId::from("stranger"), None),
            NodeReport::NotExpected
        );
        assert!(matches!(
            cache.record_node_done(&task_id, &NodeId::from("b"), None),
            NodeReport::Finished(_)
        ));

        // Evicted: the retransmission is a no-op.
        assert_eq!(
            cache.record_node_done(&task_id, &NodeId::from("b"), None),
            NodeReport::UnknownTask
        );
        assert_eq!(
            cache.record_node_done(&TaskId::new(), &NodeId::from("a"), None),
            NodeReport::UnknownTask
        );
    }

    // ============================================================
    // CONCURRENCY
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reports_finish_exactly_once() {
        // ARRANGE: 32 nodes, each reporting twice from different tasks
        let cache = Arc::new(TaskStateCache::new());
        let ids: Vec<String> = (0..32).map(|i| format!("n{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let task_id = tracked(&cache, &refs);
        let finished = Arc::new(AtomicUsize::new(0));

        // ACT
        let mut handles = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            for _ in 0..2 {
                let cache = cache.clone();
                let task_id = task_id.clone();
                let finished = finished.clone();
                let node = NodeId(id.clone());
                let error = (i % 5 == 0).then(|| format!("failed on {}", i));
                handles.push(tokio::spawn(async move {
                    if let NodeReport::Finished(outcome) = cache.record_node_done(&task_id, &node, error) {
                        finished.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(outcome.errors.len() + outcome.succeeded.len(), 32);
                    }
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // ASSERT
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&task_id));
    }

    // ============================================================
    // ADMISSION
    // ============================================================

    #[test]
    fn test_add_rejects_duplicates_and_empty_plans() {
        let cache = TaskStateCache::new();
        let task_id = tracked(&cache, &["a"]);

        let duplicate = cache.add(
            task_id.clone(),
            TaskType::LoadModel,
            ModelId::from("m"),
            &nodes(&["a"]),
            &[],
            None,
            TIMEOUT,
        );
        assert_eq!(duplicate, Err(CacheError::Duplicate(task_id)));

        let empty_id = TaskId::new();
        let empty = cache.add(
            empty_id.clone(),
            TaskType::LoadModel,
            ModelId::from("m"),
            &[],
            &[],
            None,
            TIMEOUT,
        );
        assert_eq!(empty, Err(CacheError::NoWorkerNodes(empty_id)));
    }

    #[test]
    fn test_running_task_limit() {
        let cache = TaskStateCache::new();
        let add = |task_type| {
            cache.add(
                TaskId::new(),
                task_type,
                ModelId::from("m"),
                &nodes(&["a"]),
                &[],
                Some(2),
                TIMEOUT,
            )
        };

        assert!(add(TaskType::LoadModel).is_ok());
        assert!(add(TaskType::LoadModel).is_ok());
        assert_eq!(
            add(TaskType::LoadModel),
            Err(CacheError::LimitExceeded {
                task_type: TaskType::LoadModel,
                limit: 2
            })
        );
        assert_eq!(cache.running_count(TaskType::LoadModel), 2);
    }

    // ============================================================
    // DEADLINES
    // ============================================================

    #[test]
    fn test_expired_and_force_close() {
        // ARRANGE
        let cache = TaskStateCache::new();
        let task_id = TaskId::new();
        cache
            .add(
                task_id.clone(),
                TaskType::LoadModel,
                ModelId::from("m"),
                &nodes(&["a", "b", "c"]),
                &[],
                None,
                Duration::ZERO,
            )
            .unwrap();
        let fresh = tracked(&cache, &["a"]);
        cache.record_node_done(&task_id, &NodeId::from("a"), None);

        // ACT
        let expired = cache.expired(Instant::now());
        let outcome = cache.force_close(&task_id, "timed out").unwrap();

        // ASSERT
        assert_eq!(expired, vec![task_id.clone()]);
        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(outcome.model_state, ModelState::LoadFailed);
        assert_eq!(outcome.succeeded, nodes(&["a"]));
        assert_eq!(outcome.errors.get(&NodeId::from("b")).map(String::as_str), Some("timed out"));
        assert!(cache.force_close(&task_id, "again").is_none());
        assert!(cache.contains(&fresh));
    }

    #[test]
    fn test_fail_node_finishes_waiting_tasks() {
        let cache = TaskStateCache::new();
        let first = tracked(&cache, &["a", "b"]);
        let second = tracked(&cache, &["b", "c"]);
        cache.record_node_done(&first, &NodeId::from("a"), None);

        let finished = cache.fail_node(&NodeId::from("b"), "node left the cluster");

        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].task_id, first);
        assert_eq!(finished[0].state, TaskState::CompletedWithError);
        assert!(cache.contains(&second));
        let NodeReport::Finished(outcome) = cache.record_node_done(&second, &NodeId::from("c"), None)
        else {
            panic!("Second task should finish once c reports");
        };
        assert_eq!(outcome.succeeded, nodes(&["c"]));
        assert_eq!(
            outcome.errors.get(&NodeId::from("b")).map(String::as_str),
            Some("node left the cluster")
        );
    }

    #[test]
    fn test_force_close_keeps_prior_deployment_partially_loaded() {
        // ARRANGE: a already served the model, c is new and silent
        let cache = TaskStateCache::new();
        let task_id = TaskId::new();
        cache
            .add(
                task_id.clone(),
                TaskType::LoadModel,
                ModelId::from("m"),
                &nodes(&["a", "c"]),
                &nodes(&["a"]),
                None,
                Duration::ZERO,
            )
            .unwrap();
        cache.record_node_done(&task_id, &NodeId::from("a"), None);

        // ACT
        let outcome = cache.force_close(&task_id, "timed out").unwrap();

        // ASSERT
        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(outcome.model_state, ModelState::PartiallyLoaded);
        assert_eq!(outcome.prior_workers, nodes(&["a"]));
        assert_eq!(outcome.succeeded, nodes(&["a"]));
    }

    // ============================================================
    // PERSISTENCE
    // ============================================================

    #[tokio::test]
    async fn test_memory_store_assigns_ids_and_applies_updates() {
        let store = MemoryTaskStore::new();
        let task = Task::new(TaskType::LoadModel, ModelId::from("m"), nodes(&["a"]));

        let task_id = store.create_task(&task).await.unwrap();
        store
            .update_task(&task_id, TaskUpdate::terminal(TaskState::Failed, Some("{}".into())))
            .await
            .unwrap();

        let stored = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(stored.task_id, Some(task_id));
        assert_eq!(stored.state, TaskState::Failed);
        assert_eq!(stored.error.as_deref(), Some("{}"));
        assert!(store.update_task(&TaskId::new(), TaskUpdate::default()).await.is_err());
    }

    /// Store that fails the first `failures` updates.
    struct FlakyStore {
        inner: MemoryTaskStore,
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn create_task(&self, task: &Task) -> Result<TaskId> {
            self.inner.create_task(task).await
        }

        async fn update_task(&self, task_id: &TaskId, update: TaskUpdate) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(anyhow::anyhow!("index unavailable"));
            }
            self.inner.update_task(task_id, update).await
        }

        async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
            self.inner.get_task(task_id).await
        }
    }

    #[tokio::test]
    async fn test_updater_retries_store_errors() {
        let store = Arc::new(FlakyStore {
            inner: MemoryTaskStore::new(),
            failures: AtomicUsize::new(2),
            calls: AtomicUsize::new(0),
        });
        let task_id = store
            .create_task(&Task::new(TaskType::LoadModel, ModelId::from("m"), vec![]))
            .await
            .unwrap();
        let updater = TaskUpdater::new(store.clone(), Duration::from_millis(100), 3);

        updater
            .update(&task_id, TaskUpdate::state(TaskState::Completed), false)
            .await
            .unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        let stored = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_updater_gives_up_after_attempts() {
        let store = Arc::new(FlakyStore {
            inner: MemoryTaskStore::new(),
            failures: AtomicUsize::new(10),
            calls: AtomicUsize::new(0),
        });
        let updater = TaskUpdater::new(store.clone(), Duration::from_millis(100), 2);

        let result = updater
            .update(&TaskId::new(), TaskUpdate::state(TaskState::Running), false)
            .await;

        assert!(result.is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    /// Store whose updates block until released.
    struct SlowStore {
        inner: MemoryTaskStore,
        delay: Duration,
    }

    #[async_trait]
    impl TaskStore for SlowStore {
        async fn create_task(&self, task: &Task) -> Result<TaskId> {
            self.inner.create_task(task).await
        }

        async fn update_task(&self, task_id: &TaskId, update: TaskUpdate) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.update_task(task_id, update).await
        }

        async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
            self.inner.get_task(task_id).await
        }
    }

    #[tokio::test]
    async fn test_busy_write_slot_rejects_unforced_and_admits_forced() {
        // ARRANGE: a slow write holds the slot
        let store = Arc::new(SlowStore {
            inner: MemoryTaskStore::new(),
            delay: Duration::from_millis(400),
        });
        let task_id = store
            .create_task(&Task::new(TaskType::LoadModel, ModelId::from("m"), vec![]))
            .await
            .unwrap();
        let updater = Arc::new(TaskUpdater::new(store.clone(), Duration::from_millis(50), 1));

        let holder = {
            let updater = updater.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move {
                updater
                    .update(&task_id, TaskUpdate::state(TaskState::Running), false)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // ACT
        let unforced = updater
            .update(&task_id, TaskUpdate::state(TaskState::Running), false)
            .await;
        let forced = updater
            .update(
                &task_id,
                TaskUpdate::terminal(TaskState::Failed, Some("{\"a\":\"boom\"}".into())),
                true,
            )
            .await;

        // ASSERT
        assert!(unforced.is_err());
        assert!(forced.is_ok());
        assert!(holder.await.unwrap().is_ok());
        let stored = store.get_task(&task_id).await.unwrap().unwrap();
        assert!(stored.error.is_some());
    }
}

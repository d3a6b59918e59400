//! Integration tests for the engine over in-memory tiers.

use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    ChildOperationTracker, Engine, EngineConfig, ErrorKind, Granularity, PersistError,
    RetrieveState, RetryConfig, TaskState,
};
use strata_testkit::prelude::*;

const SETTLE: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds, panicking after five seconds.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let reached = tokio::time::timeout(SETTLE, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

fn push_count(env: &TestEngine) -> usize {
    env.remote
        .calls()
        .iter()
        .filter(|(op, _)| *op == RemoteOp::Push)
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_participant_completes_exactly_once() {
    for media in [0usize, 1, 5, 100] {
        let env = TestEngine::memory();
        let moment = scenarios::moment_with_media(&env, "moment-1", media);

        env.save(&moment, draft_both(), None).await.unwrap();
        env.settle(SETTLE).await;

        let stats = env.stats();
        assert_eq!(stats.saves.dispatched, media as u64 + 1);
        assert_eq!(stats.saves.succeeded, media as u64 + 1);
        assert_eq!(stats.saves.completed(), media as u64 + 1);
        assert_eq!(env.remote.len(), media + 1);
        assert_eq!(moment.outstanding_operations(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn child_failure_surfaces_on_parent() {
    let env = TestEngine::memory();
    let moment = scenarios::moment_with_media(&env, "moment-1", 3);
    env.remote.fail_always(&key("moment-1-media-1"), Fault::Rejected);

    let err = env.save(&moment, draft_both(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteFailure);
    assert!(err.to_string().contains("moment-1-media-1"));

    env.settle(SETTLE).await;
    let stats = env.stats();
    assert_eq!(stats.saves.succeeded, 2);
    assert_eq!(stats.saves.failed, 2);
    assert_eq!(stats.last_error, Some(ErrorKind::RemoteFailure));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retries_exhausted_on_one_child() {
    let env = TestEngine::memory();
    let moment = scenarios::moment_with_media(&env, "moment-1", 3);
    let flaky = key("moment-1-media-1");
    env.remote.fail_always(&flaky, Fault::Transient);

    let err = env.save(&moment, draft_both(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteFailure);
    assert!(err.is_retryable());

    env.settle(SETTLE).await;
    let stats = env.stats();
    // Three children plus the parent.
    assert_eq!(stats.saves.completed(), 4);
    assert_eq!(stats.saves.failed, 2);
    assert_eq!(env.remote.call_count(RemoteOp::Push, &flaky), 3);
    assert_eq!(stats.retries, 2);
    assert!(!env.remote.contains(&key("moment-1")));
    assert!(env.remote.contains(&key("moment-1-media-0")));
    assert!(env.remote.contains(&key("moment-1-media-2")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn whole_save_pushes_parents_after_children() {
    let env = TestEngine::memory();
    let story = scenarios::story_tree(&env, "story-1", 2, 2);

    env.save(&story, draft_both(), None).await.unwrap();

    let pushes: Vec<_> = env
        .remote
        .calls()
        .into_iter()
        .filter(|(op, _)| *op == RemoteOp::Push)
        .map(|(_, key)| key)
        .collect();
    assert_eq!(pushes.len(), scenarios::tree_size(&story));

    let position = |k: &strata_core::EntityKey| pushes.iter().position(|p| p == k).unwrap();
    assert_eq!(position(story.key()), pushes.len() - 1);
    for moment in story.children() {
        for media in moment.children() {
            assert!(position(media.key()) < position(moment.key()));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recursive_save_writes_parent_despite_child_failure() {
    let env = TestEngine::memory();
    let moment = scenarios::moment_with_media(&env, "moment-1", 3);
    env.remote.fail_always(&key("moment-1-media-1"), Fault::Rejected);

    let options = draft_both().with_granularity(Granularity::Recursive);
    let err = env.save(&moment, options, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteFailure);
    assert!(env.remote.contains(&key("moment-1")));
    assert!(!env.remote.contains(&key("moment-1-media-1")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_before_start_skips_work() {
    let env = TestEngine::memory();
    env.remote.hold();
    let media = env.new_entity(EntityKind::Media, key("media-1"));

    let first = env.save(&media, draft_both(), None);
    wait_until("first save running", || {
        first.task().state() == TaskState::Executing
    })
    .await;
    let second = env.save(&media, draft_both(), None);
    second.cancel();
    second.cancel();
    assert!(second.await.unwrap_err().is_cancelled());

    env.remote.release();
    first.await.unwrap();
    env.settle(SETTLE).await;

    assert_eq!(env.remote.call_count(RemoteOp::Push, media.key()), 1);
    let stats = env.stats();
    assert_eq!(stats.saves.succeeded, 1);
    assert_eq!(stats.saves.cancelled, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_reaches_running_children() {
    let env = TestEngine::memory();
    env.remote.hold();
    let moment = scenarios::moment_with_media(&env, "moment-1", 3);

    let handle = env.save(&moment, draft_both(), None);
    wait_until("three pushes in flight", || push_count(&env) == 3).await;
    assert_eq!(handle.task().child_count(), 3);

    handle.cancel();
    assert!(handle.await.unwrap_err().is_cancelled());
    env.settle(SETTLE).await;
    env.remote.release();

    let stats = env.stats();
    assert_eq!(stats.saves.cancelled, 4);
    assert_eq!(stats.saves.failed, 0);
    assert!(env.remote.is_empty());
    assert!(moment.is_dirty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ready_retrieve_is_never_cancelled() {
    let env = TestEngine::memory();
    let story = scenarios::story_tree(&env, "story-1", 2, 2);
    scenarios::seed_remote(&env.remote, &story);

    let restored = env.placeholder(EntityKind::Story, key("story-1"));
    let mut handle = env.retrieve(&restored, cache_both(), None);
    assert_eq!(handle.ready().await, Readiness::Ready);
    assert!(handle.task().is_committed());

    handle.cancel();
    handle.await.unwrap();
    assert_eq!(scenarios::tree_size(&restored), scenarios::tree_size(&story));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_retrieve_is_never_ready() {
    let env = TestEngine::memory();
    let moment = scenarios::moment_with_media(&env, "moment-1", 2);
    scenarios::seed_remote(&env.remote, &moment);
    env.remote.hold();

    let restored = env.placeholder(EntityKind::Moment, key("moment-1"));
    let mut handle = env.retrieve(&restored, cache_both(), None);
    wait_until("root fetch in flight", || {
        env.remote.call_count(RemoteOp::Fetch, &key("moment-1")) == 1
    })
    .await;

    handle.cancel();
    assert_eq!(handle.ready().await, Readiness::Abandoned);
    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(restored.retrieve_state(), RetrieveState::NotAvailable);
    env.remote.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn whole_retrieve_completes_without_ready() {
    let env = TestEngine::memory();
    let moment = scenarios::moment_with_media(&env, "moment-1", 2);
    scenarios::seed_remote(&env.remote, &moment);

    let restored = env.placeholder(EntityKind::Moment, key("moment-1"));
    let options = cache_both().with_granularity(Granularity::Whole);
    let (ready, done) = env.retrieve(&restored, options, None).split();
    done.await.unwrap();
    assert_eq!(ready.await, Readiness::Abandoned);

    assert_eq!(restored.children().len(), 2);
    assert!(restored.children().iter().all(|child| child.is_retrieved()));
    // Remote records are cached locally.
    assert_eq!(env.local_count(LocalType::Cache), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_retrieve_uses_local_cache() {
    let env = TestEngine::memory();
    let moment = scenarios::moment_with_media(&env, "moment-1", 1);
    scenarios::seed_remote(&env.remote, &moment);

    let first = env.placeholder(EntityKind::Moment, key("moment-1"));
    env.retrieve(&first, cache_both(), None).await.unwrap();
    let fetches = env.remote.calls().len();

    let second = env.placeholder(EntityKind::Moment, key("moment-1"));
    env.retrieve(&second, cache_both(), None).await.unwrap();
    assert_eq!(env.remote.calls().len(), fetches);
    assert_eq!(second.payload(), first.payload());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forced_retrieve_bypasses_local_tier() {
    let env = TestEngine::memory();
    let media = env.new_entity(EntityKind::Media, key("media-1"));
    media.set_payload(Some(b"v1".to_vec()));
    env.save(&media, draft_both(), None).await.unwrap();

    let mut newer = env.remote.get(media.key()).unwrap();
    newer.payload = Some(b"v2".to_vec());
    env.remote.insert(newer);

    let options = RetrieveOptions::new(StorageLocation::Both, LocalType::Draft);
    env.retrieve(&media, options, None).await.unwrap();
    assert_eq!(media.payload(), Some(b"v1".to_vec()));

    env.retrieve(&media, options.forced(), None).await.unwrap();
    assert_eq!(media.payload(), Some(b"v2".to_vec()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_tolerates_child_failure() {
    let env = TestEngine::memory();
    let moment = scenarios::moment_with_media(&env, "moment-1", 2);
    env.save(&moment, draft_both(), None).await.unwrap();
    env.remote.fail_always(&key("moment-1-media-0"), Fault::Rejected);

    env.delete(&moment, draft_both(), None).await.unwrap();

    assert!(!env.remote.contains(&key("moment-1")));
    assert!(!env.remote.contains(&key("moment-1-media-1")));
    assert!(env.remote.contains(&key("moment-1-media-0")));
    assert!(!env.has_local(LocalType::Draft, "moment-1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_of_unknown_entity_succeeds() {
    let env = TestEngine::memory();
    let ghost = env.placeholder(EntityKind::Venue, key("venue-1"));
    env.delete(&ghost, draft_both(), None).await.unwrap();
    assert_eq!(env.remote.call_count(RemoteOp::Remove, ghost.key()), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn operations_join_a_caller_task() {
    let env = TestEngine::memory();
    let first = scenarios::moment_with_media(&env, "moment-1", 1);
    let second = scenarios::moment_with_media(&env, "moment-2", 1);
    env.remote.hold();

    // A caller-owned task groups two independent saves.
    let (group, group_done) = strata_core::CancellableTask::new("group");
    let a = env.save(&first, draft_both(), Some(&group));
    let b = env.save(&second, draft_both(), Some(&group));
    assert_eq!(group.child_count(), 2);

    group.cancel();
    assert!(group_done.await.unwrap_err().is_cancelled());
    assert!(a.await.unwrap_err().is_cancelled());
    assert!(b.await.unwrap_err().is_cancelled());
    env.remote.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnected_remote_fails_after_retries() {
    let env = TestEngine::memory_with_config(
        EngineConfig::new().with_retry(RetryConfig::fixed(2, Duration::from_millis(1))),
    );
    env.remote.set_connected(false);
    let media = env.new_entity(EntityKind::Media, key("media-1"));

    let err = env.save(&media, draft_both(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteFailure);
    assert_eq!(env.remote.call_count(RemoteOp::Push, media.key()), 2);
    // The local write happens before the push.
    assert!(env.has_local(LocalType::Draft, "media-1"));
}

#[tokio::test]
async fn tracker_rejects_re_arm() {
    let tracker = ChildOperationTracker::new();
    let fan_in = tracker.arm(1).unwrap();
    assert!(matches!(
        tracker.arm(1),
        Err(PersistError::InconsistentState(_))
    ));
    tracker.child_completed(Ok(())).unwrap();
    fan_in.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_operations_on_distinct_trees() {
    let env = TestEngine::memory();
    let result = stress_concurrent_saves(
        &env,
        &StressConfig {
            trees: 30,
            media_per_tree: 2,
            cancel_every: 3,
            remote_latency: Duration::from_millis(2),
        },
    )
    .await;

    assert_eq!(result.total_ops, 30);
    assert_eq!(result.failed_ops, 0);
    assert_eq!(result.successful_ops + result.cancelled_ops, 30);
    assert!(result.cancelled_ops >= 1);
    env.settle(SETTLE).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_operations_cancel_together() {
    let env = TestEngine::memory();
    env.remote.hold();
    let result = stress_queue_then_cancel(&env, 5).await;
    env.remote.release();

    assert_eq!(result.total_ops, 5);
    assert_eq!(result.cancelled_ops, 5);
    env.settle(SETTLE).await;
    assert!(env.remote.is_empty());
}

#[test]
fn engine_outside_runtime_is_rejected() {
    let err = Engine::new(
        EngineConfig::default(),
        Arc::new(strata_storage::InMemoryLocalStore::new()),
        Arc::new(strata_core::MemoryRemoteStore::new()),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InconsistentState);
}

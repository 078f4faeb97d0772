mod support;

use std::time::Duration;

use restatic::application::build::StaticCatalog;
use restatic::application::queue::QueuePolicy;
use restatic::domain::log::LogStatus;
use restatic::domain::task::{TargetCategory, TaskKind};
use support::{Harness, html, target, url};

fn single(id: &str, category: &str, path: &str) -> TaskKind {
    let target = target(id, category, path);
    TaskKind::single(target.id, target.category, target.url)
}

#[tokio::test]
async fn batch_runs_lowest_priority_first() {
    let harness = Harness::new(StaticCatalog::default());
    for path in ["/a/", "/b/", "/c/"] {
        harness.source.page(path, &html(path));
    }

    harness
        .queue
        .enqueue(single("a", "page", "/a/"), Some(30))
        .await
        .expect("enqueue a");
    harness
        .queue
        .enqueue(single("b", "page", "/b/"), Some(1))
        .await
        .expect("enqueue b");
    harness
        .queue
        .enqueue(single("c", "page", "/c/"), Some(10))
        .await
        .expect("enqueue c");

    let report = harness.queue.run_batch().await.expect("batch runs");

    assert!(report.ran);
    assert_eq!(report.processed, vec!["single:b", "single:c", "single:a"]);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(harness.source.fetched_paths(), vec!["/b/", "/c/", "/a/"]);
}

#[tokio::test]
async fn enqueue_deduplicates_by_target() {
    let harness = Harness::new(StaticCatalog::default());

    let first = harness
        .queue
        .enqueue(single("7", "product", "/shop/old/"), None)
        .await
        .expect("first enqueue");
    let second = harness
        .queue
        .enqueue(single("7", "product", "/shop/new/"), Some(4))
        .await
        .expect("second enqueue");

    let tasks = harness.queue.tasks().await.expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(first.priority, 1);
    assert_eq!(tasks[0].id, second.id);
    assert_eq!(tasks[0].priority, 4);
    assert_eq!(
        tasks[0].url().map(|url| url.path()),
        Some("/shop/new/")
    );
}

#[tokio::test]
async fn batch_size_limits_each_run() {
    let policy = QueuePolicy {
        max_batch_size: 2,
        ..QueuePolicy::default()
    };
    let harness = Harness::with_policy(StaticCatalog::default(), policy);
    for id in ["1", "2", "3"] {
        let path = format!("/p/{id}/");
        harness.source.page(&path, &html(id));
        harness
            .queue
            .enqueue(single(id, "post", &path), None)
            .await
            .expect("enqueue");
    }

    let first = harness.queue.run_batch().await.expect("first batch");
    assert_eq!(first.processed.len(), 2);
    assert_eq!(first.remaining, 1);
    assert!(first.next_due.is_some());

    let second = harness.queue.run_batch().await.expect("second batch");
    assert_eq!(second.processed.len(), 1);
    assert_eq!(second.remaining, 0);
    assert_eq!(second.next_due, None);
}

#[tokio::test]
async fn failures_back_off_then_drop_the_task() {
    let harness = Harness::new(StaticCatalog::default());
    harness.source.respond("/broken/", 500, "oops");
    harness
        .queue
        .enqueue(single("9", "page", "/broken/"), None)
        .await
        .expect("enqueue");

    for (attempt, backoff) in [(1u32, 30u64), (2, 120), (3, 300)] {
        let report = harness.queue.run_batch().await.expect("batch");
        assert_eq!(report.retried, 1, "attempt {attempt} is retried");

        let task = harness
            .queue
            .tasks()
            .await
            .expect("tasks")
            .pop()
            .expect("task kept for retry");
        assert_eq!(task.attempts, attempt);
        assert!(
            task.last_error
                .as_deref()
                .is_some_and(|error| error.contains("500"))
        );

        // Not eligible before the backoff elapses.
        harness
            .clock
            .advance(Duration::from_secs(backoff - 1));
        let idle = harness.queue.run_batch().await.expect("idle batch");
        assert!(idle.processed.is_empty());

        harness.clock.advance(Duration::from_secs(1));
    }

    let last = harness.queue.run_batch().await.expect("final batch");
    assert_eq!(last.dropped, 1);
    assert!(harness.queue.tasks().await.expect("tasks").is_empty());

    let entries = harness.log.recent(1).await.expect("log entries");
    assert_eq!(entries[0].status, LogStatus::Error);
    assert_eq!(
        entries[0].meta.get("terminal"),
        Some(&serde_json::Value::Bool(true))
    );
}

#[tokio::test]
async fn concurrent_batches_do_not_overlap() {
    let harness = Harness::new(StaticCatalog::default());
    harness.source.page("/slow/", &html("slow"));
    harness.source.slow_down(Duration::from_millis(200));
    harness
        .queue
        .enqueue(single("1", "page", "/slow/"), None)
        .await
        .expect("enqueue");

    let (first, second) = tokio::join!(harness.queue.run_batch(), harness.queue.run_batch());
    let first = first.expect("first batch");
    let second = second.expect("second batch");

    assert_eq!(
        [first.ran, second.ran].iter().filter(|ran| **ran).count(),
        1
    );
    assert_eq!(harness.source.fetched_paths(), vec!["/slow/"]);
}

#[tokio::test]
async fn expired_lease_is_taken_over() {
    let harness = Harness::new(StaticCatalog::default());
    harness.source.page("/x/", &html("x"));
    harness
        .queue
        .enqueue(single("x", "page", "/x/"), None)
        .await
        .expect("enqueue");

    let stuck = harness.queue.clone();
    harness.source.slow_down(Duration::from_millis(300));
    let running = tokio::spawn(async move { stuck.run_batch().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let blocked = harness.queue.run_batch().await.expect("blocked batch");
    assert!(!blocked.ran);

    harness
        .clock
        .advance(harness.queue.policy().lease_timeout);
    let taken_over = harness.queue.run_batch().await.expect("takeover batch");
    assert!(taken_over.ran);

    running
        .await
        .expect("join")
        .expect("stuck batch finishes");
}

#[tokio::test]
async fn re_enqueue_during_build_is_kept() {
    let harness = Harness::new(StaticCatalog::default());
    harness.source.page("/live/", &html("live"));
    harness.source.slow_down(Duration::from_millis(200));
    harness
        .queue
        .enqueue(single("5", "page", "/live/"), None)
        .await
        .expect("enqueue");

    let queue = harness.queue.clone();
    let batch = tokio::spawn(async move { queue.run_batch().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fresh = harness
        .queue
        .enqueue(single("5", "page", "/live/"), None)
        .await
        .expect("re-enqueue");

    let report = batch.await.expect("join").expect("batch");
    assert_eq!(report.succeeded, 1);

    let tasks = harness.queue.tasks().await.expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, fresh.id);
}

#[tokio::test]
async fn follow_up_is_scheduled_while_work_remains() {
    let policy = QueuePolicy {
        max_batch_size: 1,
        ..QueuePolicy::default()
    };
    let harness = Harness::with_policy(StaticCatalog::default(), policy);
    for id in ["1", "2"] {
        let path = format!("/f/{id}/");
        harness.source.page(&path, &html(id));
        harness
            .queue
            .enqueue(single(id, "post", &path), None)
            .await
            .expect("enqueue");
    }

    let report = harness.queue.process_batch().await.expect("batch");
    assert_eq!(report.remaining, 1);

    let status = harness.queue.status().await.expect("status");
    assert_eq!(status.total, 1);
    assert!(status.next_scheduled.is_some());

    assert!(harness.queue.cancel_scheduled());
    assert!(harness.queue.next_scheduled().is_none());
}

#[tokio::test]
async fn failed_tasks_can_be_retried_or_cleared_by_category() {
    let harness = Harness::new(StaticCatalog::default());
    harness
        .queue
        .enqueue(single("p1", "product", "/shop/p1/"), None)
        .await
        .expect("enqueue product");
    harness
        .queue
        .enqueue(single("a1", "attachment", "/files/a1/"), None)
        .await
        .expect("enqueue attachment");

    let report = harness.queue.run_batch().await.expect("batch");
    assert_eq!(report.retried, 2);

    let status = harness.queue.status().await.expect("status");
    assert_eq!(status.failing.len(), 2);
    assert_eq!(status.waiting_retry, 2);

    let product = TargetCategory::new("product");
    assert_eq!(
        harness
            .queue
            .retry_failures(&product)
            .await
            .expect("retry"),
        1
    );
    let retried = harness
        .queue
        .tasks()
        .await
        .expect("tasks")
        .into_iter()
        .find(|task| task.dedup_key == "single:p1")
        .expect("product task");
    assert_eq!(retried.attempts, 0);
    assert!(retried.retry_after.is_none());

    let attachment = TargetCategory::new("attachment");
    assert_eq!(
        harness
            .queue
            .clear_failures(&attachment)
            .await
            .expect("clear"),
        1
    );
    let keys: Vec<_> = harness
        .queue
        .tasks()
        .await
        .expect("tasks")
        .into_iter()
        .map(|task| task.dedup_key)
        .collect();
    assert_eq!(keys, vec!["single:p1"]);
}

#[tokio::test]
async fn clear_removes_everything() {
    let harness = Harness::new(StaticCatalog::default());
    harness
        .queue
        .enqueue(TaskKind::ArchiveSet, None)
        .await
        .expect("enqueue archives");
    harness
        .queue
        .enqueue(TaskKind::FullRebuild, None)
        .await
        .expect("enqueue full");
    harness.queue.schedule(Duration::from_secs(60));

    assert_eq!(harness.queue.clear().await.expect("clear"), 2);
    let status = harness.queue.status().await.expect("status");
    assert_eq!(status.total, 0);
    assert!(!status.processing);
    assert!(status.next_scheduled.is_none());
}

#[tokio::test]
async fn clear_during_a_batch_keeps_it_single_flight() {
    let harness = Harness::new(StaticCatalog::default());
    harness.source.page("/slow/", &html("slow"));
    harness.source.page("/other/", &html("other"));
    harness.source.slow_down(Duration::from_millis(400));
    harness
        .queue
        .enqueue(single("slow", "page", "/slow/"), None)
        .await
        .expect("enqueue slow");

    let busy = harness.queue.clone();
    let running = tokio::spawn(async move { busy.run_batch().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.queue.clear().await.expect("clear"), 1);
    assert!(harness.queue.status().await.expect("status").processing);
    harness
        .queue
        .enqueue(single("other", "page", "/other/"), None)
        .await
        .expect("enqueue other");

    let second = harness.queue.run_batch().await.expect("second batch");
    assert!(!second.ran);

    let first = running.await.expect("join").expect("first batch");
    assert!(first.ran);
    assert_eq!(harness.source.fetched_paths(), vec!["/slow/"]);

    let later = harness.queue.run_batch().await.expect("later batch");
    assert!(later.ran);
    assert_eq!(later.processed, vec!["single:other"]);
}

#[tokio::test]
async fn archive_set_succeeds_when_some_pages_build() {
    let catalog = StaticCatalog::new(
        Some(url("/")),
        vec![url("/blog/"), url("/blog/page/2/")],
        Vec::new(),
    );
    let harness = Harness::new(catalog);
    harness.source.page("/", &html("home"));
    harness.source.page("/blog/", &html("blog"));

    harness
        .queue
        .enqueue(TaskKind::ArchiveSet, None)
        .await
        .expect("enqueue");
    let report = harness.queue.run_batch().await.expect("batch");

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.retried, 0);
    assert_eq!(
        harness.source.fetched_paths(),
        vec!["/", "/blog/", "/blog/page/2/"]
    );
    let stats = harness.log.stats().await.expect("stats");
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn full_rebuild_builds_targets_then_archives() {
    let catalog = StaticCatalog::new(
        Some(url("/")),
        Vec::new(),
        vec![target("1", "product", "/shop/one/"), target("2", "page", "/about/")],
    );
    let harness = Harness::new(catalog);
    for path in ["/", "/shop/one/", "/about/"] {
        harness.source.page(path, &html(path));
    }

    harness
        .queue
        .enqueue(TaskKind::FullRebuild, None)
        .await
        .expect("enqueue");
    let report = harness.queue.run_batch().await.expect("batch");

    assert_eq!(report.succeeded, 1);
    assert_eq!(
        harness.source.fetched_paths(),
        vec!["/shop/one/", "/about/", "/"]
    );
    assert!(
        harness
            .cache
            .read(&harness.cache.path_for(&url("/about/")))
            .expect("cached about page")
            .contains("<title>/about/</title>")
    );
}

#[tokio::test]
async fn set_build_fails_only_when_nothing_builds() {
    let catalog = StaticCatalog::new(Some(url("/")), vec![url("/blog/")], Vec::new());
    let harness = Harness::new(catalog);

    harness
        .queue
        .enqueue(TaskKind::ArchiveSet, None)
        .await
        .expect("enqueue");
    let report = harness.queue.run_batch().await.expect("batch");

    assert_eq!(report.retried, 1);
    let task = harness
        .queue
        .tasks()
        .await
        .expect("tasks")
        .pop()
        .expect("archive task retained");
    assert_eq!(task.attempts, 1);
    assert!(task.last_error.is_some_and(|error| error.contains("all 2 pages failed")));
}

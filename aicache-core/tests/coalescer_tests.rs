//! Integration tests for the request coalescer
//!
//! Timer-driven tests run on a paused clock so debounce windows are exact.

use aicache_core::batch::{handler_fn, BatchConfig, BatchHandler, RequestBatcher};
use aicache_core::{BatchError, CacheKey};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn key(prompt: &str) -> CacheKey {
    CacheKey::derive("test-model", prompt, &()).unwrap()
}

fn config(batch_size: usize, debounce_ms: u64) -> BatchConfig {
    BatchConfig::builder()
        .batch_size(batch_size)
        .debounce_interval(Duration::from_millis(debounce_ms))
        .build()
}

/// Records every batch it receives and answers with upper-cased payloads
#[derive(Default)]
struct RecordingHandler {
    batches: Mutex<Vec<(Duration, Vec<String>)>>,
    started: Mutex<Option<Instant>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingHandler {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn start_clock(&self) {
        *self.started.lock().unwrap() = Some(Instant::now());
    }

    fn batches(&self) -> Vec<(Duration, Vec<String>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchHandler<String, String> for RecordingHandler {
    async fn call_batch(&self, payloads: Vec<String>) -> anyhow::Result<Vec<String>> {
        let at = self
            .started
            .lock()
            .unwrap()
            .map(|start| start.elapsed())
            .unwrap_or_default();
        self.batches.lock().unwrap().push((at, payloads.clone()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(payloads.into_iter().map(|p| p.to_uppercase()).collect())
    }
}

#[tokio::test(start_paused = true)]
async fn test_size_then_timer_scenario() {
    let handler = Arc::new(RecordingHandler::default());
    let batcher: RequestBatcher<String, String> =
        RequestBatcher::from_arc(config(3, 50), handler.clone());
    handler.start_clock();

    let a = batcher.request(key("a"), "a".to_string());
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = batcher.request(key("b"), "b".to_string());
    tokio::time::sleep(Duration::from_millis(5)).await;
    let c = batcher.request(key("c"), "c".to_string());
    tokio::time::sleep(Duration::from_millis(5)).await;
    let d = batcher.request(key("d"), "d".to_string());

    let results = join_all(vec![a, b, c, d]).await;
    let results: Vec<String> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(results, vec!["A", "B", "C", "D"]);

    let batches = handler.batches();
    assert_eq!(batches.len(), 2);

    // the third request fills the batch and flushes it on the spot
    assert_eq!(batches[0].0, Duration::from_millis(10));
    assert_eq!(batches[0].1, vec!["a", "b", "c"]);

    // the fourth opens a new batch that waits out its own debounce window
    assert_eq!(batches[1].0, Duration::from_millis(65));
    assert_eq!(batches[1].1, vec!["d"]);

    let stats = batcher.stats();
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.size_flushes, 1);
    assert_eq!(stats.timer_flushes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_small_batch_is_one_call_in_order() {
    let handler = Arc::new(RecordingHandler::default());
    let batcher: RequestBatcher<String, String> =
        RequestBatcher::from_arc(config(10, 50), handler.clone());

    let prompts = ["first", "second", "third", "fourth"];
    let pending: Vec<_> = prompts
        .iter()
        .map(|p| batcher.request(key(p), p.to_string()))
        .collect();

    let results = join_all(pending).await;

    assert_eq!(handler.batches().len(), 1);
    assert_eq!(handler.batches()[0].1, prompts.to_vec());
    for (result, prompt) in results.into_iter().zip(prompts) {
        assert_eq!(result.unwrap(), prompt.to_uppercase());
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_from_tasks() {
    let handler = Arc::new(RecordingHandler::default());
    let batcher: RequestBatcher<String, String> =
        RequestBatcher::from_arc(config(5, 50), handler.clone());

    let tasks = (0..20).map(|i| {
        let batcher = batcher.clone();
        tokio::spawn(async move {
            let prompt = format!("prompt-{}", i);
            batcher.request(key(&prompt), prompt.clone()).await
        })
    });

    for (i, joined) in join_all(tasks).await.into_iter().enumerate() {
        assert_eq!(joined.unwrap().unwrap(), format!("PROMPT-{}", i));
    }

    assert_eq!(handler.batches().len(), 4);
    assert!(handler.batches().iter().all(|(_, batch)| batch.len() == 5));
    assert_eq!(batcher.stats().payloads, 20);
}

#[tokio::test(start_paused = true)]
async fn test_downstream_failure_is_shared() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let batcher: RequestBatcher<String, String> = RequestBatcher::new(
        config(10, 50),
        handler_fn(move |_payloads: Vec<String>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Err::<Vec<String>, _>(anyhow::anyhow!("upstream 503")) }
        }),
    );

    let pending: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|p| batcher.request(key(p), p.to_string()))
        .collect();
    let errors: Vec<BatchError> = join_all(pending)
        .await
        .into_iter()
        .map(|r| r.unwrap_err())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(errors[0], BatchError::Downstream { .. }));
    assert!(errors[0].to_string().contains("upstream 503"));
    assert!(errors.iter().all(|e| e.is_same_failure(&errors[0])));

    // no retry: the next request opens a fresh batch
    let again = batcher.request(key("a"), "a".to_string()).await.unwrap_err();
    assert!(!again.is_same_failure(&errors[0]));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(batcher.stats().failed_batches, 2);
}

#[tokio::test(start_paused = true)]
async fn test_next_batch_fills_while_previous_in_flight() {
    let handler = Arc::new(RecordingHandler::with_delay(Duration::from_millis(200)));
    let batcher: RequestBatcher<String, String> =
        RequestBatcher::from_arc(config(2, 50), handler.clone());

    let first: Vec<_> = ["a", "b"]
        .iter()
        .map(|p| batcher.request(key(p), p.to_string()))
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second: Vec<_> = ["c", "d"]
        .iter()
        .map(|p| batcher.request(key(p), p.to_string()))
        .collect();

    let (first, second) = tokio::join!(join_all(first), join_all(second));

    assert!(first.into_iter().chain(second).all(|r| r.is_ok()));
    assert_eq!(handler.batches().len(), 2);
    assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_identical_requests_share_one_payload() {
    let handler = Arc::new(RecordingHandler::default());
    let batcher: RequestBatcher<String, String> =
        RequestBatcher::from_arc(config(2, 50), handler.clone());

    let waiters: Vec<_> = (0..5)
        .map(|_| batcher.request(key("same"), "same".to_string()))
        .collect();
    // duplicates do not count toward the size threshold
    assert_eq!(batcher.pending_len(), 1);

    let results = join_all(waiters).await;
    assert!(results.into_iter().all(|r| r.unwrap() == "SAME"));

    assert_eq!(handler.batches().len(), 1);
    assert_eq!(handler.batches()[0].1, vec!["same"]);
    assert_eq!(batcher.stats().coalesced, 4);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_caller_does_not_affect_others() {
    let handler = Arc::new(RecordingHandler::default());
    let batcher: RequestBatcher<String, String> =
        RequestBatcher::from_arc(config(10, 50), handler.clone());

    let kept = batcher.request(key("shared"), "shared".to_string());
    let cancelled = batcher.request(key("shared"), "shared".to_string());
    let timed_out = tokio::time::timeout(Duration::from_millis(10), cancelled).await;
    assert!(timed_out.is_err());

    assert_eq!(kept.await.unwrap(), "SHARED");
    assert_eq!(handler.batches().len(), 1);

    let stats = batcher.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.requests, 2);
}

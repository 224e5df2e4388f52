//! Crawler Engine
//!
//! Executes a [`Pipeline`] from seed requests, concurrently and to
//! exhaustion, and emits the final stage's items on a leaf stream.
//!
//! # Completion
//!
//! Every crawl task is registered in a shared counter before it is spawned
//! and released when it finishes, on every exit path. Each task owns a clone
//! of the leaf sender, so the leaf stream closes exactly when the last task
//! finishes. A parent always finishes its own fetch before any child is
//! spawned.
//!
//! # Failure policy
//!
//! A fetch, preprocess or extract failure abandons only its own task. A
//! transform or build failure skips only its own item. Nothing is retried.
//!
//! # Concurrency
//!
//! Fan-out is unbounded in tasks, but in-flight fetches can be capped with
//! [`CrawlerConfig::max_in_flight`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Semaphore, mpsc};
use tokio_util::task::TaskTracker;

use crate::application::ports::FetchPort;
use crate::domain::pipeline::{FetchRequest, Item, Pipeline};
use crate::infrastructure::metrics;

/// Crawler tuning.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Maximum concurrent fetches (0 = unbounded).
    pub max_in_flight: usize,
    /// Leaf stream buffer size.
    pub leaf_buffer: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            leaf_buffer: 256,
        }
    }
}

/// Counts collected over one crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Tasks spawned.
    pub spawned: usize,
    /// Tasks finished.
    pub completed: usize,
    /// Tasks abandoned on fetch failure.
    pub fetch_failures: usize,
    /// Leaves delivered to the stream.
    pub leaves: usize,
}

#[derive(Debug, Default)]
struct CrawlCounters {
    spawned: AtomicUsize,
    completed: AtomicUsize,
    fetch_failures: AtomicUsize,
    leaves: AtomicUsize,
}

impl CrawlCounters {
    fn snapshot(&self) -> CrawlReport {
        CrawlReport {
            spawned: self.spawned.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            fetch_failures: self.fetch_failures.load(Ordering::SeqCst),
            leaves: self.leaves.load(Ordering::SeqCst),
        }
    }
}

/// Registration of one in-flight task; released on drop.
struct InFlight(Arc<CrawlCounters>);

impl InFlight {
    fn enter(counters: &Arc<CrawlCounters>) -> Self {
        counters.spawned.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counters))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handle resolving once every crawl task has finished.
#[derive(Debug)]
pub struct CrawlHandle {
    tracker: TaskTracker,
    counters: Arc<CrawlCounters>,
}

impl CrawlHandle {
    /// Wait for the crawl to finish and return its counts.
    pub async fn wait(self) -> CrawlReport {
        self.tracker.wait().await;
        self.counters.snapshot()
    }

    /// Counts so far.
    #[must_use]
    pub fn report(&self) -> CrawlReport {
        self.counters.snapshot()
    }
}

/// One traversal node: a request issued for a stage.
#[derive(Debug)]
struct CrawlTask {
    stage: usize,
    request: FetchRequest,
}

/// Everything a task needs; cloned into each spawned task.
#[derive(Clone)]
struct CrawlContext {
    pipeline: Pipeline,
    fetcher: Arc<dyn FetchPort>,
    leaves: mpsc::Sender<Item>,
    tracker: TaskTracker,
    permits: Option<Arc<Semaphore>>,
    counters: Arc<CrawlCounters>,
}

impl CrawlContext {
    fn spawn(&self, task: CrawlTask) {
        let in_flight = InFlight::enter(&self.counters);
        let ctx = self.clone();
        self.tracker.spawn(async move {
            ctx.process(task).await;
            drop(ctx);
            drop(in_flight);
        });
    }

    async fn fetch(&self, request: &FetchRequest) -> Option<Vec<u8>> {
        let _permit = match &self.permits {
            Some(permits) => Some(permits.acquire().await.ok()?),
            None => None,
        };

        match self.fetcher.fetch(request).await {
            Ok(body) => {
                metrics::record_fetch(true);
                Some(body)
            }
            Err(e) => {
                tracing::warn!(request = %request, error = %e, "Fetch failed, abandoning branch");
                metrics::record_fetch(false);
                self.counters.fetch_failures.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    async fn process(&self, task: CrawlTask) {
        let Some(stage) = self.pipeline.stage(task.stage) else {
            tracing::error!(stage = task.stage, "Crawl task beyond last stage");
            return;
        };
        let is_final = self.pipeline.is_final(task.stage);

        let Some(body) = self.fetch(&task.request).await else {
            return;
        };

        let body = match stage.preprocess(body) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(stage = stage.name(), request = %task.request, error = %e, "Preprocessing failed");
                return;
            }
        };

        let items = match stage.extract(&body) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(stage = stage.name(), request = %task.request, error = %e, "Extraction failed");
                return;
            }
        };

        tracing::debug!(
            stage = stage.name(),
            request = %task.request,
            items = items.len(),
            "Extracted items"
        );

        for item in items {
            let item = match stage.transform(item) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(stage = stage.name(), error = %e, "Skipping item");
                    continue;
                }
            };

            if is_final {
                if self.leaves.send(item).await.is_err() {
                    tracing::debug!("Leaf receiver dropped, stopping branch");
                    return;
                }
                self.counters.leaves.fetch_add(1, Ordering::SeqCst);
                metrics::record_leaf();
                continue;
            }

            match stage.build_next(&item) {
                Ok(requests) => {
                    for request in requests {
                        self.spawn(CrawlTask {
                            stage: task.stage + 1,
                            request,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(stage = stage.name(), item = %item, error = %e, "Skipping item");
                }
            }
        }
    }
}

/// Concurrent multi-stage crawler.
#[derive(Clone)]
pub struct Crawler {
    fetcher: Arc<dyn FetchPort>,
    config: CrawlerConfig,
}

impl Crawler {
    /// Create a crawler.
    #[must_use]
    pub fn new(fetcher: Arc<dyn FetchPort>, config: CrawlerConfig) -> Self {
        Self { fetcher, config }
    }

    /// Start crawling `pipeline` from `seeds`.
    ///
    /// Must be called within a Tokio runtime. Returns the leaf stream and a
    /// handle that resolves once every task has finished. The stream closes
    /// after the last leaf of the last branch.
    #[must_use]
    pub fn crawl(
        &self,
        pipeline: &Pipeline,
        seeds: Vec<FetchRequest>,
    ) -> (mpsc::Receiver<Item>, CrawlHandle) {
        let (leaves, leaf_rx) = mpsc::channel(self.config.leaf_buffer.max(1));
        let tracker = TaskTracker::new();
        let counters = Arc::new(CrawlCounters::default());

        let ctx = CrawlContext {
            pipeline: pipeline.clone(),
            fetcher: Arc::clone(&self.fetcher),
            leaves,
            tracker: tracker.clone(),
            permits: (self.config.max_in_flight > 0)
                .then(|| Arc::new(Semaphore::new(self.config.max_in_flight))),
            counters: Arc::clone(&counters),
        };

        tracing::info!(
            stages = pipeline.len(),
            seeds = seeds.len(),
            "Starting crawl"
        );

        for request in seeds {
            ctx.spawn(CrawlTask { stage: 0, request });
        }
        tracker.close();

        (leaf_rx, CrawlHandle { tracker, counters })
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::application::ports::FetchError;
    use crate::domain::pipeline::{Extract, StageError, StageSpec};

    /// Serves canned bodies keyed by path.
    struct MapFetcher {
        bodies: HashMap<String, Value>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MapFetcher {
        fn new(bodies: &[(&str, Value)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(path, body)| ((*path).to_string(), body.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FetchPort for MapFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.bodies
                .get(&request.path)
                .map(|body| body.to_string().into_bytes())
                .ok_or_else(|| FetchError::Status {
                    status: 404,
                    url: request.url(),
                })
        }
    }

    /// Extracts the array stored under a top-level key.
    struct Field(&'static str);

    impl Extract for Field {
        fn extract(&self, body: &[u8]) -> Result<Vec<Item>, StageError> {
            let value: Value =
                serde_json::from_slice(body).map_err(|e| StageError::Extract(e.to_string()))?;
            Ok(value
                .get(self.0)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn child_of(prefix: &'static str) -> impl Fn(&Item) -> Result<Vec<FetchRequest>, StageError> {
        move |item: &Item| {
            let id = item
                .as_u64()
                .ok_or_else(|| StageError::BuildNext(format!("not an id: {item}")))?;
            Ok(vec![FetchRequest::get("http://book", format!("/{prefix}/{id}"))])
        }
    }

    fn three_stage_pipeline() -> Pipeline {
        Pipeline::new(vec![
            StageSpec::new("groups", Field("groups")).with_next(child_of("group")),
            StageSpec::new("subgroups", Field("subgroups")).with_next(child_of("sub")),
            StageSpec::new("leaves", Field("leaves")),
        ])
        .unwrap()
    }

    fn scenario_a() -> MapFetcher {
        MapFetcher::new(&[
            ("/root", json!({"groups": [1, 2]})),
            ("/group/1", json!({"subgroups": [10]})),
            ("/group/2", json!({"subgroups": [20]})),
            ("/sub/10", json!({"leaves": ["a", "b", "c"]})),
            ("/sub/20", json!({"leaves": ["d", "e", "f"]})),
        ])
    }

    async fn collect(mut rx: mpsc::Receiver<Item>) -> Vec<Item> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn three_stage_pipeline_emits_six_leaves() {
        let fetcher = Arc::new(scenario_a());
        let crawler = Crawler::new(fetcher.clone(), CrawlerConfig::default());

        let (rx, handle) = crawler.crawl(
            &three_stage_pipeline(),
            vec![FetchRequest::get("http://book", "/root")],
        );

        let mut leaves: Vec<String> = collect(rx)
            .await
            .into_iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        leaves.sort();
        assert_eq!(leaves, vec!["a", "b", "c", "d", "e", "f"]);

        let report = handle.wait().await;
        assert_eq!(report.spawned, 5);
        assert_eq!(report.completed, report.spawned);
        assert_eq!(report.leaves, 6);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn stream_closes_only_after_every_task_finished() {
        let crawler = Crawler::new(Arc::new(scenario_a()), CrawlerConfig::default());
        let (rx, handle) = crawler.crawl(
            &three_stage_pipeline(),
            vec![FetchRequest::get("http://book", "/root")],
        );

        let _ = collect(rx).await;
        let report = handle.report();
        assert_eq!(report.completed, report.spawned);
    }

    #[tokio::test]
    async fn fetch_failure_abandons_only_its_branch() {
        let fetcher = Arc::new(MapFetcher::new(&[
            ("/root", json!({"groups": [1, 2]})),
            ("/group/1", json!({"subgroups": [10]})),
            ("/sub/10", json!({"leaves": ["a", "b", "c"]})),
        ]));
        let crawler = Crawler::new(fetcher, CrawlerConfig::default());
        let (rx, handle) = crawler.crawl(
            &three_stage_pipeline(),
            vec![FetchRequest::get("http://book", "/root")],
        );

        assert_eq!(collect(rx).await.len(), 3);
        let report = handle.wait().await;
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.spawned, 4);
        assert_eq!(report.completed, 4);
    }

    #[tokio::test]
    async fn build_failure_skips_only_that_item() {
        let fetcher = Arc::new(MapFetcher::new(&[
            ("/root", json!({"groups": [1, "bogus"]})),
            ("/group/1", json!({"subgroups": [10]})),
            ("/sub/10", json!({"leaves": ["a"]})),
        ]));
        let crawler = Crawler::new(fetcher, CrawlerConfig::default());
        let (rx, handle) = crawler.crawl(
            &three_stage_pipeline(),
            vec![FetchRequest::get("http://book", "/root")],
        );

        assert_eq!(collect(rx).await, vec![json!("a")]);
        assert_eq!(handle.wait().await.spawned, 3);
    }

    #[tokio::test]
    async fn transform_failure_skips_item() {
        let pipeline = Pipeline::new(vec![StageSpec::new("only", Field("leaves")).with_transform(
            |item: Item| -> Result<Item, StageError> {
                if item == json!("bad") {
                    Err(StageError::Transform("bad item".to_string()))
                } else {
                    Ok(json!({ "value": item }))
                }
            },
        )])
        .unwrap();
        let fetcher = Arc::new(MapFetcher::new(&[(
            "/root",
            json!({"leaves": ["ok", "bad", "fine"]}),
        )]));
        let crawler = Crawler::new(fetcher, CrawlerConfig::default());
        let (rx, _handle) = crawler.crawl(&pipeline, vec![FetchRequest::get("http://book", "/root")]);

        assert_eq!(
            collect(rx).await,
            vec![json!({"value": "ok"}), json!({"value": "fine"})]
        );
    }

    #[tokio::test]
    async fn no_seeds_closes_immediately() {
        let crawler = Crawler::new(Arc::new(scenario_a()), CrawlerConfig::default());
        let (rx, handle) = crawler.crawl(&three_stage_pipeline(), vec![]);
        assert!(collect(rx).await.is_empty());
        assert_eq!(handle.wait().await, CrawlReport::default());
    }

    #[tokio::test]
    async fn in_flight_fetches_are_bounded() {
        let bodies: Vec<(String, Value)> = (0..20)
            .map(|i| (format!("/group/{i}"), json!({"leaves": [i]})))
            .collect();
        let mut all: Vec<(&str, Value)> = bodies.iter().map(|(p, b)| (p.as_str(), b.clone())).collect();
        let root = json!({"groups": (0..20).collect::<Vec<_>>()});
        all.push(("/root", root));
        let fetcher = Arc::new(MapFetcher::new(&all));

        let pipeline = Pipeline::new(vec![
            StageSpec::new("groups", Field("groups")).with_next(child_of("group")),
            StageSpec::new("leaves", Field("leaves")),
        ])
        .unwrap();
        let crawler = Crawler::new(
            fetcher.clone(),
            CrawlerConfig {
                max_in_flight: 3,
                leaf_buffer: 4,
            },
        );
        let (rx, handle) = crawler.crawl(&pipeline, vec![FetchRequest::get("http://book", "/root")]);

        assert_eq!(collect(rx).await.len(), 20);
        let report = handle.wait().await;
        assert_eq!(report.spawned, 21);
        assert_eq!(report.completed, 21);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn dropped_receiver_still_completes_every_task() {
        let crawler = Crawler::new(Arc::new(scenario_a()), CrawlerConfig::default());
        let (rx, handle) = crawler.crawl(
            &three_stage_pipeline(),
            vec![FetchRequest::get("http://book", "/root")],
        );
        drop(rx);

        let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("crawl should finish");
        assert_eq!(report.completed, report.spawned);
        assert_eq!(report.leaves, 0);
    }
}

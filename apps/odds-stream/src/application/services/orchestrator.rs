//! Orchestrator
//!
//! Sequences crawl, catalog build, channel derivation and subscription.
//! Only setup failures surface as errors; a partial catalog or a partial
//! subscription set is a normal outcome.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::catalog_builder::CatalogBuilder;
use super::crawler::Crawler;
use super::subscription::{ChannelSubscription, CompletionHandle, SubscriptionConfig};
use crate::application::ports::{ChannelProtocol, CrawlSource, InboundFrame, TransportPort};
use crate::domain::catalog::Catalog;
use crate::domain::channel::{ChannelTemplate, Granularity, derive_channels};
use crate::domain::pipeline::PipelineError;

/// Top-level setup failure.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The crawl pipeline is misconfigured.
    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    /// The source produced no seed requests.
    #[error("crawl source has no seed requests")]
    NoSeeds,

    /// The stream URL is not a WebSocket URL.
    #[error("invalid stream URL: {0}")]
    InvalidStreamUrl(String),
}

/// Entry point for building catalogs and subscribing to their channels.
pub struct Orchestrator {
    source: Arc<dyn CrawlSource>,
    crawler: Crawler,
    transport: Arc<dyn TransportPort>,
    protocol: Arc<dyn ChannelProtocol>,
    subscription: Arc<SubscriptionConfig>,
    template: ChannelTemplate,
    granularity: Granularity,
    interrupt: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with the default channel template.
    #[must_use]
    pub fn new(
        source: Arc<dyn CrawlSource>,
        crawler: Crawler,
        transport: Arc<dyn TransportPort>,
        protocol: Arc<dyn ChannelProtocol>,
        subscription: SubscriptionConfig,
    ) -> Self {
        Self {
            source,
            crawler,
            transport,
            protocol,
            subscription: Arc::new(subscription),
            template: ChannelTemplate::default(),
            granularity: Granularity::default(),
            interrupt: CancellationToken::new(),
        }
    }

    /// Use a different channel template and granularity.
    #[must_use]
    pub fn with_channels(mut self, template: ChannelTemplate, granularity: Granularity) -> Self {
        self.template = template;
        self.granularity = granularity;
        self
    }

    /// Share an existing interrupt token.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: CancellationToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Token that moves every subscription into Closing when cancelled.
    #[must_use]
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Crawl the source to completion and fold the leaves into a catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is invalid or there are no seeds.
    pub async fn build_catalog(&self) -> Result<Catalog, OrchestratorError> {
        let pipeline = self.source.pipeline()?;
        let seeds = self.source.seeds();
        if seeds.is_empty() {
            return Err(OrchestratorError::NoSeeds);
        }

        let (leaves, handle) = self.crawler.crawl(&pipeline, seeds);
        let builder = CatalogBuilder::new().consume(leaves).await;
        let report = handle.wait().await;

        tracing::info!(
            tasks = report.spawned,
            fetch_failures = report.fetch_failures,
            leaves = report.leaves,
            merged = builder.merged(),
            skipped = builder.skipped(),
            "Catalog built"
        );

        Ok(builder.finish())
    }

    /// Start one subscription per channel derived from `catalog`.
    ///
    /// Every received frame is delivered to `sink`. The returned handle
    /// resolves once all subscriptions have reached Closed.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidStreamUrl`] if the configured URL
    /// is not `ws://` or `wss://`.
    pub fn subscribe(
        &self,
        catalog: &Catalog,
        sink: mpsc::Sender<InboundFrame>,
    ) -> Result<CompletionHandle, OrchestratorError> {
        let url = &self.subscription.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(OrchestratorError::InvalidStreamUrl(url.clone()));
        }

        let channels = derive_channels(catalog, &self.template, self.granularity);
        tracing::info!(
            channels = channels.len(),
            granularity = self.granularity.as_str(),
            template = self.template.as_str(),
            "Subscribing to channels"
        );

        let mut handle = CompletionHandle::new();
        for channel in channels {
            handle.spawn(ChannelSubscription::new(
                channel,
                Arc::clone(&self.subscription),
                Arc::clone(&self.transport),
                Arc::clone(&self.protocol),
                sink.clone(),
                self.interrupt.clone(),
            ));
        }
        Ok(handle)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("crawler", &self.crawler)
            .field("url", &self.subscription.url)
            .field("template", &self.template)
            .field("granularity", &self.granularity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::SinkExt;
    use futures::channel::mpsc as fmpsc;
    use serde_json::{Value, json};

    use super::*;
    use crate::application::ports::{
        Connection, FetchError, FetchPort, TransportError, WireFrame,
    };
    use crate::application::services::{CloseReason, CrawlerConfig};
    use crate::domain::pipeline::{
        Extract, FetchRequest, Item, Pipeline, StageError, StageSpec,
    };

    struct Canned(HashMap<String, Value>);

    #[async_trait]
    impl FetchPort for Canned {
        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
            self.0
                .get(&request.path)
                .map(|v| v.to_string().into_bytes())
                .ok_or_else(|| FetchError::Status {
                    status: 404,
                    url: request.url(),
                })
        }
    }

    struct Field(&'static str);

    impl Extract for Field {
        fn extract(&self, body: &[u8]) -> Result<Vec<Item>, StageError> {
            let value: Value =
                serde_json::from_slice(body).map_err(|e| StageError::Extract(e.to_string()))?;
            Ok(value.get(self.0).and_then(Value::as_array).cloned().unwrap_or_default())
        }
    }

    fn sport_page(id: &Item) -> Result<Vec<FetchRequest>, StageError> {
        Ok(vec![FetchRequest::get("http://book", format!("/sport/{}", id.as_u64().unwrap_or(0)))])
    }

    struct Source {
        seeds: Vec<FetchRequest>,
        broken: bool,
    }

    impl CrawlSource for Source {
        fn pipeline(&self) -> Result<Pipeline, PipelineError> {
            if self.broken {
                return Pipeline::new(vec![]);
            }
            Pipeline::new(vec![
                StageSpec::new("index", Field("ids")).with_next(sport_page),
                StageSpec::new("sports", Field("sports")),
            ])
        }

        fn seeds(&self) -> Vec<FetchRequest> {
            self.seeds.clone()
        }
    }

    struct Protocol;

    impl ChannelProtocol for Protocol {
        fn subscribe_frame(&self, channel: &crate::domain::channel::ChannelId) -> Result<String, TransportError> {
            Ok(format!("sub:{channel}"))
        }

        fn ping_frame(&self) -> Result<String, TransportError> {
            Ok("ping".to_string())
        }
    }

    /// Opens a fresh in-memory connection per call and keeps the far ends.
    #[derive(Default)]
    struct Recording {
        peers: Mutex<Vec<(fmpsc::UnboundedReceiver<WireFrame>, fmpsc::UnboundedSender<Result<WireFrame, TransportError>>)>>,
    }

    #[async_trait]
    impl TransportPort for Recording {
        async fn connect(
            &self,
            _url: &str,
            _headers: &[(String, String)],
        ) -> Result<Connection, TransportError> {
            let (write_tx, written) = fmpsc::unbounded();
            let (inbound, read_rx) = fmpsc::unbounded();
            self.peers.lock().unwrap().push((written, inbound));
            Ok(Connection {
                sink: Box::pin(write_tx.sink_map_err(|e| TransportError::Write(e.to_string()))),
                stream: Box::pin(read_rx),
            })
        }
    }

    fn book() -> Canned {
        Canned(HashMap::from([
            ("/index".to_string(), json!({"ids": [1, 2]})),
            (
                "/sport/1".to_string(),
                json!({"sports": [{"name": "Soccer", "id": 1, "categories": {"EPL": {"name": "EPL", "id": 40253}}}]}),
            ),
            (
                "/sport/2".to_string(),
                json!({"sports": [
                    {"name": "Soccer", "id": 1, "categories": {"Serie A": {"name": "Serie A", "id": 40030}}},
                    {"name": "Tennis", "id": 6, "categories": {"ATP": {"name": "ATP", "id": 92893}}}
                ]}),
            ),
        ]))
    }

    fn orchestrator(source: Source, transport: Arc<Recording>, url: &str) -> Orchestrator {
        let mut subscription = SubscriptionConfig::new(url);
        subscription.close_timeout = Duration::from_millis(200);
        Orchestrator::new(
            Arc::new(source),
            Crawler::new(Arc::new(book()), CrawlerConfig::default()),
            transport,
            Arc::new(Protocol),
            subscription,
        )
    }

    fn seeded() -> Source {
        Source {
            seeds: vec![FetchRequest::get("http://book", "/index")],
            broken: false,
        }
    }

    #[tokio::test]
    async fn build_catalog_merges_every_leaf() {
        let orch = orchestrator(seeded(), Arc::default(), "ws://push");
        let catalog = orch.build_catalog().await.unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.sport("Soccer").unwrap().categories.len(), 2);
    }

    #[tokio::test]
    async fn build_catalog_rejects_invalid_pipeline() {
        let source = Source {
            broken: true,
            ..seeded()
        };
        let orch = orchestrator(source, Arc::default(), "ws://push");
        assert!(matches!(
            orch.build_catalog().await,
            Err(OrchestratorError::Pipeline(PipelineError::Empty))
        ));
    }

    #[tokio::test]
    async fn build_catalog_requires_seeds() {
        let source = Source {
            seeds: vec![],
            broken: false,
        };
        let orch = orchestrator(source, Arc::default(), "ws://push");
        assert!(matches!(orch.build_catalog().await, Err(OrchestratorError::NoSeeds)));
    }

    #[tokio::test]
    async fn subscribe_rejects_non_websocket_url() {
        let orch = orchestrator(seeded(), Arc::default(), "https://push");
        let (sink, _rx) = mpsc::channel(1);
        assert!(matches!(
            orch.subscribe(&Catalog::new(), sink),
            Err(OrchestratorError::InvalidStreamUrl(_))
        ));
    }

    #[tokio::test]
    async fn subscribe_opens_one_subscription_per_channel_until_interrupted() {
        let transport = Arc::new(Recording::default());
        let orch = orchestrator(seeded(), Arc::clone(&transport), "wss://push");
        let catalog = orch.build_catalog().await.unwrap();

        let (sink, _rx) = mpsc::channel(16);
        let handle = orch.subscribe(&catalog, sink).unwrap();
        assert_eq!(handle.len(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.interrupt_token().cancel();

        let closed = handle.wait().await;
        let mut channels: Vec<_> = closed.iter().map(|(c, _)| c.as_str().to_string()).collect();
        channels.sort();
        assert_eq!(
            channels,
            vec![
                "nj_ent-eventgroup-40030",
                "nj_ent-eventgroup-40253",
                "nj_ent-eventgroup-92893"
            ]
        );
        assert!(closed.iter().all(|(_, r)| *r == CloseReason::CloseTimedOut));
        assert_eq!(transport.peers.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn empty_catalog_completes_immediately() {
        let orch = orchestrator(seeded(), Arc::default(), "ws://push");
        let (sink, _rx) = mpsc::channel(1);
        let handle = orch.subscribe(&Catalog::new(), sink).unwrap();
        assert!(handle.is_empty());
        assert!(handle.wait().await.is_empty());
    }
}

//! Shared fixtures for the integration tests: in-memory collaborators and a
//! pipeline builder rooted in a temp directory.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use ccms::adapters::{
    BranchProducer, ConfigStore, ContentGenerator, MediaPlanProducer, Publisher,
    ResearchProvider, StageError, StageResult, TemplateSeoProducer,
};
use ccms::core::{
    CancelHandle, ConfigLayer, ConfigLayers, EffectiveConfig, HumanReviewGateway,
    MetricsRecorder, MetricsStore, PipelineBuilder, PipelineOrchestrator, PipelineSettings,
    RunSummary,
};
use ccms::domain::{
    BranchDelta, DraftSections, FinalDraft, PublishMetadata, PublishReceipt, ResearchRecord,
    TenantConfig,
};

pub const TENANT: &str = "acme";
pub const ITEM: &str = "casino-x";
pub const LOCALE: &str = "en-GB";

// ----------------------------------------------------------------------------
// Config
// ----------------------------------------------------------------------------

/// Builtin global defaults, an `acme` tenant and a `casino-x` override that
/// keeps retries and word counts small enough for tests.
pub fn layers() -> ConfigLayers {
    layers_with(json!({}))
}

/// Like [`layers`], with `extra` deep-merged into the item override
pub fn layers_with(extra: Value) -> ConfigLayers {
    let mut tenant = TenantConfig::new(TENANT);
    tenant.locales = vec![LOCALE.to_string()];
    tenant.chains = layer(json!({
        "seo": { "primary_keyword": "Casino X", "secondary_keywords": ["casino x bonus"] },
        "publish": { "default_status": "draft" }
    }));

    let mut item = json!({
        "content": { "min_word_count": 60, "retries": { "base_ms": 5 } },
        "research": { "retries": { "base_ms": 5 } },
        "publish": { "retries": { "base_ms": 5 } },
        "seo": { "retries": { "base_ms": 5 } },
        "media": { "retries": { "base_ms": 5 } }
    });
    if let (Some(base), Value::Object(extra)) = (item.as_object_mut(), extra) {
        for (chain, value) in extra {
            match (base.get_mut(&chain), value) {
                (Some(Value::Object(existing)), Value::Object(add)) => existing.extend(add),
                (_, value) => {
                    base.insert(chain, value);
                }
            }
        }
    }

    ConfigLayers::new(ConfigLayer::builtin_defaults())
        .with_tenant(tenant)
        .with_item_override(TENANT, ITEM, layer(item))
}

fn layer(chains: Value) -> ConfigLayer {
    let mut layer = ConfigLayer::new();
    if let Value::Object(map) = chains {
        for (chain, value) in map {
            layer = layer.with_chain(chain, value);
        }
    }
    layer
}

pub struct StaticConfigStore {
    layers: ConfigLayers,
}

impl StaticConfigStore {
    pub fn new(layers: ConfigLayers) -> Self {
        Self { layers }
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn load_layers(&self, _tenant_id: &str, _item_id: &str) -> StageResult<ConfigLayers> {
        Ok(self.layers.clone())
    }
}

// ----------------------------------------------------------------------------
// Research
// ----------------------------------------------------------------------------

/// Nine populated leaf fields backing every claim in [`compliant_draft`]
pub fn research() -> ResearchRecord {
    ResearchRecord::new(ITEM, LOCALE)
        .with_field("name", json!("Casino X"))
        .with_field("license", json!("UKGC licence 39483"))
        .with_field("bonus", json!({ "amount": "£1,000", "match_percent": 100 }))
        .with_field("games", json!(["slots", "blackjack", "roulette"]))
        .with_field("payment_methods", json!(["Visa", "PayPal"]))
}

/// Only four populated fields
pub fn thin_research() -> ResearchRecord {
    ResearchRecord::new(ITEM, LOCALE)
        .with_field("name", json!("Casino X"))
        .with_field("license", json!("UKGC licence 39483"))
        .with_field("bonus", json!({ "amount": "£1,000", "wagering": null }))
        .with_field("games", json!(["slots"]))
}

pub struct StaticResearch {
    record: ResearchRecord,
    failures: Mutex<VecDeque<StageError>>,
    pub calls: AtomicUsize,
}

impl StaticResearch {
    pub fn new(record: ResearchRecord) -> Self {
        Self {
            record,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail with these errors, in order, before returning the record
    pub fn failing_first(self, errors: Vec<StageError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }
}

#[async_trait]
impl ResearchProvider for StaticResearch {
    async fn fetch(&self, _item_id: &str, _locale: &str) -> StageResult<ResearchRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.record.clone())
    }
}

// ----------------------------------------------------------------------------
// Content
// ----------------------------------------------------------------------------

/// All six required sections, every disclaimer, and only claims the
/// research supports.
pub fn compliant_draft() -> DraftSections {
    compliant_draft_with_bonus("Casino X welcomes new players with a 100% match up to £1,000 on the first deposit.")
}

/// [`compliant_draft`] with the bonus section replaced
pub fn compliant_draft_with_bonus(bonus: &str) -> DraftSections {
    DraftSections::new()
        .with_section(
            "intro",
            "Casino X is a UK facing online casino with a clean lobby and fast support. \
             This site is for adults only, 18+. We may earn a commission when you sign up \
             through our affiliate links.",
        )
        .with_section(
            "licensing",
            "The operator holds a Gambling Commission licence number 39483 and follows the \
             usual identity checks before any withdrawal.",
        )
        .with_section(
            "games",
            "The library covers slots, blackjack and roulette from well known studios, with \
             demo play available on most titles.",
        )
        .with_section("bonus", bonus)
        .with_section(
            "payments",
            "Deposits and withdrawals run through Visa and PayPal, and verified accounts are \
             usually paid within two working days.",
        )
        .with_section(
            "verdict",
            "A solid choice for casual players. Please gamble responsibly and visit \
             BeGambleAware.org if you need support.",
        )
}

pub struct StaticContent {
    draft: DraftSections,
    delay: Option<Duration>,
    cancel_on_generate: Mutex<Option<CancelHandle>>,
    pub calls: AtomicUsize,
}

impl StaticContent {
    pub fn new(draft: DraftSections) -> Self {
        Self {
            draft,
            delay: None,
            cancel_on_generate: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Request cancellation of the run while generating
    pub fn cancelling(self, handle: CancelHandle) -> Self {
        *self.cancel_on_generate.lock().unwrap() = Some(handle);
        self
    }
}

#[async_trait]
impl ContentGenerator for StaticContent {
    async fn generate(
        &self,
        _research: &ResearchRecord,
        _config: &EffectiveConfig,
    ) -> StageResult<DraftSections> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.cancel_on_generate.lock().unwrap().as_ref() {
            handle.cancel();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.draft.clone())
    }
}

// ----------------------------------------------------------------------------
// Branches
// ----------------------------------------------------------------------------

/// A branch that returns a fixed delta for fixed declared keys
pub struct StaticBranch {
    name: String,
    keys: Vec<String>,
    delta: BranchDelta,
    delay: Option<Duration>,
}

impl StaticBranch {
    pub fn new(name: &str, keys: &[&str], delta: Value) -> Self {
        Self {
            name: name.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            delta: delta.as_object().cloned().unwrap_or_default(),
            delay: None,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl BranchProducer for StaticBranch {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    async fn produce(&self, _: &DraftSections, _: &EffectiveConfig) -> StageResult<BranchDelta> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.delta.clone())
    }
}

// ----------------------------------------------------------------------------
// Publisher
// ----------------------------------------------------------------------------

/// Records every call; optionally fails the first calls
pub struct RecordingPublisher {
    failures: Mutex<VecDeque<StageError>>,
    published: Mutex<Vec<(FinalDraft, PublishMetadata)>>,
    pub calls: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(self, errors: Vec<StageError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(FinalDraft, PublishMetadata)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        draft: &FinalDraft,
        metadata: &PublishMetadata,
    ) -> StageResult<PublishReceipt> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.published
            .lock()
            .unwrap()
            .push((draft.clone(), metadata.clone()));
        Ok(PublishReceipt {
            external_id: format!("post-{}", n),
            url: format!("https://cms.test/{}/{}", metadata.tenant_id, n),
        })
    }
}

// ----------------------------------------------------------------------------
// Metrics
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryMetrics {
    summaries: Mutex<Vec<RunSummary>>,
    write_delay: Option<Duration>,
}

impl MemoryMetrics {
    /// Every write blocks its thread for `delay` first
    pub fn slow(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries.lock().unwrap().clone()
    }

    /// Metrics are written on a blocking task; poll until `count` arrive
    pub async fn wait_for(&self, count: usize) -> Vec<RunSummary> {
        for _ in 0..100 {
            let summaries = self.summaries();
            if summaries.len() >= count {
                return summaries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.summaries()
    }
}

impl MetricsStore for MemoryMetrics {
    fn write(&self, summary: &RunSummary) -> anyhow::Result<()> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

/// Temp directory plus the collaborators tests inspect afterwards
pub struct Harness {
    pub dir: TempDir,
    pub publisher: Arc<RecordingPublisher>,
    pub metrics: Arc<MemoryMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_publisher(RecordingPublisher::new())
    }

    pub fn with_publisher(publisher: RecordingPublisher) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            publisher: Arc::new(publisher),
            metrics: Arc::new(MemoryMetrics::default()),
        }
    }

    pub fn with_metrics(metrics: MemoryMetrics) -> Self {
        Self {
            metrics: Arc::new(metrics),
            ..Self::new()
        }
    }

    pub fn gateway(&self) -> HumanReviewGateway {
        HumanReviewGateway::new(self.dir.path().join("review").join("tickets.jsonl"))
            .with_poll_interval(Duration::from_millis(20))
    }

    /// Every collaborator wired to a passing fixture; override as needed
    pub fn builder(&self) -> PipelineBuilder {
        PipelineOrchestrator::builder()
            .config_store(Arc::new(StaticConfigStore::new(layers())))
            .research(Arc::new(StaticResearch::new(research())))
            .content(Arc::new(StaticContent::new(compliant_draft())))
            .seo(Arc::new(TemplateSeoProducer::new()))
            .media(Arc::new(MediaPlanProducer::new()))
            .publisher(self.publisher.clone())
            .review_gateway(self.gateway())
            .metrics(MetricsRecorder::new(self.metrics.clone()))
            .settings(PipelineSettings::default())
            .runs_dir(self.dir.path().join("runs"))
    }

    pub fn orchestrator(&self) -> PipelineOrchestrator {
        self.builder().build().unwrap()
    }
}

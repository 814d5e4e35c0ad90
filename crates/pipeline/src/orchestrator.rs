//! Drives one uploaded document through the provider chain.
//!
//! Every submission becomes an [`ExtractionJob`]. At most one job per flight
//! key runs at a time; later submissions are rejected, never queued. The
//! flight is released by a drop guard, so a cancelled, timed-out or abandoned
//! request never leaves the key locked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use propdraft_core::clock::Clock;
use propdraft_core::config::AppConfig;
use propdraft_core::domain::job::{ExtractionJob, InputFileRef, JobId, JobStatus};
use propdraft_core::domain::proposal::StructuredProposalPayload;
use propdraft_core::domain::provider::{ExtractionMethod, NormalizedDocument, ProviderCapability};
use propdraft_core::errors::PipelineError;
use propdraft_core::parser::HeuristicDataParser;
use propdraft_db::repositories::ExtractionJobRepository;

use crate::providers::{DocumentInput, ProviderClient, ProviderError};
use crate::token_cache::CredentialTokenCache;

pub const GLOBAL_FLIGHT_KEY: &str = "global";
const PDF_MAGIC: &[u8] = b"%PDF-";
const MAX_FINISHED_JOBS: usize = 256;
const BACKOFF_MULTIPLIER: u32 = 2;

/// A provider adapter together with the token cache that feeds it.
#[derive(Clone)]
pub struct ProviderSlot {
    pub client: Arc<dyn ProviderClient>,
    pub tokens: Arc<CredentialTokenCache>,
}

impl ProviderSlot {
    pub fn new(client: Arc<dyn ProviderClient>, tokens: Arc<CredentialTokenCache>) -> Self {
        Self { client, tokens }
    }

    pub fn capability(&self) -> ProviderCapability {
        self.client.capability()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrchestratorSettings {
    pub max_file_bytes: u64,
    pub hard_timeout: Duration,
    pub stuck_threshold: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub confidence_threshold: f32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_file_bytes: config.extraction.max_file_bytes,
            hard_timeout: Duration::from_secs(config.extraction.hard_timeout_secs),
            stuck_threshold: Duration::from_secs(config.extraction.stuck_threshold_secs),
            max_attempts: config.providers.max_attempts,
            retry_base_delay: Duration::from_millis(config.providers.retry_base_delay_ms),
            confidence_threshold: config.extraction.confidence_threshold,
        }
    }

    /// `retry_base_delay * 2^retry`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        self.retry_base_delay.saturating_mul(BACKOFF_MULTIPLIER.saturating_pow(retry))
    }
}

#[derive(Clone, Debug)]
pub struct ExtractionRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub method: ExtractionMethod,
    pub flight_key: Option<String>,
    pub confidence_threshold: Option<f32>,
    pub correlation_id: Option<String>,
}

impl ExtractionRequest {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            method: ExtractionMethod::Auto,
            flight_key: None,
            confidence_threshold: None,
            correlation_id: None,
        }
    }

    pub fn with_method(mut self, method: ExtractionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_flight_key(mut self, flight_key: impl Into<String>) -> Self {
        self.flight_key = Some(flight_key.into());
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ExtractedData {
    pub job: ExtractionJob,
    pub provider: Option<ProviderCapability>,
    pub payload: StructuredProposalPayload,
    pub degraded: bool,
    pub needs_review: bool,
}

impl ExtractedData {
    pub fn correlation_id(&self) -> &str {
        &self.job.correlation_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interrupt {
    Running,
    Cancelled,
    Stuck,
}

struct JobEntry {
    job: ExtractionJob,
    interrupt: watch::Sender<Interrupt>,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, JobEntry>,
    flights: HashMap<String, JobId>,
}

impl Registry {
    fn release_flight(&mut self, flight_key: &str, job_id: &JobId) {
        if self.flights.get(flight_key) == Some(job_id) {
            self.flights.remove(flight_key);
        }
    }

    fn prune_finished(&mut self) {
        let mut finished: Vec<(JobId, _)> = self
            .jobs
            .values()
            .filter(|entry| entry.job.status.is_terminal())
            .map(|entry| (entry.job.id.clone(), entry.job.finished_at))
            .collect();
        if finished.len() <= MAX_FINISHED_JOBS {
            return;
        }

        finished.sort_by_key(|(_, finished_at)| *finished_at);
        let excess = finished.len() - MAX_FINISHED_JOBS;
        for (job_id, _) in finished.into_iter().take(excess) {
            self.jobs.remove(&job_id);
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a flight key for the lifetime of one submission.
struct FlightGuard {
    registry: Arc<Mutex<Registry>>,
    jobs: Arc<dyn ExtractionJobRepository>,
    flight_key: String,
    job_id: JobId,
    clock: Arc<dyn Clock>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let abandoned = {
            let mut registry = lock(&self.registry);
            registry.release_flight(&self.flight_key, &self.job_id);
            registry.jobs.get_mut(&self.job_id).and_then(|entry| {
                entry.job.transition_to(JobStatus::Cancelled, self.clock.now()).ok()?;
                entry.job.last_error =
                    Some("request dropped before the extraction finished".to_string());
                Some(entry.job.clone())
            })
        };
        let Some(job) = abandoned else {
            return;
        };

        info!(
            event_name = "pipeline.extraction.abandoned",
            correlation_id = %job.correlation_id,
            job_id = %job.id,
            "request dropped, extraction job cancelled"
        );
        // Drop cannot await; the store write runs on the ambient runtime when there is one.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let jobs = Arc::clone(&self.jobs);
                handle.spawn(async move { save_job(jobs.as_ref(), job).await });
            }
            Err(_) => warn!(
                event_name = "pipeline.job.persist_failed",
                job_id = %job.id,
                "no runtime available to persist the abandoned job"
            ),
        }
    }
}

async fn save_job(jobs: &dyn ExtractionJobRepository, job: ExtractionJob) {
    let job_id = job.id.clone();
    if let Err(error) = jobs.save(job).await {
        warn!(
            event_name = "pipeline.job.persist_failed",
            job_id = %job_id,
            error = %error,
            "failed to persist extraction job"
        );
    }
}

enum ChainOutcome {
    Finished(Result<(ProviderCapability, NormalizedDocument), PipelineError>),
    TimedOut(String),
    Cancelled,
}

pub struct ExtractionOrchestrator {
    slots: Vec<ProviderSlot>,
    parser: HeuristicDataParser,
    jobs: Arc<dyn ExtractionJobRepository>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
    registry: Arc<Mutex<Registry>>,
}

impl ExtractionOrchestrator {
    pub fn new(
        slots: Vec<ProviderSlot>,
        parser: HeuristicDataParser,
        jobs: Arc<dyn ExtractionJobRepository>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            slots,
            parser,
            jobs,
            clock,
            settings,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn chain(&self) -> Vec<ProviderCapability> {
        self.slots.iter().map(ProviderSlot::capability).collect()
    }

    pub fn running_jobs(&self) -> usize {
        lock(&self.registry)
            .jobs
            .values()
            .filter(|entry| entry.job.status == JobStatus::Running)
            .count()
    }

    pub async fn submit(&self, request: ExtractionRequest) -> Result<ExtractedData, PipelineError> {
        self.validate(&request)?;

        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let flight_key = request
            .flight_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| GLOBAL_FLIGHT_KEY.to_string());
        let input = InputFileRef::from_bytes(&request.file_name, &request.bytes);

        let (guard, mut interrupts, started) = self.begin(correlation_id, flight_key, input)?;
        self.persist_job(started.clone()).await;
        info!(
            event_name = "pipeline.extraction.started",
            correlation_id = %started.correlation_id,
            job_id = %started.id,
            flight_key = %started.flight_key,
            size_bytes = started.input.size_bytes,
            method = ?request.method,
            "extraction started"
        );

        let threshold = request.confidence_threshold.unwrap_or(self.settings.confidence_threshold);
        let document = DocumentInput::new(request.file_name, request.bytes);
        let chain = self.run_chain(&started.id, &document, request.method);

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.settings.hard_timeout, chain) => match result {
                Ok(result) => ChainOutcome::Finished(result),
                Err(_) => ChainOutcome::TimedOut(
                    PipelineError::Timeout { limit_secs: self.settings.hard_timeout.as_secs() }
                        .to_string(),
                ),
            },
            interrupt = wait_for_interrupt(&mut interrupts) => match interrupt {
                Interrupt::Cancelled => ChainOutcome::Cancelled,
                Interrupt::Stuck | Interrupt::Running => {
                    ChainOutcome::TimedOut("released by the stuck-job watchdog".to_string())
                }
            },
        };

        match outcome {
            ChainOutcome::Finished(Ok((provider, normalized))) => {
                let payload = self.parser.parse_document(&normalized);
                let job = self.finish(&started, JobStatus::Succeeded, None);
                drop(guard);
                self.persist_job(job.clone()).await;

                let needs_review = payload.confidence < threshold;
                info!(
                    event_name = "pipeline.extraction.succeeded",
                    correlation_id = %job.correlation_id,
                    job_id = %job.id,
                    provider = %provider,
                    attempts = job.attempt_count,
                    confidence = payload.confidence,
                    needs_review,
                    "extraction finished"
                );
                Ok(ExtractedData {
                    job,
                    provider: Some(provider),
                    payload,
                    degraded: false,
                    needs_review,
                })
            }
            ChainOutcome::Finished(Err(error)) => {
                let job = self.finish(&started, JobStatus::Failed, Some(error.to_string()));
                drop(guard);
                self.persist_job(job.clone()).await;
                warn!(
                    event_name = "pipeline.extraction.failed",
                    correlation_id = %job.correlation_id,
                    job_id = %job.id,
                    error_class = error.error_class(),
                    error = %error,
                    "extraction failed"
                );
                Err(error)
            }
            ChainOutcome::TimedOut(reason) => {
                let job = self.finish(&started, JobStatus::TimedOut, Some(reason.clone()));
                drop(guard);
                self.persist_job(job.clone()).await;
                warn!(
                    event_name = "pipeline.extraction.timed_out",
                    correlation_id = %job.correlation_id,
                    job_id = %job.id,
                    reason = %reason,
                    "extraction degraded to placeholder payload"
                );
                Ok(ExtractedData {
                    job,
                    provider: None,
                    payload: StructuredProposalPayload::placeholder(),
                    degraded: true,
                    needs_review: true,
                })
            }
            ChainOutcome::Cancelled => {
                drop(guard);
                info!(
                    event_name = "pipeline.extraction.cancelled",
                    correlation_id = %started.correlation_id,
                    job_id = %started.id,
                    "extraction cancelled"
                );
                Err(PipelineError::Cancelled(started.id))
            }
        }
    }

    /// Marks a running job cancelled, frees its flight key and wakes the request.
    pub async fn cancel(&self, job_id: &JobId) -> Result<ExtractionJob, PipelineError> {
        let cancelled = {
            let mut registry = lock(&self.registry);
            let entry = registry
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| PipelineError::NotFound(format!("job {job_id}")))?;
            if !entry.job.can_transition_to(JobStatus::Cancelled) {
                return Err(PipelineError::NotFound(format!(
                    "job {job_id} is already {}",
                    entry.job.status.as_str()
                )));
            }

            entry.job.transition_to(JobStatus::Cancelled, self.clock.now())?;
            entry.job.last_error = Some("cancelled by request".to_string());
            entry.interrupt.send_replace(Interrupt::Cancelled);
            let job = entry.job.clone();
            registry.release_flight(&job.flight_key, &job.id);
            job
        };

        self.persist_job(cancelled.clone()).await;
        info!(
            event_name = "pipeline.extraction.cancel_requested",
            correlation_id = %cancelled.correlation_id,
            job_id = %cancelled.id,
            "extraction job cancelled"
        );
        Ok(cancelled)
    }

    /// Current or recently finished job; falls back to the job store.
    pub async fn job(&self, job_id: &JobId) -> Result<ExtractionJob, PipelineError> {
        let cached = lock(&self.registry).jobs.get(job_id).map(|entry| entry.job.clone());
        if let Some(job) = cached {
            return Ok(job);
        }

        match self.jobs.find_by_id(job_id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(PipelineError::NotFound(format!("job {job_id}"))),
            Err(error) => {
                warn!(
                    event_name = "pipeline.job.lookup_failed",
                    job_id = %job_id,
                    error = %error,
                    "job store lookup failed"
                );
                Err(PipelineError::NotFound(format!("job {job_id}")))
            }
        }
    }

    /// Times out every job that has been running longer than the stuck threshold.
    pub async fn sweep_stuck(&self) -> Vec<JobId> {
        let now = self.clock.now();
        let threshold = self.settings.stuck_threshold;

        let released: Vec<ExtractionJob> = {
            let mut registry = lock(&self.registry);
            let mut released = Vec::new();
            for entry in registry.jobs.values_mut() {
                let stuck = entry
                    .job
                    .running_for(now)
                    .to_std()
                    .is_ok_and(|running_for| running_for > threshold);
                if !stuck || entry.job.transition_to(JobStatus::TimedOut, now).is_err() {
                    continue;
                }
                entry.job.last_error = Some(format!(
                    "watchdog released job after {}s in running",
                    threshold.as_secs()
                ));
                entry.interrupt.send_replace(Interrupt::Stuck);
                released.push(entry.job.clone());
            }
            for job in &released {
                registry.release_flight(&job.flight_key, &job.id);
            }
            released
        };

        for job in &released {
            warn!(
                event_name = "pipeline.watchdog.released",
                correlation_id = %job.correlation_id,
                job_id = %job.id,
                flight_key = %job.flight_key,
                "stuck extraction force-terminated"
            );
            self.persist_job(job.clone()).await;
        }
        released.into_iter().map(|job| job.id).collect()
    }

    pub fn spawn_watchdog(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_stuck().await;
            }
        })
    }

    fn validate(&self, request: &ExtractionRequest) -> Result<(), PipelineError> {
        if request.bytes.is_empty() {
            return Err(PipelineError::Validation("file is empty".to_string()));
        }

        let size = request.bytes.len() as u64;
        if size > self.settings.max_file_bytes {
            return Err(PipelineError::Validation(format!(
                "file is {size} bytes, above the {} byte limit",
                self.settings.max_file_bytes
            )));
        }

        if !request.file_name.trim().to_ascii_lowercase().ends_with(".pdf") {
            return Err(PipelineError::Validation(format!(
                "only PDF files are accepted (got `{}`)",
                request.file_name
            )));
        }

        if !request.bytes.starts_with(PDF_MAGIC) {
            return Err(PipelineError::Validation("file content is not a PDF".to_string()));
        }

        Ok(())
    }

    fn begin(
        &self,
        correlation_id: String,
        flight_key: String,
        input: InputFileRef,
    ) -> Result<(FlightGuard, watch::Receiver<Interrupt>, ExtractionJob), PipelineError> {
        let now = self.clock.now();
        let mut registry = lock(&self.registry);
        if let Some(active_job) = registry.flights.get(&flight_key) {
            return Err(PipelineError::ConcurrencyConflict { active_job: active_job.clone() });
        }

        let job_id = JobId::generate();
        let mut job =
            ExtractionJob::pending(job_id, correlation_id, flight_key.clone(), input, now);
        job.transition_to(JobStatus::Running, now)?;

        let (sender, receiver) = watch::channel(Interrupt::Running);
        registry.prune_finished();
        registry.flights.insert(flight_key.clone(), job.id.clone());
        registry.jobs.insert(job.id.clone(), JobEntry { job: job.clone(), interrupt: sender });

        let guard = FlightGuard {
            registry: Arc::clone(&self.registry),
            jobs: Arc::clone(&self.jobs),
            flight_key,
            job_id: job.id.clone(),
            clock: Arc::clone(&self.clock),
        };
        Ok((guard, receiver, job))
    }

    /// Moves the job to `status` unless a cancel or the watchdog already finished it.
    fn finish(
        &self,
        started: &ExtractionJob,
        status: JobStatus,
        error: Option<String>,
    ) -> ExtractionJob {
        let now = self.clock.now();
        let mut registry = lock(&self.registry);
        let Some(entry) = registry.jobs.get_mut(&started.id) else {
            return started.clone();
        };

        if entry.job.transition_to(status, now).is_ok() && error.is_some() {
            entry.job.last_error = error;
        }
        entry.job.clone()
    }

    fn record_attempt(&self, job_id: &JobId, provider: ProviderCapability) {
        let mut registry = lock(&self.registry);
        if let Some(entry) = registry.jobs.get_mut(job_id) {
            entry.job.attempt_count = entry.job.attempt_count.saturating_add(1);
            entry.job.provider = Some(provider);
        }
    }

    async fn run_chain(
        &self,
        job_id: &JobId,
        document: &DocumentInput,
        method: ExtractionMethod,
    ) -> Result<(ProviderCapability, NormalizedDocument), PipelineError> {
        let order = method.order_chain(&self.chain());
        let mut root_cause: Option<PipelineError> = None;

        for capability in order {
            let Some(slot) = self.slots.iter().find(|slot| slot.capability() == capability) else {
                continue;
            };

            match self.run_provider(job_id, slot, document).await {
                Ok(normalized) => return Ok((capability, normalized)),
                Err(error @ PipelineError::Authentication(_)) => return Err(error),
                Err(error) => {
                    warn!(
                        event_name = "pipeline.provider.failover",
                        job_id = %job_id,
                        provider = %capability,
                        error = %error,
                        "provider failed, trying next in chain"
                    );
                    root_cause.get_or_insert(error);
                }
            }
        }

        Err(root_cause.unwrap_or_else(|| {
            PipelineError::Validation("no extraction provider is configured".to_string())
        }))
    }

    /// Retries transient failures with exponential backoff and refreshes the
    /// token once when the provider rejects it.
    async fn run_provider(
        &self,
        job_id: &JobId,
        slot: &ProviderSlot,
        document: &DocumentInput,
    ) -> Result<NormalizedDocument, PipelineError> {
        let capability = slot.capability();
        let mut token = slot.tokens.get_valid_token().await?;
        let mut refreshed = false;
        let mut transient_failures = 0_u32;

        loop {
            self.record_attempt(job_id, capability);
            let error = match slot.client.extract(&token, document).await {
                Ok(normalized) => return Ok(normalized),
                Err(error) => error,
            };

            match error {
                ProviderError::Unauthorized { status } if !refreshed => {
                    warn!(
                        event_name = "pipeline.provider.token_rejected",
                        job_id = %job_id,
                        provider = %capability,
                        status,
                        "provider rejected token, refreshing once"
                    );
                    refreshed = true;
                    token = slot.tokens.refresh_token().await?;
                }
                error if error.is_transient()
                    && transient_failures + 1 < self.settings.max_attempts =>
                {
                    let delay = self.settings.backoff_delay(transient_failures);
                    transient_failures += 1;
                    warn!(
                        event_name = "pipeline.provider.retry",
                        job_id = %job_id,
                        provider = %capability,
                        retry = transient_failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient provider failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                error => {
                    return Err(PipelineError::Provider {
                        provider: capability,
                        message: error.to_string(),
                    })
                }
            }
        }
    }

    async fn persist_job(&self, job: ExtractionJob) {
        save_job(self.jobs.as_ref(), job).await;
    }
}

async fn wait_for_interrupt(receiver: &mut watch::Receiver<Interrupt>) -> Interrupt {
    let signalled = receiver
        .wait_for(|interrupt| *interrupt != Interrupt::Running)
        .await
        .map(|interrupt| *interrupt);
    match signalled {
        Ok(interrupt) => interrupt,
        // Sender gone means the registry entry was pruned; only the timeout can end the wait.
        Err(_) => std::future::pending().await,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use propdraft_core::domain::provider::{NormalizedDocument, ProviderCapability};
    use propdraft_core::domain::token::AccessToken;

    use crate::providers::{DocumentInput, ProviderClient, ProviderError};

    pub const SCENARIO_TEXT: &str =
        "ACME CORP\nCNPJ 12.345.678\nJOAO DA SILVA\nDESCRIÇÃO QTD VALOR\nCadeira 2 UN 100,00";

    pub enum Step {
        Text(&'static str),
        Fail(ProviderError),
        Hang,
    }

    /// Provider double that replays a script, then answers with the scenario text.
    pub struct ScriptedProvider {
        capability: ProviderCapability,
        script: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
        pub entered: Notify,
    }

    impl ScriptedProvider {
        pub fn new(capability: ProviderCapability, script: Vec<Step>) -> Self {
            Self {
                capability,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                entered: Notify::new(),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn capability(&self) -> ProviderCapability {
            self.capability
        }

        async fn extract(
            &self,
            _token: &AccessToken,
            _document: &DocumentInput,
        ) -> Result<NormalizedDocument, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            let step = self.script.lock().expect("script lock").pop_front();
            let text = match step {
                Some(Step::Text(text)) => text,
                Some(Step::Fail(error)) => return Err(error),
                Some(Step::Hang) => std::future::pending().await,
                None => SCENARIO_TEXT,
            };
            Ok(NormalizedDocument {
                provider: self.capability,
                text: text.to_string(),
                tables: Vec::new(),
            })
        }
    }
}

//! Runs generations in the background and hands their results to the UI tick.
//!
//! The background task only ever enqueues values. Session state is written
//! on the UI side, by [`GenerationBridge::drain_once`] and
//! [`GenerationBridge::cancel`], so none of it needs a lock.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tracing::Instrument;

use crate::ai_sdk::{ReasoningEffort, ResponsesApi, SearchContextSize, Tool};
use crate::payload::{PayloadBuilder, ValidationError};
use crate::pricing::{CostEstimator, CostSummary, usage_line};
use crate::protocol::{BridgeEvent, FailureKind, StreamResult, Usage};
use crate::retry::RetryPolicy;
use crate::stream::stream;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a response is already being generated")]
    Busy,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTag {
    User,
    Assistant,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub tag: EntryTag,
    pub text: String,
}

impl TranscriptEntry {
    fn new(tag: EntryTag, text: impl Into<String>) -> Self {
        Self {
            tag,
            text: text.into(),
        }
    }
}

/// Per-turn request options chosen in the UI.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub instructions: Option<String>,
    pub reasoning: Option<ReasoningEffort>,
    pub use_file_search: bool,
    pub vector_store_id: Option<String>,
    pub web_search: bool,
}

impl TurnOptions {
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        if self.use_file_search {
            tools.push(Tool::file_search(self.vector_store_id.iter().cloned()));
        }
        if self.web_search {
            tools.push(Tool::web_search(SearchContextSize::Medium));
        }
        tools
    }

    pub fn describe_tools(&self) -> String {
        let mut parts = Vec::new();
        if self.use_file_search {
            parts.push(format!(
                "file_search({})",
                self.vector_store_id.as_deref().unwrap_or("-")
            ));
        }
        if self.web_search {
            parts.push("web_search".to_string());
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[derive(Debug)]
pub struct GenerationSession {
    pub model: String,
    is_generating: bool,
    cancel: Arc<AtomicBool>,
    interrupt: Arc<Notify>,
    last_response_id: Option<String>,
    last_usage: Option<Usage>,
    cost: CostSummary,
    session_cost: f64,
    session_cost_estimated: bool,
    transcript: Vec<TranscriptEntry>,
    streaming: Option<String>,
    active_model: String,
    active_effort: Option<ReasoningEffort>,
}

impl GenerationSession {
    pub fn new(model: impl Into<String>, last_response_id: Option<String>) -> Self {
        let model = model.into();
        Self {
            active_model: model.clone(),
            model,
            is_generating: false,
            cancel: Arc::new(AtomicBool::new(false)),
            interrupt: Arc::new(Notify::new()),
            last_response_id: last_response_id.filter(|id| !id.is_empty()),
            last_usage: None,
            cost: CostSummary::ZERO,
            session_cost: 0.0,
            session_cost_estimated: false,
            transcript: Vec::new(),
            streaming: None,
            active_effort: None,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn last_response_id(&self) -> Option<&str> {
        self.last_response_id.as_deref()
    }

    pub fn cost(&self) -> CostSummary {
        self.cost
    }

    pub fn session_cost(&self) -> f64 {
        self.session_cost
    }

    pub fn last_usage(&self) -> Option<Usage> {
        self.last_usage
    }

    /// Finalized entries, oldest first.
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Assistant text still being streamed for the current turn.
    pub fn streaming_text(&self) -> Option<&str> {
        self.streaming.as_deref()
    }

    pub fn push_info(&mut self, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry::new(EntryTag::Info, text));
    }

    pub fn push_error(&mut self, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry::new(EntryTag::Error, text));
    }

    pub fn status_line(&self) -> String {
        let turn = match self.last_usage {
            Some(usage) => usage_line(&usage, &self.cost),
            None => self.cost.label(),
        };
        let marker = if self.session_cost_estimated {
            " (Est.)"
        } else {
            ""
        };
        format!("{} | Session: ${:.5}{}", turn, self.session_cost, marker)
    }

    /// Forgets the conversation chain and zeroes the cost counters.
    pub fn reset_context(&mut self) {
        self.last_response_id = None;
        self.last_usage = None;
        self.cost = CostSummary::ZERO;
        self.session_cost = 0.0;
        self.session_cost_estimated = false;
    }

    pub fn write_transcript(&self, path: &Path, options: &TurnOptions) -> std::io::Result<()> {
        let mut out = String::new();
        let _ = writeln!(out, "# scribe transcript");
        let _ = writeln!(out, "model: {}", self.model);
        let _ = writeln!(out, "tools: {}", options.describe_tools());
        if let Some(id) = &self.last_response_id {
            let _ = writeln!(out, "last_response_id: {}", id);
        }
        let _ = writeln!(out, "{}", self.status_line());
        for entry in &self.transcript {
            let label = match entry.tag {
                EntryTag::User => "You",
                EntryTag::Assistant => "Assistant",
                EntryTag::Error => "Error",
                EntryTag::Info => "System",
            };
            let _ = write!(out, "\n[{}]\n{}\n", label, entry.text);
        }
        std::fs::write(path, out)
    }

    fn close_streaming(&mut self) {
        if let Some(text) = self.streaming.take()
            && !text.is_empty()
        {
            self.transcript
                .push(TranscriptEntry::new(EntryTag::Assistant, text));
        }
    }

    fn apply(&mut self, event: BridgeEvent, estimator: &CostEstimator) {
        match event {
            BridgeEvent::Result(StreamResult::TextDelta { text }) => {
                self.streaming.get_or_insert_with(String::new).push_str(&text);
            }
            BridgeEvent::Result(StreamResult::ResponseCreated { response_id }) => {
                tracing::debug!(%response_id, "response created");
                self.last_response_id = Some(response_id);
            }
            BridgeEvent::Result(StreamResult::Usage(usage)) => {
                let cost = estimator.estimate(&self.active_model, &usage);
                if let Some(amount) = cost.total_cost {
                    self.session_cost += amount;
                    self.session_cost_estimated |= cost.is_estimated;
                }
                self.last_usage = Some(usage);
                self.cost = cost;
            }
            BridgeEvent::Result(StreamResult::Error { kind, message }) => {
                self.close_streaming();
                self.push_error(format!("{}: {}", kind.label(), message));
                if kind == FailureKind::UnsupportedReasoningEffort {
                    let effort = self
                        .active_effort
                        .map(ReasoningEffort::as_str)
                        .unwrap_or("default");
                    self.push_info(format!(
                        "Model '{}' does not accept reasoning effort '{}'. Pick another level with /effort (one of: {}).",
                        self.active_model,
                        effort,
                        ReasoningEffort::ALL.map(ReasoningEffort::as_str).join(", ")
                    ));
                }
            }
            BridgeEvent::Notice(text) => {
                self.close_streaming();
                self.push_info(text);
            }
            BridgeEvent::Finished => {
                self.close_streaming();
                self.is_generating = false;
            }
        }
    }
}

pub struct GenerationBridge {
    api: Arc<dyn ResponsesApi>,
    policy: RetryPolicy,
    estimator: CostEstimator,
    tx: mpsc::Sender<BridgeEvent>,
    rx: mpsc::Receiver<BridgeEvent>,
    session: GenerationSession,
}

impl GenerationBridge {
    pub fn new(
        api: Arc<dyn ResponsesApi>,
        policy: RetryPolicy,
        estimator: CostEstimator,
        session: GenerationSession,
    ) -> Self {
        Self::with_capacity(api, policy, estimator, session, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        api: Arc<dyn ResponsesApi>,
        policy: RetryPolicy,
        estimator: CostEstimator,
        session: GenerationSession,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            api,
            policy,
            estimator,
            tx,
            rx,
            session,
        }
    }

    pub fn session(&self) -> &GenerationSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut GenerationSession {
        &mut self.session
    }

    /// Starts a generation. While one is running, nothing changes and `Busy`
    /// is returned.
    pub fn submit(&mut self, text: &str, options: &TurnOptions) -> Result<(), SubmitError> {
        if self.session.is_generating {
            return Err(SubmitError::Busy);
        }

        let payload = PayloadBuilder::new(self.session.model.clone(), text)
            .instructions(options.instructions.clone())
            .reasoning(options.reasoning)
            .tools(options.tools())
            .previous_response_id(self.session.last_response_id.clone())
            .build()?;

        self.session.is_generating = true;
        self.session.cancel.store(false, Ordering::SeqCst);
        self.session.interrupt = Arc::new(Notify::new());
        self.session.active_model = payload.model.clone();
        self.session.active_effort = options.reasoning;
        self.session.streaming = None;
        self.session
            .transcript
            .push(TranscriptEntry::new(EntryTag::User, text));

        let generation_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "generation",
            id = %generation_id,
            model = %payload.model,
            chained = payload.previous_response_id.is_some()
        );
        let api = Arc::clone(&self.api);
        let policy = self.policy.clone();
        let cancel = Arc::clone(&self.session.cancel);
        let interrupt = Arc::clone(&self.session.interrupt);
        let tx = self.tx.clone();

        tokio::spawn(
            async move {
                tracing::info!("generation started");
                let mut results = std::pin::pin!(stream(api, payload, policy));
                let mut delivered = 0usize;
                loop {
                    // A cancel also wakes a worker parked in retry backoff or
                    // on a silent connection.
                    let next = tokio::select! {
                        biased;
                        _ = interrupt.notified() => {
                            tracing::info!(delivered, "cancel observed while waiting, abandoning stream");
                            break;
                        }
                        next = results.next() => next,
                    };
                    let Some(result) = next else { break };
                    if cancel.load(Ordering::SeqCst) {
                        tracing::info!(delivered, "cancel observed, dropping remaining output");
                        break;
                    }
                    if tx.send(BridgeEvent::Result(result)).await.is_err() {
                        tracing::warn!("result queue closed");
                        return;
                    }
                    delivered += 1;
                }
                tracing::info!(delivered, "generation finished");
                let _ = tx.send(BridgeEvent::Finished).await;
            }
            .instrument(span),
        );

        Ok(())
    }

    /// Requests cooperative cancellation of the running generation.
    pub fn cancel(&mut self) {
        if !self.session.is_generating {
            return;
        }
        if !self.session.cancel.swap(true, Ordering::SeqCst) {
            tracing::info!("cancel requested");
            self.session.interrupt.notify_one();
            let notice = BridgeEvent::Notice("[SYSTEM] Generation interrupted by user.".to_string());
            if let Err(err) = self.tx.try_send(notice) {
                tracing::debug!(error = %err, "result queue unavailable, applying cancel notice directly");
                self.session.apply(err.into_inner(), &self.estimator);
            }
        }
    }

    /// Applies up to `max_items` queued results to the session without
    /// blocking, returning how many were applied.
    pub fn drain_once(&mut self, max_items: usize) -> usize {
        let mut applied = 0;
        while applied < max_items {
            match self.rx.try_recv() {
                Ok(event) => {
                    self.session.apply(event, &self.estimator);
                    applied += 1;
                }
                Err(_) => break,
            }
        }
        applied
    }

    /// Returns `false` and leaves state alone while a generation is running.
    pub fn reset_context(&mut self) -> bool {
        if self.session.is_generating {
            return false;
        }
        self.session.reset_context();
        true
    }
}

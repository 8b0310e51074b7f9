//! One poll cycle: change feed → gates → classify → generate → send.
//!
//! Cycles never overlap: the cursor tracker lock doubles as the in-flight
//! guard, and a tick that cannot take it is dropped. Single-message
//! failures are recorded and never stop the batch or the cursor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::activity::{ActivityEvent, ActivityKind, ActivityRecorder};
use crate::config::{AutoReplyConfig, WorkerConfig};
use crate::cursor::CursorTracker;
use crate::error::PipelineError;
use crate::mailbox::{
    ChangeFeed, ChangeKind, ComposedReply, Cursor, Message, MessageStore, reply_subject,
};
use crate::pipeline::{
    Classification, Classifier, GateContext, GateDecision, GatePipeline, RelevanceFilter,
    ReplyGenerator, with_timeout,
};
use crate::state::WorkerState;
use crate::store::{AutoReplyRecord, ConfigStore, ReplyRecordStore};
use crate::worker::state::{CycleReport, MessageOutcome, PollState};
use crate::worker::switch::AutoReplySwitch;

/// External collaborators of the orchestrator.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub mailbox: Arc<dyn MessageStore>,
    pub classifier: Arc<dyn Classifier>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub configs: Arc<dyn ConfigStore>,
    pub records: Arc<dyn ReplyRecordStore>,
    pub activity: Arc<dyn ActivityRecorder>,
}

/// Message facts carried into the activity feed.
struct OutcomeDetail {
    sender: String,
    subject: String,
}

/// Identity and settings resolved at the start of a cycle.
struct CycleScope {
    user_email: String,
    account_address: String,
    config: AutoReplyConfig,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
    state: WorkerState,
    gates: GatePipeline,
    cursor: Mutex<CursorTracker>,
    switch: AutoReplySwitch,
    user_email: Option<String>,
    call_timeout: Duration,
    state_tx: watch::Sender<PollState>,
}

impl Orchestrator {
    pub fn new(
        config: &WorkerConfig,
        deps: OrchestratorDeps,
        state: WorkerState,
        switch: AutoReplySwitch,
    ) -> Self {
        let gates = GatePipeline::new(
            state.clone(),
            Arc::clone(&deps.classifier),
            RelevanceFilter::new(&config.relevance_keywords),
            config.call_timeout,
        );
        let (state_tx, _) = watch::channel(PollState::Idle);

        Self {
            deps,
            state,
            gates,
            cursor: Mutex::new(CursorTracker::new()),
            switch,
            user_email: config.user_email.as_ref().map(|e| e.to_lowercase()),
            call_timeout: config.call_timeout,
            state_tx,
        }
    }

    /// Observe poll loop state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<PollState> {
        self.state_tx.subscribe()
    }

    pub fn poll_state(&self) -> PollState {
        *self.state_tx.borrow()
    }

    pub fn switch(&self) -> &AutoReplySwitch {
        &self.switch
    }

    pub fn worker_state(&self) -> &WorkerState {
        &self.state
    }

    /// Last processed position, `None` before bootstrap or while a cycle runs.
    pub fn current_cursor(&self) -> Option<Cursor> {
        self.cursor.try_lock().ok().and_then(|c| c.current())
    }

    fn set_state(&self, next: PollState) {
        let current = *self.state_tx.borrow();
        if current != next && !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Unexpected poll state transition");
        }
        self.state_tx.send_replace(next);
    }

    async fn record(&self, user_email: &str, kind: ActivityKind, now: DateTime<Utc>) {
        self.deps
            .activity
            .append(ActivityEvent::new(user_email, kind, now))
            .await;
    }

    /// Run one cycle at the current time.
    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle with an explicit clock.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let Ok(mut cursor) = self.cursor.try_lock() else {
            debug!("Previous cycle still running, dropping tick");
            return CycleReport::Overlapped;
        };

        let stale = self.poll_state();
        if stale != PollState::Idle {
            warn!(state = %stale, "Previous cycle ended without returning to idle");
            self.state_tx.send_replace(PollState::Idle);
        }

        // Stage 1, global half.
        if !self.switch.is_enabled() {
            return CycleReport::Disabled {
                reason: "global switch off".into(),
            };
        }

        let scope = match self.resolve_scope(now).await {
            Ok(scope) => scope,
            Err(report) => return report,
        };

        self.set_state(PollState::Fetching);
        let report = self.fetch_and_process(&mut cursor, &scope, now).await;
        self.set_state(PollState::Idle);

        match &report {
            CycleReport::Processed { cursor, outcomes } => info!(
                cursor = %cursor,
                events = outcomes.len(),
                replied = report.replied(),
                "Poll cycle complete"
            ),
            other => debug!(result = other.kind(), "Poll cycle complete"),
        }
        report
    }

    /// Identify the account and load the per-user config (stage 1, user half).
    async fn resolve_scope(&self, now: DateTime<Utc>) -> Result<CycleScope, CycleReport> {
        let account_address = with_timeout("account", self.call_timeout, async {
            self.deps
                .mailbox
                .account_address()
                .await
                .map_err(PipelineError::Fetch)
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Could not resolve mailbox account");
            CycleReport::FetchFailed {
                error: e.to_string(),
            }
        })?
        .to_lowercase();

        let user_email = self
            .user_email
            .clone()
            .unwrap_or_else(|| account_address.clone());

        let config = match self.deps.configs.get(&user_email).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(user = %user_email, "No auto-reply config, skipping cycle");
                return Err(CycleReport::Disabled {
                    reason: "not configured".into(),
                });
            }
            Err(e) => {
                warn!(user = %user_email, error = %e, "Failed to load auto-reply config");
                let reason = format!("config unavailable: {e}");
                self.record(
                    &user_email,
                    ActivityKind::CycleDisabled {
                        reason: reason.clone(),
                    },
                    now,
                )
                .await;
                return Err(CycleReport::Disabled { reason });
            }
        };

        if let Err(e) = config.validate() {
            warn!(user = %user_email, error = %e, "Invalid auto-reply config");
            let reason = format!("invalid config: {e}");
            self.record(
                &user_email,
                ActivityKind::CycleDisabled {
                    reason: reason.clone(),
                },
                now,
            )
            .await;
            return Err(CycleReport::Disabled { reason });
        }

        if !config.enabled {
            return Err(CycleReport::Disabled {
                reason: "disabled for user".into(),
            });
        }

        Ok(CycleScope {
            user_email,
            account_address,
            config,
        })
    }

    async fn fetch_and_process(
        &self,
        cursor: &mut CursorTracker,
        scope: &CycleScope,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let Some(position) = cursor.current() else {
            return self.bootstrap(cursor, scope, now).await;
        };

        let feed = with_timeout("changes", self.call_timeout, async {
            self.deps
                .mailbox
                .changes_since(position)
                .await
                .map_err(PipelineError::Fetch)
        })
        .await;

        let changes = match feed {
            Ok(ChangeFeed::Changes(changes)) => changes,
            Ok(ChangeFeed::Invalidated) => return self.reset(cursor, scope, now).await,
            Err(e) => {
                warn!(cursor = %position, error = %e, "Change feed unavailable");
                self.record(
                    &scope.user_email,
                    ActivityKind::FetchFailed {
                        error: e.to_string(),
                    },
                    now,
                )
                .await;
                return CycleReport::FetchFailed {
                    error: e.to_string(),
                };
            }
        };

        if changes.cursor <= position {
            if changes.cursor < position {
                warn!(
                    cursor = %position,
                    reported = %changes.cursor,
                    "Mailbox reported an older cursor"
                );
            } else if !changes.events.is_empty() {
                debug!(events = changes.events.len(), "Ignoring events at unchanged cursor");
            }
            self.set_state(PollState::NoChange);
            return CycleReport::NoChange { cursor: position };
        }

        self.set_state(PollState::ProcessingBatch);
        info!(
            from = %position,
            to = %changes.cursor,
            events = changes.events.len(),
            "Processing change batch"
        );

        let ctx = GateContext {
            config: &scope.config,
            user_email: &scope.user_email,
            account_address: &scope.account_address,
        };

        let mut outcomes = Vec::with_capacity(changes.events.len());
        for event in &changes.events {
            if event.kind != ChangeKind::MessageAdded {
                continue;
            }
            let (outcome, detail) = self.process_event(&event.message_id, &ctx, now).await;
            self.record_outcome(&scope.user_email, &outcome, detail, now).await;
            outcomes.push(outcome);
        }

        cursor.advance(changes.cursor);
        CycleReport::Processed {
            cursor: changes.cursor,
            outcomes,
        }
    }

    async fn bootstrap(
        &self,
        cursor: &mut CursorTracker,
        scope: &CycleScope,
        now: DateTime<Utc>,
    ) -> CycleReport {
        match self.head_cursor().await {
            Ok(head) => {
                cursor.initialize(head);
                info!(cursor = %head, "Cursor initialized, history before it is ignored");
                self.record(
                    &scope.user_email,
                    ActivityKind::CursorInitialized { cursor: head },
                    now,
                )
                .await;
                CycleReport::Bootstrapped { cursor: head }
            }
            Err(e) => {
                warn!(error = %e, "Could not read mailbox head");
                CycleReport::FetchFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn reset(
        &self,
        cursor: &mut CursorTracker,
        scope: &CycleScope,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let previous = cursor.current();
        match self.head_cursor().await {
            Ok(head) => {
                cursor.initialize(head);
                warn!(
                    previous = ?previous.map(|c| c.position()),
                    cursor = %head,
                    "Cursor invalidated; events in the gap are skipped"
                );
                self.record(
                    &scope.user_email,
                    ActivityKind::CursorReset {
                        previous,
                        cursor: head,
                    },
                    now,
                )
                .await;
                CycleReport::Reset {
                    previous,
                    cursor: head,
                }
            }
            Err(e) => {
                warn!(error = %e, "Cursor invalidated and mailbox head unavailable");
                CycleReport::FetchFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn head_cursor(&self) -> Result<Cursor, PipelineError> {
        with_timeout("cursor", self.call_timeout, async {
            self.deps
                .mailbox
                .current_cursor()
                .await
                .map_err(PipelineError::Fetch)
        })
        .await
    }

    /// Stages 2–11 plus generate/send/bookkeeping for one event.
    async fn process_event(
        &self,
        message_id: &str,
        ctx: &GateContext<'_>,
        now: DateTime<Utc>,
    ) -> (MessageOutcome, Option<OutcomeDetail>) {
        if let Some(reason) = self.gates.admit(message_id, now).await {
            let outcome = MessageOutcome::Skipped {
                message_id: message_id.to_string(),
                reason,
            };
            return (outcome, None);
        }

        let message = match with_timeout("fetch", self.call_timeout, async {
            self.deps
                .mailbox
                .get(message_id)
                .await
                .map_err(PipelineError::Fetch)
        })
        .await
        {
            Ok(message) => message,
            Err(e) => return (failed(message_id, "fetch", e), None),
        };

        let detail = OutcomeDetail {
            sender: message.sender_address(),
            subject: reply_subject(&message.subject),
        };

        let classification = match self.gates.evaluate(&message, ctx, now).await {
            GateDecision::Eligible(classification) => classification,
            GateDecision::Skipped { reason, .. } => {
                debug!(id = %message_id, reason = %reason, "Message skipped");
                let outcome = MessageOutcome::Skipped {
                    message_id: message_id.to_string(),
                    reason,
                };
                return (outcome, Some(detail));
            }
        };

        let outcome = self.reply(&message, &classification, ctx, now).await;
        (outcome, Some(detail))
    }

    async fn reply(
        &self,
        message: &Message,
        classification: &Classification,
        ctx: &GateContext<'_>,
        now: DateTime<Utc>,
    ) -> MessageOutcome {
        let content = format!(
            "Subject: {}\nFrom: {}\n\n{}",
            message.subject, message.from_address, message.body_text
        );

        let body = match with_timeout(
            "generate",
            self.call_timeout,
            self.deps.generator.generate(&content, classification),
        )
        .await
        {
            Ok(body) => body,
            Err(e) => return failed(&message.id, "generate", e),
        };

        let reply = ComposedReply::reply_to(message, body);
        let ack = match with_timeout("send", self.call_timeout, async {
            self.deps
                .mailbox
                .send(&reply, &message.thread_id)
                .await
                .map_err(PipelineError::Send)
        })
        .await
        {
            Ok(ack) => ack,
            Err(e) => return failed(&message.id, "send", e),
        };

        let sender = message.sender_address();
        let window = self.state.rate_limiter.increment(ctx.user_email, now).await;
        self.state.cooldown.record(&sender, now).await;

        let record = AutoReplyRecord::new(ctx.user_email, &sender, &message.subject, now);
        if let Err(e) = self.deps.records.append(&record).await {
            warn!(id = %message.id, error = %e, "Failed to store reply record");
        }

        info!(
            id = %message.id,
            sent_id = %ack.message_id,
            recipient = %sender,
            category = %classification.category,
            window_count = window.count,
            "Auto-reply sent"
        );

        MessageOutcome::Replied {
            message_id: message.id.clone(),
            recipient: sender,
            category: classification.category.clone(),
        }
    }

    async fn record_outcome(
        &self,
        user_email: &str,
        outcome: &MessageOutcome,
        detail: Option<OutcomeDetail>,
        now: DateTime<Utc>,
    ) {
        let kind = match outcome {
            MessageOutcome::Replied {
                message_id,
                recipient,
                category,
            } => ActivityKind::Replied {
                message_id: message_id.clone(),
                recipient: recipient.clone(),
                subject: detail.map(|d| d.subject).unwrap_or_default(),
                category: category.clone(),
            },
            MessageOutcome::Skipped { message_id, reason } => ActivityKind::Skipped {
                message_id: message_id.clone(),
                reason: reason.label().to_string(),
                detail: reason.to_string(),
                sender: detail.map(|d| d.sender),
            },
            MessageOutcome::Failed {
                message_id,
                stage,
                error,
            } => ActivityKind::Failed {
                message_id: message_id.clone(),
                stage: stage.to_string(),
                error: error.clone(),
            },
        };
        self.record(user_email, kind, now).await;
    }
}

fn failed(message_id: &str, stage: &'static str, error: PipelineError) -> MessageOutcome {
    warn!(id = %message_id, stage, error = %error, "Message processing failed");
    MessageOutcome::Failed {
        message_id: message_id.to_string(),
        stage,
        error: error.to_string(),
    }
}

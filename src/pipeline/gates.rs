//! Ordered, short-circuiting eligibility checks.
//!
//! Stage 1 (global/per-user switch) is applied by the orchestrator for the
//! whole cycle. Stage 2 (dedup) runs before the message is fetched, see
//! [`GatePipeline::admit`]. Stages 3–11 run in [`GatePipeline::evaluate`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::AutoReplyConfig;
use crate::mailbox::Message;
use crate::pipeline::classifier::{Classification, Classifier};
use crate::pipeline::relevance::RelevanceFilter;
use crate::pipeline::with_timeout;
use crate::state::WorkerState;

/// Why a message did not get a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    Duplicate,
    SelfReplyLoop,
    Outgoing,
    Cooldown,
    ClassificationFailed { error: String },
    Irrelevant,
    NotBusiness,
    CategoryDisabled { category: String },
    LowConfidence { confidence: f32, min_confidence: f32 },
    RateLimited,
}

impl SkipReason {
    /// Stable label recorded in activity events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::SelfReplyLoop => "self-reply-loop",
            Self::Outgoing => "outgoing",
            Self::Cooldown => "cooldown",
            Self::ClassificationFailed { .. } => "classification failed",
            Self::Irrelevant => "irrelevant",
            Self::NotBusiness => "not business",
            Self::CategoryDisabled { .. } => "category disabled",
            Self::LowConfidence { .. } => "low confidence",
            Self::RateLimited => "rate limited",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClassificationFailed { error } => write!(f, "{}: {error}", self.label()),
            Self::CategoryDisabled { category } => write!(f, "{}: {category}", self.label()),
            Self::LowConfidence {
                confidence,
                min_confidence,
            } => write!(f, "{}: {confidence:.2} < {min_confidence:.2}", self.label()),
            other => f.write_str(other.label()),
        }
    }
}

/// Outcome of stages 3–11.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Eligible(Classification),
    Skipped {
        reason: SkipReason,
        /// Present when the skip happened after classification.
        classification: Option<Classification>,
    },
}

impl GateDecision {
    fn skip(reason: SkipReason) -> Self {
        Self::Skipped {
            reason,
            classification: None,
        }
    }

    fn skip_classified(reason: SkipReason, classification: Classification) -> Self {
        Self::Skipped {
            reason,
            classification: Some(classification),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Eligible(_) => "eligible",
            Self::Skipped { reason, .. } => reason.label(),
        }
    }
}

/// Per-cycle inputs: the config snapshot and the identities it applies to.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub config: &'a AutoReplyConfig,
    /// Key for the per-user rate limit.
    pub user_email: &'a str,
    /// Owner of the mailbox, lower-cased.
    pub account_address: &'a str,
}

pub struct GatePipeline {
    state: WorkerState,
    classifier: Arc<dyn Classifier>,
    relevance: RelevanceFilter,
    call_timeout: Duration,
}

impl GatePipeline {
    pub fn new(
        state: WorkerState,
        classifier: Arc<dyn Classifier>,
        relevance: RelevanceFilter,
        call_timeout: Duration,
    ) -> Self {
        Self {
            state,
            classifier,
            relevance,
            call_timeout,
        }
    }

    /// Stage 2: admit `message_id` into the pipeline, marking it processed.
    ///
    /// Returns `Some(Duplicate)` if it was already admitted within the TTL.
    pub async fn admit(&self, message_id: &str, now: DateTime<Utc>) -> Option<SkipReason> {
        if self.state.dedup.check_and_mark(message_id, now).await {
            return None;
        }
        let first_seen = self.state.dedup.processed_at(message_id, now).await;
        debug!(id = %message_id, first_seen = ?first_seen, "Duplicate message");
        Some(SkipReason::Duplicate)
    }

    /// Stages 3–11, in order. Calls the classifier only once stages 3–5 pass.
    pub async fn evaluate(
        &self,
        message: &Message,
        ctx: &GateContext<'_>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        // 3
        if message.is_auto_reply() {
            return GateDecision::skip(SkipReason::SelfReplyLoop);
        }

        // 4
        let sender = message.sender_address();
        if message.is_draft_or_sent() || is_own_address(&sender, ctx) {
            return GateDecision::skip(SkipReason::Outgoing);
        }

        // 5
        if self.state.cooldown.is_cooling(&sender, now).await {
            let left = self.state.cooldown.remaining(&sender, now).await;
            debug!(%sender, remaining_secs = ?left.map(|d| d.num_seconds()), "Sender cooling down");
            return GateDecision::skip(SkipReason::Cooldown);
        }

        // 6
        let classification = match with_timeout(
            "classify",
            self.call_timeout,
            self.classifier
                .analyze(&message.subject, &message.body_text, &message.from_address),
        )
        .await
        {
            Ok(c) => c,
            Err(e) => {
                return GateDecision::skip(SkipReason::ClassificationFailed {
                    error: e.to_string(),
                });
            }
        };

        // 7
        if !self.relevance.is_relevant(&message.subject, &message.body_text) {
            return GateDecision::skip_classified(SkipReason::Irrelevant, classification);
        }

        // 8
        if !classification.is_business {
            return GateDecision::skip_classified(SkipReason::NotBusiness, classification);
        }

        // 9
        if !ctx.config.allows_category(&classification.category) {
            let category = classification.category.clone();
            return GateDecision::skip_classified(
                SkipReason::CategoryDisabled { category },
                classification,
            );
        }

        // 10
        if classification.confidence < ctx.config.min_confidence {
            let reason = SkipReason::LowConfidence {
                confidence: classification.confidence,
                min_confidence: ctx.config.min_confidence,
            };
            return GateDecision::skip_classified(reason, classification);
        }

        // 11
        if !self
            .state
            .rate_limiter
            .check(ctx.user_email, ctx.config.max_replies_per_hour, now)
            .await
        {
            return GateDecision::skip_classified(SkipReason::RateLimited, classification);
        }

        GateDecision::Eligible(classification)
    }
}

fn is_own_address(sender: &str, ctx: &GateContext<'_>) -> bool {
    !sender.is_empty()
        && (sender.eq_ignore_ascii_case(ctx.account_address)
            || sender.eq_ignore_ascii_case(ctx.user_email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::error::PipelineError;
    use crate::pipeline::classifier::Priority;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockClassifier {
        verdict: Result<Classification, String>,
        calls: AtomicUsize,
    }

    impl MockClassifier {
        fn returning(category: &str, is_business: bool, confidence: f32) -> Arc<Self> {
            Arc::new(Self {
                verdict: Ok(Classification {
                    category: category.into(),
                    is_business,
                    priority: Priority::Medium,
                    urgency: false,
                    confidence,
                    summary: "summary".into(),
                    suggested_reply: None,
                }),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                verdict: Err("service down".into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Classifier for MockClassifier {
        async fn analyze(&self, _: &str, _: &str, _: &str) -> Result<Classification, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict
                .clone()
                .map_err(PipelineError::ClassifierUnavailable)
        }
    }

    fn message(from: &str, subject: &str) -> Message {
        Message {
            id: "m1".into(),
            thread_id: "t1".into(),
            subject: subject.into(),
            from_address: from.into(),
            body_text: "Could you send me a quote?".into(),
            labels: vec!["INBOX".into()],
            headers: vec![],
        }
    }

    fn pipeline(classifier: Arc<MockClassifier>) -> (GatePipeline, WorkerState) {
        let state = WorkerState::new(&WorkerConfig::default());
        let gates = GatePipeline::new(
            state.clone(),
            classifier,
            RelevanceFilter::default_keywords(),
            Duration::from_secs(5),
        );
        (gates, state)
    }

    fn enabled_config() -> AutoReplyConfig {
        AutoReplyConfig {
            enabled: true,
            ..Default::default()
        }
    }

    fn ctx(config: &AutoReplyConfig) -> GateContext<'_> {
        GateContext {
            config,
            user_email: "owner@example.com",
            account_address: "owner@example.com",
        }
    }

    #[tokio::test]
    async fn admit_marks_once() {
        let (gates, _) = pipeline(MockClassifier::returning("Partnership", true, 0.9));
        let now = Utc::now();
        assert_eq!(gates.admit("m1", now).await, None);
        assert_eq!(gates.admit("m1", now).await, Some(SkipReason::Duplicate));
    }

    #[tokio::test]
    async fn self_reply_marker_skips_without_classifying() {
        let classifier = MockClassifier::returning("Pricing Question", true, 0.9);
        let (gates, _) = pipeline(classifier.clone());
        let mut msg = message("alice@example.com", "Re: pricing");
        msg.headers.push(("X-Auto-Reply".into(), "true".into()));
        let config = enabled_config();

        let decision = gates.evaluate(&msg, &ctx(&config), Utc::now()).await;
        assert_eq!(decision.label(), "self-reply-loop");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn own_and_sent_messages_are_outgoing() {
        let classifier = MockClassifier::returning("Pricing Question", true, 0.9);
        let (gates, _) = pipeline(classifier.clone());
        let config = enabled_config();

        let own = message("Owner <OWNER@example.com>", "pricing");
        assert_eq!(gates.evaluate(&own, &ctx(&config), Utc::now()).await.label(), "outgoing");

        let mut sent = message("alice@example.com", "pricing");
        sent.labels.push("SENT".into());
        assert_eq!(gates.evaluate(&sent, &ctx(&config), Utc::now()).await.label(), "outgoing");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cooldown_skips_before_classification() {
        let classifier = MockClassifier::returning("Pricing Question", true, 0.9);
        let (gates, state) = pipeline(classifier.clone());
        let now = Utc::now();
        state.cooldown.record("alice@example.com", now).await;
        let config = enabled_config();

        let decision = gates
            .evaluate(&message("Alice <alice@example.com>", "pricing"), &ctx(&config), now)
            .await;
        assert_eq!(decision.label(), "cooldown");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn classifier_failure_fails_closed() {
        let (gates, _) = pipeline(MockClassifier::failing());
        let config = enabled_config();
        let decision = gates
            .evaluate(&message("alice@example.com", "pricing"), &ctx(&config), Utc::now())
            .await;
        match decision {
            GateDecision::Skipped {
                reason: SkipReason::ClassificationFailed { error },
                classification: None,
            } => assert!(error.contains("service down")),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[tokio::test]
    async fn irrelevant_after_classification() {
        let (gates, _) = pipeline(MockClassifier::returning("Pricing Question", true, 0.9));
        let config = enabled_config();
        let mut msg = message("alice@example.com", "Lunch?");
        msg.body_text = "Are you free tomorrow?".into();
        let decision = gates.evaluate(&msg, &ctx(&config), Utc::now()).await;
        assert_eq!(decision.label(), "irrelevant");
    }

    #[tokio::test]
    async fn not_business_checked_before_category() {
        let (gates, _) = pipeline(MockClassifier::returning("Spam", false, 0.95));
        let config = enabled_config();
        let decision = gates
            .evaluate(&message("alice@example.com", "pricing"), &ctx(&config), Utc::now())
            .await;
        assert_eq!(decision.label(), "not business");
    }

    #[tokio::test]
    async fn disabled_category_skips() {
        let (gates, _) = pipeline(MockClassifier::returning("Support Request", true, 0.95));
        let config = enabled_config();
        let decision = gates
            .evaluate(&message("alice@example.com", "pricing"), &ctx(&config), Utc::now())
            .await;
        assert_eq!(
            decision,
            GateDecision::Skipped {
                reason: SkipReason::CategoryDisabled {
                    category: "Support Request".into()
                },
                classification: Some(Classification {
                    category: "Support Request".into(),
                    is_business: true,
                    priority: Priority::Medium,
                    urgency: false,
                    confidence: 0.95,
                    summary: "summary".into(),
                    suggested_reply: None,
                }),
            }
        );
    }

    #[tokio::test]
    async fn confidence_below_threshold_skips() {
        let config = enabled_config();
        let (low, _) = pipeline(MockClassifier::returning("Pricing Question", true, 0.65));
        let decision = low
            .evaluate(&message("alice@example.com", "pricing"), &ctx(&config), Utc::now())
            .await;
        assert_eq!(decision.label(), "low confidence");

        let (exact, _) = pipeline(MockClassifier::returning("Pricing Question", true, 0.7));
        let decision = exact
            .evaluate(&message("alice@example.com", "pricing"), &ctx(&config), Utc::now())
            .await;
        assert_eq!(decision.label(), "eligible");
    }

    #[tokio::test]
    async fn rate_limit_is_last_gate() {
        let (gates, state) = pipeline(MockClassifier::returning("Pricing Question", true, 0.9));
        let config = AutoReplyConfig {
            enabled: true,
            max_replies_per_hour: 1,
            ..Default::default()
        };
        let now = Utc::now();
        state.rate_limiter.increment("owner@example.com", now).await;

        let decision = gates
            .evaluate(&message("alice@example.com", "pricing"), &ctx(&config), now)
            .await;
        assert_eq!(decision.label(), "rate limited");
        assert_eq!(
            state.rate_limiter.snapshot("owner@example.com", now).await.unwrap().count,
            1
        );
    }

    #[test]
    fn skip_reason_display_includes_detail() {
        let reason = SkipReason::LowConfidence {
            confidence: 0.65,
            min_confidence: 0.7,
        };
        assert_eq!(reason.to_string(), "low confidence: 0.65 < 0.70");
        assert_eq!(SkipReason::Outgoing.to_string(), "outgoing");
    }
}

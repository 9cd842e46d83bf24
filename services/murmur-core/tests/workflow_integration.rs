//! Integration tests for the approval-gated action workflow.
//!
//! These tests wire real core components together (broker, limiter,
//! pending guard, tier router) around scripted collaborators and verify:
//! - End-to-end approve and publish flow
//! - Duplicate suppression across concurrent sweeps
//! - Regeneration driven by human decisions
//! - Tier fallback feeding the workflow's draft step

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use murmur_common::{Error, Result};
use murmur_core::{
    ActionId, ActionOutcome, ActionSpec, ActionWorkflow, ApprovalBroker, ConfirmationOutcome,
    ConfirmationRequest, DecisionChannel, DecisionEvent, DeliveryId, Generator, Insight,
    PendingActionGuard, RateLimiter, ResourceLimits, SkipReason, StateStore, TierRouter,
    WorkflowConfig, WriteClass,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────────────
// Test Setup Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Decision channel that answers every request with the next scripted
/// outcome, delivered through the broker's event queue like a real channel
/// listener would.
struct ScriptedChannel {
    script: Mutex<Vec<ConfirmationOutcome>>,
    events: mpsc::Sender<DecisionEvent>,
    sent: AtomicUsize,
}

impl ScriptedChannel {
    fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionChannel for ScriptedChannel {
    async fn send(&self, _request: &ConfirmationRequest) -> Result<DeliveryId> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst);
        let delivery = DeliveryId::new(format!("msg-{n}"));
        if let Some(outcome) = self.script.lock().unwrap().pop() {
            let events = self.events.clone();
            let delivery = delivery.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                let _ = events.send(DecisionEvent { delivery, outcome }).await;
            });
        }
        Ok(delivery)
    }
}

#[derive(Default)]
struct MemoryStore {
    posts: Mutex<Vec<DateTime<Utc>>>,
    comments: AtomicU32,
    handled: Mutex<HashSet<String>>,
}

impl StateStore for MemoryStore {
    fn post_count(&self, _source: &str, _day: NaiveDate) -> Result<u32> {
        Ok(self.posts.lock().unwrap().len() as u32)
    }
    fn last_post_at(&self, _source: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.posts.lock().unwrap().last().copied())
    }
    fn record_post(&self, _source: &str, at: DateTime<Utc>) -> Result<()> {
        self.posts.lock().unwrap().push(at);
        Ok(())
    }
    fn comment_count(&self, _source: &str, _day: NaiveDate) -> Result<u32> {
        Ok(self.comments.load(Ordering::SeqCst))
    }
    fn record_comment(&self, _source: &str, _day: NaiveDate) -> Result<()> {
        self.comments.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn is_handled(&self, _source: &str, post_id: &str) -> Result<bool> {
        Ok(self.handled.lock().unwrap().contains(post_id))
    }
    fn mark_handled(&self, _source: &str, post_id: &str) -> Result<()> {
        self.handled.lock().unwrap().insert(post_id.to_string());
        Ok(())
    }
    fn save_insight(&self, _insight: &Insight) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    workflow: Arc<ActionWorkflow>,
    channel: Arc<ScriptedChannel>,
    store: Arc<MemoryStore>,
}

/// Outcomes are listed in delivery order.
fn harness(mut script: Vec<ConfirmationOutcome>) -> Harness {
    script.reverse();
    let (events_tx, events_rx) = mpsc::channel(32);
    let channel = Arc::new(ScriptedChannel {
        script: Mutex::new(script),
        events: events_tx,
        sent: AtomicUsize::new(0),
    });
    let broker = ApprovalBroker::new(channel.clone());
    broker.spawn_listener(events_rx);

    let limiter = Arc::new(RateLimiter::new());
    limiter.register(
        "site.comment",
        ResourceLimits::spacing(Duration::from_millis(1)),
    );
    limiter.register("site.post", ResourceLimits::spacing(Duration::from_millis(1)));

    let store = Arc::new(MemoryStore::default());
    let workflow = Arc::new(ActionWorkflow::new(
        PendingActionGuard::new(),
        limiter,
        broker,
        store.clone(),
        WorkflowConfig {
            max_posts_per_day: 4,
            max_comments_per_day: 20,
            max_regenerations: 3,
            decision_timeout: Duration::from_secs(10),
        },
    ));
    Harness {
        workflow,
        channel,
        store,
    }
}

fn reply_spec(post_id: &str) -> ActionSpec {
    ActionSpec {
        id: ActionId::reply(post_id),
        class: WriteClass::Comment,
        write_resource: "site.comment".into(),
        source: "site".into(),
        handled_key: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: Approve and Publish End to End
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn approved_reply_reaches_the_platform_once() {
    let h = harness(vec![ConfirmationOutcome::Approved]);
    let published = Arc::new(Mutex::new(Vec::new()));
    let published_in = published.clone();

    let outcome = h
        .workflow
        .run_action(
            &reply_spec("42"),
            |_attempt| async { Ok(("thanks for the comment".to_string(), ConfirmationRequest::new("Reply to post 42", "thanks for the comment"))) },
            move |draft: String| async move {
                published_in.lock().unwrap().push(draft);
                Ok(())
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome, ActionOutcome::Published);
    assert_eq!(*published.lock().unwrap(), vec!["thanks for the comment"]);
    assert_eq!(h.store.comment_count("site", Utc::now().date_naive()).unwrap(), 1);
    assert_eq!(h.channel.sent(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: Duplicate Suppression Across Concurrent Sweeps
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn overlapping_sweeps_publish_a_reply_only_once() {
    // One approval for the winner; the loser must not even ask.
    let h = harness(vec![ConfirmationOutcome::Approved]);
    let publishes = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let workflow = h.workflow.clone();
        let publishes = publishes.clone();
        tasks.push(tokio::spawn(async move {
            workflow
                .run_action(
                    &reply_spec("42"),
                    |_attempt| async {
                        Ok(((), ConfirmationRequest::new("Reply to post 42", "draft")))
                    },
                    move |_draft: ()| async move {
                        publishes.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )
                .await
                .unwrap()
        }));
    }

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }

    let published = outcomes
        .iter()
        .filter(|o| **o == ActionOutcome::Published)
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| **o == ActionOutcome::Skipped(SkipReason::AlreadyInFlight))
        .count();
    assert_eq!(published, 1);
    assert_eq!(skipped, 7);
    assert_eq!(publishes.load(Ordering::SeqCst), 1);
    assert_eq!(h.channel.sent(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: Regeneration Round Trip
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn regeneration_asks_again_with_a_new_draft() {
    let h = harness(vec![
        ConfirmationOutcome::Regenerate,
        ConfirmationOutcome::Regenerate,
        ConfirmationOutcome::Approved,
    ]);

    let outcome = h
        .workflow
        .run_action(
            &reply_spec("7"),
            |attempt| async move {
                let draft = format!("draft v{attempt}");
                Ok((draft.clone(), ConfirmationRequest::new("Reply to post 7", draft)))
            },
            |draft: String| async move {
                assert_eq!(draft, "draft v2");
                Ok(())
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome, ActionOutcome::Published);
    // One confirmation request per draft.
    assert_eq!(h.channel.sent(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: Tier Fallback Feeding the Draft Step
// ─────────────────────────────────────────────────────────────────────────────

struct FlakyPrimary {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Generator for FlakyPrimary {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        self.calls.lock().unwrap().push(model.to_string());
        match model {
            "fast" => Err(Error::RateLimited("provider quota".into())),
            _ => Ok(format!("[{model}] {prompt}")),
        }
    }
}

#[tokio::test]
async fn draft_falls_back_to_the_secondary_tier() {
    let h = harness(vec![ConfirmationOutcome::Approved]);

    let generator = Arc::new(FlakyPrimary {
        calls: Mutex::new(Vec::new()),
    });
    let limiter = Arc::new(RateLimiter::new());
    limiter.register("fast", ResourceLimits::quota(10, 100));
    limiter.register("lite", ResourceLimits::quota(15, 1000));
    let router = Arc::new(TierRouter::new(
        generator.clone(),
        limiter,
        vec!["fast".into(), "lite".into()],
    ));

    let outcome = h
        .workflow
        .run_action(
            &reply_spec("3"),
            |_attempt| {
                let router = router.clone();
                async move {
                    let draft = router.generate("write a reply").await?;
                    let request = ConfirmationRequest::new("Reply to post 3", draft.clone());
                    Ok((draft, request))
                }
            },
            |draft: String| async move {
                assert_eq!(draft, "[lite] write a reply");
                Ok(())
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome, ActionOutcome::Published);
    assert_eq!(*generator.calls.lock().unwrap(), vec!["fast", "lite"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: Rejection Ends the Action Without a Write
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_proactive_comment_is_not_proposed_again() {
    let h = harness(vec![ConfirmationOutcome::Rejected]);
    let spec = ActionSpec {
        id: ActionId::proactive("99"),
        class: WriteClass::Comment,
        write_resource: "site.comment".into(),
        source: "site".into(),
        handled_key: Some("99".into()),
    };

    let outcome = h
        .workflow
        .run_action(
            &spec,
            |_attempt| async { Ok(((), ConfirmationRequest::new("Comment on post 99", "draft"))) },
            |_draft: ()| async { panic!("rejected drafts are never published") },
        )
        .await
        .unwrap();

    assert_eq!(outcome, ActionOutcome::Rejected);
    assert!(h.store.is_handled("site", "99").unwrap());
    assert_eq!(h.store.comment_count("site", Utc::now().date_naive()).unwrap(), 0);
}

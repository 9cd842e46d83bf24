//! The sweep loop.
//!
//! Every sweep polls the platform, derives candidate actions (replies to
//! unread notifications, proactive comments on interesting posts, at most
//! a few daily posts), and dispatches each candidate to its own task
//! running the approval-gated workflow. A learning pass distills recent
//! community posts into stored insights.
//!
//! The loop degrades instead of dying: without model credentials or an
//! approval channel, candidate actions are skipped with a log and polling
//! continues.

use crate::brain::Brain;
use chrono::{DateTime, Utc};
use murmur_common::config::AgentConfig;
use murmur_common::Result;
use murmur_core::{
    ActionId, ActionOutcome, ActionSpec, ActionWorkflow, ConfirmationRequest, Insight, NewPost,
    Notification, PendingActionGuard, Platform, StateStore, WriteClass,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How many recent posts a proactive sweep inspects.
const PROACTIVE_FETCH_LIMIT: usize = 5;

/// How many recent posts the learning pass summarizes.
const LEARNING_FETCH_LIMIT: usize = 3;

// ============================================================================
// Reply Threads
// ============================================================================

/// All unread reply-worthy notifications on one post, collapsed into a
/// single conversation the agent answers once.
#[derive(Debug, Clone)]
pub struct ReplyThread {
    pub post_id: String,
    pub post_title: String,
    /// Most recent comment in the thread; the reply is attached to it.
    pub latest_comment_id: String,
    /// Conversation lines, oldest first, as "actor: preview".
    pub comments: Vec<String>,
    pub notification_ids: Vec<String>,
}

/// Group reply-worthy notifications by post.
pub fn group_reply_threads(notifications: Vec<Notification>) -> Vec<ReplyThread> {
    let mut threads: Vec<ReplyThread> = Vec::new();
    for n in notifications {
        if !n.kind.is_reply_worthy() {
            continue;
        }
        let line = format!("- {}: {}", n.actor, n.preview);
        match threads.iter_mut().find(|t| t.post_id == n.post_id) {
            Some(thread) => {
                thread.latest_comment_id = n.comment_id;
                thread.comments.push(line);
                thread.notification_ids.push(n.id);
            }
            None => threads.push(ReplyThread {
                post_id: n.post_id,
                post_title: n.post_title,
                latest_comment_id: n.comment_id,
                comments: vec![line],
                notification_ids: vec![n.id],
            }),
        }
    }
    threads
}

/// Whether enough time has passed since the last post for another one.
fn post_window_open(
    last_post_at: Option<DateTime<Utc>>,
    spacing: Duration,
    first_sweep: bool,
) -> bool {
    if first_sweep {
        return true;
    }
    match last_post_at {
        Some(last) => {
            Utc::now().signed_duration_since(last)
                >= chrono::Duration::from_std(spacing).unwrap_or(chrono::Duration::zero())
        }
        None => true,
    }
}

// ============================================================================
// Agent
// ============================================================================

/// Polls the platform and feeds candidate actions into the workflow.
pub struct MurmurAgent {
    platform: Arc<dyn Platform>,
    store: Arc<dyn StateStore>,
    brain: Option<Arc<Brain>>,
    workflow: Option<Arc<ActionWorkflow>>,
    guard: PendingActionGuard,
    config: AgentConfig,
    first_sweep: AtomicBool,
}

impl MurmurAgent {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn StateStore>,
        brain: Option<Arc<Brain>>,
        workflow: Option<Arc<ActionWorkflow>>,
        guard: PendingActionGuard,
        config: AgentConfig,
    ) -> Self {
        Self {
            platform,
            store,
            brain,
            workflow,
            guard,
            config,
            first_sweep: AtomicBool::new(true),
        }
    }

    /// Run sweeps until ctrl-c. A newline on stdin triggers a sweep early.
    pub async fn run(&self) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut manual = spawn_stdin_trigger();

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                Some(()) = manual.recv() => {
                    info!("Manual sweep triggered");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
            }
            self.sweep().await;
        }
    }

    /// One full pass over the platform.
    pub async fn sweep(&self) {
        info!(source = self.platform.name(), "Sweep started");
        if let Err(e) = self.handle_replies().await {
            warn!(error = %e, "Reply handling failed");
        }
        if let Err(e) = self.handle_proactive().await {
            warn!(error = %e, "Proactive commenting failed");
        }
        if let Err(e) = self.maybe_daily_post().await {
            warn!(error = %e, "Daily posting failed");
        }
        if let Err(e) = self.learn_from_community().await {
            warn!(error = %e, "Learning pass failed");
        }
        self.first_sweep.store(false, Ordering::SeqCst);
    }

    fn drafting(&self) -> Option<(Arc<Brain>, Arc<ActionWorkflow>)> {
        match (&self.brain, &self.workflow) {
            (Some(brain), Some(workflow)) => Some((brain.clone(), workflow.clone())),
            _ => {
                debug!("Drafting unavailable (missing model or approval channel), skipping");
                None
            }
        }
    }

    fn comment_resource(&self) -> String {
        format!("{}.comment", self.platform.name())
    }

    fn post_resource(&self) -> String {
        format!("{}.post", self.platform.name())
    }

    /// Answer unread reply notifications, one reply per post thread.
    async fn handle_replies(&self) -> Result<()> {
        let Some((brain, workflow)) = self.drafting() else {
            return Ok(());
        };

        let notifications = self.platform.notifications(true).await?;
        let threads = group_reply_threads(notifications);
        if threads.is_empty() {
            debug!("No reply threads");
            return Ok(());
        }
        info!(threads = threads.len(), "Reply threads found");

        for thread in threads {
            let spec = ActionSpec {
                id: ActionId::reply(&thread.post_id),
                class: WriteClass::Comment,
                write_resource: self.comment_resource(),
                source: self.platform.name().to_string(),
                handled_key: None,
            };
            let platform = self.platform.clone();
            let brain = brain.clone();
            let workflow = workflow.clone();

            tokio::spawn(async move {
                let source = platform.name().to_string();
                let generate = |_attempt: u32| {
                    let brain = brain.clone();
                    let thread = thread.clone();
                    let source = source.clone();
                    async move {
                        let conversation = thread.comments.join("\n");
                        let draft = brain.generate_reply(&thread.post_title, &conversation).await?;
                        let request = ConfirmationRequest::new(
                            format!("💬 [{source}] Reply approval"),
                            format!(
                                "📍 Post: {}\n🔗 https://botmadang.org/post/{}\n\n\
                                 💬 Conversation:\n{conversation}\n\n🤖 Draft:\n{draft}",
                                thread.post_title, thread.post_id
                            ),
                        );
                        Ok((draft, request))
                    }
                };

                let publish_thread = thread.clone();
                let publish_platform = platform.clone();
                let publish = |draft: String| async move {
                    publish_platform
                        .reply_to_comment(
                            &publish_thread.post_id,
                            &publish_thread.latest_comment_id,
                            &draft,
                        )
                        .await?;
                    for nid in &publish_thread.notification_ids {
                        if let Err(e) = publish_platform.mark_notification_read(nid).await {
                            warn!(notification = %nid, error = %e, "Failed to mark notification read");
                        }
                    }
                    Ok(())
                };

                match workflow.run_action(&spec, generate, publish).await {
                    Ok(outcome) => log_outcome(&spec.id, outcome),
                    Err(e) => warn!(action = %spec.id, error = %e, "Reply action failed"),
                }
            });
        }
        Ok(())
    }

    /// Comment on recent posts the model finds interesting enough.
    async fn handle_proactive(&self) -> Result<()> {
        let Some((brain, workflow)) = self.drafting() else {
            return Ok(());
        };
        let source = self.platform.name().to_string();

        let posts = self.platform.recent_posts(PROACTIVE_FETCH_LIMIT).await?;
        for post in posts {
            if self.store.is_handled(&source, &post.id)? {
                continue;
            }
            let id = ActionId::proactive(&post.id);
            // Evaluation costs model quota, so check for an in-flight
            // workflow before scoring.
            if self.guard.is_pending(&id) {
                continue;
            }

            let evaluation = match brain.evaluate_post(&post).await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    warn!(post = %post.id, error = %e, "Evaluation failed");
                    continue;
                }
            };
            if evaluation.score < self.config.proactive_score_threshold {
                debug!(post = %post.id, score = evaluation.score, "Post below threshold");
                self.store.mark_handled(&source, &post.id)?;
                continue;
            }
            info!(post = %post.id, score = evaluation.score, "Proactive comment candidate");

            let spec = ActionSpec {
                id,
                class: WriteClass::Comment,
                write_resource: self.comment_resource(),
                source: source.clone(),
                handled_key: Some(post.id.clone()),
            };
            let platform = self.platform.clone();
            let brain = brain.clone();
            let workflow = workflow.clone();

            tokio::spawn(async move {
                let source = platform.name().to_string();
                let generate = |_attempt: u32| {
                    let brain = brain.clone();
                    let post = post.clone();
                    let source = source.clone();
                    let evaluation = evaluation.clone();
                    async move {
                        let draft = brain.generate_reply(&post.title, &post.content).await?;
                        let mut preview = post.content.clone();
                        if preview.chars().count() > 150 {
                            preview = preview.chars().take(150).collect::<String>() + "...";
                        }
                        let request = ConfirmationRequest::new(
                            format!("🌟 [{source}] Proactive comment ({} pts)", evaluation.score),
                            format!(
                                "📍 Title: {}\n🔗 {}\n\n📄 Excerpt:\n{preview}\n\n\
                                 🤖 Draft:\n{draft}\n\n💡 Why: {}",
                                post.title, post.url, evaluation.reason
                            ),
                        );
                        Ok((draft, request))
                    }
                };

                let publish_platform = platform.clone();
                let action_id = spec.id.clone();
                let target = match spec.handled_key.clone() {
                    Some(target) => target,
                    None => return,
                };
                let publish = |draft: String| async move {
                    publish_platform.create_comment(&target, &draft).await
                };

                match workflow.run_action(&spec, generate, publish).await {
                    Ok(outcome) => log_outcome(&action_id, outcome),
                    Err(e) => warn!(action = %action_id, error = %e, "Proactive action failed"),
                }
            });
        }
        Ok(())
    }

    /// Maybe publish one post this sweep, within spacing and daily caps.
    async fn maybe_daily_post(&self) -> Result<()> {
        let Some((brain, workflow)) = self.drafting() else {
            return Ok(());
        };
        let source = self.platform.name().to_string();
        let first_sweep = self.first_sweep.load(Ordering::SeqCst);

        let last = self.store.last_post_at(&source)?;
        let spacing = Duration::from_secs(self.config.post_spacing_secs);
        if !post_window_open(last, spacing, first_sweep) {
            debug!("Post spacing window not open");
            return Ok(());
        }
        // After the first sweep, posting is probabilistic so the cadence
        // does not look mechanical.
        if !first_sweep && rand::thread_rng().gen::<f64>() > self.config.daily_post_chance {
            debug!("Daily post skipped by chance this sweep");
            return Ok(());
        }
        let Some(topic) = self
            .config
            .topics
            .choose(&mut rand::thread_rng())
            .cloned()
        else {
            debug!("No topics configured");
            return Ok(());
        };

        let today = Utc::now().date_naive();
        let spec = ActionSpec {
            id: ActionId::daily_post(today, &topic),
            class: WriteClass::Post,
            write_resource: self.post_resource(),
            source,
            handled_key: None,
        };
        info!(topic = %topic, "Daily post candidate");

        let platform = self.platform.clone();
        tokio::spawn(async move {
            let source = platform.name().to_string();
            let generate = |_attempt: u32| {
                let brain = brain.clone();
                let topic = topic.clone();
                let source = source.clone();
                async move {
                    let draft = brain.generate_post(&topic).await?;
                    let request = ConfirmationRequest::new(
                        format!("🚀 [{source}] New post approval ({topic})"),
                        format!("📌 Title: {}\n\n📝 Content:\n{}", draft.title, draft.content),
                    );
                    let post = NewPost {
                        title: draft.title,
                        content: draft.content,
                        channel: draft.submadang,
                    };
                    Ok((post, request))
                }
            };

            let publish_platform = platform.clone();
            let publish = |post: NewPost| async move {
                publish_platform.create_post(&post).await
            };

            match workflow.run_action(&spec, generate, publish).await {
                Ok(outcome) => log_outcome(&spec.id, outcome),
                Err(e) => warn!(action = %spec.id, error = %e, "Daily post action failed"),
            }
        });
        Ok(())
    }

    /// Distill recent community posts into stored insights.
    async fn learn_from_community(&self) -> Result<()> {
        let Some(brain) = &self.brain else {
            return Ok(());
        };
        let source = self.platform.name().to_string();

        let posts = self.platform.recent_posts(LEARNING_FETCH_LIMIT).await?;
        for post in posts {
            match brain.summarize_insight(&post).await {
                Ok(summary) if !summary.is_empty() => {
                    self.store.save_insight(&Insight {
                        post_id: post.id,
                        source: source.clone(),
                        topic: post.title,
                        content: summary,
                    })?;
                }
                Ok(_) => {}
                Err(e) => debug!(post = %post.id, error = %e, "Insight summarization failed"),
            }
        }
        Ok(())
    }
}

fn log_outcome(action: &ActionId, outcome: ActionOutcome) {
    match outcome {
        ActionOutcome::Published => info!(action = %action, "Action published"),
        ActionOutcome::Rejected => info!(action = %action, "Action rejected"),
        ActionOutcome::Skipped(reason) => debug!(action = %action, %reason, "Action skipped"),
    }
}

/// Forward stdin newlines as manual sweep triggers.
fn spawn_stdin_trigger() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            // A full buffer means a sweep is already queued.
            let _ = tx.try_send(());
        }
    });
    rx
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_core::NotificationKind;

    fn notification(id: &str, post_id: &str, comment_id: &str, kind: NotificationKind) -> Notification {
        Notification {
            id: id.to_string(),
            kind,
            actor: format!("actor-{id}"),
            post_id: post_id.to_string(),
            post_title: format!("title-{post_id}"),
            comment_id: comment_id.to_string(),
            preview: format!("preview-{id}"),
            read: false,
        }
    }

    #[test]
    fn threads_group_by_post_and_track_latest_comment() {
        let threads = group_reply_threads(vec![
            notification("n1", "p1", "c1", NotificationKind::CommentOnPost),
            notification("n2", "p2", "c2", NotificationKind::CommentOnPost),
            notification("n3", "p1", "c3", NotificationKind::ReplyToComment),
        ]);

        assert_eq!(threads.len(), 2);
        let p1 = threads.iter().find(|t| t.post_id == "p1").unwrap();
        assert_eq!(p1.latest_comment_id, "c3");
        assert_eq!(p1.comments.len(), 2);
        assert_eq!(p1.notification_ids, vec!["n1", "n3"]);
        assert_eq!(p1.comments[0], "- actor-n1: preview-n1");
    }

    #[test]
    fn non_reply_notifications_are_dropped() {
        let threads = group_reply_threads(vec![
            notification("n1", "p1", "c1", NotificationKind::Other("upvote".into())),
            notification("n2", "p1", "c2", NotificationKind::CommentOnPost),
        ]);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].comments.len(), 1);
    }

    #[test]
    fn post_window_rules() {
        let spacing = Duration::from_secs(2 * 60 * 60);

        // The first sweep always posts.
        assert!(post_window_open(Some(Utc::now()), spacing, true));
        // No previous post means the window is open.
        assert!(post_window_open(None, spacing, false));
        // A fresh post closes the window.
        assert!(!post_window_open(Some(Utc::now()), spacing, false));
        // An old post opens it again.
        let old = Utc::now() - chrono::Duration::hours(3);
        assert!(post_window_open(Some(old), spacing, false));
    }
}

//! Human approval brokering.
//!
//! `ApprovalBroker` sends a confirmation request through the decision
//! channel and parks the caller on a one-shot slot keyed by the
//! channel-assigned delivery id. A single background listener drains
//! inbound decision events and fires the matching slot; events with no
//! matching slot (stale, duplicate, or for a caller that already gave up)
//! are discarded and never crash the listener.
//!
//! Per request: `Sent → Resolved`, or the slot is withdrawn on timeout.
//! Dropping a caller's future also drops its receiver; a decision arriving
//! afterwards is discarded at dispatch.

use crate::traits::DecisionChannel;
use crate::types::{ConfirmationOutcome, ConfirmationRequest, DecisionEvent, DeliveryId};
use murmur_common::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

type SlotMap = Arc<Mutex<HashMap<DeliveryId, oneshot::Sender<ConfirmationOutcome>>>>;

/// Correlates outbound confirmation requests with asynchronously delivered
/// human decisions.
///
/// Cheap to clone; clones share the slot table and channel. Any number of
/// requests may be outstanding at once and decisions may arrive in any
/// order.
#[derive(Clone)]
pub struct ApprovalBroker {
    channel: Arc<dyn DecisionChannel>,
    slots: SlotMap,
}

impl ApprovalBroker {
    pub fn new(channel: Arc<dyn DecisionChannel>) -> Self {
        Self {
            channel,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn the background listener draining inbound decision events.
    ///
    /// The task exits when every sender side of `events` is dropped.
    pub fn spawn_listener(&self, mut events: mpsc::Receiver<DecisionEvent>) -> JoinHandle<()> {
        let slots = Arc::clone(&self.slots);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                Self::dispatch(&slots, event);
            }
            debug!("Decision event stream closed, listener exiting");
        })
    }

    fn dispatch(slots: &SlotMap, event: DecisionEvent) {
        let slot = lock(slots).remove(&event.delivery);
        match slot {
            Some(sender) => {
                if sender.send(event.outcome).is_err() {
                    // Caller timed out or was cancelled after the decision
                    // was made; the slot is gone either way.
                    debug!(delivery = %event.delivery, "Caller gone, decision discarded");
                }
            }
            None => {
                debug!(delivery = %event.delivery, "No matching slot, stale decision discarded");
            }
        }
    }

    /// Send `request` and wait for the human decision.
    ///
    /// The response slot is keyed by the delivery id the channel assigns on
    /// send, unifying it with the caller's correlation id immediately after
    /// transmission. On timeout the slot is removed and
    /// `Error::DecisionTimeout` is returned; a decision arriving later is
    /// discarded by the listener.
    pub async fn request_decision(
        &self,
        request: &ConfirmationRequest,
        timeout: Duration,
    ) -> Result<ConfirmationOutcome> {
        let delivery = self.channel.send(request).await?;

        let (tx, rx) = oneshot::channel();
        lock(&self.slots).insert(delivery.clone(), tx);
        debug!(
            correlation = %request.correlation_id,
            delivery = %delivery,
            "Confirmation request sent, awaiting decision"
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => {
                lock(&self.slots).remove(&delivery);
                Err(Error::ChannelClosed)
            }
            Err(_) => {
                lock(&self.slots).remove(&delivery);
                debug!(delivery = %delivery, "Decision timed out");
                Err(Error::DecisionTimeout)
            }
        }
    }

    /// Number of requests currently awaiting a decision.
    pub fn pending_count(&self) -> usize {
        lock(&self.slots).len()
    }
}

fn lock(
    slots: &SlotMap,
) -> std::sync::MutexGuard<'_, HashMap<DeliveryId, oneshot::Sender<ConfirmationOutcome>>> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Channel that derives the delivery id from the request title, so
    /// tests can address decisions at specific requests.
    struct TitleChannel {
        sent: AtomicUsize,
    }

    impl TitleChannel {
        fn new() -> Self {
            Self {
                sent: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DecisionChannel for TitleChannel {
        async fn send(&self, request: &ConfirmationRequest) -> Result<DeliveryId> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(DeliveryId::new(format!("msg-{}", request.title)))
        }
    }

    fn event(title: &str, outcome: ConfirmationOutcome) -> DecisionEvent {
        DecisionEvent {
            delivery: DeliveryId::new(format!("msg-{title}")),
            outcome,
        }
    }

    #[tokio::test]
    async fn decision_resolves_matching_request_only() {
        let broker = ApprovalBroker::new(Arc::new(TitleChannel::new()));
        let (tx, rx) = mpsc::channel(8);
        broker.spawn_listener(rx);

        let broker_a = broker.clone();
        let a = tokio::spawn(async move {
            broker_a
                .request_decision(&ConfirmationRequest::new("A", "draft a"), Duration::from_secs(5))
                .await
        });
        let broker_b = broker.clone();
        let b = tokio::spawn(async move {
            broker_b
                .request_decision(&ConfirmationRequest::new("B", "draft b"), Duration::from_secs(5))
                .await
        });

        // Wait until both slots are registered.
        while broker.pending_count() < 2 {
            tokio::task::yield_now().await;
        }

        // Decisions arrive in the reverse order of the requests.
        tx.send(event("B", ConfirmationOutcome::Rejected)).await.unwrap();
        tx.send(event("A", ConfirmationOutcome::Approved)).await.unwrap();

        assert_eq!(a.await.unwrap().unwrap(), ConfirmationOutcome::Approved);
        assert_eq!(b.await.unwrap().unwrap(), ConfirmationOutcome::Rejected);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_slot_and_later_decision_is_discarded() {
        let broker = ApprovalBroker::new(Arc::new(TitleChannel::new()));
        let (tx, rx) = mpsc::channel(8);
        broker.spawn_listener(rx);

        let result = broker
            .request_decision(&ConfirmationRequest::new("late", "draft"), Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(Error::DecisionTimeout)));
        assert_eq!(broker.pending_count(), 0);

        // A spurious decision for the timed-out delivery must be discarded
        // without disturbing the listener.
        tx.send(event("late", ConfirmationOutcome::Approved)).await.unwrap();

        // The listener is still alive: a fresh request resolves normally.
        let broker2 = broker.clone();
        let pending = tokio::spawn(async move {
            broker2
                .request_decision(&ConfirmationRequest::new("fresh", "draft"), Duration::from_secs(30))
                .await
        });
        while broker.pending_count() < 1 {
            tokio::task::yield_now().await;
        }
        tx.send(event("fresh", ConfirmationOutcome::Regenerate)).await.unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), ConfirmationOutcome::Regenerate);
    }

    #[tokio::test]
    async fn duplicate_decision_is_discarded() {
        let broker = ApprovalBroker::new(Arc::new(TitleChannel::new()));
        let (tx, rx) = mpsc::channel(8);
        broker.spawn_listener(rx);

        let broker_a = broker.clone();
        let a = tokio::spawn(async move {
            broker_a
                .request_decision(&ConfirmationRequest::new("dup", "draft"), Duration::from_secs(5))
                .await
        });
        while broker.pending_count() < 1 {
            tokio::task::yield_now().await;
        }

        tx.send(event("dup", ConfirmationOutcome::Approved)).await.unwrap();
        tx.send(event("dup", ConfirmationOutcome::Rejected)).await.unwrap();

        // The first decision wins; the duplicate resolves nothing.
        assert_eq!(a.await.unwrap().unwrap(), ConfirmationOutcome::Approved);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_failure_surfaces_to_caller() {
        struct FailingChannel;

        #[async_trait]
        impl DecisionChannel for FailingChannel {
            async fn send(&self, _request: &ConfirmationRequest) -> Result<DeliveryId> {
                Err(Error::Transport("telegram unreachable".into()))
            }
        }

        let broker = ApprovalBroker::new(Arc::new(FailingChannel));
        let result = broker
            .request_decision(&ConfirmationRequest::new("x", "draft"), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(broker.pending_count(), 0);
    }
}

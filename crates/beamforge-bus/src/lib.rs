//! Per-job progress event bus. An in-memory `jobId -> set of
//! subscriptions` guarded by a short critical section; `publish` reads the
//! set under the lock and delivers outside it so a slow sink cannot stall
//! the publisher. Overflowing a subscriber's bounded buffer drops that
//! subscriber rather than blocking anyone else (drop-subscriber-on-overflow).

use std::collections::HashMap;
use std::sync::Arc;

use beamforge_core::progress::ProgressMessage;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub type JobId = Uuid;

/// Per-subscriber outbound buffer depth before the subscription is dropped.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

struct Subscription {
    id: Uuid,
    sender: mpsc::Sender<ProgressMessage>,
}

/// Returned by [`ProgressBus::subscribe`]; pass to [`ProgressBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub job_id: JobId,
    subscription_id: Uuid,
}

#[derive(Default)]
struct BusState {
    jobs: HashMap<JobId, Vec<Subscription>>,
}

/// Multiplexes a job's progress stream to any number of long-lived
/// subscribers. Late joiners never see messages published before they
/// subscribed — callers that need history query the session store instead.
#[derive(Clone, Default)]
pub struct ProgressBus {
    state: Arc<Mutex<BusState>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber for `job_id`. The returned receiver
    /// yields messages in publish order from the moment of subscription
    /// onward; it closes when [`ProgressBus::unsubscribe`],
    /// [`ProgressBus::close_job`] is called, or its buffer overflows.
    pub async fn subscribe(&self, job_id: JobId) -> (SubscriptionHandle, mpsc::Receiver<ProgressMessage>) {
        let (tx, rx) = mpsc::channel(DEFAULT_SUBSCRIBER_BUFFER);
        let subscription_id = Uuid::new_v4();
        let mut state = self.state.lock().await;
        state.jobs.entry(job_id).or_default().push(Subscription {
            id: subscription_id,
            sender: tx,
        });
        (
            SubscriptionHandle {
                job_id,
                subscription_id,
            },
            rx,
        )
    }

    /// Idempotent: unsubscribing twice, or a handle already purged by
    /// overflow or `close_job`, is a no-op.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut state = self.state.lock().await;
        if let Some(subs) = state.jobs.get_mut(&handle.job_id) {
            subs.retain(|s| s.id != handle.subscription_id);
        }
    }

    /// Delivers `message` to every live subscriber of `job_id` in publish
    /// order. Non-blocking: a subscriber whose buffer is full is dropped
    /// rather than awaited.
    pub async fn publish(&self, job_id: JobId, message: ProgressMessage) {
        let senders: Vec<(Uuid, mpsc::Sender<ProgressMessage>)> = {
            let state = self.state.lock().await;
            match state.jobs.get(&job_id) {
                Some(subs) => subs.iter().map(|s| (s.id, s.sender.clone())).collect(),
                None => return,
            }
        };

        let mut failed = Vec::new();
        for (id, sender) in senders {
            if sender.try_send(message.clone()).is_err() {
                tracing::warn!(%job_id, subscriber = %id, "dropping slow subscriber on overflow");
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut state = self.state.lock().await;
            if let Some(subs) = state.jobs.get_mut(&job_id) {
                subs.retain(|s| !failed.contains(&s.id));
            }
        }
    }

    /// Closes every subscription for `job_id`; already-sent messages that
    /// are still buffered remain available to receivers until they drain
    /// them, but no further publishes will reach this job's subscribers.
    pub async fn close_job(&self, job_id: JobId) {
        let mut state = self.state.lock().await;
        state.jobs.remove(&job_id);
    }

    pub async fn subscriber_count(&self, job_id: JobId) -> usize {
        let state = self.state.lock().await;
        state.jobs.get(&job_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_messages_in_publish_order() {
        let bus = ProgressBus::new();
        let job_id = Uuid::new_v4();
        let (_handle, mut rx) = bus.subscribe(job_id).await;

        bus.publish(job_id, ProgressMessage::operation("a")).await;
        bus.publish(job_id, ProgressMessage::operation("b")).await;
        bus.publish(job_id, ProgressMessage::cancelled()).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let third = rx.recv().await.unwrap();
        assert_eq!(first.kind(), "operation");
        assert_eq!(second.kind(), "operation");
        assert_eq!(third.kind(), "cancelled");
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_earlier_messages() {
        let bus = ProgressBus::new();
        let job_id = Uuid::new_v4();
        bus.publish(job_id, ProgressMessage::operation("before")).await;

        let (_handle, mut rx) = bus.subscribe(job_id).await;
        bus.publish(job_id, ProgressMessage::operation("after")).await;

        let msg = rx.try_recv().unwrap();
        match msg {
            ProgressMessage::Operation { payload, .. } => assert_eq!(payload.message, "after"),
            _ => panic!("unexpected message"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_dropped_not_blocking() {
        let bus = ProgressBus::new();
        let job_id = Uuid::new_v4();
        let (_handle, rx) = bus.subscribe(job_id).await;
        // Never drained, so it will overflow its bounded buffer.
        for _ in 0..(DEFAULT_SUBSCRIBER_BUFFER + 10) {
            bus.publish(job_id, ProgressMessage::operation("spam")).await;
        }
        assert_eq!(bus.subscriber_count(job_id).await, 0);
        drop(rx);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = ProgressBus::new();
        let job_id = Uuid::new_v4();
        let (handle, _rx) = bus.subscribe(job_id).await;
        bus.unsubscribe(handle).await;
        bus.unsubscribe(handle).await;
        assert_eq!(bus.subscriber_count(job_id).await, 0);
    }

    #[tokio::test]
    async fn close_job_removes_all_subscriptions() {
        let bus = ProgressBus::new();
        let job_id = Uuid::new_v4();
        let (_h1, _rx1) = bus.subscribe(job_id).await;
        let (_h2, _rx2) = bus.subscribe(job_id).await;
        assert_eq!(bus.subscriber_count(job_id).await, 2);
        bus.close_job(job_id).await;
        assert_eq!(bus.subscriber_count(job_id).await, 0);
    }

    #[tokio::test]
    async fn fan_out_delivers_identical_stream_to_multiple_subscribers() {
        let bus = ProgressBus::new();
        let job_id = Uuid::new_v4();
        let (_h1, mut rx1) = bus.subscribe(job_id).await;
        let (_h2, mut rx2) = bus.subscribe(job_id).await;
        bus.publish(job_id, ProgressMessage::operation("x")).await;
        let m1 = rx1.recv().await.unwrap();
        let m2 = rx2.recv().await.unwrap();
        assert_eq!(m1.kind(), m2.kind());
    }
}

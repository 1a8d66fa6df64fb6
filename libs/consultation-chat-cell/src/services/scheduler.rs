use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies one arming of a consultation timer. A fresh `timer_id` per
/// arming keeps a late task from touching a newer timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub consultation_id: Uuid,
    pub timer_id: Uuid,
}

struct ArmedTimer {
    handle: TimerHandle,
    task: AbortHandle,
}

/// Single-shot timeout per consultation.
#[derive(Clone, Default)]
pub struct TimeoutScheduler {
    timers: Arc<DashMap<Uuid, ArmedTimer>>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `on_fire` after `delay` unless cancelled first. Arming again for the
    /// same consultation replaces the pending timer.
    pub fn arm<F, Fut>(&self, consultation_id: Uuid, delay: Duration, on_fire: F) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = TimerHandle {
            consultation_id,
            timer_id: Uuid::new_v4(),
        };

        // The task must not deregister itself before it has been registered.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let timers = Arc::clone(&self.timers);

        let task = tokio::spawn(async move {
            if registered_rx.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;

            let still_armed = timers
                .remove_if(&consultation_id, |_, armed| {
                    armed.handle.timer_id == handle.timer_id
                })
                .is_some();
            if !still_armed {
                return;
            }

            debug!("Timeout fired for consultation {}", consultation_id);
            on_fire().await;
        });

        let previous = self.timers.insert(
            consultation_id,
            ArmedTimer {
                handle,
                task: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            warn!("Replacing armed timer for consultation {}", consultation_id);
            previous.task.abort();
        }
        let _ = registered_tx.send(());

        debug!("Armed {:?} timer for consultation {}", delay, consultation_id);
        handle
    }

    /// Cancels whatever timer is armed for the consultation. Idempotent.
    pub fn cancel(&self, consultation_id: Uuid) -> bool {
        match self.timers.remove(&consultation_id) {
            Some((_, armed)) => {
                armed.task.abort();
                debug!("Cancelled timer for consultation {}", consultation_id);
                true
            }
            None => false,
        }
    }

    /// Cancels only if `handle` is still the armed timer.
    pub fn cancel_handle(&self, handle: &TimerHandle) -> bool {
        let removed = self
            .timers
            .remove_if(&handle.consultation_id, |_, armed| {
                armed.handle.timer_id == handle.timer_id
            });
        match removed {
            Some((_, armed)) => {
                armed.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.timers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn is_armed(&self, consultation_id: Uuid) -> bool {
        self.timers.contains_key(&consultation_id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }
}

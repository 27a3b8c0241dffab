//! Exactly-once completion for operations with several terminal paths
//!
//! A `Completion` can be cloned into every path that may finish the
//! operation (the work itself, a deadline watchdog, ...). The first
//! `complete` call wins; later ones are refused and their value dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Every completion handle was dropped without completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation abandoned before completion")]
pub struct Abandoned;

struct Latch<T> {
    done: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

pub struct Completion<T> {
    latch: Arc<Latch<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            latch: Arc::clone(&self.latch),
        }
    }
}

/// Awaitable side of a completion
pub struct Pending<T> {
    receiver: oneshot::Receiver<T>,
}

pub fn completion<T>() -> (Completion<T>, Pending<T>) {
    let (sender, receiver) = oneshot::channel();
    let completion = Completion {
        latch: Arc::new(Latch {
            done: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
        }),
    };
    (completion, Pending { receiver })
}

impl<T> Completion<T> {
    /// Deliver the terminal value. Returns `false` if another path already
    /// completed the operation.
    pub fn complete(&self, value: T) -> bool {
        if self
            .latch
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let sender = self
            .latch
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sender) = sender {
            // Receiver gone means nobody waits any more
            let _ = sender.send(value);
        }
        true
    }

    #[cfg(test)]
    pub fn is_completed(&self) -> bool {
        self.latch.done.load(Ordering::Acquire)
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, Abandoned>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map_err(|_| Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_completion_wins() {
        let (completion, pending) = completion::<u32>();
        let other = completion.clone();

        assert!(completion.complete(1));
        assert!(!other.complete(2));
        assert!(other.is_completed());
        assert_eq!(pending.await, Ok(1));
    }

    #[tokio::test]
    async fn test_racing_tasks_complete_once() {
        let (completion, pending) = completion::<usize>();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let c = completion.clone();
                tokio::spawn(async move { c.complete(i) })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(pending.await.unwrap() < 16);
    }

    #[tokio::test]
    async fn test_dropped_completion_is_abandoned() {
        let (completion, pending) = completion::<()>();
        drop(completion);

        assert_eq!(pending.await, Err(Abandoned));
    }
}

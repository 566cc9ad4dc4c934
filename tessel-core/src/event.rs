//! Completion handles for submitted device work.
//!
//! Every submission returns an [`Event`]. The host blocks on it with
//! [`Event::wait`], or `.await`s it from async code; either way the result is
//! the outcome of that one operation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{BlasError, Result};

enum State {
    /// Outstanding operations in submission order, plus the first failure seen.
    Pending {
        receivers: Vec<oneshot::Receiver<Result<()>>>,
        failure: Option<BlasError>,
    },
    Done(Option<Result<()>>),
}

/// Completion handle of one submitted operation.
pub struct Event {
    label: &'static str,
    state: State,
}

impl Event {
    /// A handle plus the sender the executing side completes it with.
    pub fn pending(label: &'static str) -> (Self, oneshot::Sender<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                label,
                state: State::Pending {
                    receivers: vec![rx],
                    failure: None,
                },
            },
            tx,
        )
    }

    /// An already-finished handle.
    pub fn complete() -> Self {
        Self {
            label: "complete",
            state: State::Done(Some(Ok(()))),
        }
    }

    /// An already-failed handle.
    pub fn failed(label: &'static str, err: BlasError) -> Self {
        Self {
            label,
            state: State::Done(Some(Err(err))),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// A handle that completes when both `self` and `next` have, reporting
    /// the first failure of the two.
    pub fn then(self, next: Event) -> Event {
        let label = self.label;
        let mut receivers = Vec::new();
        let mut failure = None;
        for state in [self.state, next.state] {
            match state {
                State::Pending {
                    receivers: rx,
                    failure: f,
                } => {
                    receivers.extend(rx);
                    if failure.is_none() {
                        failure = f;
                    }
                }
                State::Done(Some(Err(e))) => {
                    failure.get_or_insert(e);
                }
                State::Done(_) => {}
            }
        }
        let state = if receivers.is_empty() {
            State::Done(Some(failure.map_or(Ok(()), Err)))
        } else {
            State::Pending { receivers, failure }
        };
        Event { label, state }
    }

    /// Block the calling thread until the operation finishes.
    pub fn wait(self) -> Result<()> {
        pollster::block_on(self)
    }
}

impl Future for Event {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let label = self.label;
        let outcome = match &mut self.state {
            State::Done(result) => return Poll::Ready(result.take().unwrap_or(Ok(()))),
            State::Pending { receivers, failure } => {
                while let Some(rx) = receivers.first_mut() {
                    let result = match Pin::new(rx).poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(result)) => result,
                        Poll::Ready(Err(oneshot::Canceled)) => Err(BlasError::execution(
                            label,
                            "device queue dropped the operation",
                        )),
                    };
                    if let Err(e) = result {
                        failure.get_or_insert(e);
                    }
                    receivers.remove(0);
                }
                failure.take().map_or(Ok(()), Err)
            }
        };
        self.state = State::Done(None);
        Poll::Ready(outcome)
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Pending { .. } => "pending",
            State::Done(_) => "done",
        };
        f.debug_struct("Event")
            .field("label", &self.label)
            .field("state", &state)
            .finish()
    }
}

/// Wait on every handle; the first failure (in order) is returned.
pub fn wait_all<I>(events: I) -> Result<()>
where
    I: IntoIterator<Item = Event>,
{
    let mut first = None;
    for event in events {
        if let Err(e) = event.wait() {
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

//! `futures::Stream` adapter over a [`SyncStream`]

use super::SyncStream;
use crate::error::Result;
use crate::state::GlobalSyncState;
use crate::types::Message;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::warn;

type Pull = BoxFuture<'static, (SyncStream, Result<Option<Message>>)>;

/// Message stream that keeps hold of its [`SyncStream`].
///
/// Each poll moves the sync stream into a pull future and takes it back once
/// the future resolves, so [`close`](Self::close) can always reach it.
pub struct MessageStream {
    stream: Option<SyncStream>,
    pull: Option<Pull>,
    closed: bool,
}

impl MessageStream {
    pub(super) fn new(stream: SyncStream) -> Self {
        Self {
            stream: Some(stream),
            pull: None,
            closed: false,
        }
    }

    /// Close the active stage and persist the state.
    ///
    /// A pull still in flight is awaited first. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(pull) = self.pull.take() {
            let (stream, _) = pull.await;
            self.stream = Some(stream);
        }
        self.closed = true;
        match self.stream.as_mut() {
            Some(stream) => stream.close().await,
            None => Ok(()),
        }
    }

    /// State so far, unless a pull is in flight
    pub fn state(&self) -> Option<&GlobalSyncState> {
        self.stream.as_ref().map(SyncStream::state)
    }
}

impl Stream for MessageStream {
    type Item = Result<Message>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }

        if this.pull.is_none() {
            let Some(mut stream) = this.stream.take() else {
                return Poll::Ready(None);
            };
            this.pull = Some(
                async move {
                    let next = stream.next().await;
                    (stream, next)
                }
                .boxed(),
            );
        }

        let Some(pull) = this.pull.as_mut() else {
            return Poll::Ready(None);
        };
        match pull.poll_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready((stream, next)) => {
                this.pull = None;
                this.stream = Some(stream);
                Poll::Ready(next.transpose())
            }
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        let unfinished = self.pull.is_some()
            || self
                .stream
                .as_ref()
                .is_some_and(|stream| !stream.is_finished());
        if unfinished && !self.closed {
            warn!("Message stream dropped before completion without close; state not saved");
        }
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("stream", &self.stream)
            .field("pulling", &self.pull.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

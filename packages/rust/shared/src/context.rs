//! Request-scoped context: tracing identifiers plus cancellation.
//!
//! Every public operation in the store, scraper, and resolver takes a
//! [`RequestContext`]. It carries the identifiers the chat adapter attaches
//! to an inbound event and a cancellation token with an optional deadline.
//!
//! Background work spawned from a request must use
//! [`RequestContext::detach_for_async`], which keeps the identifiers but not
//! the parent's cancellation or deadline.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{CampusBotError, Result};

/// Identifiers propagated through a logical request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TraceIds {
    user_id: Option<String>,
    chat_id: Option<String>,
    request_id: Option<String>,
    trace_id: Option<String>,
    event_id: Option<String>,
}

/// A cancellable, deadline-aware request context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    ids: TraceIds,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RequestContext {
    /// A root context with no identifiers, no deadline, and a fresh token.
    pub fn background() -> Self {
        Self {
            ids: TraceIds::default(),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A root context cancelled when `token` fires.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            ids: TraceIds::default(),
            token,
            deadline: None,
        }
    }

    // -- builders -----------------------------------------------------------

    pub fn with_user_id(mut self, id: impl Into<String>) -> Self {
        self.ids.user_id = Some(id.into());
        self
    }

    pub fn with_chat_id(mut self, id: impl Into<String>) -> Self {
        self.ids.chat_id = Some(id.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.ids.request_id = Some(id.into());
        self
    }

    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.ids.trace_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
        self.ids.event_id = Some(id.into());
        self
    }

    /// A child context whose deadline is the earlier of the parent's and
    /// `now + timeout`. Cancelling the parent cancels the child.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(d) if d < candidate => d,
            _ => candidate,
        };
        Self {
            ids: self.ids.clone(),
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// A child context that can be cancelled independently of the parent.
    pub fn child(&self) -> Self {
        Self {
            ids: self.ids.clone(),
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// An independent context keeping only the tracing identifiers.
    ///
    /// The returned context is not cancelled by the parent and has no
    /// deadline.
    pub fn detach_for_async(&self) -> Self {
        Self {
            ids: self.ids.clone(),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    // -- getters ------------------------------------------------------------

    pub fn user_id(&self) -> Option<&str> {
        self.ids.user_id.as_deref()
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.ids.chat_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.ids.request_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.ids.trace_id.as_deref()
    }

    pub fn event_id(&self) -> Option<&str> {
        self.ids.event_id.as_deref()
    }

    /// `user_id` for code paths where upstream middleware guarantees it.
    ///
    /// Panics in debug builds when absent; release builds log and return "".
    pub fn must_user_id(&self) -> &str {
        must(self.user_id(), "user_id")
    }

    pub fn must_chat_id(&self) -> &str {
        must(self.chat_id(), "chat_id")
    }

    pub fn must_request_id(&self) -> &str {
        must(self.request_id(), "request_id")
    }

    // -- cancellation -------------------------------------------------------

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once the token has fired or the deadline passed.
    pub fn check(&self) -> Result<()> {
        if self.is_done() {
            Err(CampusBotError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token fires or the deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Race `fut` against cancellation and the deadline.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.done() => Err(CampusBotError::Cancelled),
            res = fut => res,
        }
    }

    /// Sleep for `dur`, failing with `Cancelled` if the context fires first
    /// or if the sleep would end past the deadline.
    pub async fn sleep(&self, dur: Duration) -> Result<()> {
        self.check()?;
        if let Some(remaining) = self.remaining() {
            if dur > remaining {
                return Err(CampusBotError::Cancelled);
            }
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(CampusBotError::Cancelled),
            _ = tokio::time::sleep(dur) => Ok(()),
        }
    }
}

fn must<'a>(value: Option<&'a str>, name: &str) -> &'a str {
    match value {
        Some(v) => v,
        None => {
            debug_assert!(false, "request context is missing {name}");
            tracing::error!(field = name, "request context is missing a required identifier");
            ""
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getters_report_presence() {
        let ctx = RequestContext::background()
            .with_user_id("U123")
            .with_request_id("req-1");
        assert_eq!(ctx.user_id(), Some("U123"));
        assert_eq!(ctx.request_id(), Some("req-1"));
        assert_eq!(ctx.chat_id(), None);
        assert_eq!(ctx.must_user_id(), "U123");
    }

    #[test]
    #[should_panic(expected = "chat_id")]
    #[cfg(debug_assertions)]
    fn must_getter_panics_in_debug() {
        let ctx = RequestContext::background();
        let _ = ctx.must_chat_id();
    }

    #[test]
    fn child_is_cancelled_with_parent() {
        let parent = RequestContext::background();
        let child = parent.child();
        parent.cancel();
        assert!(child.check().is_err());
    }

    #[test]
    fn detached_context_survives_parent_cancellation() {
        let parent = RequestContext::background()
            .with_trace_id("t-1")
            .with_timeout(Duration::from_millis(1));
        let detached = parent.detach_for_async();
        parent.cancel();

        assert!(parent.check().is_err());
        assert!(detached.check().is_ok());
        assert_eq!(detached.trace_id(), Some("t-1"));
        assert!(detached.deadline().is_none());
    }

    #[test]
    fn timeout_never_extends_parent_deadline() {
        let parent = RequestContext::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn run_returns_cancelled_when_deadline_passes() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(20));
        let res: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(CampusBotError::Cancelled)));
    }

    #[tokio::test]
    async fn sleep_refuses_to_overrun_deadline() {
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(50));
        let res = ctx.sleep(Duration::from_secs(10)).await;
        assert!(matches!(res, Err(CampusBotError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_sleep_promptly() {
        let ctx = RequestContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let start = Instant::now();
        let res = ctx.sleep(Duration::from_secs(10)).await;
        assert!(matches!(res, Err(CampusBotError::Cancelled)));
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}

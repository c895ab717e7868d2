//! Operation-scoped cancellation context.
//!
//! `OpContext` is handed to every collaborator call so an in-flight
//! operation can be cut short by the original caller or by lock
//! preemption. Cancellation is level-triggered over a `tokio::sync::watch`
//! channel: once cancelled, a context stays cancelled.
//!
//! The context also carries the webhook event id that triggered the
//! operation, for audit events and log correlation.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

/// Cancellation signal for one lifecycle operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancelled: watch::Receiver<bool>,
    // Keeps the channel alive so a background context can never observe a
    // closed sender.
    _keepalive: Arc<watch::Sender<bool>>,
    event_id: Option<Uuid>,
}

/// Cancels the paired `OpContext` (and all of its clones).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl OpContext {
    /// A context that is never cancelled. Used for terminal side-effects
    /// that must outlive caller cancellation.
    pub fn background() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            cancelled: rx,
            _keepalive: Arc::new(tx),
            event_id: None,
        }
    }

    /// A cancellable context plus the handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        (
            Self {
                cancelled: rx,
                _keepalive: Arc::clone(&tx),
                event_id: None,
            },
            CancelHandle { tx },
        )
    }

    /// Attach the webhook event id that triggered this operation.
    pub fn with_event_id(mut self, id: Uuid) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_id(&self) -> Option<Uuid> {
        self.event_id
    }

    /// A new independently-cancellable context inheriting this context's
    /// event id. The caller is responsible for propagating cancellation
    /// from the parent if desired.
    pub fn child(&self) -> (Self, CancelHandle) {
        let (ctx, handle) = Self::cancellable();
        (
            Self {
                event_id: self.event_id,
                ..ctx
            },
            handle,
        )
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves when the context is cancelled; pends forever if it never
    /// is.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // all senders gone without cancelling: never cancelled
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Returns `ctx` unless it is already cancelled, in which case `fallback`.
///
/// Used only for terminal side-effects (failure commit status, failure
/// report link) that must be delivered even after cancellation; anything
/// that should honor caller cancellation takes `ctx` directly.
pub fn valid_context(ctx: &OpContext, fallback: &OpContext) -> OpContext {
    if ctx.is_cancelled() {
        fallback.clone()
    } else {
        ctx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_is_observable() {
        let (ctx, handle) = OpContext::cancellable();
        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
        // level-triggered: resolves immediately even after the fact
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("cancelled() should resolve");
    }

    #[tokio::test]
    async fn background_never_cancels() {
        let ctx = OpContext::background();
        assert!(!ctx.is_cancelled());
        let res = tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(res.is_err(), "background context must not cancel");
    }

    #[tokio::test]
    async fn child_is_independent_of_parent() {
        let (parent, parent_handle) = OpContext::cancellable();
        let (child, _child_handle) = parent.child();
        parent_handle.cancel();
        assert!(!child.is_cancelled());
    }

    #[tokio::test]
    async fn child_inherits_event_id() {
        let id = Uuid::new_v4();
        let (parent, _h) = OpContext::cancellable();
        let parent = parent.with_event_id(id);
        let (child, _ch) = parent.child();
        assert_eq!(child.event_id(), Some(id));
    }

    #[test]
    fn valid_context_prefers_live_context() {
        let (ctx, handle) = OpContext::cancellable();
        let fallback = OpContext::background();

        let picked = valid_context(&ctx, &fallback);
        assert!(!picked.is_cancelled());

        handle.cancel();
        let picked = valid_context(&ctx, &fallback);
        assert!(!picked.is_cancelled(), "fallback must be the live one");
        // and the fallback is genuinely the background context
        assert!(ctx.is_cancelled());
    }
}

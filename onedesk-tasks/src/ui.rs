use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub type UiAction = Box<dyn FnOnce() + Send + 'static>;

/// Context that owns every observable mutation. Implementations must run
/// actions one at a time, in the order they were dispatched.
pub trait UiDispatcher: Send + Sync {
    fn dispatch(&self, action: UiAction);
}

#[derive(Debug, Error)]
#[error("ui dispatcher dropped the action before running it")]
pub struct UiClosed;

/// Runs `f` on the dispatcher and waits for its result.
pub async fn run_on_ui<R, F>(ui: &dyn UiDispatcher, f: F) -> Result<R, UiClosed>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    ui.dispatch(Box::new(move || {
        let _ = tx.send(f());
    }));
    rx.await.map_err(|_| UiClosed)
}

/// Runs actions directly on the calling thread, for embedders whose caller
/// already is the UI context.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl UiDispatcher for InlineDispatcher {
    fn dispatch(&self, action: UiAction) {
        action();
    }
}

/// Serializes actions through a single tokio task.
#[derive(Debug, Clone)]
pub struct SerialDispatcher {
    tx: mpsc::UnboundedSender<UiAction>,
}

impl SerialDispatcher {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<UiAction>();
        tokio::spawn(async move {
            while let Some(action) = rx.recv().await {
                action();
            }
        });
        Self { tx }
    }
}

impl UiDispatcher for SerialDispatcher {
    fn dispatch(&self, action: UiAction) {
        if self.tx.send(action).is_err() {
            tracing::warn!("ui dispatcher loop is gone, dropping action");
        }
    }
}

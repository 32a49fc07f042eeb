use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum DebounceError {
    #[error("debouncer must be created inside a tokio runtime")]
    NoRuntime,
}

type Action = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Waiting {
        quiet_deadline: Instant,
        ceiling: Option<Instant>,
    },
    /// The action is running. `rearm` records calls that arrived meanwhile.
    Firing { rearm: bool },
}

struct Shared {
    quiet: Duration,
    max_wait: Option<Duration>,
    action: Action,
    phase: Mutex<Phase>,
    disposed: CancellationToken,
}

impl Shared {
    fn burst_from(&self, now: Instant) -> Phase {
        Phase::Waiting {
            quiet_deadline: now + self.quiet,
            ceiling: self.max_wait.map(|max_wait| now + max_wait),
        }
    }
}

/// Coalesces bursts of `invoke` calls into single runs of one action.
///
/// Every call pushes the quiet deadline back; the action fires once the quiet
/// period elapses without calls, or once `max_wait` has passed since the
/// first call of the burst, whichever comes first.
pub struct Debouncer {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl Debouncer {
    /// A zero `max_wait` disables the ceiling.
    pub fn new(
        quiet: Duration,
        max_wait: Duration,
        action: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self, DebounceError> {
        let runtime = Handle::try_current().map_err(|_| DebounceError::NoRuntime)?;
        Ok(Self {
            shared: Arc::new(Shared {
                quiet,
                max_wait: (!max_wait.is_zero()).then_some(max_wait),
                action: Box::new(action),
                phase: Mutex::new(Phase::Idle),
                disposed: CancellationToken::new(),
            }),
            runtime,
        })
    }

    pub fn invoke(&self) {
        if self.shared.disposed.is_cancelled() {
            return;
        }
        let mut phase = self.shared.phase.lock();
        if let Phase::Idle = *phase {
            *phase = self.shared.burst_from(Instant::now());
            drop(phase);
            self.runtime.spawn(drive(Arc::clone(&self.shared)));
            return;
        }
        match &mut *phase {
            Phase::Waiting { quiet_deadline, .. } => {
                *quiet_deadline = Instant::now() + self.shared.quiet;
            }
            Phase::Firing { rearm } => *rearm = true,
            Phase::Idle => {}
        }
    }

    /// Cancels pending timers. The action never fires after this returns.
    pub fn dispose(&self) {
        self.shared.disposed.cancel();
        *self.shared.phase.lock() = Phase::Idle;
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.is_cancelled()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn due_at(phase: Phase) -> Option<Instant> {
    match phase {
        Phase::Waiting {
            quiet_deadline,
            ceiling,
        } => Some(ceiling.map_or(quiet_deadline, |ceiling| ceiling.min(quiet_deadline))),
        Phase::Idle | Phase::Firing { .. } => None,
    }
}

async fn drive(shared: Arc<Shared>) {
    loop {
        let Some(deadline) = due_at(*shared.phase.lock()) else {
            return;
        };
        tokio::select! {
            _ = shared.disposed.cancelled() => return,
            _ = sleep_until(deadline) => {}
        }

        {
            let mut phase = shared.phase.lock();
            if shared.disposed.is_cancelled() {
                return;
            }
            match due_at(*phase) {
                Some(due) if due <= Instant::now() => *phase = Phase::Firing { rearm: false },
                // The quiet deadline moved while we slept.
                Some(_) => continue,
                None => return,
            }
        }

        // A panicking action is its own problem; the debouncer stays usable.
        let _ = catch_unwind(AssertUnwindSafe(|| (shared.action)()));

        let mut phase = shared.phase.lock();
        match *phase {
            Phase::Firing { rearm: true } if !shared.disposed.is_cancelled() => {
                *phase = shared.burst_from(Instant::now());
            }
            _ => {
                *phase = Phase::Idle;
                return;
            }
        }
    }
}

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::debounce::{DebounceError, Debouncer};
use crate::session::UserId;

const SETTINGS_QUIET: Duration = Duration::from_millis(500);
const SETTINGS_MAX_WAIT: Duration = Duration::from_millis(5000);

/// What the remote does when a copy, move or new folder collides with an
/// existing name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    Replace,
    #[default]
    Rename,
    Fail,
}

impl fmt::Display for ConflictBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Replace => "replace",
            Self::Rename => "rename",
            Self::Fail => "fail",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub conflict_behavior: ConflictBehavior,
    pub activated_user: Option<UserId>,
}

/// In-memory settings whose changes reach the persist hook in coalesced
/// batches.
pub struct SettingsStore {
    current: Arc<Mutex<Settings>>,
    changed: Debouncer,
}

impl SettingsStore {
    pub fn new(
        initial: Settings,
        persist: impl Fn(Settings) + Send + Sync + 'static,
    ) -> Result<Self, DebounceError> {
        Self::with_timing(initial, SETTINGS_QUIET, SETTINGS_MAX_WAIT, persist)
    }

    pub fn with_timing(
        initial: Settings,
        quiet: Duration,
        max_wait: Duration,
        persist: impl Fn(Settings) + Send + Sync + 'static,
    ) -> Result<Self, DebounceError> {
        let current = Arc::new(Mutex::new(initial));
        let snapshot_source = Arc::clone(&current);
        let changed = Debouncer::new(quiet, max_wait, move || {
            let snapshot = snapshot_source.lock().clone();
            persist(snapshot);
        })?;
        Ok(Self { current, changed })
    }

    pub fn get(&self) -> Settings {
        self.current.lock().clone()
    }

    /// Applies `change` and schedules a persist if anything differs.
    pub fn update(&self, change: impl FnOnce(&mut Settings)) {
        let modified = {
            let mut current = self.current.lock();
            let before = current.clone();
            change(&mut current);
            *current != before
        };
        if modified {
            self.changed.invoke();
        }
    }
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("current", &*self.current.lock())
            .finish_non_exhaustive()
    }
}

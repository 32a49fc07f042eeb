use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::remote::RemoteDrive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An activated account: a stable id plus an authenticated remote client.
pub struct Session {
    id: UserId,
    display_name: String,
    remote: Arc<dyn RemoteDrive>,
}

impl Session {
    pub fn new(id: UserId, display_name: impl Into<String>, remote: Arc<dyn RemoteDrive>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            remote,
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn remote(&self) -> &dyn RemoteDrive {
        self.remote.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Lifecycle notifications published by the session provider.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Activated(Arc<Session>),
    Ended(UserId),
}

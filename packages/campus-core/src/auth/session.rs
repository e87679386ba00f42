//! Session state and the context that carries it through the application.
//!
//! One [`SessionContext`] is created at the application root and cloned into
//! every consumer. Readers get immutable snapshots or subscribe to changes;
//! writers go through cycle-tagged transitions so a result from a superseded
//! cycle can never overwrite a newer one.

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// The authenticated user as reported by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "username")]
    pub name: String,
    pub email: String,
    #[serde(rename = "avaUrl", alias = "avatarUrl", alias = "avatar_url", default)]
    pub avatar_url: Option<String>,
}

/// Some services send numeric ids.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(id) => id,
        Id::Number(id) => id.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No resolution yet for the current cycle
    #[default]
    Pending,
    Authenticated(UserIdentity),
    Unauthenticated,
}

impl SessionState {
    pub fn is_pending(&self) -> bool {
        matches!(self, SessionState::Pending)
    }

    pub fn user(&self) -> Option<&UserIdentity> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Unauthenticated => "unauthenticated",
        }
    }
}

/// Monotonic resolution-cycle identifier.
pub type CycleId = u64;

/// State plus the cycle that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub cycle: CycleId,
    pub state: SessionState,
}

/// Shared handle on the application's single session state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    tx: Arc<watch::Sender<SessionSnapshot>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    /// Starts `Pending` at cycle 0.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.tx.borrow().state.clone()
    }

    pub fn current_cycle(&self) -> CycleId {
        self.tx.borrow().cycle
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    /// Enter `Pending` under a fresh cycle, superseding any cycle in flight.
    pub fn begin_cycle(&self) -> CycleId {
        let mut cycle = 0;
        self.tx.send_modify(|snap| {
            snap.cycle += 1;
            snap.state = SessionState::Pending;
            cycle = snap.cycle;
        });
        tracing::debug!("Session cycle {} started", cycle);
        cycle
    }

    /// Settle `cycle` with `state`.
    ///
    /// Returns `false` without touching anything when `cycle` is no longer
    /// current or has already settled.
    pub fn commit(&self, cycle: CycleId, state: SessionState) -> bool {
        let label = state.label();
        let committed = self.tx.send_if_modified(|snap| {
            if snap.cycle != cycle || !snap.state.is_pending() {
                return false;
            }
            snap.state = state;
            true
        });
        if committed {
            tracing::debug!("Session cycle {} settled as {}", cycle, label);
        } else {
            tracing::debug!("Discarding stale {} result for cycle {}", label, cycle);
        }
        committed
    }

    /// Replace the state outright (sign-in/sign-out), superseding in-flight cycles.
    pub fn replace(&self, state: SessionState) -> CycleId {
        let cycle = self.begin_cycle();
        self.commit(cycle, state);
        cycle
    }

    /// Wait until the current cycle has settled and return its state.
    pub async fn settled(&self) -> SessionState {
        let mut rx = self.subscribe();
        let state = match rx.wait_for(|snap| !snap.state.is_pending()).await {
            Ok(snap) => snap.state.clone(),
            // Sender lives as long as self
            Err(_) => self.state(),
        };
        state
    }
}

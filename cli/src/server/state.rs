//! Shared server state

use loomchat_core::Orchestrator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    tokens: Arc<HashMap<String, String>>,
    turns: Arc<ActiveTurns>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, tokens: HashMap<String, String>) -> Self {
        Self {
            orchestrator,
            tokens: Arc::new(tokens),
            turns: Arc::new(ActiveTurns::default()),
        }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// User id owning a bearer token
    pub fn user_for_token(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    pub fn turns(&self) -> Arc<ActiveTurns> {
        Arc::clone(&self.turns)
    }
}

struct ActiveTurn {
    user_id: String,
    cancel: CancellationToken,
}

/// Turns currently streaming, keyed by turn id
#[derive(Default)]
pub struct ActiveTurns {
    turns: Mutex<HashMap<String, ActiveTurn>>,
}

impl ActiveTurns {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveTurn>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, turn_id: &str, user_id: &str, cancel: CancellationToken) {
        self.lock().insert(
            turn_id.to_string(),
            ActiveTurn {
                user_id: user_id.to_string(),
                cancel,
            },
        );
    }

    /// Cancel a turn owned by `user_id`; false if unknown or already cancelled
    pub fn cancel(&self, turn_id: &str, user_id: &str) -> bool {
        let turns = self.lock();
        match turns.get(turn_id) {
            Some(turn) if turn.user_id == user_id && !turn.cancel.is_cancelled() => {
                turn.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Ids of the live turns started by `user_id`
    pub fn owned_by(&self, user_id: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, turn)| turn.user_id == user_id)
            .map(|(turn_id, _)| turn_id.clone())
            .collect()
    }

    pub fn remove(&self, turn_id: &str) {
        self.lock().remove(turn_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_requires_owner() {
        let turns = ActiveTurns::default();
        let token = CancellationToken::new();
        turns.register("t1", "alice", token.clone());

        assert!(!turns.cancel("t1", "mallory"));
        assert!(turns.cancel("t1", "alice"));
        assert!(!turns.cancel("t1", "alice"));
        assert!(token.is_cancelled());

        turns.register("t2", "mallory", CancellationToken::new());
        assert_eq!(turns.owned_by("alice"), vec!["t1".to_string()]);

        turns.remove("t1");
        turns.remove("t2");
        assert_eq!(turns.len(), 0);
        assert!(!turns.cancel("t1", "alice"));
    }
}

//! Lifecycle notifications surfaced as log events.

use tether_session::{Session, SessionListener};
use tracing::debug;

/// Listener for a standalone node: nothing owns the sessions, so lifecycle
/// events are only logged.
#[derive(Debug, Default)]
pub struct TracingListener;

impl SessionListener for TracingListener {
    fn session_will_passivate(&self, session: &Session) {
        debug!(session_id = %session.id(), "Session passivated");
    }

    fn session_did_activate(&self, session: &Session) {
        debug!(session_id = %session.id(), "Session activated from store");
    }

    fn session_cache_discard(&self, session: &Session) {
        debug!(session_id = %session.id(), "Session discarded from cache");
    }

    fn session_affinity_broke(&self, session: &Session) {
        debug!(session_id = %session.id(), version = session.version(), "Session affinity broke");
    }
}

//! Auth and connectivity signals consumed by the sync engine.
//!
//! The engine never manages credentials itself: it only needs to know
//! whether a bearer token is currently present (authenticated) and
//! whether the network is believed reachable. Both are `watch` channels
//! so login, logout, and reconnect transitions made by the outer layer
//! are visible to long-lived holders of a [`Session`].

use tokio::sync::watch;

pub use secrecy::{ExposeSecret, SecretString};

/// Read side of the session signals. Cheap to clone; all clones observe
/// the same underlying channels.
#[derive(Clone)]
pub struct Session {
    token_rx: watch::Receiver<Option<SecretString>>,
    online_rx: watch::Receiver<bool>,
}

impl Session {
    /// Authenticated means a bearer token is currently installed.
    pub fn is_authenticated(&self) -> bool {
        self.token_rx.borrow().is_some()
    }

    /// Current bearer token, if any.
    pub fn bearer_token(&self) -> Option<SecretString> {
        self.token_rx.borrow().clone()
    }

    /// Whether the platform currently believes the network is reachable.
    pub fn network_reachable(&self) -> bool {
        *self.online_rx.borrow()
    }

    /// A session whose signals never change, for one-shot commands and
    /// tests. The write side is dropped; receivers keep serving the
    /// last-sent values.
    pub fn fixed(token: Option<SecretString>, online: bool) -> Self {
        let (_handle, session) = SessionHandle::new(token, online);
        session
    }
}

/// Write side of the session signals, owned by whichever layer manages
/// login state and connectivity probing.
pub struct SessionHandle {
    token_tx: watch::Sender<Option<SecretString>>,
    online_tx: watch::Sender<bool>,
}

impl SessionHandle {
    pub fn new(token: Option<SecretString>, online: bool) -> (Self, Session) {
        let (token_tx, token_rx) = watch::channel(token);
        let (online_tx, online_rx) = watch::channel(online);
        (
            Self {
                token_tx,
                online_tx,
            },
            Session {
                token_rx,
                online_rx,
            },
        )
    }

    /// Install a token (login) or clear it (logout).
    pub fn set_token(&self, token: Option<SecretString>) {
        self.token_tx.send_replace(token);
    }

    pub fn set_online(&self, online: bool) {
        self.online_tx.send_replace(online);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_session_reports_signals() {
        let session = Session::fixed(Some(SecretString::from("tok")), false);
        assert!(session.is_authenticated());
        assert!(!session.network_reachable());
        assert!(session.bearer_token().is_some());

        let session = Session::fixed(None, true);
        assert!(!session.is_authenticated());
        assert!(session.network_reachable());
        assert!(session.bearer_token().is_none());
    }

    #[test]
    fn test_handle_transitions_are_visible() {
        let (handle, session) = SessionHandle::new(None, false);
        assert!(!session.is_authenticated());
        assert!(!session.network_reachable());

        handle.set_token(Some(SecretString::from("tok")));
        handle.set_online(true);
        assert!(session.is_authenticated());
        assert!(session.network_reachable());

        handle.set_token(None);
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_clones_share_signals() {
        let (handle, session) = SessionHandle::new(None, true);
        let clone = session.clone();

        handle.set_token(Some(SecretString::from("tok")));
        assert!(clone.is_authenticated());
    }
}

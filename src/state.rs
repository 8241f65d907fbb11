use crate::chat::Message;
use crate::connection::ConnectionState;

/// Snapshot from the authentication collaborator. The client will not dial
/// until loading has finished and a user is present.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub user: Option<String>,
    pub loading: bool,
}

impl AuthState {
    pub fn ready(&self) -> bool {
        !self.loading && self.user.is_some()
    }
}

/// Events surfaced from the client loop to the rendering layer.
#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus {
        state: ConnectionState,
        attempts: u32,
    },
    MessageAppended(Message),
    LoadingChanged(bool),
    /// Most recent surfaced problem; replaces any prior one.
    Error(String),
    ErrorCleared,
    AudioEnabled(bool),
    AudioStarted {
        id: String,
    },
    AudioCompleted {
        id: String,
        bytes: u64,
    },
}

//! Error taxonomy of the client and how each failure reaches the user.

use gateway::GatewayError;
use thiserror::Error;

use crate::host::HostError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account is waiting for administrator approval")]
    PendingApproval,
    #[error("account registration was rejected")]
    Rejected,
    #[error("sign-in failed: {0}")]
    Gateway(#[source] GatewayError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Gateway(GatewayError),
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("settings storage failed: {0}")]
    Storage(#[from] std::io::Error),
    #[error("settings blob is malformed: {0}")]
    Settings(#[from] serde_json::Error),
}

impl ClientError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Decide how a failure is shown, given what triggered the work.
    pub fn surface(&self, context: ErrorContext) -> Surface {
        match self {
            Self::NotFound { .. } => Surface::Ignore,
            _ if context.is_user_initiated() => Surface::Alert,
            _ => Surface::LogOnly,
        }
    }
}

impl From<GatewayError> for ClientError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { table } => Self::NotFound {
                what: format!("{table} record"),
            },
            other => Self::Gateway(other),
        }
    }
}

/// Where a failing operation was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    SignIn,
    SendMessage,
    CreateRoom,
    InviteMember,
    LeaveRoom,
    BoardEdit,
    SaveSettings,
    PushEvent,
    Presence,
    Refresh,
}

impl ErrorContext {
    pub fn is_user_initiated(self) -> bool {
        !matches!(self, Self::PushEvent | Self::Presence | Self::Refresh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Blocking alert in front of the user.
    Alert,
    /// Logged and dropped; a later push or refresh corrects local state.
    LogOnly,
    /// Referenced record is gone; nothing to do.
    Ignore,
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::Table;

    #[test]
    fn gateway_not_found_becomes_a_no_op_class() {
        let err = ClientError::from(GatewayError::NotFound {
            table: Table::Messages,
        });
        assert!(matches!(err, ClientError::NotFound { .. }));
        assert_eq!(err.surface(ErrorContext::SendMessage), Surface::Ignore);
    }

    #[test]
    fn user_actions_alert_and_background_work_logs() {
        let err = ClientError::from(GatewayError::Transport("connection reset".into()));
        assert_eq!(err.surface(ErrorContext::LeaveRoom), Surface::Alert);
        assert_eq!(err.surface(ErrorContext::Presence), Surface::LogOnly);
        assert_eq!(err.surface(ErrorContext::PushEvent), Surface::LogOnly);
    }
}

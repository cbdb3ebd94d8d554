//! Sign-in gated on administrator approval.

use std::sync::Arc;

use gateway::{decode_row, Filter, Gateway, GatewayError, Query, Session, Table};
use shared::{domain::ApprovalStatus, records::ProfileRecord};
use tracing::{info, warn};

use crate::{
    error::{AuthError, Result},
    members::MemberDirectory,
};

pub struct AuthService {
    gateway: Arc<dyn Gateway>,
}

impl AuthService {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Sign in, then refuse accounts still pending or rejected. A refused
    /// account is signed out again so no session survives.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self
            .gateway
            .sign_in(email.trim(), password)
            .await
            .map_err(|err| match err {
                GatewayError::Auth(message) => {
                    warn!(%message, "sign-in refused");
                    AuthError::InvalidCredentials
                }
                other => AuthError::Gateway(other),
            })?;

        let refusal = match self.approval_status(&session).await {
            Some(ApprovalStatus::Pending) => Some(AuthError::PendingApproval),
            Some(ApprovalStatus::Rejected) => Some(AuthError::Rejected),
            Some(ApprovalStatus::Approved) | None => None,
        };
        if let Some(refusal) = refusal {
            if let Err(err) = self.gateway.sign_out().await {
                warn!(error = %err, "sign-out after refused login failed");
            }
            info!(user_id = %session.user_id, reason = %refusal, "login refused");
            return Err(refusal);
        }

        info!(user_id = %session.user_id, "login accepted");
        Ok(session)
    }

    async fn approval_status(&self, session: &Session) -> Option<ApprovalStatus> {
        let query = Query::from(Table::Profiles)
            .filter(Filter::eq("id", session.user_id))
            .limit(1);
        let row = match self.gateway.query(query).await {
            Ok(rows) => rows.into_iter().next()?,
            Err(err) => {
                warn!(error = %err, "approval lookup failed");
                return None;
            }
        };
        match decode_row::<ProfileRecord>(row) {
            Ok(profile) => profile.approval_status,
            Err(err) => {
                warn!(error = %err, "profile row malformed");
                None
            }
        }
    }

    pub async fn restore(&self) -> Option<Session> {
        self.gateway.current_session().await
    }

    /// Mark the profile offline, then end the session.
    pub async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.gateway.current_session().await else {
            return Ok(());
        };
        MemberDirectory::new(Arc::clone(&self.gateway), session.user_id)
            .set_online(false)
            .await;
        self.gateway.sign_out().await?;
        info!(user_id = %session.user_id, "signed out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::MemoryGateway;
    use serde_json::json;

    async fn set_status(gateway: &MemoryGateway, email: &str, status: &str) {
        gateway
            .update(
                Table::Profiles,
                vec![Filter::eq("email", email)],
                json!({ "approval_status": status }),
            )
            .await
            .expect("update status");
    }

    #[tokio::test]
    async fn approved_account_signs_in() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.register_account("amy@example.com", "pw", "Amy").await;
        let auth = AuthService::new(gateway);

        let session = auth.sign_in(" amy@example.com ", "pw").await.expect("sign in");

        assert_eq!(session.user_id, id);
        assert_eq!(auth.restore().await.map(|s| s.user_id), Some(id));
    }

    #[tokio::test]
    async fn bad_password_is_invalid_credentials() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.register_account("amy@example.com", "pw", "Amy").await;
        let auth = AuthService::new(gateway);

        let err = auth.sign_in("amy@example.com", "nope").await.expect_err("refused");

        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(auth.restore().await.is_none());
    }

    #[tokio::test]
    async fn pending_and_rejected_accounts_get_no_session() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.register_account("new@example.com", "pw", "New").await;
        gateway.register_account("no@example.com", "pw", "No").await;
        set_status(&gateway, "new@example.com", "pending").await;
        set_status(&gateway, "no@example.com", "rejected").await;
        let auth = AuthService::new(gateway);

        let pending = auth.sign_in("new@example.com", "pw").await.expect_err("pending");
        assert!(matches!(pending, AuthError::PendingApproval));
        assert!(auth.restore().await.is_none());

        let rejected = auth.sign_in("no@example.com", "pw").await.expect_err("rejected");
        assert!(matches!(rejected, AuthError::Rejected));
        assert!(auth.restore().await.is_none());
    }

    #[tokio::test]
    async fn sign_out_marks_profile_offline() {
        let gateway = Arc::new(MemoryGateway::new());
        let id = gateway.register_account("amy@example.com", "pw", "Amy").await;
        let auth = AuthService::new(gateway.clone());
        auth.sign_in("amy@example.com", "pw").await.expect("sign in");
        MemberDirectory::new(gateway.clone(), id).set_online(true).await;

        auth.sign_out().await.expect("sign out");

        let profile = MemberDirectory::new(gateway, id).own_profile().await.expect("profile");
        assert!(!profile.is_online);
        assert!(auth.restore().await.is_none());
    }
}

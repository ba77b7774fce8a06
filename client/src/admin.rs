use crate::controller::SessionContext;
use gobet_common::error::AdminError;
use gobet_common::{login_identifier, NewProfile, Role, TransactionKind, User};
use gobet_server::{BalanceHandle, IdentityProvider, ProfileResolver, Store, TransactionRequest};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Account management for a signed-in administrator. Every operation is
/// checked against the capabilities of the current session.
pub struct AdminConsole<S: Store> {
    context: SessionContext,
    provider: Arc<dyn IdentityProvider>,
    resolver: Arc<ProfileResolver<S>>,
    balances: BalanceHandle,
    login_domain: String,
}

impl<S: Store> AdminConsole<S> {
    pub fn new(
        context: SessionContext,
        provider: Arc<dyn IdentityProvider>,
        resolver: Arc<ProfileResolver<S>>,
        balances: BalanceHandle,
        login_domain: impl Into<String>,
    ) -> Self {
        Self {
            context,
            provider,
            resolver,
            balances,
            login_domain: login_domain.into(),
        }
    }

    fn admin(&self) -> Result<User, AdminError> {
        let snapshot = self.context.snapshot();
        match &snapshot.user {
            Some(user) if snapshot.capabilities.can_manage_accounts => Ok(user.clone()),
            _ => Err(AdminError::Forbidden),
        }
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AdminError> {
        self.admin()?;
        Ok(self.resolver.list_users().await?)
    }

    pub async fn deposit(&self, target: &User, amount: u64) -> Result<u64, AdminError> {
        self.adjust(target, amount, TransactionKind::Deposit).await
    }

    /// Refused up front when `amount` exceeds the balance shown for `target`.
    pub async fn withdraw(&self, target: &User, amount: u64) -> Result<u64, AdminError> {
        self.adjust(target, amount, TransactionKind::Withdraw).await
    }

    async fn adjust(
        &self,
        target: &User,
        amount: u64,
        kind: TransactionKind,
    ) -> Result<u64, AdminError> {
        let admin = self.admin()?;
        let request = TransactionRequest::new(target.id.clone(), amount, kind)
            .authorised_by(admin.id.clone())
            .observed(target.balance);
        let balance = self.balances.apply(request).await?;

        // keep the header balance honest when admins fund themselves
        self.context.update_balance(&target.id, balance);
        Ok(balance)
    }

    /// Registers a login for `username` and provisions a regular profile
    /// with the configured opening balance. The admin stays signed in.
    pub async fn create_user(&self, username: &str, secret: &str) -> Result<User, AdminError> {
        let admin = self.admin()?;
        let username = username.trim();
        if username.is_empty() || secret.is_empty() {
            return Err(AdminError::MissingCredentials);
        }

        let identifier = login_identifier(username, &self.login_domain);
        let principal = self.provider.sign_up(&identifier, secret).await?;
        let provisioned = self
            .resolver
            .provision(
                NewProfile {
                    id: principal.id.clone(),
                    username: username.to_string(),
                    role: Role::User,
                },
                self.resolver.provisioning().opening_balance,
            )
            .await;
        let user = match provisioned {
            Ok(user) => user,
            Err(e) => {
                warn!(principal_id = %principal.id, error = %e, "provisioning failed, removing identity");
                if let Err(cleanup) = self.provider.delete_identity(&principal.id).await {
                    error!(
                        principal_id = %principal.id,
                        identifier = %principal.identifier,
                        error = %cleanup,
                        "identity left without a profile"
                    );
                }
                return Err(e.into());
            }
        };

        info!(admin_id = %admin.id, user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }
}

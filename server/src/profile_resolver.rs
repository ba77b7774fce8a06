use crate::store::Store;
use gobet_common::config::ProvisioningConfig;
use gobet_common::error::{ProfileError, StoreError};
use gobet_common::{Account, NewProfile, Principal, Role, User};
use tracing::{debug, error, info, warn};

/// Turns authenticated principals into domain users.
pub struct ProfileResolver<S: Store> {
    store: S,
    provisioning: ProvisioningConfig,
}

impl<S: Store> ProfileResolver<S> {
    pub fn new(store: S, provisioning: ProvisioningConfig) -> Self {
        Self {
            store,
            provisioning,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn provisioning(&self) -> &ProvisioningConfig {
        &self.provisioning
    }

    pub fn is_reserved(&self, principal: &Principal) -> bool {
        principal
            .identifier
            .eq_ignore_ascii_case(&self.provisioning.admin_identifier)
    }

    /// Read-only lookup; never writes.
    pub async fn resolve(&self, principal: &Principal) -> Result<User, ProfileError> {
        self.store
            .get_profile(&principal.id)
            .await?
            .map(User::from)
            .ok_or_else(|| ProfileError::NotFound(principal.id.clone()))
    }

    /// Lookup that provisions an administrator profile for the reserved
    /// identity when none exists. Safe to call again after a partial failure.
    pub async fn resolve_or_provision(&self, principal: &Principal) -> Result<User, ProfileError> {
        let existing = self.store.get_profile(&principal.id).await?;
        let reserved = self.is_reserved(principal);

        match existing {
            Some(profile) if reserved && profile.account.is_none() => {
                warn!(user_id = %principal.id, "administrator profile has no account, healing");
                self.ensure_account(&principal.id, self.provisioning.admin_seed_balance)
                    .await
                    .map_err(|e| ProfileError::Provisioning {
                        detail: format!("account for {}: {e}", principal.id),
                    })?;
                self.resolve(principal).await
            }
            Some(profile) => Ok(profile.into()),
            None if reserved => {
                info!(user_id = %principal.id, identifier = %principal.identifier, "provisioning administrator profile");
                self.provision(
                    NewProfile {
                        id: principal.id.clone(),
                        username: self.provisioning.admin_username.clone(),
                        role: Role::Admin,
                    },
                    self.provisioning.admin_seed_balance,
                )
                .await
            }
            None => Err(ProfileError::NotFound(principal.id.clone())),
        }
    }

    /// Creates a profile and its account as one unit. If the account step
    /// fails the profile is deleted again.
    pub async fn provision(
        &self,
        profile: NewProfile,
        opening_balance: u64,
    ) -> Result<User, ProfileError> {
        match self.store.insert_profile(&profile).await {
            Ok(_) => {}
            Err(e @ StoreError::Conflict(_)) => return self.adopt(profile, opening_balance, e).await,
            Err(e) => {
                return Err(ProfileError::Provisioning {
                    detail: format!("profile insert for {}: {e}", profile.id),
                })
            }
        }

        if let Err(e) = self.ensure_account(&profile.id, opening_balance).await {
            warn!(user_id = %profile.id, error = %e, "account insert failed, removing profile");
            if let Err(rollback) = self.store.delete_profile(&profile.id).await {
                error!(user_id = %profile.id, error = %rollback, "profile rollback failed");
                return Err(ProfileError::Provisioning {
                    detail: format!(
                        "account insert for {}: {e}; rollback also failed: {rollback}",
                        profile.id
                    ),
                });
            }
            return Err(ProfileError::Provisioning {
                detail: format!("account insert for {}: {e}", profile.id),
            });
        }

        self.reload(&profile.id).await
    }

    /// A conflicting insert is fine when the same profile was provisioned
    /// concurrently; any other clash (a taken username) is a failure.
    async fn adopt(
        &self,
        profile: NewProfile,
        opening_balance: u64,
        conflict: StoreError,
    ) -> Result<User, ProfileError> {
        match self.store.get_profile(&profile.id).await? {
            Some(found) if found.username == profile.username && found.role == profile.role => {
                debug!(user_id = %profile.id, "profile provisioned concurrently, reusing it");
                self.ensure_account(&profile.id, opening_balance)
                    .await
                    .map_err(|e| ProfileError::Provisioning {
                        detail: format!("account for {}: {e}", profile.id),
                    })?;
                self.reload(&profile.id).await
            }
            _ => Err(ProfileError::Provisioning {
                detail: format!("profile insert for {}: {conflict}", profile.id),
            }),
        }
    }

    async fn reload(&self, user_id: &str) -> Result<User, ProfileError> {
        self.store
            .get_profile(user_id)
            .await?
            .map(User::from)
            .ok_or_else(|| ProfileError::Provisioning {
                detail: format!("profile {user_id} missing after provisioning"),
            })
    }

    /// Reuses an account left behind by an earlier or concurrent attempt.
    async fn ensure_account(&self, user_id: &str, balance: u64) -> Result<Account, StoreError> {
        if let Some(account) = self.store.get_account(user_id).await? {
            return Ok(account);
        }
        match self.store.insert_account(user_id, balance).await {
            Err(StoreError::Conflict(reason)) => match self.store.get_account(user_id).await? {
                Some(account) => Ok(account),
                None => Err(StoreError::Conflict(reason)),
            },
            other => other,
        }
    }

    /// Every profile with the USER role, for the administrator's user list.
    pub async fn list_users(&self) -> Result<Vec<User>, ProfileError> {
        Ok(self
            .store
            .list_profiles(Role::User)
            .await?
            .into_iter()
            .map(User::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_manager::DatabaseManager;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use gobet_common::{StoredProfile, TransactionRecord};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn admin() -> Principal {
        Principal {
            id: "root-id".into(),
            identifier: "admin@gobet.local".into(),
        }
    }

    fn resolver<S: Store>(store: S) -> ProfileResolver<S> {
        ProfileResolver::new(store, ProvisioningConfig::default())
    }

    #[tokio::test]
    async fn existing_profile_resolves_with_balance() {
        let store = MemoryStore::new();
        store
            .insert_profile(&NewProfile {
                id: "u1".into(),
                username: "alice".into(),
                role: Role::User,
            })
            .await
            .unwrap();
        store.insert_account("u1", 75).await.unwrap();

        let principal = Principal {
            id: "u1".into(),
            identifier: "alice@gobet.local".into(),
        };
        let user = resolver(store).resolve(&principal).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.balance, 75);
        assert_eq!(user.role, Role::User);
    }

    #[tokio::test]
    async fn unknown_principal_is_not_found() {
        let principal = Principal {
            id: "nobody".into(),
            identifier: "nobody@gobet.local".into(),
        };
        let resolver = resolver(MemoryStore::new());
        assert_eq!(
            resolver.resolve_or_provision(&principal).await,
            Err(ProfileError::NotFound("nobody".into()))
        );
        assert!(resolver.store.get_profile("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_never_provisions() {
        let resolver = resolver(MemoryStore::new());
        assert!(matches!(
            resolver.resolve(&admin()).await,
            Err(ProfileError::NotFound(_))
        ));
        assert!(resolver.store.get_profile("root-id").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reserved_identity_is_provisioned_once() {
        let resolver = resolver(MemoryStore::new());
        let first = resolver.resolve_or_provision(&admin()).await.unwrap();
        assert_eq!(first.role, Role::Admin);
        assert_eq!(first.username, "admin");
        assert_eq!(first.balance, 10_000);

        let second = resolver.resolve_or_provision(&admin()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.store.list_profiles(Role::Admin).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reserved_identifier_match_ignores_case() {
        let resolver = resolver(MemoryStore::new());
        let principal = Principal {
            id: "root-id".into(),
            identifier: "ADMIN@gobet.local".into(),
        };
        assert!(resolver.is_reserved(&principal));
    }

    /// Memory store whose account inserts fail while `fail_accounts` is set.
    struct BrokenAccounts {
        inner: MemoryStore,
        fail_accounts: AtomicBool,
        fail_deletes: AtomicBool,
    }

    impl BrokenAccounts {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_accounts: AtomicBool::new(true),
                fail_deletes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Store for BrokenAccounts {
        async fn get_profile(&self, id: &str) -> Result<Option<StoredProfile>, StoreError> {
            self.inner.get_profile(id).await
        }
        async fn list_profiles(&self, role: Role) -> Result<Vec<StoredProfile>, StoreError> {
            self.inner.list_profiles(role).await
        }
        async fn insert_profile(&self, p: &NewProfile) -> Result<StoredProfile, StoreError> {
            self.inner.insert_profile(p).await
        }
        async fn delete_profile(&self, id: &str) -> Result<(), StoreError> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable);
            }
            self.inner.delete_profile(id).await
        }
        async fn insert_account(&self, id: &str, balance: u64) -> Result<Account, StoreError> {
            if self.fail_accounts.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("accounts table locked".into()));
            }
            self.inner.insert_account(id, balance).await
        }
        async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
            self.inner.get_account(id).await
        }
        async fn compare_and_set_balance(
            &self,
            id: &str,
            expected: u64,
            new: u64,
        ) -> Result<Option<u64>, StoreError> {
            self.inner.compare_and_set_balance(id, expected, new).await
        }
        async fn insert_transaction(&self, r: &TransactionRecord) -> Result<(), StoreError> {
            self.inner.insert_transaction(r).await
        }
        async fn list_transactions(&self, id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
            self.inner.list_transactions(id).await
        }
    }

    #[tokio::test]
    async fn failed_account_insert_rolls_back_profile() {
        let resolver = resolver(BrokenAccounts::new());
        let err = resolver.resolve_or_provision(&admin()).await.unwrap_err();
        assert!(matches!(err, ProfileError::Provisioning { .. }));
        assert!(resolver.store.get_profile("root-id").await.unwrap().is_none());

        // retry after the store recovers
        resolver.store.fail_accounts.store(false, Ordering::SeqCst);
        let user = resolver.resolve_or_provision(&admin()).await.unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.balance, 10_000);
    }

    #[tokio::test]
    async fn orphaned_profile_is_healed_on_retry() {
        let resolver = resolver(BrokenAccounts::new());
        resolver.store.fail_deletes.store(true, Ordering::SeqCst);

        let err = resolver.resolve_or_provision(&admin()).await.unwrap_err();
        match err {
            ProfileError::Provisioning { detail } => assert!(detail.contains("rollback")),
            other => panic!("unexpected error {other:?}"),
        }
        // the profile is left behind without an account
        assert!(resolver.store.get_profile("root-id").await.unwrap().is_some());

        resolver.store.fail_accounts.store(false, Ordering::SeqCst);
        let user = resolver.resolve_or_provision(&admin()).await.unwrap();
        assert_eq!(user.balance, 10_000);
        assert_eq!(resolver.store.list_profiles(Role::Admin).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn provision_reuses_leftover_account() {
        let store = MemoryStore::new();
        store.insert_account("u2", 40).await.unwrap();
        let resolver = resolver(store);
        let user = resolver
            .provision(
                NewProfile {
                    id: "u2".into(),
                    username: "bob".into(),
                    role: Role::User,
                },
                0,
            )
            .await
            .unwrap();
        assert_eq!(user.balance, 40);
    }

    #[tokio::test]
    async fn concurrent_admin_resolutions_agree() {
        let (db, _) = DatabaseManager::spawn(MemoryStore::new(), 8);
        let resolver = resolver(db);

        let (admin_a, admin_b) = (admin(), admin());
        let (first, second) = tokio::join!(
            resolver.resolve_or_provision(&admin_a),
            resolver.resolve_or_provision(&admin_b)
        );
        let first = first.unwrap();
        assert_eq!(first.role, Role::Admin);
        assert_eq!(first.balance, 10_000);
        assert_eq!(second.unwrap(), first);
        assert_eq!(resolver.store.list_profiles(Role::Admin).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_provisioning_of_one_profile_shares_the_account() {
        let resolver = resolver(MemoryStore::new());
        let bob = || NewProfile {
            id: "u2".into(),
            username: "bob".into(),
            role: Role::User,
        };
        let (a, b) = tokio::join!(resolver.provision(bob(), 25), resolver.provision(bob(), 25));
        assert_eq!(a.unwrap().balance, 25);
        assert_eq!(b.unwrap().balance, 25);
        assert_eq!(resolver.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_username_fails_provisioning_without_side_effects() {
        let resolver = resolver(MemoryStore::new());
        let bob = |id: &str| NewProfile {
            id: id.into(),
            username: "bob".into(),
            role: Role::User,
        };
        resolver.provision(bob("u2"), 0).await.unwrap();
        assert!(matches!(
            resolver.provision(bob("u3"), 0).await,
            Err(ProfileError::Provisioning { .. })
        ));
        assert!(resolver.store.get_account("u3").await.unwrap().is_none());
        assert_eq!(resolver.list_users().await.unwrap().len(), 1);
    }
}

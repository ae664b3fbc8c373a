//! Principal resolution against the durable store.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use chainwatch_core::domain::{parse_api_key, ClientType, PlanCode, Principal};
use chainwatch_core::error::AuthError;
use chainwatch_core::ports::{
    ApiKeyRepository, PrincipalResolver, SecretHasher, SubscriptionRepository,
};

/// Resolves bearer keys against `api_keys` joined with the account's
/// current subscription. Every failure mode collapses to
/// `Unauthenticated`; only the logs know why.
pub struct DbPrincipalResolver {
    keys: Arc<dyn ApiKeyRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    hasher: Arc<dyn SecretHasher>,
}

impl DbPrincipalResolver {
    pub fn new(
        keys: Arc<dyn ApiKeyRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        hasher: Arc<dyn SecretHasher>,
    ) -> Self {
        Self {
            keys,
            subscriptions,
            hasher,
        }
    }
}

#[async_trait]
impl PrincipalResolver for DbPrincipalResolver {
    async fn resolve(
        &self,
        raw_key: &str,
        _client_type: Option<ClientType>,
    ) -> Result<Principal, AuthError> {
        let parsed = parse_api_key(raw_key).ok_or(AuthError::Unauthenticated)?;

        let auth = self
            .keys
            .find_active_auth(parsed.id)
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?
            .ok_or(AuthError::Unauthenticated)?;

        if !self.hasher.verify(parsed.secret, &auth.key_hash)? {
            tracing::debug!(key_id = %auth.key_id, "API key secret mismatch");
            return Err(AuthError::Unauthenticated);
        }

        // No subscription row means the lite defaults with overage off.
        let subscription = self
            .subscriptions
            .find_entitled(auth.account_id)
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        let (plan, overage_enabled) = subscription
            .map(|s| (s.plan_code, s.overage_enabled))
            .unwrap_or((PlanCode::Lite, false));

        Ok(Principal {
            account_id: auth.account_id,
            api_key_id: auth.key_id,
            plan,
            client_type: auth.client_type,
            overage_enabled,
        })
    }
}

/// Pass-through resolver for deployments without a durable store (dev and
/// single-binary demos): every caller becomes the same synthetic lite
/// principal. Never enable in production.
pub struct StaticPrincipalResolver {
    account_id: Uuid,
}

impl StaticPrincipalResolver {
    pub fn new() -> Self {
        Self {
            account_id: Uuid::new_v4(),
        }
    }
}

impl Default for StaticPrincipalResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrincipalResolver for StaticPrincipalResolver {
    async fn resolve(
        &self,
        raw_key: &str,
        client_type: Option<ClientType>,
    ) -> Result<Principal, AuthError> {
        if raw_key.is_empty() {
            return Err(AuthError::Unauthenticated);
        }
        Ok(Principal {
            account_id: self.account_id,
            api_key_id: "key_dev".to_string(),
            plan: PlanCode::Lite,
            client_type: client_type.unwrap_or(ClientType::Human),
            overage_enabled: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chainwatch_core::domain::{
        ApiKey, NewApiKey, Subscription, SubscriptionStatus, SubscriptionSync,
    };
    use chainwatch_core::error::RepoError;
    use chainwatch_core::ports::KeyAuth;

    use crate::auth::{generate_api_key, Argon2SecretHasher};

    struct OneKeyRepo {
        auth: KeyAuth,
    }

    #[async_trait]
    impl ApiKeyRepository for OneKeyRepo {
        async fn find_active_auth(&self, key_id: &str) -> Result<Option<KeyAuth>, RepoError> {
            Ok((key_id == self.auth.key_id).then(|| self.auth.clone()))
        }
        async fn insert(&self, _key: NewApiKey) -> Result<(), RepoError> {
            Ok(())
        }
        async fn revoke(&self, _key_id: &str) -> Result<bool, RepoError> {
            Ok(false)
        }
        async fn list_for_account(&self, _account_id: Uuid) -> Result<Vec<ApiKey>, RepoError> {
            Ok(vec![])
        }
        async fn list_active_ids(&self, _account_id: Uuid) -> Result<Vec<String>, RepoError> {
            Ok(vec![])
        }
        async fn list_all_active(&self) -> Result<Vec<(Uuid, String)>, RepoError> {
            Ok(vec![])
        }
    }

    struct OneSubRepo(Mutex<Option<Subscription>>);

    #[async_trait]
    impl SubscriptionRepository for OneSubRepo {
        async fn find_entitled(
            &self,
            _account_id: Uuid,
        ) -> Result<Option<Subscription>, RepoError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .clone()
                .filter(|s| s.status.entitles_usage()))
        }
        async fn find_by_external_id(
            &self,
            _external_id: &str,
        ) -> Result<Option<Subscription>, RepoError> {
            Ok(None)
        }
        async fn ensure_trial(
            &self,
            _account_id: Uuid,
            _plan_code: PlanCode,
        ) -> Result<(), RepoError> {
            Ok(())
        }
        async fn record_checkout(
            &self,
            _account_id: Uuid,
            _external_customer_id: &str,
            _external_subscription_id: &str,
        ) -> Result<(), RepoError> {
            Ok(())
        }
        async fn sync_from_provider(&self, _sync: SubscriptionSync) -> Result<(), RepoError> {
            Ok(())
        }
        async fn cancel_by_external_id(&self, _external_id: &str) -> Result<(), RepoError> {
            Ok(())
        }
        async fn activate(
            &self,
            _account_id: Uuid,
            _plan_code: PlanCode,
        ) -> Result<(), RepoError> {
            Ok(())
        }
    }

    fn resolver_with(
        subscription: Option<Subscription>,
    ) -> (DbPrincipalResolver, String, Uuid) {
        let hasher = Arc::new(Argon2SecretHasher::new());
        let minted = generate_api_key("test", hasher.as_ref()).unwrap();
        let account_id = Uuid::new_v4();
        let keys = Arc::new(OneKeyRepo {
            auth: KeyAuth {
                key_id: minted.key_id.clone(),
                account_id,
                key_hash: minted.secret_hash.clone(),
                client_type: ClientType::Agent,
            },
        });
        let subs = Arc::new(OneSubRepo(Mutex::new(subscription)));
        (
            DbPrincipalResolver::new(keys, subs, hasher),
            minted.raw_key,
            account_id,
        )
    }

    #[tokio::test]
    async fn resolves_known_key_with_plan_defaults() {
        let (resolver, raw_key, account_id) = resolver_with(None);
        let principal = resolver.resolve(&raw_key, None).await.unwrap();
        assert_eq!(principal.account_id, account_id);
        assert_eq!(principal.plan, PlanCode::Lite);
        assert!(!principal.overage_enabled);
        assert_eq!(principal.client_type, ClientType::Agent);
    }

    #[tokio::test]
    async fn subscription_row_upgrades_the_plan() {
        let (resolver, raw_key, acct) = resolver_with(Some(Subscription {
            account_id: Uuid::new_v4(),
            plan_code: PlanCode::Pro,
            overage_enabled: true,
            external_customer_id: None,
            external_subscription_id: None,
            status: SubscriptionStatus::Active,
            current_period_start: None,
            current_period_end: None,
        }));
        let principal = resolver.resolve(&raw_key, None).await.unwrap();
        assert_eq!(principal.account_id, acct);
        assert_eq!(principal.plan, PlanCode::Pro);
        assert!(principal.overage_enabled);
    }

    #[tokio::test]
    async fn canceled_subscription_falls_back_to_lite() {
        let (resolver, raw_key, _) = resolver_with(Some(Subscription {
            account_id: Uuid::new_v4(),
            plan_code: PlanCode::Pro,
            overage_enabled: true,
            external_customer_id: None,
            external_subscription_id: None,
            status: SubscriptionStatus::Canceled,
            current_period_start: None,
            current_period_end: None,
        }));
        let principal = resolver.resolve(&raw_key, None).await.unwrap();
        assert_eq!(principal.plan, PlanCode::Lite);
        assert!(!principal.overage_enabled);
    }

    #[tokio::test]
    async fn wrong_secret_and_malformed_keys_are_unauthenticated() {
        let (resolver, raw_key, _) = resolver_with(None);

        let mut tampered = raw_key.clone();
        tampered.replace_range(tampered.len() - 4.., "XXXX");
        assert!(matches!(
            resolver.resolve(&tampered, None).await,
            Err(AuthError::Unauthenticated)
        ));
        assert!(matches!(
            resolver.resolve("not-a-key", None).await,
            Err(AuthError::Unauthenticated)
        ));

        // Unknown prefix: the repository only surfaces active keys, so a
        // revoked or never-minted id resolves the same way.
        let unknown = format!("sc_test_{}_{}", "z".repeat(12), "y".repeat(32));
        assert!(matches!(
            resolver.resolve(&unknown, None).await,
            Err(AuthError::Unauthenticated)
        ));
    }
}

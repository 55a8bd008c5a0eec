//! Wallet sign-in: a single-use challenge per address, answered with a
//! `personal_sign` signature and exchanged for a session token.

use std::sync::Arc;

use chrono::Duration;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::credential::{AccessToken, CredentialIssuer};
use crate::entities::user;
use crate::error::{ServiceError, ServiceResult};
use crate::ethereum::{format_address, is_valid_address, normalize_address, recover_personal_signer};
use crate::store::{self, Store};

/// A challenge older than this is treated as absent.
pub const CHALLENGE_LIFETIME: Duration = Duration::minutes(3);

const NONCE_MIN: u64 = 1_000_000_000;
const NONCE_MAX: u64 = 10_000_000_000;

pub fn challenge_message(address: &str, nonce: u64) -> String {
    format!(
        "Hello, {address}! Please, sign this message with random param {nonce} to use the application!"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub user: user::Model,
    pub access_token: AccessToken,
}

pub struct AuthService {
    store: Store,
    clock: Arc<dyn Clock>,
    credentials: CredentialIssuer,
    lock: Mutex<()>,
}

impl AuthService {
    pub fn new(store: Store, clock: Arc<dyn Clock>, credentials: CredentialIssuer) -> Self {
        Self {
            store,
            clock,
            credentials,
            lock: Mutex::new(()),
        }
    }

    pub fn credentials(&self) -> &CredentialIssuer {
        &self.credentials
    }

    /// Stores a fresh challenge for `address`, replacing any earlier one, and
    /// returns the text the wallet has to sign.
    pub async fn issue_challenge(&self, address: &str) -> ServiceResult<String> {
        let address = checked_address(address)?;
        let nonce = rand::thread_rng().gen_range(NONCE_MIN..NONCE_MAX);
        let message = challenge_message(&address, nonce);

        let _guard = self.lock.lock().await;
        let txn = self.store.begin().await?;
        store::upsert_challenge(&txn, &address, &message, self.clock.now_millis()).await?;
        store::commit(txn).await?;
        Ok(message)
    }

    pub async fn authenticate(&self, address: &str, signature: &str) -> ServiceResult<AuthOutcome> {
        let address = checked_address(address)?;
        let _guard = self.lock.lock().await;

        // The challenge is spent by this attempt whatever the outcome, so its
        // removal commits on its own.
        let txn = self.store.begin().await?;
        let challenge = store::take_challenge(&txn, &address).await?;
        store::commit(txn).await?;
        let Some(challenge) = challenge else {
            return Err(ServiceError::ChallengeNotFound);
        };

        let expires_at = challenge.issued_at + CHALLENGE_LIFETIME.num_milliseconds();
        if expires_at < self.clock.now_millis() {
            return Err(ServiceError::ChallengeExpired);
        }

        let signer = recover_personal_signer(&challenge.code, signature).map_err(|err| {
            warn!("Signature recovery failed for {address}: {err}");
            ServiceError::WrongSignature
        })?;
        if format_address(&signer) != address {
            return Err(ServiceError::WrongSignature);
        }

        let txn = self.store.begin().await?;
        let user = store::find_or_create_user(&txn, &address).await?;
        let access_token = self.credentials.issue(user.id)?;
        store::commit(txn).await?;

        info!("User {} authenticated as {}", user.id, user.address);
        Ok(AuthOutcome { user, access_token })
    }
}

/// Lowercases `address` and rejects anything but `0x` + 40 hex digits.
pub(crate) fn checked_address(address: &str) -> ServiceResult<String> {
    let address = normalize_address(address);
    if !is_valid_address(&address) {
        return Err(ServiceError::ValidationFailed(format!(
            "invalid address {address}"
        )));
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    use crate::clock::ManualClock;
    use crate::ethereum::Signer;
    use crate::ethereum::signature::personal_message_hash;
    use crate::testing::{memory_store, wallet};

    struct Harness {
        clock: Arc<ManualClock>,
        service: AuthService,
        store: Store,
    }

    async fn harness() -> Harness {
        let store = memory_store().await;
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let credentials =
            CredentialIssuer::new(b"0123456789abcdef0123456789abcdef", clock.clone());
        let service = AuthService::new(store.clone(), clock.clone(), credentials);
        Harness {
            clock,
            service,
            store,
        }
    }

    fn address_of(signer: &Signer) -> String {
        format_address(&signer.address())
    }

    #[tokio::test]
    async fn challenge_message_embeds_address_and_nonce() {
        let h = harness().await;
        let signer = wallet(0);
        let upper = address_of(&signer).to_ascii_uppercase().replacen("0X", "0x", 1);

        let message = h.service.issue_challenge(&upper).await.unwrap();
        let prefix = format!(
            "Hello, {}! Please, sign this message with random param ",
            address_of(&signer)
        );
        assert!(message.starts_with(&prefix));
        let nonce: u64 = message[prefix.len()..]
            .trim_end_matches(" to use the application!")
            .parse()
            .unwrap();
        assert!((NONCE_MIN..NONCE_MAX).contains(&nonce));
    }

    #[tokio::test]
    async fn signed_challenge_yields_user_and_token() {
        let h = harness().await;
        let signer = wallet(0);
        let address = address_of(&signer);

        let message = h.service.issue_challenge(&address).await.unwrap();
        let signature = signer.sign_personal_message(&message).unwrap();
        let outcome = h.service.authenticate(&address, &signature).await.unwrap();

        assert_eq!(outcome.user.address, address);
        assert_eq!(
            h.service.credentials().verify(&outcome.access_token.token),
            Ok(outcome.user.id)
        );

        // A second sign-in reuses the same user.
        let message = h.service.issue_challenge(&address).await.unwrap();
        let signature = signer.sign_personal_message(&message).unwrap();
        let again = h.service.authenticate(&address, &signature).await.unwrap();
        assert_eq!(again.user, outcome.user);
    }

    #[tokio::test]
    async fn newer_challenge_invalidates_older() {
        let h = harness().await;
        let signer = wallet(0);
        let address = address_of(&signer);

        let first = h.service.issue_challenge(&address).await.unwrap();
        let second = h.service.issue_challenge(&address).await.unwrap();
        assert_ne!(first, second);

        let stale = signer.sign_personal_message(&first).unwrap();
        assert_eq!(
            h.service.authenticate(&address, &stale).await,
            Err(ServiceError::WrongSignature)
        );
        // The failed attempt consumed the second challenge as well.
        let fresh = signer.sign_personal_message(&second).unwrap();
        assert_eq!(
            h.service.authenticate(&address, &fresh).await,
            Err(ServiceError::ChallengeNotFound)
        );
    }

    #[tokio::test]
    async fn replay_is_rejected() {
        let h = harness().await;
        let signer = wallet(1);
        let address = address_of(&signer);

        let message = h.service.issue_challenge(&address).await.unwrap();
        let signature = signer.sign_personal_message(&message).unwrap();
        h.service.authenticate(&address, &signature).await.unwrap();
        assert_eq!(
            h.service.authenticate(&address, &signature).await,
            Err(ServiceError::ChallengeNotFound)
        );
    }

    #[tokio::test]
    async fn concurrent_sign_ins_spend_the_challenge_once() {
        let h = harness().await;
        let signer = wallet(1);
        let address = address_of(&signer);

        let message = h.service.issue_challenge(&address).await.unwrap();
        let signature = signer.sign_personal_message(&message).unwrap();
        let (first, second) = tokio::join!(
            h.service.authenticate(&address, &signature),
            h.service.authenticate(&address, &signature),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        assert!(outcomes.contains(&Err(ServiceError::ChallengeNotFound)));
    }

    #[tokio::test]
    async fn expired_challenge_is_consumed() {
        let h = harness().await;
        let signer = wallet(0);
        let address = address_of(&signer);

        let message = h.service.issue_challenge(&address).await.unwrap();
        let signature = signer.sign_personal_message(&message).unwrap();
        h.clock.advance(Duration::minutes(4));
        assert_eq!(
            h.service.authenticate(&address, &signature).await,
            Err(ServiceError::ChallengeExpired)
        );
        assert_eq!(
            h.service.authenticate(&address, &signature).await,
            Err(ServiceError::ChallengeNotFound)
        );
        assert!(
            store::find_user_by_address(h.store.connection(), &address)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn challenge_is_usable_up_to_its_lifetime() {
        let h = harness().await;
        let signer = wallet(0);
        let address = address_of(&signer);

        let message = h.service.issue_challenge(&address).await.unwrap();
        let signature = signer.sign_personal_message(&message).unwrap();
        h.clock.advance(CHALLENGE_LIFETIME);
        assert!(h.service.authenticate(&address, &signature).await.is_ok());
    }

    #[tokio::test]
    async fn normalized_recovery_byte_and_mixed_case_address() {
        let h = harness().await;
        let signer = wallet(2);
        let address = address_of(&signer);
        let mixed: String = address
            .char_indices()
            .map(|(i, c)| if i > 1 && i % 2 == 0 { c.to_ascii_uppercase() } else { c })
            .collect();

        let message = h.service.issue_challenge(&mixed).await.unwrap();
        let (compact, recovery_id) = signer.sign_hash(&personal_message_hash(&message)).unwrap();
        let mut bytes = compact.to_vec();
        bytes.push(recovery_id);

        let outcome = h
            .service
            .authenticate(&mixed, &hex::encode(bytes))
            .await
            .unwrap();
        assert_eq!(outcome.user.address, address);
    }

    #[tokio::test]
    async fn other_wallet_signature_is_wrong() {
        let h = harness().await;
        let owner = address_of(&wallet(0));

        let message = h.service.issue_challenge(&owner).await.unwrap();
        let signature = wallet(1).sign_personal_message(&message).unwrap();
        assert_eq!(
            h.service.authenticate(&owner, &signature).await,
            Err(ServiceError::WrongSignature)
        );
        assert_eq!(
            h.service.authenticate(&owner, "0x1234").await,
            Err(ServiceError::ChallengeNotFound)
        );
    }

    #[tokio::test]
    async fn malformed_address_fails_validation() {
        let h = harness().await;
        assert!(matches!(
            h.service.issue_challenge("0xnothex").await,
            Err(ServiceError::ValidationFailed(_))
        ));
    }
}

//! Master secret change protocol.
//!
//! A change runs through
//! `Idle -> Verifying -> ObtainingNew -> Reencrypting -> Staged`, and a
//! separate [`RotationCoordinator::commit`] moves `Staged -> Committed`.
//! Input problems end in `Rejected` before anything is written, unless an
//! earlier change is still staged, in which case the state stays `Staged`.
//! A failure from re-encryption onwards puts the state back where it was and
//! leaves both keystore slots as they were.
//!
//! The coordinator takes `&mut self`; running two changes at once is not
//! supported and the owner has to serialize callers.

use keywarden_types::MasterPasswordConfig;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::MasterPasswordPolicy;
use crate::error::RotationError;
use crate::keystore::{KeyStore, SealedStore, StoreError};
use crate::provider::{ProviderError, ProviderRegistry, ResolvedProvider};
use crate::secret::SecretValue;
use crate::security::persist::SecurityConfigStore;

/// Where the change protocol currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    Idle,
    Verifying,
    ObtainingNew,
    Reencrypting,
    Staged,
    Committed,
    Rejected,
}

/// One change request. Empty strings count as absent.
#[derive(Debug, Clone, Copy)]
pub struct RotationRequest<'a> {
    /// Target configuration; its provider becomes the active one
    pub config: &'a MasterPasswordConfig,
    pub current_secret: Option<&'a str>,
    pub new_secret: Option<&'a str>,
    pub confirm_secret: Option<&'a str>,
}

/// What a successful change staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    /// Provider now authoritative for the master secret
    pub provider: String,
    /// Keystore entries re-sealed under the new secret
    pub reencrypted_entries: usize,
}

/// Everything one change touches, borrowed from the owner for the call.
pub(crate) struct RotationContext<'a> {
    pub providers: &'a ProviderRegistry,
    pub keystore: &'a KeyStore,
    pub config_store: &'a SecurityConfigStore,
    pub master_config: &'a mut MasterPasswordConfig,
}

#[derive(Debug)]
pub struct RotationCoordinator {
    state: RotationState,
    policy: MasterPasswordPolicy,
}

impl RotationCoordinator {
    pub fn new(policy: MasterPasswordPolicy) -> Self {
        Self {
            state: RotationState::Idle,
            policy,
        }
    }

    /// Current protocol state. A rejected attempt while a change is staged
    /// reports `Staged`, since that change is still waiting for commit.
    pub fn state(&self) -> RotationState {
        self.state
    }

    /// Verify, obtain, re-encrypt and stage a master secret change.
    pub(crate) fn change_secret(
        &mut self,
        ctx: RotationContext<'_>,
        request: RotationRequest<'_>,
    ) -> Result<RotationOutcome, RotationError> {
        let before = self.state;
        let keystore = ctx.keystore;
        self.transition(RotationState::Verifying);

        match self.run(ctx, request) {
            Ok(outcome) => {
                self.transition(RotationState::Staged);
                Ok(outcome)
            }
            Err(err) => {
                let next = match self.state {
                    RotationState::Verifying | RotationState::ObtainingNew => {
                        // a pending change can still be committed
                        if keystore.has_staged().unwrap_or(false) {
                            RotationState::Staged
                        } else {
                            RotationState::Rejected
                        }
                    }
                    _ => before,
                };
                warn!(error = %err, state = ?self.state, "Master secret change failed");
                self.transition(next);
                Err(err)
            }
        }
    }

    /// Promote the staged keystore and flush decrypted values. Returns
    /// `false` when nothing was staged.
    pub(crate) fn commit(&mut self, keystore: &KeyStore) -> Result<bool, RotationError> {
        match keystore.commit() {
            Ok(true) => {
                self.transition(RotationState::Committed);
                info!("Master secret change committed");
                Ok(true)
            }
            Ok(false) => {
                debug!("No staged master secret change to commit");
                Ok(false)
            }
            Err(e) => {
                error!(
                    error = %e,
                    "Committing the master secret change failed; the keystore may need manual recovery"
                );
                Err(RotationError::store_corruption(format!("commit failed: {e}")))
            }
        }
    }

    fn run(
        &mut self,
        ctx: RotationContext<'_>,
        request: RotationRequest<'_>,
    ) -> Result<RotationOutcome, RotationError> {
        let current = present(request.current_secret);
        let has_content = ctx.keystore.has_content().map_err(store_failure)?;

        if request.config.provider_name.trim().is_empty() {
            return Err(RotationError::MissingVerification);
        }
        if current.is_none() && has_content {
            return Err(RotationError::MissingVerification);
        }

        if let Some(current) = current {
            let active = ctx.providers.resolve(&ctx.master_config.provider_name)?;
            if !active.read()?.matches(current) {
                return Err(RotationError::AuthenticationFailed);
            }
            debug!(provider = %active.name(), "Current master secret verified");
        }

        self.transition(RotationState::ObtainingNew);
        let target = ctx.providers.resolve(&request.config.provider_name)?;
        let new_secret = self.obtain_new_secret(&target, current, request)?;

        self.transition(RotationState::Reencrypting);
        let previous_staged = ctx.keystore.staged().map_err(store_failure)?;
        if previous_staged.is_none() {
            if let Some(current) = current {
                // keep serving reads with the old key until commit
                ctx.keystore.unlock(current.as_bytes()).map_err(store_failure)?;
            }
        }
        let entries = ctx
            .keystore
            .stage_reencrypted(current.map(str::as_bytes), new_secret.as_bytes())
            .map_err(|e| {
                error!(error = %e, "Re-encryption failed, live keystore left untouched");
                store_failure(e)
            })?;

        if !target.is_read_only() {
            if let Err(e) = target.write(&new_secret) {
                restore_staged(ctx.keystore, previous_staged.as_ref());
                return Err(e.into());
            }

            // the staged store only opens with exactly what the provider returns
            let kept = target.read().map(|stored| stored.matches(new_secret.as_str()));
            if !matches!(kept, Ok(true)) {
                undo_target_write(&ctx, &target, previous_staged.as_ref(), current);
                return Err(match kept {
                    Err(e) => e.into(),
                    Ok(_) => ProviderError::custom(format!(
                        "provider '{}' returned a different secret than was written",
                        target.name()
                    ))
                    .into(),
                });
            }
        }

        let next = MasterPasswordConfig::new(target.name());
        if let Err(e) = ctx.config_store.save_master_config(&next) {
            undo_target_write(&ctx, &target, previous_staged.as_ref(), current);
            return Err(RotationError::store_corruption(format!(
                "cannot save master password config: {e}"
            )));
        }

        info!(
            from = %ctx.master_config.provider_name,
            to = %target.name(),
            entries,
            "Master secret change staged, commit to activate"
        );
        *ctx.master_config = next;

        Ok(RotationOutcome {
            provider: target.name().to_string(),
            reencrypted_entries: entries,
        })
    }

    fn obtain_new_secret(
        &self,
        target: &ResolvedProvider,
        current: Option<&str>,
        request: RotationRequest<'_>,
    ) -> Result<SecretValue, RotationError> {
        if target.is_read_only() {
            if present(request.new_secret).is_some() || present(request.confirm_secret).is_some() {
                warn!(
                    provider = %target.name(),
                    "Ignoring supplied new secret, the read-only provider's value is authoritative"
                );
            }
            return Ok(target.read()?);
        }

        let new = present(request.new_secret).ok_or_else(|| {
            RotationError::invalid_new_secret(format!(
                "provider '{}' is writable and needs a new secret",
                target.name()
            ))
        })?;
        if request.confirm_secret.map(str::as_bytes) != Some(new.as_bytes()) {
            return Err(RotationError::ConfirmationMismatch);
        }
        if new.contains(['\r', '\n']) {
            return Err(RotationError::invalid_new_secret(
                "secret must not contain line breaks",
            ));
        }
        if let Some(reason) = self.policy.violation(new) {
            return Err(RotationError::InvalidNewSecret(reason));
        }
        if current == Some(new) {
            return Err(RotationError::invalid_new_secret(
                "new secret equals the current one",
            ));
        }
        Ok(SecretValue::new(new))
    }

    fn transition(&mut self, next: RotationState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Rotation state change");
            self.state = next;
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn store_failure(err: StoreError) -> RotationError {
    RotationError::store_corruption(err.to_string())
}

/// Put the staged slot back and, when the target is the active provider,
/// return the previous secret to it.
fn undo_target_write(
    ctx: &RotationContext<'_>,
    target: &ResolvedProvider,
    previous_staged: Option<&SealedStore>,
    current: Option<&str>,
) {
    restore_staged(ctx.keystore, previous_staged);
    if target.name() != ctx.master_config.provider_name || target.is_read_only() {
        return;
    }
    if let Some(current) = current {
        if let Err(e) = target.write(&SecretValue::new(current)) {
            error!(
                provider = %target.name(),
                error = %e,
                "Could not write back the previous master secret; manual recovery required"
            );
        }
    }
}

fn restore_staged(keystore: &KeyStore, previous: Option<&SealedStore>) {
    if let Err(e) = keystore.restore_staged(previous) {
        error!(error = %e, "Could not restore the staged keystore slot");
    }
}

//! Login of the built-in `root` account against the master secret.

use tracing::{debug, warn};

use crate::authz::Principal;
use crate::error::SecurityResult;
use crate::secret::SecretValue;

/// Name of the account that authenticates with the master secret.
pub const ROOT_USERNAME: &str = "root";

/// Role granted to `root`.
pub const ADMINISTRATOR_ROLE: &str = "ROLE_ADMINISTRATOR";

/// Anything that can tell the master secret valid right now.
pub trait MasterSecretSource {
    fn master_secret(&self) -> SecurityResult<SecretValue>;
}

/// Authenticates `root` against the master secret at call time, so a secret
/// replaced by a change stops working immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct RootAuthenticationProvider;

impl RootAuthenticationProvider {
    pub fn new() -> Self {
        Self
    }

    /// `Some(principal)` for `root` with the current master secret, `None`
    /// for anyone else or any other password.
    pub fn authenticate<S>(&self, source: &S, username: &str, password: &str) -> Option<Principal>
    where
        S: MasterSecretSource + ?Sized,
    {
        if username != ROOT_USERNAME {
            return None;
        }
        let secret = match source.master_secret() {
            Ok(secret) => secret,
            Err(e) => {
                warn!(error = %e, "Master secret unavailable, root login refused");
                return None;
            }
        };
        if secret.matches(password) {
            debug!("Root login accepted");
            Some(Principal::new(ROOT_USERNAME, [ADMINISTRATOR_ROLE]))
        } else {
            warn!("Root login with wrong password");
            None
        }
    }
}

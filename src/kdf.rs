//! Password-token derivation.
//!
//! The 32-byte password token is the root of both authentication paths. For
//! a real credential it is scrypt over the credential bytes with the exact
//! parameter exponents recorded in `.pwd`; for the default-password user it
//! is the literal marker string NUL-padded to token width.

use scrypt::{scrypt, Params as ScryptParams};

use crate::error::UnlockError;
use crate::secret::Secret;

/// Width of the password token in bytes.
pub const PASSWORD_TOKEN_LEN: usize = 32;

/// Marker credential denoting the default-password user.
pub const DEFAULT_CREDENTIAL: &str = "!";

/// Token material used when no real credential is set.
const DEFAULT_PASSWORD: &str = "default-password";

/// Run scrypt over the credential with the `.pwd` parameter exponents.
///
/// The exponents are used verbatim: `N = 1 << log_n`, `r = 1 << log_r`,
/// `p = 1 << log_p`. No clamping is applied; out-of-range exponents are
/// rejected by the KDF itself and surface as [`UnlockError::Kdf`].
pub fn derive_password_token(
    credential: &[u8],
    salt: &[u8],
    log_n: u8,
    log_r: u8,
    log_p: u8,
) -> Result<Secret, UnlockError> {
    let params = ScryptParams::new(log_n, 1u32 << log_r, 1u32 << log_p, PASSWORD_TOKEN_LEN)
        .map_err(|err| UnlockError::Kdf(format!("invalid scrypt parameters: {err}")))?;
    let mut token = vec![0u8; PASSWORD_TOKEN_LEN];
    scrypt(credential, salt, &params, &mut token)
        .map_err(|err| UnlockError::Kdf(format!("scrypt failed: {err}")))?;
    Ok(Secret::new(token))
}

/// The fixed token for the default-password user: `"default-password"`
/// right-padded with NULs to token width.
pub fn default_password_token() -> Secret {
    let mut token = DEFAULT_PASSWORD.as_bytes().to_vec();
    token.resize(PASSWORD_TOKEN_LEN, 0);
    Secret::new(token)
}

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::auth::secret::Secret;

/// Bytes of entropy in a password reset token.
pub const RESET_TOKEN_BYTES: usize = 32;

/// Generates a new reset token, returning `(token, digest)`. Only the digest
/// is stored; the token goes to the user.
pub fn generate() -> (Secret, String) {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let token = Secret::from(Base64UrlUnpadded::encode_string(&bytes));
    let hash = digest(token.expose());
    (token, hash)
}

/// SHA-256 of the token. A fast hash is enough here: the token carries its
/// own entropy, unlike a user-chosen password.
pub fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    Base64UrlUnpadded::encode_string(&hasher.finalize())
}

/// Compares two stored digests in constant time.
pub fn digests_match(a: &str, b: &str) -> bool {
    constant_time_eq::constant_time_eq(a.as_bytes(), b.as_bytes())
}

//! API-key secrets: generation, hashing and verification.
//!
//! A secret is `fg_` followed by 48 hex characters. Only its argon2 hash is
//! stored; the first [`PREFIX_LEN`] characters are kept in clear for lookup.

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use flaggate_core::{Error, Result};
use rand_core::{OsRng, RngCore};

pub const SECRET_PREFIX: &str = "fg_";
pub const PREFIX_LEN: usize = 12;
const SECRET_BYTES: usize = 24;

/// A freshly generated secret and its lookup prefix.
pub struct Generated {
  pub secret: String,
  pub prefix: String,
}

pub fn generate() -> Generated {
  let mut raw = [0u8; SECRET_BYTES];
  OsRng.fill_bytes(&mut raw);
  let secret = format!("{SECRET_PREFIX}{}", hex::encode(raw));
  let prefix = secret[..PREFIX_LEN].to_owned();
  Generated { secret, prefix }
}

/// Lookup prefix of a presented secret, if it is shaped like one of ours.
pub fn prefix_of(secret: &str) -> Option<&str> {
  if !secret.starts_with(SECRET_PREFIX) || secret.len() != SECRET_PREFIX.len() + 2 * SECRET_BYTES {
    return None;
  }
  secret.get(..PREFIX_LEN)
}

pub fn hash(secret: &str) -> Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(secret.as_bytes(), &salt)
    .map(|h| h.to_string())
    .map_err(|e| Error::backend(std::io::Error::other(format!("argon2: {e}"))))
}

pub fn verify(secret: &str, phc: &str) -> bool {
  PasswordHash::new(phc)
    .and_then(|parsed| Argon2::default().verify_password(secret.as_bytes(), &parsed))
    .is_ok()
}

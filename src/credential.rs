//! Decodes the credentials that operators pass on the command line.
//!
//! Two forms are accepted:
//!
//! * Plaintext: `username:password`. The string is split on the first `:`, so passwords may
//!   contain further colons.
//! * Obfuscated: `xor:` followed by the standard Base64 encoding of the plaintext form after a
//!   byte-wise XOR with an [ObfuscationKey]. This keeps passwords out of shell history and process
//!   listings. It is **not** encryption; anyone holding the key can reverse it.
//!
//! The `xor:` tag makes detection unambiguous. A plaintext credential whose username is literally
//! `xor` must therefore be passed in obfuscated form.

use crate::error::{ErrorKind, Failure};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Marks a credential string as obfuscated.
pub const OBFUSCATED_PREFIX: &str = "xor:";

/// Replaces secrets in text returned by [Credential::redact].
pub const REDACTED: &str = "********";

/// A username and secret, held in memory for the duration of one invocation.
///
/// The [fmt::Debug] implementation never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Credential {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the secret. Callers must not log or display it.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Replaces every occurrence of the secret in `text` with [REDACTED].
    pub fn redact(&self, text: &str) -> String {
        if self.secret.is_empty() {
            return text.to_owned();
        }
        text.replace(&self.secret, REDACTED)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &REDACTED)
            .finish()
    }
}

/// The key for the obfuscated credential form.
///
/// This is configuration, not a constant, so that it can be rotated. See
/// [crate::config::Settings::obfuscation_key].
#[derive(Clone, PartialEq, Eq)]
pub struct ObfuscationKey(Vec<u8>);

impl ObfuscationKey {
    /// Returns [None] if `key` is empty, because XOR with an empty key is meaningless.
    pub fn new(key: impl Into<Vec<u8>>) -> Option<Self> {
        let key = key.into();
        match key.is_empty() {
            true => None,
            false => Some(ObfuscationKey(key)),
        }
    }

    /// XORs `bytes` with the key, repeating the key as needed. Applying this twice is a no-op.
    fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        bytes
            .iter()
            .zip(self.0.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

impl Default for ObfuscationKey {
    fn default() -> Self {
        ObfuscationKey(b"_".to_vec())
    }
}

impl fmt::Debug for ObfuscationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObfuscationKey(..)")
    }
}

/// Why a credential string could not be decoded.
///
/// Messages describe the problem with the input's shape, never its contents.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("malformed credential: {0}")]
    MalformedCredential(&'static str),
}

impl CredentialError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::MalformedCredential
    }
}

/// Decodes a plaintext or obfuscated credential string.
pub fn decode(raw: &str, key: &ObfuscationKey) -> Result<Credential, CredentialError> {
    match raw.strip_prefix(OBFUSCATED_PREFIX) {
        Some(blob) => {
            let bytes = STANDARD.decode(blob.trim()).map_err(|_| {
                CredentialError::MalformedCredential("obfuscated credential is not valid Base64")
            })?;
            let plaintext = String::from_utf8(key.apply(&bytes)).map_err(|_| {
                CredentialError::MalformedCredential(
                    "obfuscated credential does not decode to text; check the obfuscation key",
                )
            })?;
            decode_plaintext(&plaintext)
        }
        None => decode_plaintext(raw),
    }
}

fn decode_plaintext(raw: &str) -> Result<Credential, CredentialError> {
    let (username, secret) = raw.split_once(':').ok_or(CredentialError::MalformedCredential(
        "expected username:password",
    ))?;

    if username.is_empty() {
        return Err(CredentialError::MalformedCredential("username is empty"));
    }
    if secret.is_empty() {
        return Err(CredentialError::MalformedCredential("password is empty"));
    }

    Ok(Credential::new(username, secret))
}

/// Produces the obfuscated form of `credential`, suitable for passing back to [decode].
pub fn encode_obfuscated(credential: &Credential, key: &ObfuscationKey) -> String {
    let plaintext = format!("{}:{}", credential.username, credential.secret);
    let blob = STANDARD.encode(key.apply(plaintext.as_bytes()));
    format!("{OBFUSCATED_PREFIX}{blob}")
}

/// The credentials for one dispatch: either one shared by every target or one per target.
#[derive(Clone, Debug)]
pub enum Credentials {
    Shared(Arc<Credential>),

    /// One credential per target, in target order.
    PerTarget(Vec<Arc<Credential>>),
}

impl Credentials {
    /// Pairs `credentials` with `target_count` targets.
    ///
    /// A single credential is shared. Otherwise there must be exactly one per target.
    pub fn for_targets(
        mut credentials: Vec<Credential>,
        target_count: usize,
    ) -> Result<Self, Failure> {
        match credentials.len() {
            1 => Ok(Credentials::Shared(Arc::new(credentials.remove(0)))),
            n if n == target_count => Ok(Credentials::PerTarget(
                credentials.into_iter().map(Arc::new).collect(),
            )),
            n => Err(Failure::new(
                ErrorKind::CredentialCount,
                format!("received {n} credentials for {target_count} appliances; pass one to share or one per appliance"),
            )),
        }
    }

    /// Returns the credential for the target at `index`, or [None] if a per-target list is too
    /// short.
    pub fn for_index(&self, index: usize) -> Option<Arc<Credential>> {
        match self {
            Credentials::Shared(credential) => Some(credential.clone()),
            Credentials::PerTarget(list) => list.get(index).cloned(),
        }
    }
}

impl From<Credential> for Credentials {
    fn from(credential: Credential) -> Self {
        Credentials::Shared(Arc::new(credential))
    }
}

#[cfg(test)]
mod test;

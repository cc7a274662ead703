//! Password scrambles for the MySQL authentication plugins.
//!
//! `mysql_native_password`:
//! ```text
//! SHA1(pw) XOR SHA1(seed || SHA1(SHA1(pw)))
//! ```
//! `caching_sha2_password` fast path:
//! ```text
//! SHA256(pw) XOR SHA256(SHA256(SHA256(pw)) || seed)
//! ```
//! The caching_sha2 full path sends the password in clear over TLS, or
//! RSA-encrypted with the server's public key on a plain socket.

use std::fmt;

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use unisql_core::{Error, Result};

/// Authentication plugins the client can answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2,
    ClearPassword,
}

impl AuthPlugin {
    /// Plugin for a server-supplied name. Unknown names fall back to
    /// `mysql_native_password`, which every server accepts as a switch target.
    pub fn from_name(name: &str) -> Self {
        match name {
            "caching_sha2_password" => Self::CachingSha2,
            "mysql_clear_password" => Self::ClearPassword,
            _ => Self::NativePassword,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::NativePassword => "mysql_native_password",
            Self::CachingSha2 => "caching_sha2_password",
            Self::ClearPassword => "mysql_clear_password",
        }
    }

    /// First-round auth response for `password` against `seed`.
    ///
    /// An empty password is sent as an empty response for the hashing
    /// plugins.
    pub fn scramble(self, password: &str, seed: &[u8]) -> Vec<u8> {
        match self {
            Self::ClearPassword => cleartext_password(password),
            _ if password.is_empty() => Vec::new(),
            Self::NativePassword => native_scramble(password, &seed[..seed.len().min(20)]),
            Self::CachingSha2 => sha2_scramble(password, strip_nul(seed)),
        }
    }
}

impl fmt::Display for AuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// AuthMoreData status bytes of `caching_sha2_password`.
pub mod caching_sha2 {
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Servers append a NUL to the 20-byte scramble.
fn strip_nul(seed: &[u8]) -> &[u8] {
    match seed {
        [head @ .., 0] if head.len() == 20 => head,
        _ => seed,
    }
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

fn native_scramble(password: &str, seed: &[u8]) -> Vec<u8> {
    let once = Sha1::digest(password.as_bytes());
    let twice = Sha1::digest(once);
    let salted = Sha1::new().chain_update(seed).chain_update(twice).finalize();
    xor(&once, &salted)
}

fn sha2_scramble(password: &str, seed: &[u8]) -> Vec<u8> {
    let once = Sha256::digest(password.as_bytes());
    let twice = Sha256::digest(once);
    let salted = Sha256::new().chain_update(twice).chain_update(seed).finalize();
    xor(&once, &salted)
}

/// Password with a NUL terminator, as sent by `mysql_clear_password` and
/// by full caching_sha2 authentication over TLS.
pub fn cleartext_password(password: &str) -> Vec<u8> {
    let mut out = password.as_bytes().to_vec();
    out.push(0);
    out
}

/// RSA-encrypt the NUL-terminated password, XORed with the repeating
/// seed, under the server's PEM public key (SPKI or PKCS#1).
///
/// `use_oaep` selects OAEP-SHA1 padding (MySQL 8.0.5+); otherwise
/// PKCS#1 v1.5.
pub fn sha256_password_rsa(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
    use_oaep: bool,
) -> Result<Vec<u8>> {
    if seed.is_empty() {
        return Err(Error::connection("RSA password exchange needs a seed"));
    }
    let masked: Vec<u8> = cleartext_password(password)
        .iter()
        .zip(seed.iter().cycle())
        .map(|(p, s)| p ^ s)
        .collect();

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| Error::connection(format!("server public key is not UTF-8 PEM: {e}")))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| Error::connection(format!("invalid server RSA public key: {e}")))?;

    let encrypted = if use_oaep {
        key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &masked)
    } else {
        key.encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, &masked)
    };
    encrypted.map_err(|e| Error::connection(format!("RSA password encryption failed: {e}")))
}

//! SCRAM-SHA-256 authentication (RFC 5802 / RFC 7677), without channel binding.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::{Rng, distributions::Alphanumeric, thread_rng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use unisql_core::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Client side of one SCRAM exchange.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,

    salted_password: Option<[u8; 32]>,
    auth_message: Option<String>,
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        let client_nonce: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self::with_nonce(username, password, client_nonce)
    }

    fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        Self {
            username: escape_username(username),
            password: password.to_string(),
            client_nonce,
            salted_password: None,
            auth_message: None,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", self.username, self.client_nonce)
    }

    /// Client-first message: gs2 header `n,,` plus the bare message.
    pub fn client_first(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare()).into_bytes()
    }

    /// Process server-first (`r=..,s=..,i=..`) and build client-final.
    pub fn process_server_first(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let msg = std::str::from_utf8(data)
            .map_err(|e| auth_error(format!("invalid UTF-8 in SASL continue: {e}")))?;

        let mut combined_nonce = None;
        let mut salt = None;
        let mut iterations: Option<u32> = None;

        for part in msg.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(
                    BASE64
                        .decode(value)
                        .map_err(|e| auth_error(format!("invalid base64 salt: {e}")))?,
                );
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = Some(
                    value
                        .parse()
                        .map_err(|e| auth_error(format!("invalid iteration count: {e}")))?,
                );
            }
        }

        let combined_nonce = combined_nonce.ok_or_else(|| auth_error("missing server nonce"))?;
        let salt = salt.ok_or_else(|| auth_error("missing salt"))?;
        let iterations = iterations
            .filter(|i| *i > 0)
            .ok_or_else(|| auth_error("missing iteration count"))?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(auth_error("server nonce does not extend the client nonce"));
        }

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        )
        .map_err(|e| auth_error(format!("PBKDF2 failed: {e}")))?;

        // biws = base64("n,,")
        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            msg,
            client_final_without_proof
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = sha256(&client_key);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;

        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        self.salted_password = Some(salted_password);
        self.auth_message = Some(auth_message);

        Ok(format!(
            "{client_final_without_proof},p={}",
            BASE64.encode(&client_proof)
        )
        .into_bytes())
    }

    /// Check the server signature in server-final (`v=..`).
    pub fn verify_server_final(&self, data: &[u8]) -> Result<()> {
        let msg = std::str::from_utf8(data)
            .map_err(|e| auth_error(format!("invalid UTF-8 in SASL final: {e}")))?;

        if let Some(err) = msg.strip_prefix("e=") {
            return Err(auth_error(format!("server rejected SCRAM exchange: {err}")));
        }

        let server_signature_b64 = msg
            .strip_prefix("v=")
            .ok_or_else(|| auth_error("invalid server-final message"))?;
        let server_signature = BASE64
            .decode(server_signature_b64)
            .map_err(|e| auth_error(format!("invalid base64 server signature: {e}")))?;

        let (Some(salted_password), Some(auth_message)) =
            (self.salted_password.as_ref(), self.auth_message.as_ref())
        else {
            return Err(auth_error("server-final received before server-first"));
        };

        let server_key = hmac_sha256(salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;

        if !bool::from(server_signature.as_slice().ct_eq(&expected)) {
            return Err(auth_error("server signature mismatch"));
        }
        Ok(())
    }
}

/// `=` and `,` are reserved in SCRAM attribute values.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn auth_error(msg: impl Into<String>) -> Error {
    Error::connection(format!("SCRAM authentication failed: {}", msg.into()))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| auth_error(format!("HMAC init failed: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    fn rfc_client() -> ScramClient {
        ScramClient::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO".to_string())
    }

    #[test]
    fn test_rfc7677_exchange() {
        let mut client = rfc_client();
        assert_eq!(client.client_first(), b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let client_final = client.process_server_first(SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(
            String::from_utf8(client_final).unwrap(),
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        client
            .verify_server_final(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn test_server_signature_mismatch() {
        let mut client = rfc_client();
        client.process_server_first(SERVER_FIRST.as_bytes()).unwrap();
        let err = client
            .verify_server_final(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_foreign_nonce_rejected() {
        let mut client = rfc_client();
        let err = client
            .process_server_first(b"r=somethingelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();
        assert!(err.message().contains("nonce"));
    }

    #[test]
    fn test_final_before_first() {
        let client = rfc_client();
        assert!(client.verify_server_final(b"v=AAAA").is_err());
    }

    #[test]
    fn test_username_escaping() {
        let client = ScramClient::with_nonce("a=b,c", "pw", "n".to_string());
        assert_eq!(client.client_first(), b"n,,n=a=3Db=2Cc,r=n");
    }

    #[test]
    fn test_random_nonce() {
        let a = ScramClient::new("u", "p");
        let b = ScramClient::new("u", "p");
        assert_ne!(a.client_nonce, b.client_nonce);
        assert_eq!(a.client_nonce.len(), 24);
    }
}

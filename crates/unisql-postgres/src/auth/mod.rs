//! Password authentication methods.

mod scram;

pub use scram::ScramClient;

/// SASL mechanism name offered by PostgreSQL 10+.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5::compute(format!("{password}{user}"));
    let mut outer_input = format!("{inner:x}").into_bytes();
    outer_input.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(outer_input))
}

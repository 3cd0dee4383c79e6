//! MySQL authentication implementations.
//!
//! This module implements the MySQL authentication plugins:
//! - `mysql_native_password`: SHA1-based (legacy, MySQL < 8.0 default)
//! - `caching_sha2_password`: SHA256-based (MySQL 8.0+ default)
//! - `sha256_password`: RSA-encrypted or TLS cleartext password
//! - `mysql_clear_password`: cleartext, only over TLS
//!
//! [`AuthPlugin`] drives the per-plugin exchange: it computes the first
//! response from the scramble and decides what to send for each
//! "more data" message the server answers with.
//!
//! # mysql_native_password
//!
//! Password scramble algorithm:
//! ```text
//! SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Fast auth (if cached on server):
//! ```text
//! XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))
//! ```
//!
//! Full auth requires TLS or RSA public key encryption.

use mywire_core::{ConnectionErrorKind, Error, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use rand::rngs::OsRng;

use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;

/// Well-known authentication plugin names.
pub mod plugins {
    /// SHA1-based authentication (legacy default)
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    /// SHA256-based authentication (MySQL 8.0+ default)
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    /// RSA-based SHA256 authentication
    pub const SHA256_PASSWORD: &str = "sha256_password";
    /// MySQL clear password (for debugging/testing only)
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Response codes for caching_sha2_password protocol.
pub mod caching_sha2 {
    /// Request for public key (client should send 0x02)
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth success
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Full auth needed (switch to secure channel or RSA)
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Compute mysql_native_password authentication response.
///
/// Algorithm: `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
///
/// # Arguments
/// * `password` - The user's password (UTF-8)
/// * `auth_data` - The 20-byte scramble from the server
///
/// # Returns
/// The 20-byte authentication response, or empty vec if password is empty.
pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    // Ensure we only use first 20 bytes of auth_data
    let seed = if auth_data.len() > 20 {
        &auth_data[..20]
    } else {
        auth_data
    };

    // Stage 1: SHA1(password)
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    let stage1: [u8; 20] = hasher.finalize().into();

    // Stage 2: SHA1(SHA1(password))
    let mut hasher = Sha1::new();
    hasher.update(stage1);
    let stage2: [u8; 20] = hasher.finalize().into();

    // Stage 3: SHA1(seed + stage2)
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    // Final: stage1 XOR stage3
    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Compute caching_sha2_password fast authentication response.
///
/// Algorithm: `XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + seed))`
///
/// # Arguments
/// * `password` - The user's password (UTF-8)
/// * `auth_data` - The scramble from the server (typically 20 bytes + NUL)
///
/// # Returns
/// The 32-byte authentication response, or empty vec if password is empty.
pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![];
    }

    // Remove trailing NUL if present (MySQL sends 20-byte scramble + NUL = 21 bytes)
    // Only strip if length is 21 and ends with NUL, to avoid modifying valid 20-byte seeds
    let seed = if auth_data.len() == 21 && auth_data.last() == Some(&0) {
        &auth_data[..20]
    } else {
        auth_data
    };

    // SHA256(password)
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    let password_hash: [u8; 32] = hasher.finalize().into();

    // SHA256(SHA256(password))
    let mut hasher = Sha256::new();
    hasher.update(password_hash);
    let password_hash_hash: [u8; 32] = hasher.finalize().into();

    // SHA256(SHA256(SHA256(password)) + seed)
    let mut hasher = Sha256::new();
    hasher.update(password_hash_hash);
    hasher.update(seed);
    let scramble: [u8; 32] = hasher.finalize().into();

    // XOR(SHA256(password), scramble)
    password_hash
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Scramble password for sha256_password plugin using RSA encryption.
///
/// This is used when full authentication is required for caching_sha2_password
/// or sha256_password plugins without TLS.
///
/// # Arguments
/// * `password` - The user's password
/// * `seed` - The authentication seed from server
/// * `public_key` - RSA public key from server (PEM format)
///
/// # Returns
/// The encrypted password, or error if encryption fails.
pub fn sha256_password_rsa(
    password: &str,
    seed: &[u8],
    public_key_pem: &[u8],
    use_oaep: bool,
) -> std::result::Result<Vec<u8>, String> {
    // MySQL expects: RSA_encrypt(password_with_nul XOR seed_rotation)
    let mut pw = password.as_bytes().to_vec();
    pw.push(0); // NUL terminator

    if seed.is_empty() {
        return Err("Seed is empty".to_string());
    }

    for (i, b) in pw.iter_mut().enumerate() {
        *b ^= seed[i % seed.len()];
    }

    // Server usually returns a PEM public key for sha256_password/caching_sha2_password.
    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| format!("Public key is not valid UTF-8 PEM: {e}"))?;

    // Try both common encodings.
    let pub_key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| format!("Failed to parse RSA public key PEM: {e}"))?;

    let encrypted = if use_oaep {
        // MySQL 8.0.5+ uses OAEP padding for caching_sha2_password.
        let padding = rsa::Oaep::new::<Sha1>();
        pub_key
            .encrypt(&mut OsRng, padding, &pw)
            .map_err(|e| format!("RSA OAEP encryption failed: {e}"))?
    } else {
        let padding = rsa::Pkcs1v15Encrypt;
        pub_key
            .encrypt(&mut OsRng, padding, &pw)
            .map_err(|e| format!("RSA PKCS1v1.5 encryption failed: {e}"))?
    };

    Ok(encrypted)
}

/// Cleartext password followed by a NUL, for secure channels.
fn cleartext(password: &str) -> Vec<u8> {
    let mut out = password.as_bytes().to_vec();
    out.push(0);
    out
}

fn auth_error(message: impl Into<String>) -> Error {
    Error::connection(ConnectionErrorKind::Authentication, message)
}

/// An authentication plugin understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    NativePassword,
    CachingSha2Password,
    Sha256Password,
    ClearPassword,
}

/// What the client does after a "more data" message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Send this payload and keep waiting.
    Send(Vec<u8>),
    /// Send nothing; the server's next message settles the exchange.
    Wait,
}

/// Inputs the plugins need besides the server data.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub password: &'a str,
    pub scramble: &'a [u8],
    /// Is the channel encrypted (TLS)?
    pub secure: bool,
    /// Server RSA public key (PEM) configured by the user.
    pub server_public_key: Option<&'a [u8]>,
}

impl AuthPlugin {
    /// Look up a plugin by name. Unknown plugins are a fatal error.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            plugins::MYSQL_NATIVE_PASSWORD => Ok(AuthPlugin::NativePassword),
            plugins::CACHING_SHA2_PASSWORD => Ok(AuthPlugin::CachingSha2Password),
            plugins::SHA256_PASSWORD => Ok(AuthPlugin::Sha256Password),
            plugins::MYSQL_CLEAR_PASSWORD => Ok(AuthPlugin::ClearPassword),
            other => Err(Error::connection(
                ConnectionErrorKind::UnknownAuthPlugin,
                format!("unknown authentication plugin '{other}'"),
            )),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AuthPlugin::NativePassword => plugins::MYSQL_NATIVE_PASSWORD,
            AuthPlugin::CachingSha2Password => plugins::CACHING_SHA2_PASSWORD,
            AuthPlugin::Sha256Password => plugins::SHA256_PASSWORD,
            AuthPlugin::ClearPassword => plugins::MYSQL_CLEAR_PASSWORD,
        }
    }

    /// The response sent with the handshake response or after a switch.
    pub fn initial_response(self, ctx: &AuthContext<'_>) -> Result<Vec<u8>> {
        match self {
            AuthPlugin::NativePassword => Ok(mysql_native_password(ctx.password, ctx.scramble)),
            AuthPlugin::CachingSha2Password => {
                Ok(caching_sha2_password(ctx.password, ctx.scramble))
            }
            AuthPlugin::Sha256Password => {
                if ctx.password.is_empty() {
                    Ok(vec![0])
                } else if ctx.secure {
                    Ok(cleartext(ctx.password))
                } else if let Some(key) = ctx.server_public_key {
                    rsa_encrypt(ctx, key)
                } else {
                    // Ask for the server key
                    Ok(vec![1])
                }
            }
            AuthPlugin::ClearPassword => {
                if ctx.secure {
                    Ok(cleartext(ctx.password))
                } else {
                    Err(auth_error(
                        "mysql_clear_password requires a secure (TLS) connection",
                    ))
                }
            }
        }
    }

    /// React to an auth "more data" message.
    pub fn more_data(self, data: &[u8], ctx: &AuthContext<'_>) -> Result<AuthAction> {
        match self {
            AuthPlugin::CachingSha2Password => match data {
                [caching_sha2::FAST_AUTH_SUCCESS] => Ok(AuthAction::Wait),
                [caching_sha2::PERFORM_FULL_AUTH] => {
                    tracing::debug!(secure = ctx.secure, "caching_sha2_password full authentication");
                    if ctx.secure {
                        Ok(AuthAction::Send(cleartext(ctx.password)))
                    } else if let Some(key) = ctx.server_public_key {
                        rsa_encrypt(ctx, key).map(AuthAction::Send)
                    } else {
                        Ok(AuthAction::Send(vec![caching_sha2::REQUEST_PUBLIC_KEY]))
                    }
                }
                key if !ctx.secure => rsa_encrypt(ctx, key).map(AuthAction::Send),
                _ => Err(auth_error("unexpected caching_sha2_password data")),
            },
            AuthPlugin::Sha256Password if !ctx.secure => {
                rsa_encrypt(ctx, data).map(AuthAction::Send)
            }
            _ => Err(auth_error(format!(
                "unexpected authentication data for {}",
                self.name()
            ))),
        }
    }
}

fn rsa_encrypt(ctx: &AuthContext<'_>, public_key_pem: &[u8]) -> Result<Vec<u8>> {
    sha256_password_rsa(ctx.password, ctx.scramble, public_key_pem, true).map_err(auth_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_native_password_empty() {
        let result = mysql_native_password("", &[0; 20]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_mysql_native_password() {
        // Known test vector from MySQL protocol documentation
        // Seed: 20 bytes of zeros
        // Password: "secret"
        let seed = [0u8; 20];
        let result = mysql_native_password("secret", &seed);

        // Should produce 20 bytes
        assert_eq!(result.len(), 20);

        // The result should be deterministic
        let result2 = mysql_native_password("secret", &seed);
        assert_eq!(result, result2);
    }

    #[test]
    fn test_mysql_native_password_real_seed() {
        // Test with a realistic scramble
        let seed = [
            0x3d, 0x4c, 0x5e, 0x2f, 0x1a, 0x0b, 0x7c, 0x8d, 0x9e, 0xaf, 0x10, 0x21, 0x32, 0x43,
            0x54, 0x65, 0x76, 0x87, 0x98, 0xa9,
        ];

        let result = mysql_native_password("mypassword", &seed);
        assert_eq!(result.len(), 20);

        // Different password should give different result
        let result2 = mysql_native_password("otherpassword", &seed);
        assert_ne!(result, result2);
    }

    #[test]
    fn test_caching_sha2_password_empty() {
        let result = caching_sha2_password("", &[0; 20]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_caching_sha2_password() {
        let seed = [0u8; 20];
        let result = caching_sha2_password("secret", &seed);

        // Should produce 32 bytes (SHA-256 output)
        assert_eq!(result.len(), 32);

        // Should be deterministic
        let result2 = caching_sha2_password("secret", &seed);
        assert_eq!(result, result2);
    }

    #[test]
    fn test_caching_sha2_password_with_nul() {
        // MySQL often sends seed with trailing NUL
        let mut seed = vec![0u8; 20];
        seed.push(0); // Trailing NUL

        let result = caching_sha2_password("secret", &seed);
        assert_eq!(result.len(), 32);

        // Should be same as without NUL
        let result2 = caching_sha2_password("secret", &seed[..20]);
        assert_eq!(result, result2);
    }

    #[test]
    fn test_plugin_names() {
        assert_eq!(plugins::MYSQL_NATIVE_PASSWORD, "mysql_native_password");
        assert_eq!(plugins::CACHING_SHA2_PASSWORD, "caching_sha2_password");
        assert_eq!(plugins::SHA256_PASSWORD, "sha256_password");
    }

    fn ctx(secure: bool) -> AuthContext<'static> {
        AuthContext {
            password: "secret",
            scramble: &[7; 20],
            secure,
            server_public_key: None,
        }
    }

    #[test]
    fn test_unknown_plugin_is_fatal() {
        let err = AuthPlugin::from_name("dialog").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            err.code(),
            mywire_core::ErrorCode::Connection(ConnectionErrorKind::UnknownAuthPlugin)
        );
    }

    #[test]
    fn test_plugin_lookup_roundtrip() {
        for plugin in [
            AuthPlugin::NativePassword,
            AuthPlugin::CachingSha2Password,
            AuthPlugin::Sha256Password,
            AuthPlugin::ClearPassword,
        ] {
            assert_eq!(AuthPlugin::from_name(plugin.name()).unwrap(), plugin);
        }
    }

    #[test]
    fn test_caching_sha2_fast_and_full_auth() {
        let plugin = AuthPlugin::CachingSha2Password;
        assert_eq!(plugin.initial_response(&ctx(false)).unwrap().len(), 32);
        assert_eq!(plugin.more_data(&[0x03], &ctx(false)).unwrap(), AuthAction::Wait);
        assert_eq!(
            plugin.more_data(&[0x04], &ctx(true)).unwrap(),
            AuthAction::Send(b"secret\0".to_vec())
        );
        assert_eq!(
            plugin.more_data(&[0x04], &ctx(false)).unwrap(),
            AuthAction::Send(vec![0x02])
        );
        assert!(plugin.more_data(b"not a pem key", &ctx(false)).is_err());
    }

    #[test]
    fn test_clear_password_requires_tls() {
        let plugin = AuthPlugin::ClearPassword;
        assert!(plugin.initial_response(&ctx(false)).is_err());
        assert_eq!(plugin.initial_response(&ctx(true)).unwrap(), b"secret\0");
    }

    #[test]
    fn test_sha256_password_requests_key_without_tls() {
        let plugin = AuthPlugin::Sha256Password;
        assert_eq!(plugin.initial_response(&ctx(false)).unwrap(), vec![1]);
        assert_eq!(plugin.initial_response(&ctx(true)).unwrap(), b"secret\0");
    }

    #[test]
    fn test_native_password_rejects_more_data() {
        assert!(AuthPlugin::NativePassword.more_data(&[1], &ctx(false)).is_err());
    }
}

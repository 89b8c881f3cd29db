//! Local client credentials.

use proxychain_config::Credentials;
use sha2::{Digest, Sha224};

type Digest224 = [u8; 28];

/// Username/password a local listener requires from its clients.
///
/// Only SHA-224 digests are kept. Verification always compares both halves
/// in constant time, so neither timing nor the result reveals which half
/// was wrong.
#[derive(Clone)]
pub struct LocalAuthCredential {
    username: Digest224,
    password: Digest224,
}

impl std::fmt::Debug for LocalAuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalAuthCredential(<redacted>)")
    }
}

impl LocalAuthCredential {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: sha224(username.as_bytes()),
            password: sha224(password.as_bytes()),
        }
    }

    pub fn verify(&self, username: &[u8], password: &[u8]) -> bool {
        let user_ok = constant_time_eq(&self.username, &sha224(username));
        let pass_ok = constant_time_eq(&self.password, &sha224(password));
        user_ok & pass_ok
    }
}

impl From<&Credentials> for LocalAuthCredential {
    fn from(creds: &Credentials) -> Self {
        Self::new(&creds.username, &creds.password)
    }
}

fn sha224(input: &[u8]) -> Digest224 {
    Sha224::digest(input).into()
}

/// Constant-time comparison of equal-length digests.
fn constant_time_eq(a: &Digest224, b: &Digest224) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use rand_core::OsRng;

use crate::err::Error;

/// PBKDF2-SHA256 password hashing with a configurable round count.
#[derive(Debug, Clone, Copy)]
pub struct Passwords {
    rounds: u32,
}

impl Default for Passwords {
    fn default() -> Self {
        Self {
            rounds: Params::default().rounds,
        }
    }
}

impl Passwords {
    pub fn with_rounds(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(1),
        }
    }

    pub fn hash(&self, password: &str) -> Result<String, Error> {
        let salt = SaltString::generate(&mut OsRng);
        let params = Params {
            rounds: self.rounds,
            ..Params::default()
        };
        let hash = Pbkdf2.hash_password_customized(password.as_bytes(), None, None, params, &salt)?;
        Ok(hash.to_string())
    }

    /// Constant-time check of `password` against a stored PHC string.
    pub fn verify(&self, password: &str, stored: &str) -> Result<bool, Error> {
        let hash = PasswordHash::new(stored)?;
        Ok(Pbkdf2.verify_password(password.as_bytes(), &hash).is_ok())
    }
}

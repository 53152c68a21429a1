use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

use crate::config::PasswordConfig;
use crate::error::AuthError;

/// Newtype for a raw password so credentials never end up in logs.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Argon2id hashing with configurable cost parameters. The salt is generated
/// per hash and embedded in the PHC string.
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    pub fn new(config: &PasswordConfig) -> Result<Self, AuthError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| AuthError::Config(anyhow::anyhow!("invalid argon2 parameters: {}", e)))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, password: &Password) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_str().as_bytes(), &salt)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("failed to hash password: {}", e)))?;
        Ok(hash.to_string())
    }

    /// Constant-time verification. `Ok(false)` on mismatch; `Err` only when
    /// the stored hash itself is malformed.
    pub fn verify(&self, password: &Password, stored_hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(stored_hash).map_err(|e| {
            AuthError::Internal(anyhow::anyhow!("invalid password hash format: {}", e))
        })?;

        match self
            .argon2
            .verify_password(password.as_str().as_bytes(), &parsed)
        {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Internal(anyhow::anyhow!(
                "password verification failed: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        // Low-cost parameters; these tests exercise behavior, not hardness.
        PasswordHasher::new(&PasswordConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let hasher = hasher();
        let password = Password::new("mySecurePassword123");
        let hash = hasher.hash(&password).unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify(&password, &hash).unwrap());
        assert!(!hasher.verify(&Password::new("wrong"), &hash).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let hasher = hasher();
        let password = Password::new("mySecurePassword123");
        let h1 = hasher.hash(&password).unwrap();
        let h2 = hasher.hash(&password).unwrap();

        assert_ne!(h1, h2);
        assert!(hasher.verify(&password, &h1).unwrap());
        assert!(hasher.verify(&password, &h2).unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error_not_a_mismatch() {
        let hasher = hasher();
        assert!(hasher
            .verify(&Password::new("anything"), "not-a-phc-string")
            .is_err());
    }

    #[test]
    fn debug_never_prints_the_password() {
        let password = Password::new("hunter2");
        assert_eq!(format!("{:?}", password), "Password(***)");
    }
}

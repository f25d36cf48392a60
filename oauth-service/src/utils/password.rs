use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Newtype for a plaintext password or client secret, kept out of `Debug` output.
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

/// PHC-formatted Argon2 hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The salt embedded in the hash, if the hash parses.
    pub fn salt(&self) -> Option<String> {
        PasswordHash::new(&self.0)
            .ok()
            .and_then(|hash| hash.salt.map(|salt| salt.as_str().to_string()))
    }
}

/// Hash a password using Argon2id with a freshly generated salt.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a hash. Argon2 compares in constant time.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_argon2_phc() {
        let hash = hash_password(&Password::new("correct horse")).expect("hash");
        assert!(hash.as_str().starts_with("$argon2"));
    }

    #[test]
    fn verify_accepts_only_the_original_password() {
        let password = Password::new("correct horse");
        let hash = hash_password(&password).expect("hash");

        assert!(verify_password(&password, &hash).is_ok());
        assert!(verify_password(&Password::new("battery staple"), &hash).is_err());
    }

    #[test]
    fn every_hash_gets_its_own_salt() {
        let password = Password::new("correct horse");
        let first = hash_password(&password).expect("hash");
        let second = hash_password(&password).expect("hash");

        assert_ne!(first.salt(), second.salt());
        assert!(first.salt().is_some());
    }

    #[test]
    fn debug_output_hides_plaintext() {
        let rendered = format!("{:?}", Password::new("hunter22"));
        assert!(!rendered.contains("hunter22"));
    }
}

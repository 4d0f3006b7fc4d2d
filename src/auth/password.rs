/// Cheapest cost bcrypt accepts; keeps unit tests fast.
#[cfg(test)]
pub(crate) const TEST_BCRYPT_COST: u32 = 4;

/// Stored form of a password: a salted bcrypt hash, never the plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(plaintext: &str, cost: u32) -> Result<Self, bcrypt::BcryptError> {
        bcrypt::hash(plaintext, cost).map(Self)
    }

    pub fn from_stored(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time via bcrypt; malformed stored hashes never verify.
    pub fn verify(&self, plaintext: &str) -> bool {
        bcrypt::verify(plaintext, &self.0).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COST: u32 = bcrypt::DEFAULT_COST;

    #[test]
    fn hash_never_equals_plaintext() {
        let hash = PasswordHash::new("secret1", COST).unwrap();
        assert_ne!(hash.as_str(), "secret1");
        assert!(!hash.as_str().contains("secret1"));
    }

    #[test]
    fn verify_accepts_exact_plaintext_only() {
        let hash = PasswordHash::new("secret1", COST).unwrap();
        assert!(hash.verify("secret1"));
        assert!(!hash.verify("secret2"));
        assert!(!hash.verify("Secret1"));
        assert!(!hash.verify(""));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let a = PasswordHash::new("secret1", TEST_BCRYPT_COST).unwrap();
        let b = PasswordHash::new("secret1", TEST_BCRYPT_COST).unwrap();
        assert_ne!(a, b);
        assert!(a.verify("secret1") && b.verify("secret1"));
    }

    #[test]
    fn malformed_hash_does_not_verify() {
        let hash = PasswordHash::from_stored("not-a-bcrypt-hash");
        assert!(!hash.verify("anything"));
    }
}

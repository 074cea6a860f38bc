use sha2::{Digest, Sha256};

use super::KeyGenerator;
use crate::error::Result;

/// Hex SHA-256 over the given parts followed by the default parts.
///
/// Parts are fed in order without separators, so reordering them changes the key.
#[derive(Debug, Clone, Default)]
pub struct HashKey {
    default_parts: Vec<String>,
}

impl HashKey {
    pub fn new(default_parts: Vec<String>) -> Self {
        Self { default_parts }
    }
}

impl KeyGenerator for HashKey {
    fn generate(&self, parts: &[&str]) -> Result<String> {
        let mut hasher = Sha256::new();
        for part in parts
            .iter()
            .copied()
            .chain(self.default_parts.iter().map(String::as_str))
        {
            hasher.update(part.as_bytes());
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "hash"
    }
}

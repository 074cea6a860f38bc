use super::KeyGenerator;
use crate::error::{Error, Result};

/// Joins the given parts and the default parts into a `/`-separated key.
///
/// No hashing is applied, which makes the key readable but only suitable as a
/// last-resort fallback.
#[derive(Debug, Clone, Default)]
pub struct StaticKey {
    default_parts: Vec<String>,
}

impl StaticKey {
    pub fn new(default_parts: Vec<String>) -> Self {
        Self { default_parts }
    }
}

impl KeyGenerator for StaticKey {
    fn generate(&self, parts: &[&str]) -> Result<String> {
        let key = parts
            .iter()
            .copied()
            .chain(self.default_parts.iter().map(String::as_str))
            .map(|part| part.trim_matches('/'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        if key.is_empty() {
            return Err(Error::KeyGeneration(
                "static key has no non-empty parts".to_string(),
            ));
        }
        Ok(key)
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

//! Protected sections.
//!
//! A section carrying `configProtectionProvider="name"` stores its body as
//! `<EncryptedData cipher="..."/>`. The engine does no cryptography itself;
//! it hands the cipher text to the named [`ProtectedConfigProvider`] and
//! parses what comes back as the section's markup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ConfigError;

pub const PROTECTION_ATTRIBUTE: &str = "configProtectionProvider";
pub const ENCRYPTED_DATA: &str = "EncryptedData";
pub const CIPHER_ATTRIBUTE: &str = "cipher";

pub trait ProtectedConfigProvider: Send + Sync + fmt::Debug {
    /// Turn section markup into cipher text.
    fn encrypt(&self, plain: &str) -> Result<String, String>;

    /// Turn cipher text back into section markup.
    fn decrypt(&self, cipher: &str) -> Result<String, String>;
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProtectedConfigProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: impl ProtectedConfigProvider + 'static,
    ) -> &mut Self {
        self.providers.insert(name.into(), Arc::new(provider));
        self
    }

    fn get(&self, name: &str) -> Result<&Arc<dyn ProtectedConfigProvider>, ConfigError> {
        self.providers
            .get(name)
            .ok_or_else(|| ConfigError::Protection {
                provider: name.to_string(),
                reason: "no such provider is registered".into(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn encrypt(&self, name: &str, plain: &str) -> Result<String, ConfigError> {
        self.get(name)?
            .encrypt(plain)
            .map_err(|reason| ConfigError::Protection {
                provider: name.to_string(),
                reason,
            })
    }

    pub fn decrypt(&self, name: &str, cipher: &str) -> Result<String, ConfigError> {
        self.get(name)?
            .decrypt(cipher)
            .map_err(|reason| ConfigError::Protection {
                provider: name.to_string(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test::HexProvider;

    #[test]
    fn registered_provider_round_trips() {
        let mut reg = ProviderRegistry::new();
        reg.register("hex", HexProvider);
        let cipher = reg.encrypt("hex", "<a/>").unwrap();
        assert_ne!(cipher, "<a/>");
        assert_eq!(reg.decrypt("hex", &cipher).unwrap(), "<a/>");
    }

    #[test]
    fn unknown_provider_is_protection_error() {
        let reg = ProviderRegistry::new();
        match reg.decrypt("rsa", "00") {
            Err(ConfigError::Protection { provider, .. }) => assert_eq!(provider, "rsa"),
            other => panic!("Expected Protection error, got {other:?}"),
        }
    }

    #[test]
    fn provider_failure_is_wrapped() {
        let mut reg = ProviderRegistry::new();
        reg.register("hex", HexProvider);
        assert!(matches!(
            reg.decrypt("hex", "zz"),
            Err(ConfigError::Protection { .. })
        ));
    }
}

use std::sync::Arc;

use crate::element::Element;
use crate::error::ConfigError;
use crate::host::{ConfigHost, FsHost};
use crate::protect::{ProtectedConfigProvider, ProviderRegistry};
use crate::schema::SchemaRegistry;
use crate::settings::{EngineSettings, SettingsLoader};
use crate::system::ConfigSystem;

/// Builder for a [`ConfigSystem`].
///
/// Three things go in:
///
/// - **Where documents live**: [`host()`](Self::host). Defaults to an
///   [`FsHost`] rooted at the current directory.
/// - **What sections exist**: [`register_section()`](Self::register_section)
///   maps each type name used in `<configSections>` to a constructor.
/// - **How the engine behaves**: [`settings()`](Self::settings) or
///   [`settings_from()`](Self::settings_from).
///
/// ```ignore
/// let mut system = ConfigSystem::builder()
///     .host(FsHost::new("/srv/site"))
///     .register_section("AppSettingsSection", app_settings)
///     .provider("rsa", RsaProvider::new(key))
///     .build();
/// let root = system.load("web.config", None)?;
/// ```
#[derive(Debug, Default)]
pub struct ConfigSystemBuilder {
    host: Option<Arc<dyn ConfigHost>>,
    registry: SchemaRegistry,
    providers: ProviderRegistry,
    settings: Option<EngineSettings>,
}

impl ConfigSystemBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl ConfigHost + 'static) -> Self {
        self.host = Some(Arc::new(host));
        self
    }

    /// Use a host the caller keeps a handle to.
    pub fn shared_host(mut self, host: Arc<dyn ConfigHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn register_section(
        mut self,
        type_name: &str,
        ctor: impl Fn() -> Element + Send + Sync + 'static,
    ) -> Self {
        self.registry.register(type_name, ctor);
        self
    }

    /// Replace the section registry wholesale.
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn provider(mut self, name: &str, provider: impl ProtectedConfigProvider + 'static) -> Self {
        self.providers.register(name, provider);
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Resolve settings through `loader` now.
    pub fn settings_from(self, loader: SettingsLoader) -> Result<Self, ConfigError> {
        let settings = loader.load()?;
        Ok(self.settings(settings))
    }

    pub fn build(self) -> ConfigSystem {
        let host = self
            .host
            .unwrap_or_else(|| Arc::new(FsHost::new(".")));
        ConfigSystem::new(
            host,
            self.registry,
            self.providers,
            self.settings.unwrap_or_default(),
        )
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use toml::Value;

    use crate::element::Element;
    use crate::host::MemoryHost;
    use crate::markup::{self, MarkupNode};
    use crate::property::PropertyDescriptor;
    use crate::protect::ProtectedConfigProvider;
    use crate::schema::{CollectionSchema, ElementSchema};
    use crate::system::ConfigSystem;
    use crate::validate::IntegerRange;

    pub fn parse_fragment(text: &str) -> MarkupNode {
        markup::parse(text, "test").unwrap()
    }

    // -- server: scalars, a default, a validator and a nested element --------

    pub fn limits_element() -> Element {
        Element::new(
            ElementSchema::builder("LimitsElement")
                .property(PropertyDescriptor::integer("maxConnections"))
                .build(),
        )
    }

    pub fn server_schema() -> Arc<ElementSchema> {
        ElementSchema::builder("ServerSection")
            .property(PropertyDescriptor::string("host"))
            .property(
                PropertyDescriptor::integer("timeout")
                    .with_default(30)
                    .with_validator(IntegerRange { min: 1, max: 3600 }),
            )
            .property(PropertyDescriptor::element("limits", limits_element))
            .build()
    }

    pub fn server_element() -> Element {
        Element::new(server_schema())
    }

    // -- appSettings: add/remove/clear default collection --------------------

    pub fn setting_schema() -> Arc<ElementSchema> {
        ElementSchema::builder("KeyValueElement")
            .property(PropertyDescriptor::string("key").key())
            .property(PropertyDescriptor::string("value"))
            .build()
    }

    pub fn setting(key: &str, value: &str) -> Element {
        let mut el = Element::new(setting_schema());
        el.set("key", key).unwrap();
        el.set("value", value).unwrap();
        el
    }

    fn settings_collection() -> Element {
        Element::new(
            ElementSchema::builder("KeyValueCollection")
                .collection(CollectionSchema::add_remove_clear(|| {
                    Element::new(setting_schema())
                }))
                .build(),
        )
    }

    pub fn app_settings_schema() -> Arc<ElementSchema> {
        ElementSchema::builder("AppSettingsSection")
            .property(PropertyDescriptor::string("file"))
            .property(PropertyDescriptor::default_collection(settings_collection))
            .build()
    }

    pub fn app_settings_element() -> Element {
        Element::new(app_settings_schema())
    }

    // -- connectionStrings: add/remove/clear with a two-part entry -----------

    pub fn connection_strings_element() -> Element {
        let entry = || {
            Element::new(
                ElementSchema::builder("ConnectionStringSettings")
                    .property(PropertyDescriptor::string("name").key())
                    .property(PropertyDescriptor::string("connectionString").required())
                    .property(
                        PropertyDescriptor::string("providerName")
                            .with_default("System.Data.SqlClient"),
                    )
                    .build(),
            )
        };
        let collection = move || {
            Element::new(
                ElementSchema::builder("ConnectionStringSettingsCollection")
                    .collection(CollectionSchema::add_remove_clear(entry))
                    .build(),
            )
        };
        Element::new(
            ElementSchema::builder("ConnectionStringsSection")
                .property(PropertyDescriptor::default_collection(collection))
                .build(),
        )
    }

    // -- rules: basic alternate collection -----------------------------------

    pub fn rule_element() -> Element {
        Element::new(
            ElementSchema::builder("RuleElement")
                .property(PropertyDescriptor::string("name").key())
                .property(PropertyDescriptor::string("action").with_default("allow"))
                .property(PropertyDescriptor::integer("priority").with_default(100))
                .build(),
        )
    }

    pub fn rules_element() -> Element {
        Element::new(
            ElementSchema::builder("RulesSection")
                .collection(CollectionSchema::basic("rule", rule_element).alternate())
                .build(),
        )
    }

    // -- endpoint: a required property, with and without a hook --------------

    fn endpoint_builder() -> crate::schema::ElementSchemaBuilder {
        ElementSchema::builder("EndpointSection")
            .property(PropertyDescriptor::string("address").required())
            .property(PropertyDescriptor::boolean("secure").with_default(false))
    }

    pub fn endpoint_element() -> Element {
        Element::new(endpoint_builder().build())
    }

    pub fn endpoint_with_hook_element() -> Element {
        Element::new(
            endpoint_builder()
                .on_required_missing(|name| {
                    (name == "address").then(|| Value::String("http://localhost".into()))
                })
                .build(),
        )
    }

    pub fn loose_element() -> Element {
        Element::new(
            ElementSchema::builder("LooseSection")
                .property(PropertyDescriptor::string("name"))
                .allow_unknown_attributes()
                .allow_unknown_elements()
                .build(),
        )
    }

    // -- protection ----------------------------------------------------------

    /// Hex "encryption"; enough to see that bodies are transformed.
    #[derive(Debug, Clone, Copy)]
    pub struct HexProvider;

    impl ProtectedConfigProvider for HexProvider {
        fn encrypt(&self, plain: &str) -> Result<String, String> {
            Ok(plain.bytes().map(|b| format!("{b:02x}")).collect())
        }

        fn decrypt(&self, cipher: &str) -> Result<String, String> {
            if cipher.len() % 2 != 0 {
                return Err("odd number of hex digits".into());
            }
            let bytes = (0..cipher.len())
                .step_by(2)
                .map(|i| {
                    cipher
                        .get(i..i + 2)
                        .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                        .ok_or_else(|| format!("invalid hex at offset {i}"))
                })
                .collect::<Result<Vec<u8>, String>>()?;
            String::from_utf8(bytes).map_err(|e| e.to_string())
        }
    }

    // -- a whole system ------------------------------------------------------

    /// Root document: declarations, section values and two locations.
    pub const ROOT_CONFIG: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<configuration>
  <configSections>
    <section name="appSettings" type="AppSettingsSection" />
    <section name="connectionStrings" type="ConnectionStringsSection" />
    <section name="server" type="ServerSection" />
    <section name="rules" type="RulesSection" />
    <section name="endpoint" type="EndpointSection" />
    <sectionGroup name="system.web">
      <section name="pages" type="ServerSection" />
    </sectionGroup>
  </configSections>
  <appSettings>
    <add key="greeting" value="hello" />
  </appSettings>
  <connectionStrings>
    <add name="main" connectionString="Server=db;Database=app" />
  </connectionStrings>
  <server timeout="10" />
  <rules>
    <rule name="everyone" action="allow" />
  </rules>
  <location path="app">
    <server timeout="20" />
  </location>
  <location path="app/admin">
    <server timeout="30" />
  </location>
</configuration>
"#;

    /// A system over an in-memory host holding `files`, with every fixture
    /// section type registered and the `hex` provider available.
    pub fn system_with(files: &[(&str, &str)]) -> (ConfigSystem, Arc<MemoryHost>) {
        let host = Arc::new(MemoryHost::new());
        for (name, text) in files {
            host.insert(name, text);
        }
        let system = ConfigSystem::builder()
            .shared_host(host.clone())
            .register_section("AppSettingsSection", app_settings_element)
            .register_section("ConnectionStringsSection", connection_strings_element)
            .register_section("ServerSection", server_element)
            .register_section("RulesSection", rules_element)
            .register_section("EndpointSection", endpoint_with_hook_element)
            .provider("hex", HexProvider)
            .build();
        (system, host)
    }

    #[test]
    fn hex_provider_round_trips_and_rejects_garbage() {
        let cipher = HexProvider.encrypt("<a x=\"1\"/>").unwrap();
        assert_eq!(HexProvider.decrypt(&cipher).unwrap(), "<a x=\"1\"/>");
        assert!(HexProvider.decrypt("zz").is_err());
        assert!(HexProvider.decrypt("abc").is_err());
    }

    #[test]
    fn root_config_loads_every_section() {
        let (mut system, _host) = system_with(&[("web.config", ROOT_CONFIG)]);
        let root = system.load("web.config", None).unwrap();
        for path in system.section_paths(root).unwrap() {
            assert!(system.get_section(root, &path).unwrap().is_some(), "{path}");
        }
    }
}

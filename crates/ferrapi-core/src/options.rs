//! Pipeline options
//!
//! [`Options`] describe which stages the pipeline mounts and how they behave.
//! They start from defaults and are adjusted through [`OptionsBuilder`], a
//! declarative [`OptionsConfig`], or both.
//!
//! | Key | Default | Disabled by |
//! |-----|---------|-------------|
//! | `exceptions` | built-in handlers | [`OptionsBuilder::no_exceptions`] / `null` |
//! | `formats` | JSON and urlencoded forms | [`OptionsBuilder::no_formats`] / `null` |
//! | `middleware` | none | |
//! | `coercion` | `schema` | [`OptionsBuilder::no_coercion`] / `null` |
//! | `components` | none | |
//! | `swagger` | `null` | |
//!
//! # Example
//!
//! ```rust
//! use ferrapi_core::Options;
//! use serde_json::json;
//!
//! let options = Options::from_value(json!({
//!     "coercion": "spec",
//!     "formats": {"formats": ["application/json"]},
//!     "exceptions": null,
//! }))
//! .unwrap();
//!
//! assert_eq!(options.coercion().unwrap().name(), "spec");
//! assert!(options.exceptions().is_none());
//! ```

use crate::context::{Components, RequestOptions};
use crate::error::{ConfigError, ErrorKind};
use crate::exception::{ExceptionHandler, ExceptionHandlers, HandlerKey};
use crate::format::{FormatsConfig, FormatsOption};
use crate::middleware::MiddlewareSpec;
use ferrapi_coerce::{resolve_coercion, Coercion};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Resolved pipeline options
#[derive(Clone)]
pub struct Options {
    exceptions: Option<ExceptionHandlers>,
    formats: Option<FormatsOption>,
    middleware: Vec<Option<MiddlewareSpec>>,
    coercion: Option<Coercion>,
    components: Option<Components>,
    swagger: Value,
    deprecated_format: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            exceptions: Some(ExceptionHandlers::default()),
            formats: Some(FormatsOption::Config(FormatsConfig::default())),
            middleware: Vec::new(),
            coercion: resolve_coercion("schema").ok(),
            components: None,
            swagger: Value::Null,
            deprecated_format: false,
        }
    }
}

impl Options {
    /// Start from the defaults
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    /// Defaults overridden by a declarative configuration
    pub fn from_config(config: OptionsConfig) -> Result<Self, ConfigError> {
        OptionsBuilder::new().config(config).build()
    }

    /// Defaults overridden by a JSON configuration
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        Self::from_config(serde_json::from_value(value)?)
    }

    /// Exception handlers, `None` when dispatch is disabled
    pub fn exceptions(&self) -> Option<&ExceptionHandlers> {
        self.exceptions.as_ref()
    }

    /// Format engine settings, `None` when formats are disabled
    pub fn formats(&self) -> Option<&FormatsOption> {
        self.formats.as_ref()
    }

    /// User middleware descriptors, outermost first
    pub fn middleware(&self) -> &[Option<MiddlewareSpec>] {
        &self.middleware
    }

    /// Coercion strategy, `None` when coercion is disabled
    pub fn coercion(&self) -> Option<&Coercion> {
        self.coercion.as_ref()
    }

    /// Injected components
    pub fn components(&self) -> Option<&Components> {
        self.components.as_ref()
    }

    /// Documentation passthrough
    pub fn swagger(&self) -> &Value {
        &self.swagger
    }

    /// Whether the removed `format` key was supplied
    pub fn has_deprecated_format(&self) -> bool {
        self.deprecated_format
    }

    /// The part of the options attached to each request
    pub fn request_options(&self) -> RequestOptions {
        RequestOptions {
            coercion: self.coercion.clone(),
            swagger: self.swagger.clone(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("exceptions", &self.exceptions.is_some())
            .field("formats", &self.formats)
            .field("middleware", &self.middleware.len())
            .field("coercion", &self.coercion.as_ref().map(|c| c.name().to_string()))
            .field("components", &self.components)
            .field("swagger", &self.swagger)
            .finish()
    }
}

#[derive(Clone)]
enum CoercionChoice {
    Named(String),
    Strategy(Coercion),
    Disabled,
}

/// Builder for [`Options`]
#[derive(Clone)]
pub struct OptionsBuilder {
    options: Options,
    coercion: CoercionChoice,
    formats: Option<FormatsSettings>,
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionsBuilder {
    /// Builder seeded with the defaults
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            coercion: CoercionChoice::Named("schema".to_string()),
            formats: None,
        }
    }

    /// Replace all exception handlers
    pub fn exceptions(mut self, handlers: ExceptionHandlers) -> Self {
        self.options.exceptions = Some(handlers);
        self
    }

    /// Add a handler on top of the current ones
    pub fn exception_handler(mut self, key: impl Into<HandlerKey>, handler: ExceptionHandler) -> Self {
        let handlers = self.options.exceptions.take().unwrap_or_default();
        self.options.exceptions = Some(handlers.handler(key, handler));
        self
    }

    /// Unmount exception dispatch; failures escape the pipeline
    pub fn no_exceptions(mut self) -> Self {
        self.options.exceptions = None;
        self
    }

    /// Use the given format engine or configuration
    pub fn formats(mut self, formats: impl Into<FormatsOption>) -> Self {
        self.options.formats = Some(formats.into());
        self.formats = None;
        self
    }

    /// Disable body decoding and encoding
    pub fn no_formats(mut self) -> Self {
        self.options.formats = None;
        self.formats = None;
        self
    }

    /// Supply the removed `format` key
    ///
    /// Kept so that old configurations fail loudly: assembling a pipeline from
    /// these options returns [`ConfigError::DeprecatedKey`].
    #[deprecated(note = "use `formats` instead")]
    pub fn format(mut self, _format: Value) -> Self {
        self.options.deprecated_format = true;
        self
    }

    /// Add user middleware as the innermost entry so far
    pub fn middleware(mut self, spec: impl Into<MiddlewareSpec>) -> Self {
        self.options.middleware.push(Some(spec.into()));
        self
    }

    /// Add several descriptors; `None` entries are skipped at assembly
    pub fn middlewares<I>(mut self, specs: I) -> Self
    where
        I: IntoIterator<Item = Option<MiddlewareSpec>>,
    {
        self.options.middleware.extend(specs);
        self
    }

    /// Coercion strategy by name, resolved in [`build`](Self::build)
    pub fn coercion(mut self, name: impl Into<String>) -> Self {
        self.coercion = CoercionChoice::Named(name.into());
        self
    }

    /// Custom coercion strategy
    pub fn coercion_strategy(mut self, coercion: Coercion) -> Self {
        self.coercion = CoercionChoice::Strategy(coercion);
        self
    }

    /// Disable coercion; values pass through unchanged
    pub fn no_coercion(mut self) -> Self {
        self.coercion = CoercionChoice::Disabled;
        self
    }

    /// Inject components into every request
    pub fn components(mut self, components: Components) -> Self {
        self.options.components = Some(components);
        self
    }

    /// Documentation passthrough
    pub fn swagger(mut self, swagger: Value) -> Self {
        self.options.swagger = swagger;
        self
    }

    /// Apply a declarative configuration on top of the current settings
    pub fn config(mut self, config: OptionsConfig) -> Self {
        match config.coercion {
            Setting::Unset => {}
            Setting::Disabled => self = self.no_coercion(),
            Setting::Set(name) => self = self.coercion(name),
        }
        match config.exceptions {
            Setting::Unset => {}
            Setting::Disabled => self = self.no_exceptions(),
            Setting::Set(settings) => {
                let mut handlers = self.options.exceptions.take().unwrap_or_default();
                for (kind, parent) in settings.kind_parents {
                    handlers = handlers.kind_parent(ErrorKind::custom(kind), parse_kind(&parent));
                }
                self.options.exceptions = Some(handlers);
            }
        }
        match config.formats {
            Setting::Unset => {}
            Setting::Disabled => self = self.no_formats(),
            Setting::Set(settings) => {
                let merged = match self.formats.take() {
                    Some(current) => current.merge(settings),
                    None => settings,
                };
                self.formats = Some(merged);
            }
        }
        match config.swagger {
            Setting::Unset => {}
            Setting::Disabled => self.options.swagger = Value::Null,
            Setting::Set(swagger) => self.options.swagger = swagger,
        }
        if config.format.is_some() {
            self.options.deprecated_format = true;
        }
        self
    }

    /// Resolve names and produce the options
    pub fn build(self) -> Result<Options, ConfigError> {
        let mut options = self.options;

        options.coercion = match self.coercion {
            CoercionChoice::Named(name) => Some(resolve_coercion(&name)?),
            CoercionChoice::Strategy(coercion) => Some(coercion),
            CoercionChoice::Disabled => None,
        };

        if let Some(settings) = self.formats {
            let formats = match options.formats.take() {
                Some(FormatsOption::Instance(formats)) => {
                    let config = settings.apply(formats.config().clone())?;
                    FormatsOption::Instance(formats.reconfigure(config))
                }
                Some(FormatsOption::Config(config)) => FormatsOption::Config(settings.apply(config)?),
                None => FormatsOption::Config(settings.apply(FormatsConfig::default())?),
            };
            options.formats = Some(formats);
        }

        Ok(options)
    }
}

fn parse_kind(name: &str) -> ErrorKind {
    match name {
        "root" => ErrorKind::Root,
        "error" => ErrorKind::Error,
        "io" => ErrorKind::Io,
        "runtime" => ErrorKind::Runtime,
        "parse" => ErrorKind::Parse,
        "validation" => ErrorKind::Validation,
        "http" => ErrorKind::Http,
        other => ErrorKind::custom(other.to_string()),
    }
}

/// A configuration entry that can be left out, disabled with `null`, or set
#[derive(Debug, Clone, PartialEq)]
pub enum Setting<T> {
    /// Not mentioned; the current value stays
    Unset,
    /// Explicitly `null`; the feature is turned off
    Disabled,
    /// A new value
    Set(T),
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Setting::Unset
    }
}

impl<T> Setting<T> {
    /// Whether the entry was left out
    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    /// Right-biased merge; two set values are combined with `combine`
    pub fn merge_with(self, other: Setting<T>, combine: impl FnOnce(T, T) -> T) -> Setting<T> {
        match (self, other) {
            (current, Setting::Unset) => current,
            (Setting::Set(current), Setting::Set(next)) => Setting::Set(combine(current, next)),
            (_, other) => other,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Setting<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => Setting::Set(value),
            None => Setting::Disabled,
        })
    }
}

impl<T: Serialize> Serialize for Setting<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Setting::Set(value) => serializer.serialize_some(value),
            Setting::Unset | Setting::Disabled => serializer.serialize_none(),
        }
    }
}

/// Declarative format settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FormatsSettings {
    /// Format used when the client expresses no usable preference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_format: Option<String>,
    /// Enabled formats; replaces the previous list as a whole
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<String>>,
    /// Charset announced on encoded responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
}

impl FormatsSettings {
    /// Right-biased, field by field
    pub fn merge(self, other: FormatsSettings) -> FormatsSettings {
        FormatsSettings {
            default_format: other.default_format.or(self.default_format),
            formats: other.formats.or(self.formats),
            charset: other.charset.or(self.charset),
        }
    }

    /// Apply to `base`, keeping only the listed formats
    pub fn apply(self, mut base: FormatsConfig) -> Result<FormatsConfig, ConfigError> {
        if let Some(names) = self.formats {
            let mut formats = Vec::with_capacity(names.len());
            for name in names {
                let codec = base
                    .codec(&name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownFormat(name.clone()))?;
                formats.push((name, codec));
            }
            base.formats = formats;
        }
        if let Some(default_format) = self.default_format {
            base.default_format = default_format;
        }
        if let Some(charset) = self.charset {
            base.charset = charset;
        }
        if base.codec(&base.default_format).is_none() {
            return Err(ConfigError::UnknownFormat(base.default_format));
        }
        Ok(base)
    }
}

/// Declarative exception settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ExceptionsSettings {
    /// Custom error kinds and the kinds they descend from
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kind_parents: BTreeMap<String, String>,
}

impl ExceptionsSettings {
    /// Right-biased union
    pub fn merge(mut self, other: ExceptionsSettings) -> ExceptionsSettings {
        self.kind_parents.extend(other.kind_parents);
        self
    }
}

/// Declarative options, loadable from JSON
///
/// Keys left out keep their current value, `null` disables the feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OptionsConfig {
    /// Coercion strategy name
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub coercion: Setting<String>,
    /// Format engine settings
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub formats: Setting<FormatsSettings>,
    /// Exception dispatch settings
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub exceptions: Setting<ExceptionsSettings>,
    /// Documentation passthrough
    #[serde(default, skip_serializing_if = "Setting::is_unset")]
    pub swagger: Setting<Value>,
    /// Removed single-format key, rejected at assembly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

impl OptionsConfig {
    /// Right-biased merge
    ///
    /// Associative: `a.merge(b).merge(c) == a.merge(b.merge(c))`. The
    /// `formats.formats` list is replaced as a whole, never unioned.
    pub fn merge(self, other: OptionsConfig) -> OptionsConfig {
        OptionsConfig {
            coercion: self.coercion.merge_with(other.coercion, |_, next| next),
            formats: self.formats.merge_with(other.formats, FormatsSettings::merge),
            exceptions: self
                .exceptions
                .merge_with(other.exceptions, ExceptionsSettings::merge),
            swagger: self.swagger.merge_with(other.swagger, |_, next| next),
            format: other.format.or(self.format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Formats, FORM, JSON};
    use crate::response::Response;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let options = Options::builder().build().unwrap();
        assert!(options.exceptions().is_some());
        assert!(options.formats().is_some());
        assert_eq!(options.coercion().unwrap().name(), "schema");
        assert!(options.components().is_none());
        assert!(!options.has_deprecated_format());
    }

    #[test]
    fn unknown_coercion_fails_at_build() {
        let err = Options::builder().coercion("strict").build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCoercion(_)));
        assert!(err.to_string().contains("strict"));
    }

    #[test]
    fn null_disables_and_absent_keeps() {
        let config: OptionsConfig = serde_json::from_value(json!({
            "coercion": null,
            "swagger": {"ui": "/docs"}
        }))
        .unwrap();
        assert_eq!(config.coercion, Setting::Disabled);
        assert_eq!(config.formats, Setting::Unset);

        let options = Options::from_config(config).unwrap();
        assert!(options.coercion().is_none());
        assert!(options.formats().is_some());
        assert_eq!(options.swagger()["ui"], "/docs");
    }

    #[test]
    fn format_list_is_replaced() {
        let options = Options::from_value(json!({
            "formats": {"formats": [FORM], "default-format": FORM}
        }))
        .unwrap();
        match options.formats() {
            Some(FormatsOption::Config(config)) => {
                let names: Vec<&str> = config.formats.iter().map(|(n, _)| n.as_str()).collect();
                assert_eq!(names, vec![FORM]);
                assert_eq!(config.default_format, FORM);
            }
            other => panic!("unexpected formats: {:?}", other),
        }
    }

    #[test]
    fn config_adjusts_a_ready_engine() {
        let engine = Formats::new(FormatsConfig::default().with_charset("latin1"))
            .with_encodable(|_response: &Response| false);
        let config: OptionsConfig =
            serde_json::from_value(json!({"formats": {"default-format": FORM}})).unwrap();
        let options = Options::builder().formats(engine).config(config).build().unwrap();

        match options.formats() {
            Some(FormatsOption::Instance(formats)) => {
                assert_eq!(formats.config().charset, "latin1");
                assert_eq!(formats.config().default_format, FORM);
                assert!(!formats.encodes(&Response::ok(json!({"ok": true}))));
            }
            other => panic!("unexpected formats: {:?}", other),
        }
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = Options::from_value(json!({"formats": {"formats": ["application/edn"]}})).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFormat(name) if name == "application/edn"));

        // default format must stay enabled
        let err = Options::from_value(json!({"formats": {"formats": [FORM]}})).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFormat(name) if name == JSON));
    }

    #[test]
    fn deprecated_format_key_is_recorded() {
        let options = Options::from_value(json!({"format": JSON})).unwrap();
        assert!(options.has_deprecated_format());

        #[allow(deprecated)]
        let options = Options::builder().format(json!(JSON)).build().unwrap();
        assert!(options.has_deprecated_format());
    }

    #[test]
    fn unknown_keys_are_invalid() {
        let err = Options::from_value(json!({"formatz": {}})).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn kind_parents_from_config() {
        let options = Options::from_value(json!({
            "exceptions": {"kind-parents": {"card-declined": "payment"}}
        }))
        .unwrap();
        let lineage = options
            .exceptions()
            .unwrap()
            .hierarchy()
            .lineage(&ErrorKind::custom("card-declined"));
        assert_eq!(lineage[1], ErrorKind::custom("payment"));
    }

    #[test]
    fn merge_is_right_biased() {
        let base: OptionsConfig = serde_json::from_value(json!({
            "coercion": "schema",
            "formats": {"formats": [JSON, FORM], "charset": "utf-8"}
        }))
        .unwrap();
        let overlay: OptionsConfig = serde_json::from_value(json!({
            "coercion": null,
            "formats": {"formats": [FORM]}
        }))
        .unwrap();

        let merged = base.merge(overlay);
        assert_eq!(merged.coercion, Setting::Disabled);
        let Setting::Set(formats) = merged.formats else {
            panic!("formats should stay set");
        };
        assert_eq!(formats.formats, Some(vec![FORM.to_string()]));
        assert_eq!(formats.charset.as_deref(), Some("utf-8"));
    }

    fn setting<T: fmt::Debug + Clone + 'static>(value: impl Strategy<Value = T>) -> impl Strategy<Value = Setting<T>> {
        prop_oneof![
            Just(Setting::Unset),
            Just(Setting::Disabled),
            value.prop_map(Setting::Set),
        ]
    }

    fn formats_settings() -> impl Strategy<Value = FormatsSettings> {
        (
            proptest::option::of(prop_oneof![Just(JSON.to_string()), Just(FORM.to_string())]),
            proptest::option::of(proptest::collection::vec("[a-z]{1,4}", 0..3)),
            proptest::option::of(Just("utf-8".to_string())),
        )
            .prop_map(|(default_format, formats, charset)| FormatsSettings {
                default_format,
                formats,
                charset,
            })
    }

    fn options_config() -> impl Strategy<Value = OptionsConfig> {
        (
            setting(prop_oneof![Just("schema".to_string()), Just("spec".to_string())]),
            setting(formats_settings()),
            setting(proptest::collection::btree_map("[a-z]{1,3}", "[a-z]{1,3}", 0..3).prop_map(
                |kind_parents| ExceptionsSettings { kind_parents },
            )),
            setting(any::<u8>().prop_map(|n| json!({ "version": n }))),
            proptest::option::of(Just(json!(JSON))),
        )
            .prop_map(|(coercion, formats, exceptions, swagger, format)| OptionsConfig {
                coercion,
                formats,
                exceptions,
                swagger,
                format,
            })
    }

    proptest! {
        #[test]
        fn merge_is_associative(a in options_config(), b in options_config(), c in options_config()) {
            let left = a.clone().merge(b.clone()).merge(c.clone());
            let right = a.merge(b.merge(c));
            prop_assert_eq!(left, right);
        }

        #[test]
        fn unset_is_identity(a in options_config()) {
            prop_assert_eq!(a.clone().merge(OptionsConfig::default()), a.clone());
            prop_assert_eq!(OptionsConfig::default().merge(a.clone()), a);
        }
    }
}

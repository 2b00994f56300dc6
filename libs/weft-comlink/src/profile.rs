//! Endpoint Profiles and Call Properties
//!
//! Immutable descriptors of remote endpoints (`InterfaceProfile`), per-call
//! overrides (`MessageProperties`) and process-wide TLS/timeout settings
//! (`CommunicationProperties`). A profile is created once per target
//! endpoint and shared read-only with the client bound to it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ComlinkError, Result};

// ============================================================================
// Protocol tags and keys
// ============================================================================

/// Supported transport protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Mqtt,
    Websocket,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Mqtt => write!(f, "MQTT"),
            Protocol::Websocket => write!(f, "WEBSOCKET"),
        }
    }
}

/// Closed set of profile keys. Each key is only meaningful for a subset of
/// protocols; using a key outside that subset is a developer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileKey {
    Address,
    Port,
    Path,
    Method,
    TopicPublish,
    TopicSubscribe,
    PartialMessageSupport,
}

impl ProfileKey {
    /// Protocols this key is valid for
    pub fn valid_for(&self, protocol: Protocol) -> bool {
        match self {
            ProfileKey::Address | ProfileKey::Port => {
                matches!(protocol, Protocol::Http | Protocol::Websocket)
            }
            ProfileKey::Path => matches!(protocol, Protocol::Http | Protocol::Websocket),
            ProfileKey::Method => matches!(protocol, Protocol::Http),
            ProfileKey::TopicPublish | ProfileKey::TopicSubscribe => {
                matches!(protocol, Protocol::Mqtt)
            }
            ProfileKey::PartialMessageSupport => matches!(protocol, Protocol::Websocket),
        }
    }
}

impl std::fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProfileKey::Address => "address",
            ProfileKey::Port => "port",
            ProfileKey::Path => "path",
            ProfileKey::Method => "method",
            ProfileKey::TopicPublish => "topic-publish",
            ProfileKey::TopicSubscribe => "topic-subscribe",
            ProfileKey::PartialMessageSupport => "partial-message-support",
        };
        write!(f, "{}", name)
    }
}

/// HTTP request methods admitted by profiles. HEAD/OPTIONS/TRACE are
/// representable but rejected when a request is actually dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
}

impl HttpMethod {
    /// Methods the HTTPS client will dispatch
    pub fn is_supported(&self) -> bool {
        !matches!(
            self,
            HttpMethod::Head | HttpMethod::Options | HttpMethod::Trace
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// MQTT delivery guarantee levels used by this system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum QosLevel {
    /// Message loss is acceptable, no acknowledgment required
    #[default]
    AtMostOnce,
    /// Message loss is not acceptable and the subscriber cannot handle duplicates
    ExactlyOnce,
}

impl QosLevel {
    pub fn to_wire(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

// ============================================================================
// Interface profile
// ============================================================================

/// Typed profile values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileValue {
    Str(String),
    Port(u16),
    Method(HttpMethod),
    Flag(bool),
}

impl From<&str> for ProfileValue {
    fn from(v: &str) -> Self {
        ProfileValue::Str(v.to_string())
    }
}

impl From<String> for ProfileValue {
    fn from(v: String) -> Self {
        ProfileValue::Str(v)
    }
}

impl From<u16> for ProfileValue {
    fn from(v: u16) -> Self {
        ProfileValue::Port(v)
    }
}

impl From<HttpMethod> for ProfileValue {
    fn from(v: HttpMethod) -> Self {
        ProfileValue::Method(v)
    }
}

impl From<bool> for ProfileValue {
    fn from(v: bool) -> Self {
        ProfileValue::Flag(v)
    }
}

/// Immutable descriptor of a remote endpoint: a protocol tag plus the
/// protocol-specific addressing keys. Built once per target endpoint,
/// read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceProfile {
    protocol: Protocol,
    entries: HashMap<ProfileKey, ProfileValue>,
}

impl InterfaceProfile {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            entries: HashMap::new(),
        }
    }

    /// Insert a key/value pair, validating the key against the protocol tag.
    pub fn with(mut self, key: ProfileKey, value: impl Into<ProfileValue>) -> Result<Self> {
        if !key.valid_for(self.protocol) {
            return Err(ComlinkError::developer(format!(
                "profile key '{}' is not valid for protocol {}",
                key, self.protocol
            )));
        }
        self.entries.insert(key, value.into());
        Ok(self)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn contains(&self, key: ProfileKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Fail with a developer error unless the profile carries the given tag.
    pub fn require_protocol(&self, expected: Protocol, context: &str) -> Result<()> {
        if self.protocol != expected {
            return Err(ComlinkError::developer(format!(
                "invalid protocol for {}: {}",
                context, self.protocol
            )));
        }
        Ok(())
    }

    fn lookup(&self, key: ProfileKey) -> Result<&ProfileValue> {
        if !key.valid_for(self.protocol) {
            return Err(ComlinkError::developer(format!(
                "profile key '{}' is not valid for protocol {}",
                key, self.protocol
            )));
        }
        self.entries
            .get(&key)
            .ok_or_else(|| ComlinkError::developer(format!("profile key '{}' is not set", key)))
    }

    pub fn get_str(&self, key: ProfileKey) -> Result<&str> {
        match self.lookup(key)? {
            ProfileValue::Str(s) => Ok(s),
            other => Err(ComlinkError::developer(format!(
                "profile key '{}' holds {:?}, expected a string",
                key, other
            ))),
        }
    }

    pub fn get_str_or<'a>(&'a self, key: ProfileKey, default: &'a str) -> &'a str {
        match self.entries.get(&key) {
            Some(ProfileValue::Str(s)) => s,
            _ => default,
        }
    }

    pub fn get_port(&self, key: ProfileKey) -> Result<u16> {
        match self.lookup(key)? {
            ProfileValue::Port(p) if *p > 0 => Ok(*p),
            ProfileValue::Port(_) => Err(ComlinkError::developer(format!(
                "profile key '{}' holds port 0",
                key
            ))),
            other => Err(ComlinkError::developer(format!(
                "profile key '{}' holds {:?}, expected a port",
                key, other
            ))),
        }
    }

    pub fn get_method(&self, key: ProfileKey) -> Result<HttpMethod> {
        match self.lookup(key)? {
            ProfileValue::Method(m) => Ok(*m),
            other => Err(ComlinkError::developer(format!(
                "profile key '{}' holds {:?}, expected an HTTP method",
                key, other
            ))),
        }
    }

    pub fn get_flag_or(&self, key: ProfileKey, default: bool) -> bool {
        match self.entries.get(&key) {
            Some(ProfileValue::Flag(b)) => *b,
            _ => default,
        }
    }
}

// ============================================================================
// Per-call message properties
// ============================================================================

/// Optional per-call overrides layered on top of an `InterfaceProfile`.
/// Created per call, discarded after the call completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageProperties {
    /// Extra path segments (HTTP/WebSocket URI, MQTT topic suffixes)
    #[serde(default)]
    pub path_variables: Vec<String>,
    /// Flat alternating key/value tokens; the count must be even
    #[serde(default)]
    pub query_params: Vec<String>,
    /// Publish QoS override (MQTT)
    #[serde(default)]
    pub qos: Option<QosLevel>,
    /// Publish retained override (MQTT)
    #[serde(default)]
    pub retained: Option<bool>,
    /// Bound the next receive by the communicator's configured timeout
    #[serde(default)]
    pub timed_receive: bool,
}

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path_variables<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_variables = vars.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_qos(mut self, qos: QosLevel) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn with_retained(mut self, retained: bool) -> Self {
        self.retained = Some(retained);
        self
    }

    pub fn with_timed_receive(mut self, timed: bool) -> Self {
        self.timed_receive = timed;
        self
    }

    pub fn has_uri_parameters(&self) -> bool {
        !self.path_variables.is_empty() || !self.query_params.is_empty()
    }
}

// ============================================================================
// Process-wide communication properties
// ============================================================================

fn default_keystore_type() -> String {
    "PEM".to_string()
}

fn default_connection_timeout() -> u64 {
    30_000
}

fn default_socket_timeout() -> u64 {
    30_000
}

fn default_connection_manager_timeout() -> u64 {
    10_000
}

/// Keystore/truststore and connection settings, loaded once at process
/// configuration time and shared read-only by every communicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationProperties {
    pub keystore_path: PathBuf,
    #[serde(default)]
    pub keystore_password: String,
    #[serde(default)]
    pub key_password: String,
    pub truststore_path: PathBuf,
    #[serde(default)]
    pub truststore_password: String,
    /// Only "PEM" stores are supported
    #[serde(default = "default_keystore_type")]
    pub keystore_type: String,
    /// Test-only escape hatch, never enable in production
    #[serde(default)]
    pub disable_hostname_verification: bool,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_ms: u64,
    #[serde(default = "default_connection_manager_timeout")]
    pub connection_manager_timeout_ms: u64,
}

impl CommunicationProperties {
    pub fn new(keystore_path: impl Into<PathBuf>, truststore_path: impl Into<PathBuf>) -> Self {
        Self {
            keystore_path: keystore_path.into(),
            keystore_password: String::new(),
            key_password: String::new(),
            truststore_path: truststore_path.into(),
            truststore_password: String::new(),
            keystore_type: default_keystore_type(),
            disable_hostname_verification: false,
            connection_timeout_ms: default_connection_timeout(),
            socket_timeout_ms: default_socket_timeout(),
            connection_manager_timeout_ms: default_connection_manager_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_protocol_validation() {
        let profile = InterfaceProfile::new(Protocol::Mqtt).with(ProfileKey::Method, HttpMethod::Get);
        assert!(matches!(profile, Err(ComlinkError::Developer(_))));

        let profile = InterfaceProfile::new(Protocol::Mqtt)
            .with(ProfileKey::TopicPublish, "/rooms")
            .unwrap();
        assert_eq!(profile.get_str(ProfileKey::TopicPublish).unwrap(), "/rooms");
    }

    #[test]
    fn test_wrong_tag_lookup_is_developer_error() {
        let profile = InterfaceProfile::new(Protocol::Http)
            .with(ProfileKey::Address, "localhost")
            .unwrap();
        let err = profile.get_str(ProfileKey::TopicSubscribe).unwrap_err();
        assert!(matches!(err, ComlinkError::Developer(_)));
    }

    #[test]
    fn test_port_zero_rejected() {
        let profile = InterfaceProfile::new(Protocol::Http)
            .with(ProfileKey::Port, 0u16)
            .unwrap();
        assert!(profile.get_port(ProfileKey::Port).is_err());

        let profile = InterfaceProfile::new(Protocol::Http)
            .with(ProfileKey::Port, 8443u16)
            .unwrap();
        assert_eq!(profile.get_port(ProfileKey::Port).unwrap(), 8443);
    }

    #[test]
    fn test_require_protocol() {
        let profile = InterfaceProfile::new(Protocol::Websocket);
        assert!(profile.require_protocol(Protocol::Websocket, "WebsocketClient").is_ok());
        let err = profile
            .require_protocol(Protocol::Http, "HttpsClient")
            .unwrap_err();
        assert!(err.to_string().contains("WEBSOCKET"));
    }

    #[test]
    fn test_defaulted_lookups() {
        let profile = InterfaceProfile::new(Protocol::Mqtt);
        assert_eq!(profile.get_str_or(ProfileKey::TopicPublish, "/"), "/");
        let ws = InterfaceProfile::new(Protocol::Websocket);
        assert!(!ws.get_flag_or(ProfileKey::PartialMessageSupport, false));
    }

    #[test]
    fn test_message_properties_defaults() {
        let props = MessageProperties::default();
        assert!(props.qos.is_none());
        assert!(props.retained.is_none());
        assert!(!props.timed_receive);
        assert!(!props.has_uri_parameters());

        let props = MessageProperties::new()
            .with_path_variables(["a", "b"])
            .with_qos(QosLevel::ExactlyOnce);
        assert!(props.has_uri_parameters());
        assert_eq!(props.qos.unwrap().to_wire(), 2);
    }

    #[test]
    fn test_communication_properties_defaults() {
        let props = CommunicationProperties::new("/tmp/ks.pem", "/tmp/ts.pem");
        assert_eq!(props.keystore_type, "PEM");
        assert_eq!(props.connection_timeout_ms, 30_000);
        assert_eq!(props.socket_timeout_ms, 30_000);
        assert_eq!(props.connection_manager_timeout_ms, 10_000);
        assert!(!props.disable_hostname_verification);
    }
}

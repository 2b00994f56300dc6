//! HTTPS Protocol Implementation
//!
//! Synchronous request/response over HTTP(S). The communicator loads the
//! keystore, derives the client identity and builds the TLS context; each
//! client issues one HTTP exchange per `send` and holds at most one
//! outstanding, unread response at a time.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::communicator::{CommunicationClient, Communicator, CommunicatorKind};
use crate::error::{ComlinkError, CommStatus, Result};
use crate::identity::derive_client_identity;
use crate::payload::{MediaKind, MessageMeta, PayloadDecoder, PayloadResolver};
use crate::profile::{
    CommunicationProperties, HttpMethod, InterfaceProfile, MessageProperties, ProfileKey, Protocol,
};
use crate::tls::build_tls_context;
use crate::uri;

const ACCEPT_VALUE: &str = "text/plain, application/json";
const CONTENT_TYPE_JSON: &str = "application/json";

// Markers inspected in transport error chains to classify trust failures.
// Hostname mismatch must be checked first: its message also mentions an
// invalid peer certificate.
const ERROR_PART_HOSTNAME_MISMATCH: &str = "NotValidForName";
const ERROR_PART_BAD_CERT_CHAIN: &str = "invalid peer certificate";

/// Protocol-scoped factory for HTTPS clients.
pub struct HttpsCommunicator {
    props: Option<CommunicationProperties>,
    decoder: Option<Arc<dyn PayloadDecoder>>,
    client_identity: Option<String>,
    tls_context: Option<Arc<rustls::ClientConfig>>,
}

impl std::fmt::Debug for HttpsCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpsCommunicator")
            .field("client_identity", &self.client_identity)
            .field("secure", &self.tls_context.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpsCommunicator {
    pub fn new() -> Self {
        Self {
            props: None,
            decoder: None,
            client_identity: None,
            tls_context: None,
        }
    }

    /// Identity derived from the keystore's end-entity certificate,
    /// available after initialization.
    pub fn client_identity(&self) -> Option<&str> {
        self.client_identity.as_deref()
    }
}

impl Default for HttpsCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Communicator for HttpsCommunicator {
    fn kind(&self) -> CommunicatorKind {
        CommunicatorKind::Https
    }

    fn properties(&mut self, props: CommunicationProperties) -> Result<()> {
        self.props = Some(props);
        Ok(())
    }

    fn decoder(&mut self, decoder: Arc<dyn PayloadDecoder>) -> Result<()> {
        self.decoder = Some(decoder);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<()> {
        let props = self
            .props
            .as_ref()
            .ok_or_else(|| ComlinkError::developer("CommunicationProperties is not set"))?;

        let identity = derive_client_identity(&props.keystore_path)?;
        let tls = build_tls_context(props)?;
        debug!(identity = %identity, "HTTPS communicator initialized");

        self.client_identity = Some(identity);
        self.tls_context = Some(tls);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.tls_context.is_some() && self.decoder.is_some()
    }

    fn client(&self, profile: InterfaceProfile) -> Result<Box<dyn CommunicationClient>> {
        if !self.is_initialized() {
            return Err(ComlinkError::initialization(
                "HttpsCommunicator is not initialized",
            ));
        }
        let props = self
            .props
            .as_ref()
            .ok_or_else(|| ComlinkError::developer("CommunicationProperties is not set"))?;
        let decoder = self
            .decoder
            .as_ref()
            .ok_or_else(|| ComlinkError::developer("PayloadDecoder is not set"))?;

        let client = HttpsClient::new(
            self.client_identity.clone(),
            self.tls_context.clone(),
            props,
            profile,
            Arc::clone(decoder),
        )?;
        Ok(Box::new(client))
    }
}

struct StoredResponse {
    status: u16,
    body: String,
}

/// One HTTPS session bound to a single endpoint profile. Holds at most one
/// outstanding, unread response.
pub struct HttpsClient {
    client_identity: Option<String>,
    profile: InterfaceProfile,
    decoder: Arc<dyn PayloadDecoder>,
    secure: bool,
    http: reqwest::Client,
    response: Option<StoredResponse>,
}

impl std::fmt::Debug for HttpsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpsClient")
            .field("client_identity", &self.client_identity)
            .field("profile", &self.profile)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl HttpsClient {
    /// Build a client from shared communicator state. A `None` TLS context
    /// yields a plain-HTTP client (loopback testing).
    pub fn new(
        client_identity: Option<String>,
        tls_context: Option<Arc<rustls::ClientConfig>>,
        props: &CommunicationProperties,
        profile: InterfaceProfile,
        decoder: Arc<dyn PayloadDecoder>,
    ) -> Result<Self> {
        profile.require_protocol(Protocol::Http, "HttpsClient")?;
        if profile.get_str(ProfileKey::Address)?.trim().is_empty() {
            return Err(ComlinkError::developer("address is empty"));
        }
        profile.get_port(ProfileKey::Port)?;
        if !profile.contains(ProfileKey::Method) {
            return Err(ComlinkError::developer("no HTTP method defined"));
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(props.connection_timeout_ms))
            .timeout(Duration::from_millis(props.socket_timeout_ms))
            .pool_idle_timeout(Duration::from_millis(props.connection_manager_timeout_ms));

        let secure = tls_context.is_some();
        if let Some(tls) = &tls_context {
            builder = builder.use_preconfigured_tls((**tls).clone());
        }

        let http = builder
            .build()
            .map_err(|e| ComlinkError::initialization(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client_identity,
            profile,
            decoder,
            secure,
            http,
            response: None,
        })
    }

    fn request_uri(&self, props: &MessageProperties) -> Result<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        let path = if self.profile.contains(ProfileKey::Path) {
            Some(self.profile.get_str(ProfileKey::Path)?)
        } else {
            None
        };
        uri::compose(
            scheme,
            self.profile.get_str(ProfileKey::Address)?,
            self.profile.get_port(ProfileKey::Port)?,
            path,
            &props.path_variables,
            &props.query_params,
        )
    }

    fn request_headers(has_payload: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        if has_payload {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        }
        headers
    }

    async fn dispatch(
        &self,
        props: &MessageProperties,
        payload: Option<&Value>,
    ) -> Result<StoredResponse> {
        let method = self.profile.get_method(ProfileKey::Method)?;
        if !method.is_supported() {
            return Err(ComlinkError::developer(format!(
                "HTTP method {} is not supported by this client",
                method
            )));
        }

        let uri = self.request_uri(props)?;
        debug!(
            method = %method,
            uri = %uri,
            identity = self.client_identity.as_deref().unwrap_or(""),
            "dispatching HTTP request"
        );

        let mut request = self
            .http
            .request(to_reqwest_method(method), uri.clone())
            .headers(Self::request_headers(payload.is_some()));
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(classify_transport_error(&err, &uri)),
        };

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            ComlinkError::communication(
                CommStatus::Other,
                format!("cannot read response body: {}", e),
            )
        })?;

        Ok(StoredResponse { status, body })
    }

    fn is_client_error(status: u16) -> bool {
        !(200..=206).contains(&status)
    }
}

#[async_trait]
impl CommunicationClient for HttpsClient {
    async fn send(
        &mut self,
        props: Option<&MessageProperties>,
        payload: Option<&Value>,
    ) -> Result<()> {
        if self.response.is_some() {
            return Err(ComlinkError::protocol_violation(
                "previous response was not read yet",
            ));
        }

        let defaults = MessageProperties::default();
        let props = props.unwrap_or(&defaults);
        self.response = Some(self.dispatch(props, payload).await?);
        Ok(())
    }

    async fn receive(
        &mut self,
        _props: Option<&MessageProperties>,
        resolver: &mut PayloadResolver,
    ) -> Result<()> {
        let Some(response) = self.response.take() else {
            return Ok(());
        };

        if Self::is_client_error(response.status) {
            resolver.set_client_error(format!("HTTP status code: {}", response.status));
        }

        let meta = MessageMeta::Http {
            status: response.status,
        };
        if response.body.is_empty() {
            resolver.add_raw(meta);
            return Ok(());
        }

        resolver.add_decoded_str(&*self.decoder, MediaKind::Json, &response.body, meta)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.response = None;
        Ok(())
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
        HttpMethod::Trace => reqwest::Method::TRACE,
    }
}

/// Classify a transport failure by inspecting the underlying cause chain:
/// trust-relationship failures map to an unauthorized outcome, everything
/// else to service-unavailable.
fn classify_transport_error(err: &reqwest::Error, uri: &Url) -> ComlinkError {
    let mut chain = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }

    if chain.contains(ERROR_PART_HOSTNAME_MISMATCH) {
        warn!(uri = %uri, cause = %chain, "hostname mismatch");
        ComlinkError::communication(
            CommStatus::Unauthorized,
            format!(
                "the certificate of the system at {} does not contain the specified IP address or DNS name as a Subject Alternative Name",
                uri
            ),
        )
    } else if chain.contains(ERROR_PART_BAD_CERT_CHAIN) {
        warn!(uri = %uri, cause = %chain, "certificate chain rejected");
        ComlinkError::communication(
            CommStatus::Unauthorized,
            format!(
                "the system at {} is not part of the same certificate chain of trust",
                uri
            ),
        )
    } else {
        warn!(uri = %uri, cause = %chain, "endpoint unreachable");
        ComlinkError::communication(
            CommStatus::ServiceUnavailable,
            format!("could not get any response from: {}", uri),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::JsonDecoder;

    fn test_profile() -> InterfaceProfile {
        InterfaceProfile::new(Protocol::Http)
            .with(ProfileKey::Address, "localhost")
            .unwrap()
            .with(ProfileKey::Port, 8443u16)
            .unwrap()
            .with(ProfileKey::Path, "/query")
            .unwrap()
            .with(ProfileKey::Method, HttpMethod::Get)
            .unwrap()
    }

    fn plain_client(profile: InterfaceProfile) -> Result<HttpsClient> {
        HttpsClient::new(
            None,
            None,
            &CommunicationProperties::new("unused.pem", "unused.pem"),
            profile,
            Arc::new(JsonDecoder::new()),
        )
    }

    #[test]
    fn test_client_requires_http_profile() {
        let profile = InterfaceProfile::new(Protocol::Mqtt);
        assert!(matches!(
            plain_client(profile),
            Err(ComlinkError::Developer(_))
        ));
    }

    #[test]
    fn test_client_requires_method() {
        let profile = InterfaceProfile::new(Protocol::Http)
            .with(ProfileKey::Address, "localhost")
            .unwrap()
            .with(ProfileKey::Port, 8443u16)
            .unwrap();
        let err = plain_client(profile).unwrap_err();
        assert!(err.to_string().contains("method"));
    }

    #[test]
    fn test_client_requires_nonempty_address() {
        let profile = InterfaceProfile::new(Protocol::Http)
            .with(ProfileKey::Address, "  ")
            .unwrap()
            .with(ProfileKey::Port, 8443u16)
            .unwrap()
            .with(ProfileKey::Method, HttpMethod::Get)
            .unwrap();
        assert!(matches!(
            plain_client(profile),
            Err(ComlinkError::Developer(_))
        ));
    }

    #[test]
    fn test_request_uri_with_variables() {
        let client = plain_client(test_profile()).unwrap();
        let props = MessageProperties::new()
            .with_path_variables(["services", "7"])
            .with_query_params(["verbose", "true"]);
        let uri = client.request_uri(&props).unwrap();
        assert_eq!(
            uri.as_str(),
            "http://localhost:8443/query/services/7?verbose=true"
        );
    }

    #[test]
    fn test_status_window() {
        assert!(!HttpsClient::is_client_error(200));
        assert!(!HttpsClient::is_client_error(206));
        assert!(HttpsClient::is_client_error(199));
        assert!(HttpsClient::is_client_error(207));
        assert!(HttpsClient::is_client_error(404));
    }

    #[tokio::test]
    async fn test_unsupported_method_rejected_at_send() {
        let profile = InterfaceProfile::new(Protocol::Http)
            .with(ProfileKey::Address, "localhost")
            .unwrap()
            .with(ProfileKey::Port, 8443u16)
            .unwrap()
            .with(ProfileKey::Method, HttpMethod::Trace)
            .unwrap();
        let mut client = plain_client(profile).unwrap();

        let err = client.send(None, None).await.unwrap_err();
        assert!(matches!(err, ComlinkError::Developer(_)));
    }

    #[test]
    fn test_communicator_client_before_initialize_fails() {
        let communicator = HttpsCommunicator::new();
        let err = communicator.client(test_profile()).unwrap_err();
        assert!(matches!(err, ComlinkError::Initialization(_)));
    }
}

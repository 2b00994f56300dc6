//! TLS Context Construction
//!
//! Builds the shared `rustls::ClientConfig` from the keystore/truststore PEM
//! files in `CommunicationProperties`. The context is built once per
//! communicator initialization and shared read-only by every client.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::warn;

use crate::error::{ComlinkError, Result};
use crate::profile::CommunicationProperties;

/// The only keystore/truststore container format this layer loads
const SUPPORTED_STORE_TYPE: &str = "PEM";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build a client TLS context: trust roots from the truststore, client
/// certificate chain and key from the keystore.
pub fn build_tls_context(props: &CommunicationProperties) -> Result<Arc<ClientConfig>> {
    if !props.keystore_type.eq_ignore_ascii_case(SUPPORTED_STORE_TYPE) {
        return Err(ComlinkError::initialization(format!(
            "unsupported keystore type '{}', only {} stores are supported",
            props.keystore_type, SUPPORTED_STORE_TYPE
        )));
    }

    let roots = Arc::new(load_root_store(&props.truststore_path)?);
    let client_chain = load_certificates(&props.keystore_path)?;
    let client_key = load_private_key(&props.keystore_path)?;

    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| {
            ComlinkError::initialization(format!("cannot select TLS protocol versions: {}", e))
        })?;

    let builder = if props.disable_hostname_verification {
        // just for testing, DO NOT USE this in a production environment
        warn!("hostname verification is disabled");
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider())
            .build()
            .map_err(|e| {
                ComlinkError::initialization(format!("cannot build certificate verifier: {}", e))
            })?;
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoHostnameVerification { inner }))
    } else {
        builder.with_root_certificates(roots)
    };

    let config = builder
        .with_client_auth_cert(client_chain, client_key)
        .map_err(|e| {
            ComlinkError::initialization(format!("cannot load client key material: {}", e))
        })?;

    Ok(Arc::new(config))
}

/// Raw file contents of a PEM store, for transports that take the bytes
/// directly instead of a prebuilt context.
pub(crate) fn read_store(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        ComlinkError::initialization(format!("cannot read {} '{}': {}", what, path.display(), e))
    })
}

fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots.add(cert).map_err(|e| {
            ComlinkError::initialization(format!("cannot add trust anchor: {}", e))
        })?;
    }
    if roots.is_empty() {
        return Err(ComlinkError::initialization(format!(
            "truststore '{}' contains no certificates",
            path.display()
        )));
    }
    Ok(roots)
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = read_store(path, "certificate store")?;
    let mut reader = BufReader::new(data.as_slice());
    let certs: std::io::Result<Vec<_>> = rustls_pemfile::certs(&mut reader).collect();
    let certs = certs.map_err(|e| {
        ComlinkError::initialization(format!(
            "cannot parse certificates from '{}': {}",
            path.display(),
            e
        ))
    })?;
    if certs.is_empty() {
        return Err(ComlinkError::initialization(format!(
            "no certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let data = read_store(path, "key store")?;
    let mut reader = BufReader::new(data.as_slice());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            ComlinkError::initialization(format!(
                "cannot parse private key from '{}': {}",
                path.display(),
                e
            ))
        })?
        .ok_or_else(|| {
            ComlinkError::initialization(format!("no private key found in '{}'", path.display()))
        })
}

/// Delegates to the WebPKI verifier and forgives only the hostname mismatch;
/// chain-of-trust validation still applies.
#[derive(Debug)]
struct NoHostnameVerification {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for NoHostnameVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

//! Client Identity Derivation
//!
//! Extracts the end-entity certificate from the keystore PEM bundle and
//! derives the stable client identity string attached to every connection
//! context a communicator creates.

use std::path::Path;

use tracing::debug;
use x509_parser::pem::Pem;

use crate::error::{ComlinkError, Result};

/// Minimum chain length that marks a bundle as carrying an end-entity
/// identity. Shorter bundles are assumed to be CA/intermediate material.
/// Heuristic: leaf + intermediate + root.
const MIN_CHAIN_LENGTH: usize = 3;

/// Derive the client identity from a keystore file.
///
/// The keystore is a PEM bundle holding the client's full certificate chain
/// leaf-first (plus its private key, which is ignored here). The identity is
/// the leaf certificate's subject DN.
pub fn derive_client_identity(keystore_path: &Path) -> Result<String> {
    let pem = std::fs::read(keystore_path).map_err(|e| {
        ComlinkError::initialization(format!(
            "cannot read keystore '{}': {}",
            keystore_path.display(),
            e
        ))
    })?;
    derive_client_identity_from_pem(&pem)
}

/// Derive the client identity from keystore PEM bytes.
pub fn derive_client_identity_from_pem(keystore_pem: &[u8]) -> Result<String> {
    let chain = certificate_blocks(keystore_pem)?;

    // The first certificate is the end entity only when the bundle carries a
    // full chain; a shorter bundle is not an identity.
    if chain.len() < MIN_CHAIN_LENGTH {
        return Err(ComlinkError::initialization(format!(
            "keystore does not contain a full certificate chain (found {} certificates, need at least {})",
            chain.len(),
            MIN_CHAIN_LENGTH
        )));
    }

    let leaf = &chain[0];
    let (_, cert) = x509_parser::parse_x509_certificate(&leaf.contents).map_err(|e| {
        ComlinkError::initialization(format!("cannot parse end-entity certificate: {}", e))
    })?;

    let identity = cert.subject().to_string();
    debug!(identity = %identity, chain_len = chain.len(), "derived client identity from keystore");
    Ok(identity)
}

fn certificate_blocks(pem: &[u8]) -> Result<Vec<Pem>> {
    let mut blocks = Vec::new();
    for item in Pem::iter_from_buffer(pem) {
        let block =
            item.map_err(|e| ComlinkError::initialization(format!("malformed keystore PEM: {}", e)))?;
        if block.label == "CERTIFICATE" {
            blocks.push(block);
        }
    }
    if blocks.is_empty() {
        return Err(ComlinkError::initialization(
            "keystore contains no certificates",
        ));
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

    fn ca_cert(cn: &str, constraint: BasicConstraints) -> (rcgen::Certificate, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.is_ca = IsCa::Ca(constraint);
        params.distinguished_name.push(DnType::CommonName, cn);
        let cert = params.self_signed(&key).unwrap();
        (cert, key)
    }

    /// root -> intermediate(s) -> leaf, returned leaf-first as PEM
    fn chain_pem(leaf_cn: &str, intermediates: usize) -> String {
        let (root_cert, root_key) = ca_cert("weft-test-root", BasicConstraints::Unconstrained);

        let mut issuer_cert = root_cert;
        let mut issuer_key = root_key;
        let mut pems_reversed = vec![issuer_cert.pem()];

        for i in 0..intermediates {
            let key = KeyPair::generate().unwrap();
            let mut params = CertificateParams::new(Vec::new()).unwrap();
            params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
            params
                .distinguished_name
                .push(DnType::CommonName, format!("weft-test-intermediate-{}", i));
            let cert = params.signed_by(&key, &issuer_cert, &issuer_key).unwrap();
            pems_reversed.push(cert.pem());
            issuer_cert = cert;
            issuer_key = key;
        }

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        leaf_params.distinguished_name.push(DnType::CommonName, leaf_cn);
        let leaf = leaf_params
            .signed_by(&leaf_key, &issuer_cert, &issuer_key)
            .unwrap();

        let mut bundle = leaf.pem();
        for pem in pems_reversed.into_iter().rev() {
            bundle.push_str(&pem);
        }
        bundle.push_str(&leaf_key.serialize_pem());
        bundle
    }

    #[test]
    fn test_identity_from_chain_of_four() {
        let bundle = chain_pem("weft-test-leaf", 2);
        let identity = derive_client_identity_from_pem(bundle.as_bytes()).unwrap();
        assert!(identity.contains("weft-test-leaf"), "identity was {}", identity);
        assert!(!identity.contains("intermediate"));
    }

    #[test]
    fn test_short_chain_rejected() {
        // leaf + root only: not considered an end-entity identity
        let bundle = chain_pem("weft-test-leaf", 0);
        let err = derive_client_identity_from_pem(bundle.as_bytes()).unwrap_err();
        assert!(matches!(err, ComlinkError::Initialization(_)));
    }

    #[test]
    fn test_keystore_without_certificates_rejected() {
        let key = KeyPair::generate().unwrap();
        let err = derive_client_identity_from_pem(key.serialize_pem().as_bytes()).unwrap_err();
        assert!(matches!(err, ComlinkError::Initialization(_)));
    }

    #[test]
    fn test_missing_keystore_file() {
        let err = derive_client_identity(Path::new("/nonexistent/keystore.pem")).unwrap_err();
        assert!(matches!(err, ComlinkError::Initialization(_)));
    }
}

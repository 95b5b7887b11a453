//! TLS configuration builders for the two sides of a profile.
//!
//! Each builder returns `None` when no credential material is present
//! for its side. The listen side requires and verifies client
//! certificates whenever a listen authority is configured; the send side
//! replaces the default trust anchors with the send authority and offers
//! the send certificate as a client certificate.

use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::{self, RootCertStore};

use crate::error::TransportError;

/// Build the listen-side TLS configuration from raw PEM material.
///
/// Returns `None` when neither an authority nor a certificate is set.
/// rustls cannot serve without a certificate, so an authority with no
/// certificate is a build error rather than a deferred handshake
/// failure.
pub fn server_config(
    authority_pem: &str,
    cert_pem: &str,
    key_pem: &str,
) -> Result<Option<rustls::ServerConfig>, TransportError> {
    if authority_pem.is_empty() && cert_pem.is_empty() {
        return Ok(None);
    }
    if cert_pem.is_empty() {
        return Err(TransportError::Config(
            "listen authority is set but there is no listen certificate to serve".to_string(),
        ));
    }

    let certs = certs_from_pem(cert_pem, "listen certificate")?;
    let key = key_from_pem(key_pem, "listen private key")?;

    let builder = rustls::ServerConfig::builder();
    let config = if authority_pem.is_empty() {
        builder.with_no_client_auth().with_single_cert(certs, key)?
    } else {
        let roots = root_store_from_pem(authority_pem, "listen authority")?;
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| TransportError::Config(format!("client verifier: {e}")))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?
    };

    Ok(Some(config))
}

/// Build the send-side TLS configuration from raw PEM material.
///
/// Returns `None` when neither an authority nor a certificate is set. A
/// send authority replaces the default webpki trust anchors; a send
/// certificate is offered as the client certificate.
pub fn client_config(
    authority_pem: &str,
    cert_pem: &str,
    key_pem: &str,
) -> Result<Option<rustls::ClientConfig>, TransportError> {
    if authority_pem.is_empty() && cert_pem.is_empty() {
        return Ok(None);
    }

    let roots = if authority_pem.is_empty() {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        roots
    } else {
        root_store_from_pem(authority_pem, "send authority")?
    };

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let config = if cert_pem.is_empty() {
        builder.with_no_client_auth()
    } else {
        let certs = certs_from_pem(cert_pem, "send certificate")?;
        let key = key_from_pem(key_pem, "send private key")?;
        builder.with_client_auth_cert(certs, key)?
    };

    Ok(Some(config))
}

/// Parse all certificates from a PEM blob.
fn certs_from_pem(pem: &str, what: &str) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let mut reader = pem.as_bytes();
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|c| c.ok().map(|v| v.into_owned()))
        .collect();

    if certs.is_empty() {
        return Err(TransportError::Config(format!(
            "no certificates found in {what}"
        )));
    }
    Ok(certs)
}

/// Parse the first PKCS#8 or PKCS#1 private key from a PEM blob.
fn key_from_pem(pem: &str, what: &str) -> Result<PrivateKeyDer<'static>, TransportError> {
    let mut reader = pem.as_bytes();
    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Some(_) => continue,
            None => {
                return Err(TransportError::Config(format!(
                    "no private key found in {what}"
                )));
            }
        }
    }
}

fn root_store_from_pem(pem: &str, what: &str) -> Result<RootCertStore, TransportError> {
    let certs = certs_from_pem(pem, what)?;
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| TransportError::Config(format!("adding {what} certificate: {e}")))?;
    }
    Ok(roots)
}

//! Mutual-TLS acceptor for the peer listener.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pemfile::{certs, private_key};
use tagtrack_core::TlsPaths;
use tokio_rustls::TlsAcceptor;

use crate::error::{ServerError, ServerResult};

/// Build an acceptor that requires peers to present a certificate signed
/// by the configured client CA.
pub fn build_acceptor(paths: &TlsPaths) -> ServerResult<TlsAcceptor> {
    let cert_chain = load_cert_chain(&paths.cert_path)?;
    let key = load_private_key(&paths.key_path)?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(load_cert_chain(&paths.client_ca_path)?);
    if added == 0 {
        return Err(ServerError::tls_material(
            &paths.client_ca_path,
            format!("no usable CA certificates ({ignored} rejected)"),
        ));
    }

    let verifier = WebPkiClientVerifier::builder(roots.into())
        .build()
        .map_err(|e| ServerError::TlsConfig(e.to_string()))?;
    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, key)
        .map_err(|e| ServerError::TlsConfig(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_cert_chain(path: &Path) -> ServerResult<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| ServerError::tls_material(path, e))?);
    let chain = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::tls_material(path, e))?;
    if chain.is_empty() {
        return Err(ServerError::tls_material(path, "no certificates found"));
    }
    Ok(chain)
}

fn load_private_key(path: &Path) -> ServerResult<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| ServerError::tls_material(path, e))?);
    private_key(&mut reader)
        .map_err(|e| ServerError::tls_material(path, e))?
        .ok_or_else(|| ServerError::tls_material(path, "no private key found"))
}

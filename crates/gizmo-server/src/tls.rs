//! TLS for the HTTP and RPC listeners.
//!
//! Certificates and keys are PEM files named by `TLS_CERT` and `TLS_KEY`.
//! ALPN offers `h2` before `http/1.1`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::error::{ServerError, ServerResult};

/// Builds an acceptor from a PEM certificate chain and private key.
pub fn acceptor(cert: &Path, key: &Path) -> ServerResult<TlsAcceptor> {
    let certs = load_certs(cert)?;
    let key = load_private_key(key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path, what: &str) -> ServerResult<BufReader<File>> {
    File::open(path).map(BufReader::new).map_err(|e| {
        ServerError::Tls(format!("failed to read {what} file {}: {e}", path.display()))
    })
}

fn load_certs(path: &Path) -> ServerResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("failed to parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> ServerResult<PrivateKeyDer<'static>> {
    let mut reader = open(path, "key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::Tls(format!("failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| ServerError::Tls(format!("no private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_files() {
        let err = acceptor(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"))
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Tls(ref m) if m.contains("certificate")));
    }

    #[test]
    fn test_empty_certificate_file() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a pem file").unwrap();
        let err = acceptor(cert.path(), cert.path()).err().unwrap();
        assert!(matches!(err, ServerError::Tls(ref m) if m.contains("no certificates")));
    }
}

//! SNI-based certificate selection: the server presents whichever cert
//! matches the client's requested hostname, falling back to `localhost`
//! for anything unrecognized.

use crate::generate::CertError;
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, CertError> {
    let cert_bytes = std::fs::read(cert_path)?;
    let key_bytes = std::fs::read(key_path)?;

    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_bytes.as_slice())
        .collect::<Result<_, _>>()?;

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_bytes.as_slice())?
        .ok_or_else(|| CertError::NoPrivateKey(key_path.to_path_buf()))?;

    let signing_key = any_supported_type(&key)?;
    Ok(CertifiedKey {
        cert: chain,
        key: signing_key,
        ocsp: None,
    })
}

/// Resolves a TLS server certificate by SNI hostname, loaded once at
/// startup from a directory of `{name}.pem`/`{name}-key.pem` pairs.
#[derive(Debug)]
pub struct SniCertResolver {
    by_name: HashMap<String, Arc<CertifiedKey>>,
    fallback: Arc<CertifiedKey>,
}

impl SniCertResolver {
    /// `pairs` maps SNI hostname -> (cert path, key path). `fallback_name`
    /// must be a key in `pairs`; it's served when the client's SNI name is
    /// absent or unrecognized.
    pub fn load(
        pairs: &[(String, crate::generate::CertPaths)],
        fallback_name: &str,
    ) -> Result<Self, CertError> {
        let mut by_name = HashMap::new();
        for (name, paths) in pairs {
            let key = Arc::new(load_certified_key(&paths.cert, &paths.key)?);
            by_name.insert(name.clone(), key);
        }
        let fallback = by_name
            .get(fallback_name)
            .cloned()
            .expect("fallback_name must be present in pairs");
        Ok(Self { by_name, fallback })
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match client_hello.server_name() {
            Some(name) => Some(
                self.by_name
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.fallback.clone()),
            ),
            None => Some(self.fallback.clone()),
        }
    }
}

/// Builds a TLS acceptor-ready `ServerConfig` restricted to TLS 1.2+ with no
/// client authentication.
pub fn server_config(resolver: Arc<SniCertResolver>) -> Result<rustls::ServerConfig, CertError> {
    let config = rustls::ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_no_client_auth()
    .with_cert_resolver(resolver);
    Ok(config)
}

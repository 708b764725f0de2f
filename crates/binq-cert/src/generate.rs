//! Self-signed certificate generation, mirroring the original broker's
//! startup-time cert bootstrap: generate once into `.cert/`, reuse
//! thereafter.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("certificate generation: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error("rustls: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
}

/// A generated or loaded cert/key pair, on disk.
#[derive(Debug, Clone)]
pub struct CertPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Ensures `{name}.pem`/`{name}-key.pem` exist under `cert_dir`, generating
/// a self-signed pair valid for 365 days if missing. SANs always include
/// `localhost`, `127.0.0.1`, `::1`, plus `name` and the host's first
/// non-loopback IPv4 address.
pub fn ensure_cert_pair(cert_dir: &Path, name: &str) -> Result<CertPaths, CertError> {
    std::fs::create_dir_all(cert_dir)?;
    let cert_path = cert_dir.join(format!("{name}.pem"));
    let key_path = cert_dir.join(format!("{name}-key.pem"));

    if cert_path.exists() && key_path.exists() {
        return Ok(CertPaths {
            cert: cert_path,
            key: key_path,
        });
    }

    generate_self_signed(name, &cert_path, &key_path)?;
    Ok(CertPaths {
        cert: cert_path,
        key: key_path,
    })
}

fn generate_self_signed(name: &str, cert_path: &Path, key_path: &Path) -> Result<(), CertError> {
    let mut sans = vec![
        "localhost".to_owned(),
        "127.0.0.1".to_owned(),
        "::1".to_owned(),
    ];
    if name != "localhost" {
        sans.push(name.to_owned());
    }
    if let Some(ip) = first_non_loopback_ipv4() {
        sans.push(ip.to_string());
    }

    let mut params = CertificateParams::new(sans)?;
    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(365);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    std::fs::write(cert_path, cert.pem())?;
    std::fs::write(key_path, key_pair.serialize_pem())?;
    tracing::info!(name, ?cert_path, "generated self-signed certificate");
    Ok(())
}

/// Finds the host's first non-loopback IPv4 address by opening a UDP
/// "connection" to a public address and reading back the local endpoint.
/// No packets are actually sent; this only exercises routing.
pub fn first_non_loopback_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.set_read_timeout(Some(Duration::from_millis(50))).ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
        _ => None,
    }
}

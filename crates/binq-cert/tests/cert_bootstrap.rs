use binq_cert::{ensure_cert_pair, SniCertResolver};
use tempfile::tempdir;

#[test]
fn ensure_cert_pair_generates_once_and_reuses() {
    let dir = tempdir().unwrap();
    let first = ensure_cert_pair(dir.path(), "localhost").unwrap();
    let first_bytes = std::fs::read(&first.cert).unwrap();

    let second = ensure_cert_pair(dir.path(), "localhost").unwrap();
    let second_bytes = std::fs::read(&second.cert).unwrap();

    assert_eq!(first_bytes, second_bytes, "second call must not regenerate");
}

#[test]
fn resolver_loads_both_named_certs() {
    let dir = tempdir().unwrap();
    let local = ensure_cert_pair(dir.path(), "localhost").unwrap();
    let remote = ensure_cert_pair(dir.path(), "remotehost").unwrap();

    let pairs = vec![
        ("localhost".to_owned(), local),
        ("remotehost".to_owned(), remote),
    ];
    let resolver = SniCertResolver::load(&pairs, "localhost");
    assert!(resolver.is_ok());
}

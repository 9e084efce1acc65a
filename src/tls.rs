use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::config::Config;

/// TLS acceptor for the configured PEM pair, or `None` when TLS is off.
pub fn acceptor_for(config: &Config) -> io::Result<Option<TlsAcceptor>> {
    match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (Some(cert), Some(key)) => load_tls_acceptor(Path::new(cert), Path::new(key)).map(Some),
        (None, None) => Ok(None),
        _ => Err(io::Error::new(
            ErrorKind::InvalidInput,
            "both LEAVEDESK_TLS_CERT and LEAVEDESK_TLS_KEY must be set, or neither",
        )),
    }
}

pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> io::Result<TlsAcceptor> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {}", cert_path.display()),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(cert: Option<&str>, key: Option<&str>) -> Config {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.tls_cert = cert.map(String::from);
        config.tls_key = key.map(String::from);
        config
    }

    #[test]
    fn disabled_without_paths() {
        assert!(acceptor_for(&config_with(None, None)).unwrap().is_none());
    }

    #[test]
    fn half_configured_is_refused() {
        let err = acceptor_for(&config_with(Some("cert.pem"), None)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_cert_file() {
        let dir = std::env::temp_dir().join("leavedesk_test_tls");
        std::fs::create_dir_all(&dir).unwrap();
        let err = load_tls_acceptor(&dir.join("absent.pem"), &dir.join("absent.key")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn empty_cert_file() {
        let dir = std::env::temp_dir().join("leavedesk_test_tls");
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("empty.pem");
        std::fs::write(&cert, "").unwrap();
        let err = load_tls_acceptor(&cert, &cert).err().unwrap();
        assert!(err.to_string().contains("no certificates"));
    }
}

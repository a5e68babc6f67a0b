//! TLS hook
//!
//! No cryptography lives in this crate. A caller that wants TLS loads
//! the certificate, key and CA named by [`TlsConfig`] into whatever TLS
//! library it uses and hands the server a [`TlsAcceptor`] that wraps each
//! accepted TCP stream.

use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use super::transport::Transport;
use crate::error::{Error, Result};

/// Certificate, private key and CA bundle locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl TlsConfig {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>, ca: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            ca: ca.into(),
        }
    }

    /// Check that all three files exist.
    ///
    /// # Errors
    /// [`Error::Tls`] naming the first missing file.
    pub fn validate(&self) -> Result<()> {
        check_file("certificate", &self.cert)?;
        check_file("private key", &self.key)?;
        check_file("CA bundle", &self.ca)
    }
}

fn check_file(what: &str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::Tls(format!("{what} not found at {}", path.display())))
    }
}

/// Wraps an accepted TCP stream into a secured transport.
///
/// Called on the connection's own thread, so a slow handshake does not
/// hold up the accept loop. A failed handshake drops only that
/// connection.
pub trait TlsAcceptor: Send + Sync + 'static {
    fn accept(&self, stream: TcpStream) -> io::Result<Box<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_existing_files() {
        let dir = TempDir::new().unwrap();
        for name in ["cert.pem", "key.pem", "ca.pem"] {
            std::fs::write(dir.path().join(name), b"-----BEGIN-----").unwrap();
        }

        let config = TlsConfig::new(
            dir.path().join("cert.pem"),
            dir.path().join("key.pem"),
            dir.path().join("ca.pem"),
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cert.pem"), b"x").unwrap();

        let config = TlsConfig::new(
            dir.path().join("cert.pem"),
            dir.path().join("key.pem"),
            dir.path().join("ca.pem"),
        );
        match config.validate() {
            Err(Error::Tls(msg)) => assert!(msg.starts_with("private key not found")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}

use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig as TlsConfig;
use pgwire::tokio::TlsAcceptor;

use crate::engine::EnginePolicy;

/// Process configuration, read once at startup from `APPTD_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub policy: EnginePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "apptd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            policy: EnginePolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> io::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> io::Result<Self> {
        let d = Self::default();
        Ok(Self {
            bind: lookup("APPTD_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "APPTD_PORT")?.unwrap_or(d.port),
            data_dir: lookup("APPTD_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: lookup("APPTD_PASSWORD").unwrap_or(d.password),
            max_connections: parsed(&lookup, "APPTD_MAX_CONNECTIONS")?.unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "APPTD_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            metrics_port: parsed(&lookup, "APPTD_METRICS_PORT")?,
            tls_cert: lookup("APPTD_TLS_CERT"),
            tls_key: lookup("APPTD_TLS_KEY"),
            policy: EnginePolicy {
                min_advance_minutes: parsed(&lookup, "APPTD_MIN_ADVANCE_MINUTES")?
                    .unwrap_or(d.policy.min_advance_minutes),
                partial_payments: match lookup("APPTD_PARTIAL_PAYMENTS") {
                    Some(v) => parse_flag("APPTD_PARTIAL_PAYMENTS", &v)?,
                    None => d.policy.partial_payments,
                },
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

fn invalid(key: &str, value: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidInput, format!("{key}: invalid value '{value}'"))
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> io::Result<Option<T>> {
    lookup(key)
        .map(|v| v.trim().parse().map_err(|_| invalid(key, &v)))
        .transpose()
}

fn parse_flag(key: &str, value: &str) -> io::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both APPTD_TLS_CERT and APPTD_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = TlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.addr(), "0.0.0.0:5433");
        assert!(cfg.policy.partial_payments);
    }

    #[test]
    fn reads_overrides() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("APPTD_PORT", "6000"),
            ("APPTD_DATA_DIR", "/var/lib/apptd"),
            ("APPTD_COMPACT_THRESHOLD", "50"),
            ("APPTD_METRICS_PORT", "9100"),
            ("APPTD_MIN_ADVANCE_MINUTES", "30"),
            ("APPTD_PARTIAL_PAYMENTS", "off"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/apptd"));
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.policy.min_advance_minutes, 30);
        assert!(!cfg.policy.partial_payments);
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = ServerConfig::from_lookup(lookup(&[("APPTD_PORT", "lots")])).unwrap_err();
        assert!(err.to_string().contains("APPTD_PORT"));
        assert!(ServerConfig::from_lookup(lookup(&[("APPTD_PARTIAL_PAYMENTS", "maybe")])).is_err());
    }

    #[test]
    fn tls_needs_both_paths() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
        assert!(load_tls_acceptor(Some("cert.pem"), None).is_err());
    }
}

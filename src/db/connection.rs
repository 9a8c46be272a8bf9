use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_postgres::NoTls;

use super::executor::PgStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates. Use with caution.
    /// Only honoured by `Prefer` and `Require`.
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA bundle (PEM format).
    /// If not set, the system CA store is used.
    pub ca_cert_path: Option<String>,
}

/// SSL/TLS connection modes for PostgreSQL.
///
/// These match the standard PostgreSQL sslmode parameter:
/// - `Disable`: No SSL (unencrypted)
/// - `Prefer`: Try SSL first, fall back to non-SSL (default)
/// - `Require`: Require SSL but don't verify certificate
/// - `VerifyCa`: Require SSL and verify the server certificate is signed by a trusted CA
/// - `VerifyFull`: Like VerifyCa, but also verify the server hostname matches the certificate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

/// Bounds of the connection pool. Waiting longer than `wait_timeout` for a
/// free connection surfaces as `Unavailable`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    pub max_size: usize,
    pub wait_timeout_ms: u64,
    pub create_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 16,
            wait_timeout_ms: 500,
            create_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    /// Driver configuration. `VerifyCa`/`VerifyFull` map to `require`; the
    /// TLS connector does the verification.
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let ssl_mode = match self.ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
                tokio_postgres::config::SslMode::Require
            }
        };
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.username)
            .password(&self.password)
            .ssl_mode(ssl_mode)
            .application_name("dashquery")
            .connect_timeout(Duration::from_secs(10));
        config
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::from("Local PostgreSQL"),
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
        }
    }
}

/// Build a pooled store for `config`. No connection is opened until the
/// first query.
pub fn connect(config: &ConnectionConfig, pool: &PoolSettings) -> Result<PgStore> {
    let tls = match config.ssl_mode {
        SslMode::Disable => None,
        SslMode::Prefer | SslMode::Require => Some(build_tls_connector(config, false)?),
        SslMode::VerifyCa | SslMode::VerifyFull => Some(build_tls_connector(config, true)?),
    };
    let pool = create_pool(config.pg_config(), tls.clone(), pool)
        .with_context(|| format!("Failed to create pool for {}", config.display_string()))?;
    Ok(PgStore::new(pool, tls))
}

pub fn create_pool(
    pg_config: tokio_postgres::Config,
    tls: Option<MakeTlsConnector>,
    settings: &PoolSettings,
) -> Result<Pool> {
    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let manager = match tls {
        Some(tls) => Manager::from_config(pg_config, tls, manager_config),
        None => Manager::from_config(pg_config, NoTls, manager_config),
    };
    Pool::builder(manager)
        .max_size(settings.max_size)
        .wait_timeout(Some(Duration::from_millis(settings.wait_timeout_ms)))
        .create_timeout(Some(Duration::from_millis(settings.create_timeout_ms)))
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to build connection pool")
}

/// Build a TLS connector with appropriate certificate configuration.
///
/// # Arguments
/// * `config` - Connection configuration
/// * `strict_verify` - If true, always verify certificates (for verify-ca/verify-full modes)
fn build_tls_connector(config: &ConnectionConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else {
        if config.ssl_mode == SslMode::VerifyCa {
            // verify-ca checks the chain only
            builder.danger_accept_invalid_hostnames(true);
        }
        if let Some(ca_path) = &config.ca_cert_path {
            let ca_data = std::fs::read(ca_path)
                .with_context(|| format!("Failed to read CA certificate file: {}", ca_path))?;
            for pem in split_pem_bundle(&ca_data)? {
                let cert = native_tls::Certificate::from_pem(pem.as_bytes())
                    .context("Failed to parse certificate")?;
                builder.add_root_certificate(cert);
            }
        }
    }

    let connector = builder.build().context("Failed to build TLS connector")?;

    Ok(MakeTlsConnector::new(connector))
}

/// Split a PEM bundle into one PEM string per certificate.
fn split_pem_bundle(pem_data: &[u8]) -> Result<Vec<String>> {
    let pem_str =
        std::str::from_utf8(pem_data).context("CA certificate file is not valid UTF-8")?;

    let mut certs = Vec::new();
    let mut current: Option<String> = None;

    for line in pem_str.lines() {
        let line = line.trim();
        if line == "-----BEGIN CERTIFICATE-----" {
            current = Some(format!("{}\n", line));
        } else if let Some(cert) = current.as_mut() {
            cert.push_str(line);
            cert.push('\n');
            if line == "-----END CERTIFICATE-----" {
                certs.extend(current.take());
            }
        }
    }

    if certs.is_empty() {
        anyhow::bail!("No valid certificates found in PEM data");
    }

    Ok(certs)
}

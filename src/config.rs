//! Config for the directory connection.
use std::{
	fmt,
	fs::File,
	io::BufReader,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// LDAP configuration.
#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
	/// The DN to bind the session connection with. The session stays
	/// anonymous if unset.
	#[serde(default)]
	pub bind_dn: Option<String>,
	/// The password for `bind_dn`
	#[serde(default)]
	pub bind_password: Option<String>,
	/// Refuse add, modify and delete operations
	#[serde(default)]
	pub read_only: bool,
}

impl fmt::Debug for Config {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Config")
			.field("url", &self.url.as_str())
			.field("connection", &self.connection)
			.field("bind_dn", &self.bind_dn)
			.field("bind_password", &self.bind_password.as_ref().map(|_| "[REDACTED]"))
			.field("read_only", &self.read_only)
			.finish()
	}
}

impl Config {
	/// A configuration with default connection settings for the given URL.
	#[must_use]
	pub fn new(url: Url) -> Self {
		Self {
			url,
			connection: ConnectionConfig::default(),
			bind_dn: None,
			bind_password: None,
			read_only: false,
		}
	}
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// Timeout for every single LDAP operation.
	pub operation_timeout: Duration,

	/// TLS config
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self { timeout: 10, operation_timeout: Duration::from_secs(10), tls: TLSConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

impl Default for TLSConfig {
	fn default() -> Self {
		Self {
			starttls: true,
			no_tls_verify: false,
			root_certificates_path: None,
			client_key_path: None,
			client_certificate_path: None,
		}
	}
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			for certificate in read_certificates(path)? {
				roots
					.add(&certificate)
					.map_err(|_| Error::Invalid("Could not read root certificate".to_owned()))?;
			}

			let builder =
				ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);
			let config = match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
				(Some(key_path), Some(cert_path)) => builder
					.with_client_auth_cert(read_certificates(cert_path)?, read_private_key(key_path)?)
					.map_err(|_| Error::Invalid("Could not read client certificates".to_owned()))?,
				(None, None) => builder.with_no_client_auth(),
				_ => Err(Error::Invalid(
					"Both a client certificate and key file in PKCS8 format must be specified"
						.to_owned(),
				))?,
			};
			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}

/// Read all PEM encoded certificates from a file.
fn read_certificates(path: &Path) -> Result<Vec<Certificate>, Error> {
	let mut reader = BufReader::new(File::open(path)?);
	let certificates = rustls_pemfile::certs(&mut reader)?;
	if certificates.is_empty() {
		return Err(Error::Invalid(format!("No certificates found in {}", path.display())));
	}
	Ok(certificates.into_iter().map(Certificate).collect())
}

/// Read the first PEM encoded PKCS8 private key from a file.
fn read_private_key(path: &Path) -> Result<PrivateKey, Error> {
	let mut reader = BufReader::new(File::open(path)?);
	rustls_pemfile::pkcs8_private_keys(&mut reader)?
		.into_iter()
		.next()
		.map(PrivateKey)
		.ok_or_else(|| Error::Invalid("Could not read client certificates".to_owned()))
}

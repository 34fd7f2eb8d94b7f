//! Connections to the directory server.
//!
//! The mapping layer talks to the server only through [`DirectoryConnection`].
//! [`LdapSession`] implements it on top of `ldap3`: the network connection is
//! opened and bound on first use and unbound exactly once, when the session is
//! unbound explicitly or dropped. One session belongs to one logical request
//! and must not be shared between threads.
use std::{
	collections::{BTreeMap, HashSet},
	fmt,
	sync::Arc,
};

use ldap3::{LdapConn, LdapResult, Mod, Scope, SearchEntry, SearchResult};
use tracing::{debug, info, warn};

use crate::{
	attribute::ChangeKind,
	auth::{AuthOptions, AuthenticationProbe},
	config::Config,
	error::Error,
};

/// Result code returned when the search base does not exist.
const NO_SUCH_OBJECT: u32 = 32;

/// Attribute values of a new entry, keyed by protocol attribute name.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// Changes to an existing entry, keyed by protocol attribute name.
pub type ChangeMap = BTreeMap<String, (ChangeKind, Vec<Vec<u8>>)>;

/// Credentials for a simple bind.
#[derive(Clone)]
pub struct Credentials {
	/// The DN to bind as
	pub dn: String,
	/// The password
	pub password: String,
}

impl Credentials {
	/// Credentials for the given DN and password.
	#[must_use]
	pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
		Self { dn: dn.into(), password: password.into() }
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials").field("dn", &self.dn).field("password", &"[REDACTED]").finish()
	}
}

/// The operations the mapping layer needs from a directory server
/// connection.
///
/// Add, modify and delete report whether the server accepted the operation;
/// an `Err` means the operation could not be performed at all.
pub trait DirectoryConnection {
	/// Bind with the connection's credentials. Returns whether the server
	/// accepted them.
	fn bind(&mut self) -> Result<bool, Error>;

	/// Close the connection. Further operations reconnect.
	fn unbind(&mut self) -> Result<(), Error>;

	/// Search for entries.
	fn search(
		&mut self,
		base: &str,
		filter: &str,
		scope: Scope,
		attributes: &[String],
	) -> Result<Vec<SearchEntry>, Error>;

	/// Add a new entry.
	fn add(
		&mut self,
		dn: &str,
		object_classes: &[String],
		attributes: &AttributeMap,
	) -> Result<bool, Error>;

	/// Modify an existing entry.
	fn modify(&mut self, dn: &str, changes: &ChangeMap) -> Result<bool, Error>;

	/// Delete an entry.
	fn delete(&mut self, dn: &str) -> Result<bool, Error>;

	/// The result of the most recent operation.
	fn last_result(&self) -> Option<&LdapResult>;

	/// The entries returned by the most recent search.
	fn last_response(&self) -> &[SearchEntry];
}

/// Opens new, independent connections.
pub trait Connector {
	/// The kind of connection opened
	type Connection: DirectoryConnection;

	/// Open a connection which binds with the given credentials, or stays
	/// anonymous.
	fn connect(&self, credentials: Option<Credentials>) -> Result<Self::Connection, Error>;
}

/// Entry point for talking to one directory server.
#[derive(Debug, Clone)]
pub struct Directory {
	/// The configuration of the LDAP client.
	config: Arc<Config>,
}

impl Directory {
	/// Create a new [`Directory`] with the given configuration.
	#[must_use]
	pub fn new(config: Config) -> Self {
		Self { config: Arc::new(config) }
	}

	/// The configuration in use.
	#[must_use]
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Start a session bound with the configured credentials. The connection
	/// is established on first use and unbound when the session is dropped.
	#[must_use]
	pub fn session(&self) -> LdapSession {
		let credentials = self.config.bind_dn.as_ref().map(|dn| {
			Credentials::new(dn.clone(), self.config.bind_password.clone().unwrap_or_default())
		});
		LdapSession::new(Arc::clone(&self.config), credentials)
	}

	/// Check a user's password, see [`AuthenticationProbe::authenticate`].
	pub fn authenticate<C: DirectoryConnection>(
		&self,
		session: &mut C,
		username: &str,
		password: &str,
		options: &AuthOptions,
	) -> bool {
		AuthenticationProbe::new(self).authenticate(session, username, password, options)
	}
}

impl Connector for Directory {
	type Connection = LdapSession;

	fn connect(&self, credentials: Option<Credentials>) -> Result<LdapSession, Error> {
		Ok(LdapSession::new(Arc::clone(&self.config), credentials))
	}
}

/// A lazily established, scoped connection to the directory server.
pub struct LdapSession {
	/// The configuration of the LDAP client.
	config: Arc<Config>,
	/// Credentials to bind with, anonymous if unset
	credentials: Option<Credentials>,
	/// The connection, once established
	conn: Option<LdapConn>,
	/// Result of the most recent operation
	last_result: Option<LdapResult>,
	/// Entries of the most recent search
	last_response: Vec<SearchEntry>,
}

impl fmt::Debug for LdapSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapSession")
			.field("url", &self.config.url.as_str())
			.field("credentials", &self.credentials)
			.field("connected", &self.conn.is_some())
			.field("last_result", &self.last_result)
			.finish_non_exhaustive()
	}
}

impl LdapSession {
	/// A session which has not connected yet.
	fn new(config: Arc<Config>, credentials: Option<Credentials>) -> Self {
		Self { config, credentials, conn: None, last_result: None, last_response: Vec::new() }
	}

	/// Whether the network connection has been established.
	#[must_use]
	pub fn is_connected(&self) -> bool {
		self.conn.is_some()
	}

	/// Create a connection to the ldap server based on the settings and url
	/// specified in the configuration.
	fn establish(&self) -> Result<LdapConn, Error> {
		let settings = self.config.connection.to_settings()?;
		debug!(url = %self.config.url, "Connecting to directory server");
		Ok(LdapConn::from_url_with_settings(settings, &self.config.url)?)
	}

	/// The connection, establishing and binding it first if necessary.
	fn connection(&mut self) -> Result<&mut LdapConn, Error> {
		let conn = match self.conn.take() {
			Some(conn) => conn,
			None => {
				let mut conn = self.establish()?;
				if let Some(credentials) = &self.credentials {
					let result =
						conn.simple_bind(&credentials.dn, &credentials.password)?.success()?;
					info!(dn = %credentials.dn, "Bound to directory server");
					self.last_result = Some(result);
				}
				conn
			}
		};
		Ok(self.conn.insert(conn))
	}

	/// The connection, prepared for the next operation.
	fn operation(&mut self) -> Result<&mut LdapConn, Error> {
		let timeout = self.config.connection.operation_timeout;
		let conn = self.connection()?;
		conn.with_timeout(timeout);
		Ok(conn)
	}

	/// Fail if the configuration forbids writes.
	fn writable(&self) -> Result<(), Error> {
		if self.config.read_only {
			return Err(Error::ReadOnly);
		}
		Ok(())
	}

	/// Remember an operation's result and report whether it succeeded.
	fn record(&mut self, operation: &str, result: LdapResult) -> bool {
		let success = result.rc == 0;
		if !success {
			warn!(rc = result.rc, text = %result.text, "Directory {operation} failed");
		}
		self.last_result = Some(result);
		success
	}
}

impl DirectoryConnection for LdapSession {
	fn bind(&mut self) -> Result<bool, Error> {
		let mut conn = match self.conn.take() {
			Some(conn) => conn,
			None => self.establish()?,
		};
		let Some(credentials) = &self.credentials else {
			debug!("No credentials configured, staying anonymous");
			self.conn = Some(conn);
			return Ok(true);
		};
		let result = conn.simple_bind(&credentials.dn, &credentials.password);
		self.conn = Some(conn);
		let result = result?;
		Ok(self.record("bind", result))
	}

	fn unbind(&mut self) -> Result<(), Error> {
		if let Some(mut conn) = self.conn.take() {
			debug!(url = %self.config.url, "Unbinding from directory server");
			conn.unbind()?;
		}
		Ok(())
	}

	fn search(
		&mut self,
		base: &str,
		filter: &str,
		scope: Scope,
		attributes: &[String],
	) -> Result<Vec<SearchEntry>, Error> {
		debug!(base, filter, ?scope, "Searching directory");
		let SearchResult(entries, result) = self.operation()?.search(base, scope, filter, attributes)?;
		self.last_response.clear();

		if result.rc == NO_SUCH_OBJECT {
			debug!(base, "Search base does not exist");
			self.last_result = Some(result);
			return Ok(Vec::new());
		}
		self.last_result = Some(result.clone());
		result.success()?;

		let rows: Vec<SearchEntry> = entries.into_iter().map(SearchEntry::construct).collect();
		debug!(base, count = rows.len(), "Search finished");
		self.last_response.clone_from(&rows);
		Ok(rows)
	}

	fn add(
		&mut self,
		dn: &str,
		object_classes: &[String],
		attributes: &AttributeMap,
	) -> Result<bool, Error> {
		self.writable()?;
		let mut payload: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = vec![(
			b"objectClass".to_vec(),
			object_classes.iter().map(|class| class.as_bytes().to_vec()).collect(),
		)];
		payload.extend(attributes.iter().map(|(name, values)| {
			(name.as_bytes().to_vec(), values.iter().map(|value| value.as_bytes().to_vec()).collect())
		}));

		debug!(dn, "Adding entry");
		let result = self.operation()?.add(dn, payload)?;
		Ok(self.record("add", result))
	}

	fn modify(&mut self, dn: &str, changes: &ChangeMap) -> Result<bool, Error> {
		self.writable()?;
		let mods: Vec<Mod<Vec<u8>>> = changes
			.iter()
			.map(|(name, (kind, values))| {
				let name = name.as_bytes().to_vec();
				let values: HashSet<Vec<u8>> = values.iter().cloned().collect();
				match kind {
					ChangeKind::Add => Mod::Add(name, values),
					ChangeKind::Replace => Mod::Replace(name, values),
					ChangeKind::Delete => Mod::Delete(name, values),
				}
			})
			.collect();

		debug!(dn, changes = mods.len(), "Modifying entry");
		let result = self.operation()?.modify(dn, mods)?;
		Ok(self.record("modify", result))
	}

	fn delete(&mut self, dn: &str) -> Result<bool, Error> {
		self.writable()?;
		debug!(dn, "Deleting entry");
		let result = self.operation()?.delete(dn)?;
		Ok(self.record("delete", result))
	}

	fn last_result(&self) -> Option<&LdapResult> {
		self.last_result.as_ref()
	}

	fn last_response(&self) -> &[SearchEntry] {
		&self.last_response
	}
}

impl Drop for LdapSession {
	fn drop(&mut self) {
		if let Err(err) = self.unbind() {
			warn!("Failed to unbind from directory server: {err}");
		}
	}
}

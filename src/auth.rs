//! Checking user credentials against the directory server.
use ldap3::{parse_filter, Scope};
use tracing::{debug, warn};

use crate::{
	connection::{Connector, Credentials, DirectoryConnection},
	dn::is_valid_dn,
	error::Error,
	filter,
};

/// How to find a user's DN when the username is not a DN itself.
#[derive(Debug, Clone)]
pub struct AuthOptions {
	/// The attribute holding the username, e.g. `uid` or `mail`
	pub attribute: Option<String>,
	/// Where to search for the user
	pub base_dn: Option<String>,
	/// An additional RFC 4515 filter the user entry must match
	pub search_filter: Option<String>,
	/// Search scope below `base_dn`
	pub scope: Scope,
}

impl Default for AuthOptions {
	fn default() -> Self {
		Self { attribute: None, base_dn: None, search_filter: None, scope: Scope::Subtree }
	}
}

impl AuthOptions {
	/// Look users up by `attribute` below `base_dn`.
	#[must_use]
	pub fn search(attribute: impl Into<String>, base_dn: impl Into<String>) -> Self {
		Self { attribute: Some(attribute.into()), base_dn: Some(base_dn.into()), ..Self::default() }
	}

	/// Require user entries to match an additional filter.
	#[must_use]
	pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
		self.search_filter = Some(filter.into());
		self
	}
}

/// Checks whether a username and password are accepted by the directory
/// server.
///
/// Every check binds on a fresh connection obtained from the connector, so a
/// failed attempt never disturbs the caller's session. The probe never fails:
/// any error counts as rejected credentials.
#[derive(Debug)]
pub struct AuthenticationProbe<'a, F> {
	/// Source of the short-lived bind connections
	connector: &'a F,
}

impl<'a, F: Connector> AuthenticationProbe<'a, F> {
	/// A probe opening its connections through `connector`.
	#[must_use]
	pub fn new(connector: &'a F) -> Self {
		Self { connector }
	}

	/// Check a username and password.
	///
	/// A username which is a valid DN is bound with directly. Otherwise the
	/// user is looked up through `session` by the attribute and base DN in
	/// `options`, and the first match is bound with.
	pub fn authenticate<C: DirectoryConnection>(
		&self,
		session: &mut C,
		username: &str,
		password: &str,
		options: &AuthOptions,
	) -> bool {
		let dn = if is_valid_dn(username) && !username.trim().is_empty() {
			username.to_owned()
		} else {
			match resolve_dn(session, username, options) {
				Ok(Some(dn)) => dn,
				Ok(None) => {
					debug!(username, "No entry found for username");
					return false;
				}
				Err(err) => {
					warn!(username, "Resolving username failed: {err}");
					return false;
				}
			}
		};
		self.verify(&dn, password)
	}

	/// Check the password of a known DN.
	pub fn verify(&self, dn: &str, password: &str) -> bool {
		if password.is_empty() {
			debug!(dn, "Refusing unauthenticated bind with empty password");
			return false;
		}

		let mut conn = match self.connector.connect(Some(Credentials::new(dn, password))) {
			Ok(conn) => conn,
			Err(err) => {
				warn!(dn, "Opening connection for authentication failed: {err}");
				return false;
			}
		};
		let bound = match conn.bind() {
			Ok(bound) => bound,
			Err(err) => {
				warn!(dn, "Bind failed: {err}");
				false
			}
		};
		if let Err(err) = conn.unbind() {
			debug!(dn, "Unbinding after authentication failed: {err}");
		}
		if !bound {
			debug!(dn, "Credentials rejected");
		}
		bound
	}
}

/// Find the DN of the first entry whose `attribute` equals `username`.
fn resolve_dn<C: DirectoryConnection>(
	session: &mut C,
	username: &str,
	options: &AuthOptions,
) -> Result<Option<String>, Error> {
	let (Some(attribute), Some(base_dn)) = (&options.attribute, &options.base_dn) else {
		return Err(Error::Invalid(
			"attribute and base DN are required to look up a username".to_owned(),
		));
	};

	let mut user_filter = filter::assertion(attribute, "=", username);
	if let Some(search_filter) = &options.search_filter {
		let search_filter = check_filter(search_filter)?;
		user_filter = format!("(&{user_filter}{search_filter})");
	}

	let rows = session.search(base_dn, &user_filter, options.scope, &[attribute.clone()])?;
	Ok(rows.into_iter().next().map(|row| row.dn))
}

/// Check that an additional search filter is a single, parenthesized RFC 4515
/// filter.
fn check_filter(filter: &str) -> Result<&str, Error> {
	let filter = filter.trim();
	if filter.starts_with('(') && parse_filter(filter).is_ok() {
		Ok(filter)
	} else {
		Err(Error::Filter(filter.to_owned()))
	}
}

//! Error codes

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// A field key was used which the entry definition does not declare.
	#[error("Entry type `{entry}` has no field `{field}`")]
	Schema {
		/// Name of the entry definition
		entry: String,
		/// The undeclared field key
		field: String,
	},
	/// A write operation was attempted through a read-only session.
	#[error("Connection is read-only")]
	ReadOnly,
	/// A distinguished name could not be derived or parsed.
	#[error("Cannot resolve distinguished name: {0}")]
	Dn(String),
	/// A simplified filter was malformed or rejected by a field validator.
	#[error("Malformed filter: {0}")]
	Filter(String),
	/// The contents of a value or configuration did not conform to the
	/// expected syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// A time value was malformed and failed to parse.
	#[error("Malformed time")]
	Time(#[from] time::error::Parse),
	/// Reading certificate material from disk failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// Serializing an entry failed.
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),
}

//! Map typed entry schemas onto LDAP directory operations.
//!
//! Entry kinds are declared once as an [`EntryDefinition`]: base DN, object
//! classes, the fields forming the RDN, and a slot per field naming the
//! protocol attribute behind it. Queries built from a definition translate a
//! simplified filter language into search filters and materialize the results
//! as [`EntryInstance`]s. Every attribute tracks its own changes, so saving an
//! entry only sends what was actually modified.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! ```no_run
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use url::Url;
//! use ldap_mapper::{AttributeSlot, AuthOptions, Config, Directory, EntryDefinition};
//!
//! let mut config = Config::new(Url::parse("ldap://localhost")?);
//! config.bind_dn = Some("cn=admin,dc=example,dc=com".to_owned());
//! config.bind_password = Some("verysecret".to_owned());
//! let directory = Directory::new(config);
//!
//! let user = EntryDefinition::builder("User")
//!     .base_dn("ou=people,dc=example,dc=com")
//!     .object_classes(["inetOrgPerson"])
//!     .rdn(["name"])
//!     .field("name", AttributeSlot::new("cn"))
//!     .field("surname", AttributeSlot::new("sn"))
//!     .field("email", AttributeSlot::new("mail"))
//!     .build()?;
//!
//! // The session unbinds when it goes out of scope
//! let mut session = directory.session();
//!
//! let mut fry = user.create([("name", "Philip J. Fry"), ("surname", "Fry")])?;
//! fry.save(&mut session)?;
//!
//! if let Some(mut fry) = user.query(&mut session).filter("name: Philip J. Fry").first()? {
//!     fry.set("email", "fry@planetexpress.com")?;
//!     fry.save(&mut session)?;
//! }
//!
//! let options = AuthOptions::search("mail", "ou=people,dc=example,dc=com");
//! let valid = directory.authenticate(&mut session, "fry@planetexpress.com", "password", &options);
//! println!("Credentials valid: {valid}");
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Binary attribute values are not mapped onto slots.
//! * Searches do not use the paged results control, so server side size
//!   limits apply.

pub mod attribute;
pub mod auth;
pub mod config;
pub mod connection;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod query;
pub mod schema;

pub use ldap3::{self, Scope, SearchEntry};

pub use crate::{
	attribute::{AttributeSlot, ChangeKind, Value},
	auth::{AuthOptions, AuthenticationProbe},
	config::{Config, ConnectionConfig, TLSConfig},
	connection::{Connector, Credentials, Directory, DirectoryConnection, LdapSession},
	entry::{ChangeType, EntryInstance, ValueShape},
	error::Error,
	query::QueryBuilder,
	schema::{EntryDefinition, EntryDefinitionBuilder},
};

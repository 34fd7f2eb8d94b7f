#![allow(dead_code)]

use std::{
	cell::{Ref, RefCell},
	collections::HashMap,
	error::Error,
	rc::Rc,
};

use ldap3::{LdapConn, LdapResult, Scope, SearchEntry};
use ldap_mapper::{
	connection::{AttributeMap, ChangeMap},
	ChangeKind, Connector, Credentials, DirectoryConnection,
};

/// A search as received by the mock server.
#[derive(Debug, Clone)]
pub struct Search {
	pub base: String,
	pub filter: String,
	pub scope: Scope,
	pub attributes: Vec<String>,
}

/// Everything the mock server holds and has seen.
#[derive(Debug, Default)]
pub struct State {
	pub entries: Vec<SearchEntry>,
	pub passwords: HashMap<String, String>,
	pub searches: Vec<Search>,
	pub adds: Vec<(String, Vec<String>, AttributeMap)>,
	pub modifies: Vec<(String, ChangeMap)>,
	pub deletes: Vec<String>,
	pub binds: Vec<String>,
	pub unbinds: usize,
	pub fail_searches: bool,
}

/// An in-memory directory server. Searches ignore the filter and return every
/// entry within the requested base and scope, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MockServer(Rc<RefCell<State>>);

impl MockServer {
	pub fn add_entry(&self, dn: &str, attrs: &[(&str, &[&str])]) {
		self.0.borrow_mut().entries.push(SearchEntry {
			dn: dn.to_owned(),
			attrs: attrs
				.iter()
				.map(|(name, values)| {
					((*name).to_owned(), values.iter().map(|value| (*value).to_owned()).collect())
				})
				.collect(),
			bin_attrs: HashMap::new(),
		});
	}

	pub fn set_password(&self, dn: &str, password: &str) {
		self.0.borrow_mut().passwords.insert(dn.to_lowercase(), password.to_owned());
	}

	pub fn fail_searches(&self) {
		self.0.borrow_mut().fail_searches = true;
	}

	pub fn state(&self) -> Ref<'_, State> {
		self.0.borrow()
	}

	pub fn session(&self) -> MockConnection {
		MockConnection { server: self.clone(), credentials: None, last_response: Vec::new() }
	}
}

impl Connector for MockServer {
	type Connection = MockConnection;

	fn connect(
		&self,
		credentials: Option<Credentials>,
	) -> Result<MockConnection, ldap_mapper::Error> {
		Ok(MockConnection { server: self.clone(), credentials, last_response: Vec::new() })
	}
}

/// A connection to the [`MockServer`].
#[derive(Debug)]
pub struct MockConnection {
	server: MockServer,
	credentials: Option<Credentials>,
	last_response: Vec<SearchEntry>,
}

/// Whether `dn` lies within `base` for the given scope.
fn in_scope(dn: &str, base: &str, scope: Scope) -> bool {
	let (dn, base) = (dn.to_lowercase(), base.to_lowercase());
	match scope {
		Scope::Base => dn == base,
		Scope::OneLevel => dn
			.strip_suffix(&format!(",{base}"))
			.is_some_and(|rdn| !rdn.contains(',')),
		Scope::Subtree => dn == base || dn.ends_with(&format!(",{base}")),
	}
}

impl DirectoryConnection for MockConnection {
	fn bind(&mut self) -> Result<bool, ldap_mapper::Error> {
		let Some(credentials) = &self.credentials else {
			return Ok(true);
		};
		let mut state = self.server.0.borrow_mut();
		state.binds.push(credentials.dn.clone());
		Ok(state.passwords.get(&credentials.dn.to_lowercase()) == Some(&credentials.password))
	}

	fn unbind(&mut self) -> Result<(), ldap_mapper::Error> {
		self.server.0.borrow_mut().unbinds += 1;
		Ok(())
	}

	fn search(
		&mut self,
		base: &str,
		filter: &str,
		scope: Scope,
		attributes: &[String],
	) -> Result<Vec<SearchEntry>, ldap_mapper::Error> {
		let mut state = self.server.0.borrow_mut();
		if state.fail_searches {
			return Err(ldap_mapper::Error::Invalid("server unavailable".to_owned()));
		}
		let rows: Vec<SearchEntry> =
			state.entries.iter().filter(|entry| in_scope(&entry.dn, base, scope)).cloned().collect();
		state.searches.push(Search {
			base: base.to_owned(),
			filter: filter.to_owned(),
			scope,
			attributes: attributes.to_vec(),
		});
		self.last_response.clone_from(&rows);
		Ok(rows)
	}

	fn add(
		&mut self,
		dn: &str,
		object_classes: &[String],
		attributes: &AttributeMap,
	) -> Result<bool, ldap_mapper::Error> {
		let mut state = self.server.0.borrow_mut();
		state.adds.push((dn.to_owned(), object_classes.to_vec(), attributes.clone()));
		if state.entries.iter().any(|entry| entry.dn.eq_ignore_ascii_case(dn)) {
			return Ok(false);
		}
		state.entries.push(SearchEntry {
			dn: dn.to_owned(),
			attrs: attributes.clone().into_iter().collect(),
			bin_attrs: HashMap::new(),
		});
		Ok(true)
	}

	fn modify(&mut self, dn: &str, changes: &ChangeMap) -> Result<bool, ldap_mapper::Error> {
		let mut state = self.server.0.borrow_mut();
		state.modifies.push((dn.to_owned(), changes.clone()));
		let Some(entry) = state.entries.iter_mut().find(|entry| entry.dn.eq_ignore_ascii_case(dn))
		else {
			return Ok(false);
		};
		for (name, (kind, values)) in changes {
			let values: Vec<String> =
				values.iter().map(|value| String::from_utf8_lossy(value).into_owned()).collect();
			match kind {
				ChangeKind::Add => entry.attrs.entry(name.clone()).or_default().extend(values),
				ChangeKind::Replace => {
					entry.attrs.insert(name.clone(), values);
				}
				ChangeKind::Delete => {
					entry.attrs.remove(name);
				}
			}
		}
		Ok(true)
	}

	fn delete(&mut self, dn: &str) -> Result<bool, ldap_mapper::Error> {
		let mut state = self.server.0.borrow_mut();
		state.deletes.push(dn.to_owned());
		let before = state.entries.len();
		state.entries.retain(|entry| !entry.dn.eq_ignore_ascii_case(dn));
		Ok(state.entries.len() < before)
	}

	fn last_result(&self) -> Option<&LdapResult> {
		None
	}

	fn last_response(&self) -> &[SearchEntry] {
		&self.last_response
	}
}

pub fn ldap_connect() -> Result<LdapConn, Box<dyn Error>> {
	let mut ldap = LdapConn::new("ldap://localhost:1389")?;
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword")?.success()?;
	Ok(ldap)
}

pub fn ldap_add_organizational_unit(ldap: &mut LdapConn, ou: &str) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={},dc=example,dc=org", ou),
		vec![("objectClass", ["organizationalUnit"].into())],
	)?
	.success()?;
	Ok(())
}

pub fn ldap_delete_organizational_unit(
	ldap: &mut LdapConn,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("ou={},dc=example,dc=org", ou))?.success()?;
	Ok(())
}

pub fn ldap_delete_user(ldap: &mut LdapConn, cn: &str) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("cn={},ou=users,dc=example,dc=org", cn))?.success()?;
	Ok(())
}

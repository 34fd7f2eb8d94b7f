//! Directory entries, either loaded from the server or created locally.
use std::{cell::OnceCell, collections::BTreeMap, sync::Arc};

use ldap3::SearchEntry;
use serde::Serialize;
use tracing::debug;

use crate::{
	attribute::{AttributeSlot, Value},
	auth::AuthenticationProbe,
	connection::{AttributeMap, ChangeMap, Connector, DirectoryConnection},
	dn::build_dn,
	error::Error,
	schema::EntryDefinition,
};

/// What [`EntryInstance::save`] does with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
	/// The entry does not exist on the server yet
	Add,
	/// The entry exists, only changed attributes are sent
	Modify,
}

/// How attribute values are represented in JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
	/// Every field is an array of strings
	Sequences,
	/// Single-valued fields are a bare string, see [`AttributeSlot::value`]
	Collapsed,
}

/// One directory entry of a given [`EntryDefinition`].
///
/// Holds exactly one slot per field the definition declares.
#[derive(Debug, Clone)]
pub struct EntryInstance {
	/// The schema of this entry
	definition: Arc<EntryDefinition>,
	/// Explicit or derived DN, fixed once known
	dn: OnceCell<String>,
	/// Whether saving adds or modifies
	change_type: ChangeType,
	/// Slots keyed by field key
	attributes: BTreeMap<String, AttributeSlot>,
}

/// JSON projection of an entry.
#[derive(Serialize)]
struct JsonEntry<'a> {
	/// The entry's DN
	dn: &'a str,
	/// Values keyed by field key
	attributes: BTreeMap<&'a str, Value>,
}

impl EntryInstance {
	/// Create a new entry with the given field values.
	///
	/// Fails without touching any slot if one of the keys is not declared.
	pub fn new<K, V, I>(definition: Arc<EntryDefinition>, fields: I) -> Result<Self, Error>
	where
		K: AsRef<str>,
		V: Into<Value>,
		I: IntoIterator<Item = (K, V)>,
	{
		let fields: Vec<(K, V)> = fields.into_iter().collect();
		if let Some((key, _)) = fields.iter().find(|(key, _)| definition.field(key.as_ref()).is_none())
		{
			return Err(definition.undeclared(key.as_ref()));
		}

		let mut entry = Self {
			attributes: definition.new_slots(),
			definition,
			dn: OnceCell::new(),
			change_type: ChangeType::Add,
		};
		for (key, value) in fields {
			entry.set(key.as_ref(), value)?;
		}
		Ok(entry)
	}

	/// Materialize a search result row. The entry is clean: saving it
	/// untouched sends nothing.
	pub(crate) fn from_row(definition: Arc<EntryDefinition>, row: SearchEntry) -> Self {
		let mut attributes = definition.new_slots();
		for (name, values) in &row.attrs {
			let slot = definition
				.object_definition()
				.key_for(name)
				.and_then(|key| attributes.get_mut(key));
			match slot {
				Some(slot) => slot.load(values),
				None => debug!(dn = %row.dn, attribute = %name, "Ignoring undeclared attribute"),
			}
		}
		for name in row.bin_attrs.keys() {
			debug!(dn = %row.dn, attribute = %name, "Ignoring binary attribute");
		}
		for slot in attributes.values_mut() {
			slot.fill_default();
		}

		Self { definition, dn: OnceCell::from(row.dn), change_type: ChangeType::Modify, attributes }
	}

	/// Use an explicit DN instead of deriving one from the RDN components.
	#[must_use]
	pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
		self.dn = OnceCell::from(dn.into());
		self
	}

	/// The definition this entry belongs to.
	#[must_use]
	pub fn definition(&self) -> &Arc<EntryDefinition> {
		&self.definition
	}

	/// Whether saving adds or modifies the entry.
	#[must_use]
	pub fn change_type(&self) -> ChangeType {
		self.change_type
	}

	/// The entry's DN.
	///
	/// Unless set explicitly, the DN is built from the RDN components and the
	/// definition's base DN the first time it is requested and kept
	/// afterwards. Every RDN component must then hold exactly one value.
	pub fn dn(&self) -> Result<&str, Error> {
		if let Some(dn) = self.dn.get() {
			return Ok(dn);
		}
		let dn = self.derive_dn()?;
		Ok(self.dn.get_or_init(|| dn))
	}

	/// Build the DN from the RDN components.
	fn derive_dn(&self) -> Result<String, Error> {
		let components = self.definition.rdn_components();
		if components.is_empty() {
			return Err(Error::Dn(format!(
				"entry type `{}` declares no RDN components",
				self.definition.name()
			)));
		}

		let mut rdn = Vec::with_capacity(components.len());
		for key in components {
			let slot = self.attributes.get(key).ok_or_else(|| self.definition.undeclared(key))?;
			match slot.values() {
				[value] => rdn.push((slot.name(), value.as_str())),
				[] => return Err(Error::Dn(format!("RDN component `{key}` is unset"))),
				_ => return Err(Error::Dn(format!("RDN component `{key}` holds several values"))),
			}
		}
		Ok(build_dn(&rdn, self.definition.base_dn()))
	}

	/// The slot of a field, `None` if the field is not declared.
	#[must_use]
	pub fn attribute(&self, key: &str) -> Option<&AttributeSlot> {
		self.attributes.get(key)
	}

	/// Mutable access to the slot of a declared field.
	pub fn attribute_mut(&mut self, key: &str) -> Result<&mut AttributeSlot, Error> {
		match self.attributes.get_mut(key) {
			Some(slot) => Ok(slot),
			None => Err(self.definition.undeclared(key)),
		}
	}

	/// The value of a declared field, see [`AttributeSlot::value`].
	pub fn get(&self, key: &str) -> Result<Value, Error> {
		self.attributes.get(key).map(AttributeSlot::value).ok_or_else(|| self.definition.undeclared(key))
	}

	/// Assign a declared field.
	pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), Error> {
		self.attribute_mut(key)?.set_value(value);
		Ok(())
	}

	/// Whether a declared field holds any value.
	#[must_use]
	pub fn contains(&self, key: &str) -> bool {
		self.attributes.get(key).is_some_and(|slot| !slot.is_empty())
	}

	/// All slots, keyed by field key.
	pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeSlot)> {
		self.attributes.iter().map(|(key, slot)| (key.as_str(), slot))
	}

	/// Values of every populated field keyed by protocol attribute name, as
	/// sent when adding the entry. Empty strings are left out.
	#[must_use]
	pub fn add_payload(&self) -> AttributeMap {
		self.attributes
			.values()
			.filter_map(|slot| {
				let values: Vec<String> =
					slot.iter().filter(|value| !value.is_empty()).cloned().collect();
				(!values.is_empty()).then(|| (slot.name().to_owned(), values))
			})
			.collect()
	}

	/// Pending changes keyed by protocol attribute name, as sent when
	/// modifying the entry.
	#[must_use]
	pub fn modify_payload(&self) -> ChangeMap {
		self.attributes
			.values()
			.filter_map(|slot| slot.changes_tuple().map(|change| (slot.name().to_owned(), change)))
			.collect()
	}

	/// Write the entry to the server.
	///
	/// New entries are added with all populated fields, loaded entries are
	/// modified with their pending changes. Returns whether the server
	/// accepted the operation; a loaded entry without changes is not sent and
	/// yields `false`. After a successful save the entry is clean and further
	/// saves modify it.
	pub fn save<C: DirectoryConnection>(&mut self, connection: &mut C) -> Result<bool, Error> {
		let dn = self.dn()?.to_owned();
		let saved = match self.change_type {
			ChangeType::Add => {
				connection.add(&dn, self.definition.object_classes(), &self.add_payload())?
			}
			ChangeType::Modify => {
				let changes = self.modify_payload();
				if changes.is_empty() {
					debug!(dn, "No changes to save");
					return Ok(false);
				}
				connection.modify(&dn, &changes)?
			}
		};

		if saved {
			self.change_type = ChangeType::Modify;
			for slot in self.attributes.values_mut() {
				slot.mark_clean();
			}
		}
		Ok(saved)
	}

	/// Delete the entry from the server. Returns whether the server accepted
	/// the operation.
	pub fn delete<C: DirectoryConnection>(&self, connection: &mut C) -> Result<bool, Error> {
		connection.delete(self.dn()?)
	}

	/// Load the entries whose DNs a dereferencing field holds, in value order.
	///
	/// DNs without an entry on the server are skipped. Fails if the field is
	/// undeclared or was not declared with
	/// [`AttributeSlot::with_dereference`].
	pub fn dereference<C: DirectoryConnection>(
		&self,
		key: &str,
		connection: &mut C,
	) -> Result<Vec<EntryInstance>, Error> {
		let slot = self.attributes.get(key).ok_or_else(|| self.definition.undeclared(key))?;
		let Some(target) = slot.dereference() else {
			return Err(Error::Invalid(format!("field `{key}` does not refer to other entries")));
		};

		let mut entries = Vec::with_capacity(slot.len());
		for dn in slot {
			match target.query(connection).get(dn)? {
				Some(entry) => entries.push(entry),
				None => debug!(dn = %dn, field = key, "Referenced entry does not exist"),
			}
		}
		Ok(entries)
	}

	/// Check whether the server accepts `password` for this entry.
	pub fn authenticate<F: Connector>(&self, connector: &F, password: &str) -> bool {
		match self.dn() {
			Ok(dn) => AuthenticationProbe::new(connector).verify(dn, password),
			Err(err) => {
				debug!("Cannot authenticate entry: {err}");
				false
			}
		}
	}

	/// All values keyed by field key.
	#[must_use]
	pub fn attributes_map(&self) -> BTreeMap<String, Vec<String>> {
		self.attributes.iter().map(|(key, slot)| (key.clone(), slot.values().to_vec())).collect()
	}

	/// The JSON projection `{"dn": ..., "attributes": {...}}`.
	pub fn to_json(&self, shape: ValueShape) -> Result<serde_json::Value, Error> {
		Ok(serde_json::to_value(self.json_entry(shape)?)?)
	}

	/// The JSON projection, pretty printed with sorted keys.
	pub fn to_json_string(&self, shape: ValueShape) -> Result<String, Error> {
		Ok(serde_json::to_string_pretty(&self.json_entry(shape)?)?)
	}

	/// Assemble the JSON projection.
	fn json_entry(&self, shape: ValueShape) -> Result<JsonEntry<'_>, Error> {
		let attributes = self
			.attributes
			.iter()
			.map(|(key, slot)| {
				let value = match shape {
					ValueShape::Sequences => Value::Multiple(slot.values().to_vec()),
					ValueShape::Collapsed => slot.value(),
				};
				(key.as_str(), value)
			})
			.collect();
		Ok(JsonEntry { dn: self.dn()?, attributes })
	}
}

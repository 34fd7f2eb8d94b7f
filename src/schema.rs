//! Static schemas describing one kind of directory entry.
//!
//! An [`EntryDefinition`] is declared once through [`EntryDefinitionBuilder`]
//! and shared behind an [`Arc`] afterwards. Definitions compose: a builder may
//! extend any number of parent definitions, whose fields and object classes
//! are flattened into the new definition.
use std::{
	collections::{BTreeMap, HashMap},
	sync::Arc,
};

use ldap3::Scope;

use crate::{
	attribute::{AttributeSlot, Value},
	connection::DirectoryConnection,
	entry::EntryInstance,
	error::Error,
	query::QueryBuilder,
};

/// Object class used when no definition in the chain declares one.
const DEFAULT_OBJECT_CLASS: &str = "top";

/// Attribute selector requesting all operational attributes.
const OPERATIONAL_ATTRIBUTES: &str = "+";

/// The schema of one kind of directory entry.
#[derive(Debug, Clone)]
pub struct EntryDefinition {
	/// Name used in error messages and logs
	name: String,
	/// Where entries of this kind live
	base_dn: String,
	/// Field keys forming the relative distinguished name
	rdn: Vec<String>,
	/// Object classes, deduplicated across the inheritance chain
	object_classes: Vec<String>,
	/// Slot templates keyed by field key
	fields: BTreeMap<String, AttributeSlot>,
	/// Whether searches descend into the whole subtree below `base_dn`
	sub_tree: bool,
	/// Whether searches request operational attributes as well
	operational_attributes: bool,
	/// Protocol view of the fields
	object_definition: ObjectDefinition,
}

/// The protocol-level view of a definition: which attributes to request and
/// how returned attribute names map back onto field keys.
#[derive(Debug, Clone, Default)]
pub struct ObjectDefinition {
	/// `(field key, attribute name)` pairs in field key order
	attributes: Vec<(String, String)>,
	/// Lower-cased attribute name to field key
	keys: HashMap<String, String>,
}

impl ObjectDefinition {
	/// Build the lookup tables for the given fields.
	fn new(fields: &BTreeMap<String, AttributeSlot>) -> Self {
		let attributes: Vec<_> =
			fields.iter().map(|(key, slot)| (key.clone(), slot.name().to_owned())).collect();
		let keys = attributes.iter().map(|(key, name)| (name.to_lowercase(), key.clone())).collect();
		Self { attributes, keys }
	}

	/// The protocol attribute names, in field key order.
	pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
		self.attributes.iter().map(|(_, name)| name.as_str())
	}

	/// The field key declared for a protocol attribute name. Attribute names
	/// compare case-insensitively.
	#[must_use]
	pub fn key_for(&self, attribute: &str) -> Option<&str> {
		self.keys.get(&attribute.to_lowercase()).map(String::as_str)
	}
}

impl EntryDefinition {
	/// Start declaring a new definition.
	#[must_use]
	pub fn builder(name: impl Into<String>) -> EntryDefinitionBuilder {
		EntryDefinitionBuilder::new(name)
	}

	/// The definition's name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The base DN entries of this kind live under.
	#[must_use]
	pub fn base_dn(&self) -> &str {
		&self.base_dn
	}

	/// Field keys forming the RDN, in order.
	#[must_use]
	pub fn rdn_components(&self) -> &[String] {
		&self.rdn
	}

	/// All object classes of the definition.
	#[must_use]
	pub fn object_classes(&self) -> &[String] {
		&self.object_classes
	}

	/// The slot templates keyed by field key.
	#[must_use]
	pub fn fields(&self) -> &BTreeMap<String, AttributeSlot> {
		&self.fields
	}

	/// The slot template of a single field.
	#[must_use]
	pub fn field(&self, key: &str) -> Option<&AttributeSlot> {
		self.fields.get(key)
	}

	/// Whether searches descend into the subtree.
	#[must_use]
	pub fn sub_tree(&self) -> bool {
		self.sub_tree
	}

	/// Whether searches include operational attributes.
	#[must_use]
	pub fn operational_attributes(&self) -> bool {
		self.operational_attributes
	}

	/// The protocol-level attribute definition.
	#[must_use]
	pub fn object_definition(&self) -> &ObjectDefinition {
		&self.object_definition
	}

	/// Search scope for queries against this definition.
	#[must_use]
	pub fn scope(&self) -> Scope {
		if self.sub_tree {
			Scope::Subtree
		} else {
			Scope::OneLevel
		}
	}

	/// Attribute selectors to send with a search.
	#[must_use]
	pub fn requested_attributes(&self) -> Vec<String> {
		let mut attributes: Vec<String> =
			self.object_definition.attribute_names().map(str::to_owned).collect();
		if self.operational_attributes {
			attributes.push(OPERATIONAL_ATTRIBUTES.to_owned());
		}
		attributes
	}

	/// The error for a field key this definition does not declare.
	pub(crate) fn undeclared(&self, field: &str) -> Error {
		Error::Schema { entry: self.name.clone(), field: field.to_owned() }
	}

	/// Fresh, independent copies of all slot templates.
	pub(crate) fn new_slots(&self) -> BTreeMap<String, AttributeSlot> {
		self.fields.clone()
	}

	/// Create a new entry, to be added on [`EntryInstance::save`].
	pub fn create<K, V, I>(self: &Arc<Self>, fields: I) -> Result<EntryInstance, Error>
	where
		K: AsRef<str>,
		V: Into<Value>,
		I: IntoIterator<Item = (K, V)>,
	{
		EntryInstance::new(Arc::clone(self), fields)
	}

	/// Start a query for entries of this kind on the given connection.
	pub fn query<'c, C: DirectoryConnection>(
		self: &Arc<Self>,
		connection: &'c mut C,
	) -> QueryBuilder<'c, C> {
		QueryBuilder::new(Arc::clone(self), connection)
	}
}

/// Declares an [`EntryDefinition`].
#[derive(Debug, Clone)]
pub struct EntryDefinitionBuilder {
	/// Name of the definition
	name: String,
	/// Own base DN, inherited when unset
	base_dn: Option<String>,
	/// Own RDN components, inherited when unset
	rdn: Option<Vec<String>>,
	/// Own object classes
	object_classes: Vec<String>,
	/// Own field declarations, in declaration order
	fields: Vec<(String, AttributeSlot)>,
	/// Parent definitions, most specific first
	parents: Vec<Arc<EntryDefinition>>,
	/// Own subtree flag, inherited when unset
	sub_tree: Option<bool>,
	/// Own operational attribute flag, inherited when unset
	operational_attributes: Option<bool>,
}

impl EntryDefinitionBuilder {
	/// An empty declaration.
	fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			base_dn: None,
			rdn: None,
			object_classes: Vec::new(),
			fields: Vec::new(),
			parents: Vec::new(),
			sub_tree: None,
			operational_attributes: None,
		}
	}

	/// Set the base DN.
	#[must_use]
	pub fn base_dn(mut self, base_dn: impl Into<String>) -> Self {
		self.base_dn = Some(base_dn.into());
		self
	}

	/// Set the field keys forming the RDN.
	#[must_use]
	pub fn rdn<I, S>(mut self, components: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.rdn = Some(components.into_iter().map(Into::into).collect());
		self
	}

	/// Add object classes.
	#[must_use]
	pub fn object_classes<I, S>(mut self, classes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.object_classes.extend(classes.into_iter().map(Into::into));
		self
	}

	/// Declare a field. A later declaration of the same key replaces the
	/// earlier one.
	#[must_use]
	pub fn field(mut self, key: impl Into<String>, mut slot: AttributeSlot) -> Self {
		slot.reset();
		self.fields.push((key.into(), slot));
		self
	}

	/// Inherit from a parent definition. Parents added earlier take
	/// precedence over parents added later, own declarations over all of them.
	#[must_use]
	pub fn extends(mut self, parent: &Arc<EntryDefinition>) -> Self {
		self.parents.push(Arc::clone(parent));
		self
	}

	/// Whether searches descend into the subtree (the default) or only look
	/// at direct children of the base DN.
	#[must_use]
	pub fn sub_tree(mut self, sub_tree: bool) -> Self {
		self.sub_tree = Some(sub_tree);
		self
	}

	/// Whether searches request operational attributes.
	#[must_use]
	pub fn operational_attributes(mut self, operational: bool) -> Self {
		self.operational_attributes = Some(operational);
		self
	}

	/// Flatten the declaration and its parents into a definition.
	///
	/// Fails if an RDN component names an undeclared field.
	pub fn build(self) -> Result<Arc<EntryDefinition>, Error> {
		let fields = merge_fields(&self.parents, self.fields);
		let object_classes = merge_object_classes(&self.parents, self.object_classes);

		let base_dn = self
			.base_dn
			.or_else(|| {
				inherited(&self.parents, |parent| {
					(!parent.base_dn.is_empty()).then(|| parent.base_dn.clone())
				})
			})
			.unwrap_or_default();
		let rdn = self
			.rdn
			.or_else(|| {
				inherited(&self.parents, |parent| (!parent.rdn.is_empty()).then(|| parent.rdn.clone()))
			})
			.unwrap_or_default();
		let sub_tree = self
			.sub_tree
			.or_else(|| inherited(&self.parents, |parent| Some(parent.sub_tree)))
			.unwrap_or(true);
		let operational_attributes = self
			.operational_attributes
			.or_else(|| inherited(&self.parents, |parent| Some(parent.operational_attributes)))
			.unwrap_or(false);

		if let Some(missing) = rdn.iter().find(|key| !fields.contains_key(key.as_str())) {
			return Err(Error::Schema { entry: self.name, field: missing.clone() });
		}

		let object_definition = ObjectDefinition::new(&fields);
		Ok(Arc::new(EntryDefinition {
			name: self.name,
			base_dn,
			rdn,
			object_classes,
			fields,
			sub_tree,
			operational_attributes,
			object_definition,
		}))
	}
}

/// The first value a parent provides, most specific parent first.
fn inherited<T>(
	parents: &[Arc<EntryDefinition>],
	get: impl Fn(&EntryDefinition) -> Option<T>,
) -> Option<T> {
	parents.iter().find_map(|parent| get(parent))
}

/// Union of all parent fields and the own declarations. On key collisions the
/// most specific declaration wins.
fn merge_fields(
	parents: &[Arc<EntryDefinition>],
	own: Vec<(String, AttributeSlot)>,
) -> BTreeMap<String, AttributeSlot> {
	let mut fields = BTreeMap::new();
	for parent in parents.iter().rev() {
		fields.extend(parent.fields.iter().map(|(key, slot)| (key.clone(), slot.clone())));
	}
	fields.extend(own);
	fields
}

/// Union of all object classes, ancestors first, without duplicates.
fn merge_object_classes(parents: &[Arc<EntryDefinition>], own: Vec<String>) -> Vec<String> {
	let mut classes: Vec<String> = Vec::new();
	let candidates = parents.iter().flat_map(|parent| parent.object_classes.iter().cloned());
	for class in candidates.chain(own) {
		if !classes.iter().any(|known| known.eq_ignore_ascii_case(&class)) {
			classes.push(class);
		}
	}
	if classes.is_empty() {
		classes.push(DEFAULT_OBJECT_CLASS.to_owned());
	}
	classes
}

//! Named, multi-valued attribute slots with per-attribute change tracking.
//!
//! A slot starts out empty and clean. Every assignment compares the new values
//! against what the slot currently holds and records the LDAP modify operation
//! that would bring the server in line with it:
//!
//! | before    | after     | change                                   |
//! |-----------|-----------|------------------------------------------|
//! | empty     | non-empty | [`ChangeKind::Add`]                      |
//! | non-empty | non-empty | [`ChangeKind::Replace`]                  |
//! | non-empty | empty     | [`ChangeKind::Delete`]                   |
//! | any       | same      | unchanged                                |
//!
//! Two transitions are adjusted so the recorded operation always matches what
//! the server still holds: emptying a slot whose only pending change is an
//! add drops the change entirely, and refilling a slot with a pending delete
//! becomes a replace.
//!
//! An empty string counts as no value at all. Values filled in from a slot's
//! default were never returned by the server, so assigning over them is an
//! add and clearing them sends nothing.
use std::sync::Arc;

use serde::Serialize;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::{error::Error, schema::EntryDefinition};

/// Configuration for which variant of ISO8601 to use for parsing and
/// serializing time. Configured according the syntax definition
/// `( 1.3.6.1.4.1.1466.115.121.1.24 DESC 'Generalized Time' )` described in
/// RFC4517 section 3.1.13
pub const TIME_FORMAT: &[time::format_description::FormatItem] =
	time::macros::format_description!("[year][month][day][hour][minute][second]Z");

/// The three ways an LDAP modify request can change an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
	/// Add values to an attribute that holds none
	Add,
	/// Replace all values of the attribute
	Replace,
	/// Remove the attribute with all its values
	Delete,
}

/// Checks whether a value may be used in a filter.
pub type Validator = fn(&str) -> bool;

/// Rewrites a value on its way to or from the directory server.
pub type Transform = fn(&str) -> String;

/// One or more attribute values.
///
/// Used both as input for assignments, where a scalar is shorthand for a one
/// element sequence, and as the output of [`AttributeSlot::value`], which
/// collapses exactly one value into [`Value::Single`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
	/// Exactly one value
	Single(String),
	/// Any number of values, including none
	Multiple(Vec<String>),
}

impl Value {
	/// Flatten into the underlying sequence of values.
	#[must_use]
	pub fn into_vec(self) -> Vec<String> {
		match self {
			Value::Single(value) => vec![value],
			Value::Multiple(values) => values,
		}
	}

	/// A Generalized Time value for the given point in time.
	pub fn time(time: OffsetDateTime) -> Result<Self, Error> {
		let formatted = time
			.to_offset(UtcOffset::UTC)
			.format(&TIME_FORMAT)
			.map_err(|err| Error::Invalid(err.to_string()))?;
		Ok(Value::Single(formatted))
	}

	/// Collapse a sequence the same way [`AttributeSlot::value`] does.
	fn collapse(values: &[String]) -> Self {
		match values {
			[single] => Value::Single(single.clone()),
			_ => Value::Multiple(values.to_vec()),
		}
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Single(value.to_owned())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::Single(value)
	}
}

impl From<&String> for Value {
	fn from(value: &String) -> Self {
		Value::Single(value.clone())
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Single(if value { "TRUE" } else { "FALSE" }.to_owned())
	}
}

/// Numbers are stored in their decimal representation.
macro_rules! value_from_number {
	($($number:ty),*) => {
		$(impl From<$number> for Value {
			fn from(value: $number) -> Self {
				Value::Single(value.to_string())
			}
		})*
	};
}

value_from_number!(i32, i64, u32, u64, usize);

impl From<Vec<String>> for Value {
	fn from(values: Vec<String>) -> Self {
		Value::Multiple(values)
	}
}

impl From<Vec<&str>> for Value {
	fn from(values: Vec<&str>) -> Self {
		Value::Multiple(values.into_iter().map(str::to_owned).collect())
	}
}

impl From<&[&str]> for Value {
	fn from(values: &[&str]) -> Self {
		Value::Multiple(values.iter().map(|value| (*value).to_owned()).collect())
	}
}

impl<const N: usize> From<[&str; N]> for Value {
	fn from(values: [&str; N]) -> Self {
		Value::Multiple(values.iter().map(|value| (*value).to_owned()).collect())
	}
}

/// A single named attribute of a directory entry.
///
/// Only the values are mutable once a slot exists. The protocol name, hooks
/// and defaults are fixed when the slot is declared.
#[derive(Debug, Clone)]
pub struct AttributeSlot {
	/// The protocol attribute name, e.g. `mail`
	name: String,
	/// Current values in the order they were assigned or returned
	values: Vec<String>,
	/// Pending change relative to the directory server
	change: Option<ChangeKind>,
	/// Hook checking filter values
	validate: Option<Validator>,
	/// Hook rewriting filter values before a search
	pre_query: Option<Transform>,
	/// Hook rewriting values returned by a search
	post_query: Option<Transform>,
	/// Values used when a search result lacks the attribute
	default: Vec<String>,
	/// Whether `values` were filled in from `default` rather than loaded
	from_default: bool,
	/// Definition of the entries this DN-valued attribute refers to
	dereference: Option<Arc<EntryDefinition>>,
}

impl AttributeSlot {
	/// Declare an empty slot for the given protocol attribute name.
	#[must_use]
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			values: Vec::new(),
			change: None,
			validate: None,
			pre_query: None,
			post_query: None,
			default: Vec::new(),
			from_default: false,
			dereference: None,
		}
	}

	/// Reject filter values for which `validate` returns false.
	#[must_use]
	pub fn with_validator(mut self, validate: Validator) -> Self {
		self.validate = Some(validate);
		self
	}

	/// Rewrite filter values before they are sent to the server.
	#[must_use]
	pub fn with_pre_query(mut self, transform: Transform) -> Self {
		self.pre_query = Some(transform);
		self
	}

	/// Rewrite values returned by the server before they are stored.
	#[must_use]
	pub fn with_post_query(mut self, transform: Transform) -> Self {
		self.post_query = Some(transform);
		self
	}

	/// Values to fill in when a loaded entry does not carry this attribute.
	#[must_use]
	pub fn with_default(mut self, default: impl Into<Value>) -> Self {
		self.default = default.into().into_vec();
		self
	}

	/// Mark the values as DNs of entries of the given kind, see
	/// [`EntryInstance::dereference`](crate::EntryInstance::dereference).
	#[must_use]
	pub fn with_dereference(mut self, definition: &Arc<EntryDefinition>) -> Self {
		self.dereference = Some(Arc::clone(definition));
		self
	}

	/// The definition of the entries referenced by this attribute's values.
	#[must_use]
	pub fn dereference(&self) -> Option<&Arc<EntryDefinition>> {
		self.dereference.as_ref()
	}

	/// Whether the current values are the default, filled in because the
	/// server returned none.
	#[must_use]
	pub fn is_default(&self) -> bool {
		self.from_default
	}

	/// The protocol attribute name.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// All current values.
	#[must_use]
	pub fn values(&self) -> &[String] {
		&self.values
	}

	/// The values used when a loaded entry lacks this attribute.
	#[must_use]
	pub fn default_values(&self) -> &[String] {
		&self.default
	}

	/// The pending change, if any.
	#[must_use]
	pub fn change_kind(&self) -> Option<ChangeKind> {
		self.change
	}

	/// The single value if exactly one is present, otherwise all of them
	/// (an empty slot yields an empty [`Value::Multiple`]).
	#[must_use]
	pub fn value(&self) -> Value {
		Value::collapse(&self.values)
	}

	/// The number of values held.
	#[must_use]
	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// Whether the slot holds no values.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	/// Whether `value` is among the held values.
	#[must_use]
	pub fn contains(&self, value: &str) -> bool {
		self.values.iter().any(|held| held == value)
	}

	/// Iterate over the held values.
	pub fn iter(&self) -> std::slice::Iter<'_, String> {
		self.values.iter()
	}

	/// Assign new values, recording the resulting change.
	pub fn set_value(&mut self, value: impl Into<Value>) {
		let values = match value.into() {
			Value::Single(value) if value.is_empty() => Vec::new(),
			value => value.into_vec(),
		};
		if self.from_default {
			self.from_default = false;
			self.change = (!values.is_empty()).then_some(ChangeKind::Add);
			self.values = values;
			return;
		}
		if values == self.values {
			return;
		}

		self.change = match (self.values.is_empty(), values.is_empty()) {
			(true, _) if self.change == Some(ChangeKind::Delete) => Some(ChangeKind::Replace),
			(true, _) => Some(ChangeKind::Add),
			(false, true) if self.change == Some(ChangeKind::Add) => None,
			(false, true) => Some(ChangeKind::Delete),
			(false, false) => Some(ChangeKind::Replace),
		};
		self.values = values;
	}

	/// Add one more value.
	///
	/// Appending to a populated slot is tracked as a replace of the whole
	/// sequence.
	pub fn append(&mut self, value: impl Into<String>) {
		self.change = if self.from_default || (self.values.is_empty() && self.change.is_none()) {
			Some(ChangeKind::Add)
		} else {
			Some(ChangeKind::Replace)
		};
		self.from_default = false;
		self.values.push(value.into());
	}

	/// Remove all values.
	pub fn delete(&mut self) {
		self.set_value(Vec::<String>::new());
	}

	/// The pending change together with the UTF-8 encoded values, for use in
	/// a modify request. `None` when nothing changed.
	#[must_use]
	pub fn changes_tuple(&self) -> Option<(ChangeKind, Vec<Vec<u8>>)> {
		let kind = self.change?;
		Some((kind, self.values.iter().map(|value| value.as_bytes().to_vec()).collect()))
	}

	/// Forget any pending change, the current values reflect the server.
	pub(crate) fn mark_clean(&mut self) {
		if self.change.take().is_some() {
			self.from_default = false;
		}
	}

	/// Drop all values and pending changes, keeping name and hooks.
	pub(crate) fn reset(&mut self) {
		self.values.clear();
		self.change = None;
		self.from_default = false;
	}

	/// Populate the slot from server data, leaving it clean.
	pub(crate) fn load(&mut self, values: &[String]) {
		self.values = match self.post_query {
			Some(transform) => values.iter().map(|value| transform(value)).collect(),
			None => values.to_vec(),
		};
		self.change = None;
		self.from_default = false;
	}

	/// Fall back to the default values if the server returned none.
	pub(crate) fn fill_default(&mut self) {
		if self.values.is_empty() && !self.default.is_empty() {
			self.values.clone_from(&self.default);
			self.from_default = true;
		}
		self.change = None;
	}

	/// Check a filter value and apply the pre-query hook to it.
	pub(crate) fn prepare_query_value(&self, value: &str) -> Result<String, Error> {
		if let Some(validate) = self.validate {
			if !validate(value) {
				return Err(Error::Filter(format!(
					"value `{value}` rejected for attribute `{}`",
					self.name
				)));
			}
		}
		Ok(match self.pre_query {
			Some(transform) => transform(value),
			None => value.to_owned(),
		})
	}

	/// Get the first value, interpreted as a boolean.
	#[must_use]
	pub fn as_bool(&self) -> Option<Result<bool, Error>> {
		match self.values.first().map(String::as_str) {
			Some("TRUE") => Some(Ok(true)),
			Some("FALSE") => Some(Ok(false)),
			Some(_) => Some(Err(Error::Invalid(self.name.clone()))),
			None => None,
		}
	}

	/// Get the first value, interpreted as Generalized Time.
	#[must_use]
	pub fn as_time(&self) -> Option<Result<OffsetDateTime, Error>> {
		let value = self.values.first()?;
		Some(
			PrimitiveDateTime::parse(value, &TIME_FORMAT)
				.map(PrimitiveDateTime::assume_utc)
				.map_err(Error::from),
		)
	}
}

impl<'a> IntoIterator for &'a AttributeSlot {
	type Item = &'a String;
	type IntoIter = std::slice::Iter<'a, String>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

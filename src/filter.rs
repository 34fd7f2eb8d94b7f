//! Translation of simplified filters into RFC 4515 search filters.
//!
//! A simplified filter is a comma separated list of components of the form
//! `[!]key: [op]value[;value...]`:
//! * `key` is a field key of the entry definition, translated to its protocol
//!   attribute name
//! * `op` is one of `=`, `>=`, `<=` or `~=` and defaults to `=`
//! * several `;` separated values match if any of them does
//! * a leading `!` negates the component
//! * `*` in a value is a wildcard, every other filter metacharacter is
//!   escaped; `\,` and `\;` stand for a literal comma and semicolon
//!
//! A clause starting with `(` is taken to be a complete RFC 4515 filter and
//! passed through untouched. All components are combined with either AND or
//! OR, and the definition's object classes are always required.
use ldap3::ldap_escape;

use crate::{dn::split_unescaped, error::Error, schema::EntryDefinition};

/// Comparison operators understood in simplified filters, longest first.
const OPERATORS: [&str; 4] = [">=", "<=", "~=", "="];

/// Build the complete search filter for a definition from simplified clauses.
///
/// The `required` filters are AND-ed with the result regardless of
/// `components_in_and`.
pub(crate) fn compose(
	definition: &EntryDefinition,
	clauses: &[String],
	components_in_and: bool,
	required: &[String],
) -> Result<String, Error> {
	let mut components = Vec::new();
	for clause in clauses {
		let clause = clause.trim();
		if clause.starts_with('(') {
			components.push(clause.to_owned());
			continue;
		}
		for component in split_unescaped(clause, &[',']) {
			let component = component.trim();
			if !component.is_empty() {
				components.push(translate_component(definition, component)?);
			}
		}
	}

	let mut parts: Vec<String> = definition
		.object_classes()
		.iter()
		.map(|class| assertion("objectClass", "=", class))
		.collect();
	parts.extend_from_slice(required);
	match components.as_slice() {
		[] => {}
		[single] => parts.push(single.clone()),
		_ => {
			let operator = if components_in_and { '&' } else { '|' };
			parts.push(format!("({operator}{})", components.concat()));
		}
	}

	Ok(match parts.as_slice() {
		[single] => single.clone(),
		_ => format!("(&{})", parts.concat()),
	})
}

/// An equality assertion for an exact value.
pub(crate) fn assertion(attribute: &str, operator: &str, value: &str) -> String {
	format!("({attribute}{operator}{})", ldap_escape(value))
}

/// Translate a single `[!]key: [op]value[;value...]` component.
fn translate_component(definition: &EntryDefinition, component: &str) -> Result<String, Error> {
	let (negated, body) = match component.strip_prefix('!') {
		Some(body) => (true, body.trim_start()),
		None => (false, component),
	};
	let (key, rest) = body
		.split_once(':')
		.ok_or_else(|| Error::Filter(format!("missing `:` in `{component}`")))?;
	let key = key.trim();
	let slot = definition.field(key).ok_or_else(|| definition.undeclared(key))?;

	let rest = rest.trim_start();
	let (operator, values) = OPERATORS
		.iter()
		.find_map(|operator| rest.strip_prefix(operator).map(|values| (*operator, values)))
		.unwrap_or(("=", rest));

	let mut assertions = Vec::new();
	for value in split_unescaped(values, &[';']) {
		let value = value.trim().replace("\\,", ",").replace("\\;", ";");
		if value.is_empty() {
			return Err(Error::Filter(format!("empty value in `{component}`")));
		}
		let value = slot.prepare_query_value(&value)?;
		assertions.push(format!("({}{operator}{})", slot.name(), escape_keeping_wildcards(&value)));
	}

	let filter = match assertions.as_slice() {
		[single] => single.clone(),
		_ => format!("(|{})", assertions.concat()),
	};
	Ok(if negated { format!("(!{filter})") } else { filter })
}

/// Escape a value for a filter, leaving `*` wildcards in place.
fn escape_keeping_wildcards(value: &str) -> String {
	value.split('*').map(|part| ldap_escape(part).into_owned()).collect::<Vec<_>>().join("*")
}

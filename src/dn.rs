//! Distinguished name handling following RFC 4514.
//!
//! Only as much of the grammar as the mapping layer needs: validating that a
//! string is a DN, splitting off the leading RDN and assembling RDNs from
//! attribute values.
use ldap3::dn_escape;

use crate::error::Error;

/// One `attribute=value` assertion of an RDN, with the value unescaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ava {
	/// Attribute type, a descriptor or a numeric OID
	pub attribute: String,
	/// Unescaped attribute value
	pub value: String,
}

/// A relative distinguished name, one or more assertions joined by `+`.
pub type Rdn = Vec<Ava>;

/// Parse a DN into its RDNs, leading RDN first. The empty string is the valid
/// DN of the root entry.
pub fn parse_dn(dn: &str) -> Result<Vec<Rdn>, Error> {
	if dn.trim().is_empty() {
		return Ok(Vec::new());
	}
	split_unescaped(dn, &[',', ';']).into_iter().map(parse_rdn).collect()
}

/// Whether `dn` is a syntactically valid DN.
#[must_use]
pub fn is_valid_dn(dn: &str) -> bool {
	parse_dn(dn).is_ok()
}

/// Split a DN into its leading RDN and the remaining parent DN.
pub fn split_leading_rdn(dn: &str) -> Result<(Rdn, &str), Error> {
	let (leading, rest) = match find_unescaped(dn, &[',', ';']) {
		Some(index) => (&dn[..index], dn[index + 1..].trim()),
		None => (dn, ""),
	};
	let rdn = parse_rdn(leading)?;
	parse_dn(rest)?;
	Ok((rdn, rest))
}

/// Assemble a DN from RDN assertions and a base DN, escaping the values.
#[must_use]
pub fn build_dn(rdn: &[(&str, &str)], base_dn: &str) -> String {
	let rdn = rdn
		.iter()
		.map(|(attribute, value)| format!("{}={}", attribute.trim(), dn_escape(*value)))
		.collect::<Vec<_>>()
		.join("+");
	let base_dn = base_dn.trim();
	if base_dn.is_empty() {
		rdn
	} else {
		format!("{rdn},{base_dn}")
	}
}

/// Parse a single RDN.
fn parse_rdn(rdn: &str) -> Result<Rdn, Error> {
	split_unescaped(rdn, &['+']).into_iter().map(parse_ava).collect()
}

/// Parse a single `attribute=value` assertion.
fn parse_ava(ava: &str) -> Result<Ava, Error> {
	let (attribute, value) =
		ava.split_once('=').ok_or_else(|| Error::Dn(format!("missing `=` in `{ava}`")))?;
	let attribute = attribute.trim();
	if !is_attribute_type(attribute) {
		return Err(Error::Dn(format!("invalid attribute type `{attribute}`")));
	}
	Ok(Ava { attribute: attribute.to_owned(), value: unescape_value(value.trim_start())? })
}

/// A descriptor (`cn`, `x-attr`) or a numeric OID (`2.5.4.3`).
fn is_attribute_type(attribute: &str) -> bool {
	let mut chars = attribute.chars();
	match chars.next() {
		Some(first) if first.is_ascii_alphabetic() => {
			chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
		}
		Some(first) if first.is_ascii_digit() => attribute
			.split('.')
			.all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())),
		_ => false,
	}
}

/// Resolve backslash escapes in a value, both `\,` and `\2C` style.
fn unescape_value(value: &str) -> Result<String, Error> {
	let mut bytes = Vec::with_capacity(value.len());
	let mut trailing_escaped = 0;
	let raw = value.as_bytes();
	let mut index = 0;
	while index < raw.len() {
		match raw[index] {
			b'\\' => {
				let hex = raw.get(index + 1..index + 3).and_then(|pair| {
					std::str::from_utf8(pair).ok().and_then(|pair| u8::from_str_radix(pair, 16).ok())
				});
				if let Some(byte) = hex {
					bytes.push(byte);
					index += 3;
				} else if let Some(&escaped) = raw.get(index + 1) {
					bytes.push(escaped);
					index += 2;
				} else {
					return Err(Error::Dn(format!("dangling escape in `{value}`")));
				}
				trailing_escaped = bytes.len();
			}
			b'"' | b'<' | b'>' => {
				return Err(Error::Dn(format!("unescaped special character in `{value}`")));
			}
			byte => {
				bytes.push(byte);
				index += 1;
			}
		}
	}

	// Unescaped trailing spaces are insignificant
	while bytes.len() > trailing_escaped && bytes.last() == Some(&b' ') {
		bytes.pop();
	}
	String::from_utf8(bytes).map_err(|_| Error::Dn(format!("value `{value}` is not UTF-8")))
}

/// Byte offset of the first separator not preceded by a backslash escape.
fn find_unescaped(input: &str, separators: &[char]) -> Option<usize> {
	let mut escaped = false;
	for (index, c) in input.char_indices() {
		if escaped {
			escaped = false;
		} else if c == '\\' {
			escaped = true;
		} else if separators.contains(&c) {
			return Some(index);
		}
	}
	None
}

/// Split at every unescaped separator.
pub(crate) fn split_unescaped<'a>(mut input: &'a str, separators: &[char]) -> Vec<&'a str> {
	let mut parts = Vec::new();
	while let Some(index) = find_unescaped(input, separators) {
		parts.push(&input[..index]);
		input = &input[index + 1..];
	}
	parts.push(input);
	parts
}

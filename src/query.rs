//! Fluent searches for entries of one definition.
use std::sync::Arc;

use ldap3::Scope;
use tracing::debug;

use crate::{
	connection::DirectoryConnection,
	dn::split_leading_rdn,
	entry::EntryInstance,
	error::Error,
	filter,
	schema::EntryDefinition,
};

/// A search under construction.
///
/// Clauses use the simplified filter language described in [`crate::filter`]
/// and are only combined when the query runs. Running the query consumes the
/// builder. Results keep the order the server returned them in.
#[derive(Debug)]
pub struct QueryBuilder<'c, C> {
	/// The definition to search for and materialize
	definition: Arc<EntryDefinition>,
	/// The connection the search runs on
	connection: &'c mut C,
	/// Accumulated simplified filter clauses
	clauses: Vec<String>,
	/// Search base
	base_dn: String,
	/// Search scope
	scope: Scope,
	/// Whether components are AND-ed (the default) or OR-ed
	components_in_and: bool,
	/// Assertions every result must satisfy, independent of the clauses
	required: Vec<String>,
}

impl<'c, C: DirectoryConnection> QueryBuilder<'c, C> {
	/// A query over the definition's base DN and scope.
	pub(crate) fn new(definition: Arc<EntryDefinition>, connection: &'c mut C) -> Self {
		let base_dn = definition.base_dn().to_owned();
		let scope = definition.scope();
		Self {
			definition,
			connection,
			clauses: Vec::new(),
			base_dn,
			scope,
			components_in_and: true,
			required: Vec::new(),
		}
	}

	/// Add a simplified filter clause, e.g. `"email: fry@planetexpress.com"`.
	#[must_use]
	pub fn filter(mut self, clause: impl Into<String>) -> Self {
		self.clauses.push(clause.into());
		self
	}

	/// Add several simplified filter clauses.
	#[must_use]
	pub fn filters<I, S>(mut self, clauses: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.clauses.extend(clauses.into_iter().map(Into::into));
		self
	}

	/// Combine components with AND (`true`) or OR (`false`).
	#[must_use]
	pub fn components_in_and(mut self, components_in_and: bool) -> Self {
		self.components_in_and = components_in_and;
		self
	}

	/// The RFC 4515 filter the query would run with.
	pub fn search_filter(&self) -> Result<String, Error> {
		filter::compose(&self.definition, &self.clauses, self.components_in_and, &self.required)
	}

	/// Fetch the entry with exactly this DN, `None` if there is none.
	pub fn get(mut self, dn: &str) -> Result<Option<EntryInstance>, Error> {
		let (rdn, _) = split_leading_rdn(dn)?;
		let assertions: String =
			rdn.iter().map(|ava| filter::assertion(&ava.attribute, "=", &ava.value)).collect();
		self.required.push(if rdn.len() == 1 { assertions } else { format!("(&{assertions})") });
		dn.clone_into(&mut self.base_dn);
		self.scope = Scope::Base;
		self.first()
	}

	/// The first matching entry, `None` if nothing matches.
	pub fn first(self) -> Result<Option<EntryInstance>, Error> {
		Ok(self.execute()?.into_iter().next())
	}

	/// All matching entries.
	pub fn all(mut self, components_in_and: bool) -> Result<Vec<EntryInstance>, Error> {
		self.components_in_and = components_in_and;
		self.execute()
	}

	/// Iterate over all matching entries.
	pub fn entries(self) -> Result<std::vec::IntoIter<EntryInstance>, Error> {
		Ok(self.execute()?.into_iter())
	}

	/// Run the search and materialize every returned row.
	fn execute(self) -> Result<Vec<EntryInstance>, Error> {
		let filter = self.search_filter()?;
		let attributes = self.definition.requested_attributes();
		debug!(entry = self.definition.name(), base = %self.base_dn, %filter, "Running query");

		let rows = self.connection.search(&self.base_dn, &filter, self.scope, &attributes)?;
		Ok(rows
			.into_iter()
			.map(|row| EntryInstance::from_row(Arc::clone(&self.definition), row))
			.collect())
	}
}

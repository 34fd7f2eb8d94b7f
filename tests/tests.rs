#![allow(
	clippy::dbg_macro,
	clippy::expect_used,
	clippy::missing_docs_in_private_items,
	clippy::print_stderr,
	clippy::print_stdout,
	clippy::unwrap_used,
	clippy::bool_assert_comparison
)]
use std::sync::Arc;

use ldap3::Scope;
use ldap_mapper::{
	AttributeSlot, AuthOptions, AuthenticationProbe, ChangeKind, ChangeType, Config, Directory,
	DirectoryConnection, EntryDefinition, Value,
};
use serial_test::serial;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use url::Url;

mod common;

use common::{
	ldap_add_organizational_unit, ldap_connect, ldap_delete_organizational_unit,
	ldap_delete_user, MockServer,
};

const PEOPLE: &str = "ou=people,dc=planetexpress,dc=com";
const FRY: &str = "cn=Philip J. Fry,ou=people,dc=planetexpress,dc=com";
const LEELA: &str = "cn=Turanga Leela,ou=people,dc=planetexpress,dc=com";

fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::builder().with_default_directive(LevelFilter::DEBUG.into()).from_env_lossy(),
		)
		.with_test_writer()
		.try_init();
}

fn user() -> Arc<EntryDefinition> {
	EntryDefinition::builder("User")
		.base_dn(PEOPLE)
		.object_classes(["inetOrgPerson"])
		.rdn(["name"])
		.field("name", AttributeSlot::new("cn"))
		.field("surname", AttributeSlot::new("sn"))
		.field("email", AttributeSlot::new("mail"))
		.field("title", AttributeSlot::new("title"))
		.build()
		.unwrap()
}

fn crew() -> MockServer {
	let server = MockServer::default();
	server.add_entry(
		FRY,
		&[("cn", &["Philip J. Fry"]), ("sn", &["Fry"]), ("mail", &["fry@planetexpress.com"])],
	);
	server.add_entry(
		LEELA,
		&[("cn", &["Turanga Leela"]), ("sn", &["Turanga"]), ("title", &["Captain"])],
	);
	server.add_entry(
		"cn=Bender,ou=robots,dc=planetexpress,dc=com",
		&[("cn", &["Bender"]), ("sn", &["Rodriguez"])],
	);
	server.set_password(FRY, "slurm");
	server
}

#[test]
fn test_query_first() {
	init_tracing();
	let server = crew();
	let mut session = server.session();

	let fry = user()
		.query(&mut session)
		.filter("email: fry@planetexpress.com")
		.first()
		.unwrap()
		.expect("Fry should be found");

	assert_eq!(fry.dn().unwrap(), FRY);
	assert_eq!(fry.get("surname").unwrap(), Value::Single("Fry".to_owned()));
	assert_eq!(fry.change_type(), ChangeType::Modify);
	assert!(fry.attributes().all(|(_, slot)| slot.change_kind().is_none()));

	let state = server.state();
	let search = state.searches.last().unwrap();
	assert_eq!(search.base, PEOPLE);
	assert!(matches!(search.scope, Scope::Subtree));
	assert_eq!(search.filter, "(&(objectClass=inetOrgPerson)(mail=fry@planetexpress.com))");
	assert_eq!(search.attributes, ["mail", "cn", "sn", "title"]);
}

#[test]
fn test_query_first_without_match() {
	let server = MockServer::default();
	let mut session = server.session();

	let found = user().query(&mut session).filter("name: Zoidberg").first().unwrap();
	assert!(found.is_none());
}

#[test]
fn test_query_all_keeps_server_order() {
	let server = crew();
	let mut session = server.session();

	let everyone =
		user().query(&mut session).filter("name: Philip*").filter("title: Captain").all(false).unwrap();

	let dns: Vec<_> = everyone.iter().map(|entry| entry.dn().unwrap().to_owned()).collect();
	assert_eq!(dns, [FRY, LEELA]);
	assert_eq!(
		server.state().searches[0].filter,
		"(&(objectClass=inetOrgPerson)(|(cn=Philip*)(title=Captain)))"
	);

	let names: Vec<_> = user()
		.query(&mut session)
		.entries()
		.unwrap()
		.map(|entry| entry.get("name").unwrap())
		.collect();
	assert_eq!(names, [Value::from("Philip J. Fry"), Value::from("Turanga Leela")]);
}

#[test]
fn test_query_get() {
	let server = crew();
	let mut session = server.session();

	let leela = user().query(&mut session).get(LEELA).unwrap().expect("Leela should exist");
	assert_eq!(leela.dn().unwrap(), LEELA);
	assert_eq!(leela.get("title").unwrap(), Value::from("Captain"));
	{
		let state = server.state();
		let search = state.searches.last().unwrap();
		assert_eq!(search.base, LEELA);
		assert!(matches!(search.scope, Scope::Base));
		assert_eq!(search.filter, "(&(objectClass=inetOrgPerson)(cn=Turanga Leela))");
	}

	let missing = user()
		.query(&mut session)
		.get("cn=Zoidberg,ou=people,dc=planetexpress,dc=com")
		.unwrap();
	assert!(missing.is_none());

	assert!(user().query(&mut session).get("not a dn").is_err());
}

#[test]
fn test_query_get_requires_the_rdn() {
	let server = crew();
	let mut session = server.session();

	let leela = user()
		.query(&mut session)
		.components_in_and(false)
		.filter("name: Philip*")
		.filter("title: Captain")
		.get(LEELA)
		.unwrap();
	assert!(leela.is_some());
	assert_eq!(
		server.state().searches[0].filter,
		"(&(objectClass=inetOrgPerson)(cn=Turanga Leela)(|(cn=Philip*)(title=Captain)))"
	);
}

#[test]
fn test_query_errors_propagate() {
	let server = crew();
	server.fail_searches();
	let mut session = server.session();

	assert!(user().query(&mut session).first().is_err());
	assert!(user().query(&mut session).filter("phone: 555").all(true).is_err());
}

#[test]
fn test_save_untouched_entry_sends_nothing() {
	let server = crew();
	let mut session = server.session();

	let mut fry = user().query(&mut session).get(FRY).unwrap().unwrap();
	assert_eq!(fry.save(&mut session).unwrap(), false);
	assert!(server.state().modifies.is_empty());
}

#[test]
fn test_save_new_entry() {
	let server = crew();
	let mut session = server.session();

	let mut amy = user()
		.create([("name", "Amy Wong"), ("surname", "Wong"), ("email", "amy@planetexpress.com")])
		.unwrap();
	assert_eq!(amy.change_type(), ChangeType::Add);
	assert!(amy.save(&mut session).unwrap());
	assert_eq!(amy.change_type(), ChangeType::Modify);

	{
		let state = server.state();
		let (dn, object_classes, attributes) = &state.adds[0];
		assert_eq!(dn, "cn=Amy Wong,ou=people,dc=planetexpress,dc=com");
		assert_eq!(object_classes, &["inetOrgPerson"]);
		assert_eq!(attributes.len(), 3);
		assert_eq!(attributes["mail"], ["amy@planetexpress.com"]);
	}

	// Saved entries are clean, further saves only send changes
	assert_eq!(amy.save(&mut session).unwrap(), false);
	amy.set("title", "Intern").unwrap();
	assert!(amy.save(&mut session).unwrap());
	let state = server.state();
	assert_eq!(state.adds.len(), 1);
	assert_eq!(state.modifies[0].1["title"], (ChangeKind::Add, vec![b"Intern".to_vec()]));
}

#[test]
fn test_save_existing_entry_rejected() {
	let server = crew();
	let mut session = server.session();

	let mut fry = user().create([("name", "Philip J. Fry")]).unwrap();
	assert_eq!(fry.save(&mut session).unwrap(), false);
	assert_eq!(fry.change_type(), ChangeType::Add);
	assert_eq!(fry.attribute("name").unwrap().change_kind(), Some(ChangeKind::Add));
}

#[test]
fn test_save_modifications() {
	let server = crew();
	let mut session = server.session();

	let mut leela = user().query(&mut session).get(LEELA).unwrap().unwrap();
	leela.set("email", "leela@planetexpress.com").unwrap();
	leela.set("title", Vec::<String>::new()).unwrap();
	leela.attribute_mut("surname").unwrap().append("Leela");
	assert!(leela.save(&mut session).unwrap());

	let changes = server.state().modifies[0].1.clone();
	assert_eq!(changes.len(), 3);
	assert_eq!(changes["mail"], (ChangeKind::Add, vec![b"leela@planetexpress.com".to_vec()]));
	assert_eq!(changes["title"], (ChangeKind::Delete, vec![]));
	assert_eq!(changes["sn"], (ChangeKind::Replace, vec![b"Turanga".to_vec(), b"Leela".to_vec()]));

	let reloaded = user().query(&mut session).get(LEELA).unwrap().unwrap();
	assert_eq!(reloaded.get("surname").unwrap(), Value::from(["Turanga", "Leela"]));
	assert!(!reloaded.contains("title"));
}

#[test]
fn test_delete() {
	let server = crew();
	let mut session = server.session();

	let fry = user().query(&mut session).get(FRY).unwrap().unwrap();
	assert!(fry.delete(&mut session).unwrap());
	assert!(user().query(&mut session).get(FRY).unwrap().is_none());

	// A second attempt reaches the server, which refuses it
	assert_eq!(fry.delete(&mut session).unwrap(), false);
	assert_eq!(server.state().deletes, [FRY, FRY]);
}

#[test]
fn test_authenticate_with_dn() {
	let server = crew();
	let mut session = server.session();
	let probe = AuthenticationProbe::new(&server);
	let options = AuthOptions::default();

	assert!(probe.authenticate(&mut session, FRY, "slurm", &options));
	assert!(!probe.authenticate(&mut session, FRY, "bachelor chow", &options));
	assert!(!probe.authenticate(&mut session, FRY, "", &options));

	let state = server.state();
	assert!(state.searches.is_empty());
	assert_eq!(state.binds.len(), 2, "Empty passwords never reach the server");
	assert_eq!(state.unbinds, 2);
}

#[test]
fn test_authenticate_with_username() {
	let server = crew();
	let mut session = server.session();
	let probe = AuthenticationProbe::new(&server);
	let options = AuthOptions::search("mail", PEOPLE).with_filter("(objectClass=inetOrgPerson)");

	assert!(probe.authenticate(&mut session, "fry@planetexpress.com", "slurm", &options));
	assert!(!probe.authenticate(&mut session, "fry@planetexpress.com", "wrong", &options));

	let state = server.state();
	assert_eq!(
		state.searches[0].filter,
		"(&(mail=fry@planetexpress.com)(objectClass=inetOrgPerson))"
	);
	assert_eq!(state.searches[0].attributes, ["mail"]);
	assert_eq!(state.binds, [FRY, FRY]);
}

#[test]
fn test_authenticate_failures_are_false() {
	let server = MockServer::default();
	let mut session = server.session();
	let probe = AuthenticationProbe::new(&server);

	let options = AuthOptions::search("mail", PEOPLE);
	assert!(!probe.authenticate(&mut session, "nobody@planetexpress.com", "x", &options));

	for filter in ["objectClass=person)", "(objectClass)", "(=x)"] {
		let malformed = AuthOptions::search("mail", PEOPLE).with_filter(filter);
		assert!(!probe.authenticate(&mut session, "nobody@planetexpress.com", "x", &malformed));
	}
	assert_eq!(server.state().searches.len(), 1, "Malformed filters are never sent");

	assert!(!probe.authenticate(&mut session, "fry", "x", &AuthOptions::default()));

	server.fail_searches();
	assert!(!probe.authenticate(&mut session, "fry", "x", &options));

	assert!(server.state().binds.is_empty());
}

#[test]
fn test_malformed_filter_rejected_for_known_user() {
	let server = crew();
	let mut session = server.session();
	let probe = AuthenticationProbe::new(&server);

	let options = AuthOptions::search("mail", PEOPLE).with_filter("(objectClass)");
	assert!(!probe.authenticate(&mut session, "fry@planetexpress.com", "slurm", &options));
	let state = server.state();
	assert!(state.searches.is_empty());
	assert!(state.binds.is_empty());
}

#[test]
fn test_dereference() {
	let server = crew();
	server.add_entry(
		"cn=crew,ou=groups,dc=planetexpress,dc=com",
		&[
			("cn", &["crew"]),
			("member", &[LEELA, "cn=Nibbler,ou=people,dc=planetexpress,dc=com", FRY]),
		],
	);
	let group = EntryDefinition::builder("Group")
		.base_dn("ou=groups,dc=planetexpress,dc=com")
		.object_classes(["groupOfNames"])
		.rdn(["name"])
		.field("name", AttributeSlot::new("cn"))
		.field("members", AttributeSlot::new("member").with_dereference(&user()))
		.build()
		.unwrap();
	let mut session = server.session();

	let staff = group.query(&mut session).first().unwrap().unwrap();
	let members = staff.dereference("members", &mut session).unwrap();

	let names: Vec<_> = members.iter().map(|member| member.get("name").unwrap()).collect();
	assert_eq!(names, [Value::from("Turanga Leela"), Value::from("Philip J. Fry")]);
	assert!(members.iter().all(|member| member.change_type() == ChangeType::Modify));
	assert!(server.state().searches[1..].iter().all(|search| matches!(search.scope, Scope::Base)));

	assert!(staff.dereference("name", &mut session).is_err(), "Plain fields do not refer");
	assert!(staff.dereference("owner", &mut session).is_err(), "Undeclared field");
}

#[test]
fn test_entry_authenticate() {
	let server = crew();
	let mut session = server.session();

	let fry = user().query(&mut session).get(FRY).unwrap().unwrap();
	assert!(fry.authenticate(&server, "slurm"));
	assert!(!fry.authenticate(&server, "wrong"));
	assert_eq!(session.last_response()[0].dn, FRY);
}

fn live_directory() -> Directory {
	let mut config = Config::new(Url::parse("ldap://localhost:1389").unwrap());
	config.bind_dn = Some("cn=admin,dc=example,dc=org".to_owned());
	config.bind_password = Some("adminpassword".to_owned());
	Directory::new(config)
}

fn live_user() -> Arc<EntryDefinition> {
	EntryDefinition::builder("User")
		.base_dn("ou=users,dc=example,dc=org")
		.object_classes(["inetOrgPerson"])
		.rdn(["name"])
		.field("name", AttributeSlot::new("cn"))
		.field("surname", AttributeSlot::new("sn"))
		.field("email", AttributeSlot::new("mail"))
		.field("password", AttributeSlot::new("userPassword"))
		.build()
		.unwrap()
}

#[test]
#[ignore = "docker"]
#[serial]
fn test_live_round_trip() {
	init_tracing();
	let mut ldap = ldap_connect().unwrap();
	let _ = ldap_delete_user(&mut ldap, "Hubert Farnsworth");

	let directory = live_directory();
	let mut session = directory.session();
	let mut professor = live_user()
		.create([
			("name", "Hubert Farnsworth"),
			("surname", "Farnsworth"),
			("password", "good news"),
		])
		.unwrap();
	assert!(professor.save(&mut session).unwrap());

	let mut professor = live_user()
		.query(&mut session)
		.filter("name: Hubert*")
		.first()
		.unwrap()
		.expect("Entry was just added");
	professor.set("email", "professor@planetexpress.com").unwrap();
	assert!(professor.save(&mut session).unwrap());

	let reloaded = live_user()
		.query(&mut session)
		.get("cn=Hubert Farnsworth,ou=users,dc=example,dc=org")
		.unwrap()
		.unwrap();
	assert_eq!(reloaded.get("email").unwrap(), Value::from("professor@planetexpress.com"));

	let options = AuthOptions::search("mail", "ou=users,dc=example,dc=org");
	assert!(directory.authenticate(&mut session, "professor@planetexpress.com", "good news", &options));
	assert!(!directory.authenticate(&mut session, "professor@planetexpress.com", "bad news", &options));
	assert!(reloaded.authenticate(&directory, "good news"));

	assert!(reloaded.delete(&mut session).unwrap());
}

#[test]
#[ignore = "docker"]
#[serial]
fn test_live_one_level_scope() {
	let mut ldap = ldap_connect().unwrap();
	let _ = ldap_delete_organizational_unit(&mut ldap, "nested");
	ldap_add_organizational_unit(&mut ldap, "nested").unwrap();

	let unit = EntryDefinition::builder("Unit")
		.base_dn("dc=example,dc=org")
		.object_classes(["organizationalUnit"])
		.rdn(["name"])
		.field("name", AttributeSlot::new("ou"))
		.sub_tree(false)
		.build()
		.unwrap();

	let directory = live_directory();
	let mut session = directory.session();
	let units = unit.query(&mut session).all(true).unwrap();
	assert!(units.iter().any(|unit| unit.get("name").unwrap() == Value::from("nested")));

	ldap_delete_organizational_unit(&mut ldap, "nested").unwrap();
}

#[test]
#[ignore = "docker"]
#[serial]
fn test_live_missing_base() {
	let directory = live_directory();
	let mut session = directory.session();

	let ghosts = EntryDefinition::builder("Ghost")
		.base_dn("ou=ghosts,dc=example,dc=org")
		.field("name", AttributeSlot::new("cn"))
		.build()
		.unwrap();
	assert!(ghosts.query(&mut session).all(true).unwrap().is_empty());
}

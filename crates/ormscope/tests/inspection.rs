use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use ormscope::prelude::*;
use ormscope::{HistoryItem, InstanceState, Status, class_mapper, instance_state};
use std::sync::Arc;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

struct Fixture {
    metadata: MetaData,
    users: Table,
    registry: Arc<Registry>,
    user: MappedClass,
    address: MappedClass,
}

fn fixture() -> Fixture {
    let mut metadata = MetaData::new();
    let users = metadata.table(
        "users",
        [
            column("id", Integer).primary_key(),
            column("name", StringType::with_length(30)).nullable(false),
        ],
    );
    let addresses = metadata.table(
        "addresses",
        [
            column("id", Integer).primary_key(),
            column("user_id", Integer).foreign_key("users.id"),
            column("email_address", StringType::with_length(50)).nullable(false),
        ],
    );
    let orders = metadata.table(
        "orders",
        [
            column("id", Integer).primary_key(),
            column("user_id", Integer).foreign_key("users.id"),
            column("address_id", Integer).foreign_key("addresses.id"),
            column("description", StringType::with_length(30)),
            column("isopen", Integer),
        ],
    );

    let registry = Registry::new();
    let user = registry
        .map("User", &users)
        .property("addresses", one_to_many("Address"))
        .property("orders", one_to_many("Order"))
        .build()
        .unwrap();
    let address = registry.map("Address", &addresses).build().unwrap();
    registry.map("Order", &orders).build().unwrap();

    inspect(&user)
        .add_property("name_syn", synonym("name"))
        .unwrap();

    Fixture {
        metadata,
        users,
        registry,
        user,
        address,
    }
}

fn flags(state: &InstanceState) -> (bool, bool, bool, bool) {
    (
        state.is_transient(),
        state.is_pending(),
        state.is_persistent(),
        state.is_detached(),
    )
}

#[test]
fn class_inspector_is_the_class_mapper() {
    let fx = fixture();
    assert!(Arc::ptr_eq(&inspect(&fx.user), &class_mapper(&fx.user)));
    assert!(Arc::ptr_eq(&inspect(&fx.user), &inspect(&fx.user)));
    assert!(Arc::ptr_eq(
        &inspect(&fx.user),
        &fx.registry.mapper("User").unwrap()
    ));
}

#[test]
fn instance_inspector_is_the_instance_state() {
    let fx = fixture();
    let u1 = fx.user.instance();
    assert!(Arc::ptr_eq(&inspect(&u1), &instance_state(&u1)));
}

#[test]
fn columns_follow_declaration_order() {
    let fx = fixture();
    let insp = inspect(&fx.user);
    let columns: Vec<&str> = insp.columns().keys().collect();
    assert_eq!(columns, vec!["id", "name"]);
    assert!(Arc::ptr_eq(&insp.columns()["id"], &fx.users.c()["id"]));
    for (mine, theirs) in insp.columns().iter().zip(fx.users.columns()) {
        assert!(Arc::ptr_eq(mine, theirs));
    }
}

#[test]
fn primary_key_and_local_table() {
    let fx = fixture();
    let insp = inspect(&fx.user);
    let pk = insp.primary_key();
    assert_eq!(pk.len(), 1);
    assert!(Arc::ptr_eq(&pk[0], &fx.users.c()["id"]));
    assert!(insp.local_table().ptr_eq(&fx.users));
}

#[test]
fn attrs_include_every_property_kind() {
    let fx = fixture();
    let insp = inspect(&fx.user);

    let id = insp.attrs().get("id").unwrap().clone();
    assert!(Arc::ptr_eq(&id, &class_mapper(&fx.user).get_property("id").unwrap()));

    let attrs = insp.attrs();
    let mut keys = attrs.keys();
    keys.sort_unstable();
    assert_eq!(keys, vec!["addresses", "id", "name", "name_syn", "orders"]);
}

#[test]
fn column_property_capabilities() {
    let fx = fixture();
    let insp = inspect(&fx.user);
    let id = insp.attrs().get("id").unwrap().clone();

    let columns = id.columns().unwrap();
    assert_eq!(columns.len(), 1);
    assert!(Arc::ptr_eq(&columns[0], &fx.users.c()["id"]));
    assert!(Arc::ptr_eq(id.expression().unwrap(), &fx.users.c()["id"]));

    let err = id.mapper().unwrap_err();
    assert!(err.is_no_such_attribute());
}

#[test]
fn column_attrs_filter() {
    let fx = fixture();
    let insp = inspect(&fx.user);
    let column_attrs = insp.column_attrs();

    assert_eq!(column_attrs.keys(), vec!["id", "name"]);
    let listed: Vec<_> = column_attrs.iter().cloned().collect();
    assert!(Arc::ptr_eq(&listed[0], &insp.get_property("id").unwrap()));
    assert!(Arc::ptr_eq(&listed[1], &insp.get_property("name").unwrap()));

    let via_class = fx.user.attr("id").unwrap().property().unwrap();
    assert!(Arc::ptr_eq(column_attrs.get("id").unwrap(), &via_class));

    assert!(column_attrs.get("addresses").unwrap_err().is_no_such_attribute());
}

#[test]
fn synonyms_filter() {
    let fx = fixture();
    let synonyms = inspect(&fx.user).synonyms();
    assert_eq!(synonyms.keys(), vec!["name_syn"]);

    let declared = fx.user.attr("name_syn").unwrap().original_property();
    assert!(Arc::ptr_eq(synonyms.get("name_syn").unwrap(), &declared));
    assert_eq!(synonyms.len(), 1);

    let proxied = fx.user.attr("name_syn").unwrap().property().unwrap();
    assert_eq!(proxied.key(), "name");
}

#[test]
fn relationships_filter() {
    let fx = fixture();
    let relationships = inspect(&fx.user).relationships();

    let via_class = fx.user.attr("addresses").unwrap().property().unwrap();
    assert!(Arc::ptr_eq(relationships.get("addresses").unwrap(), &via_class));

    let mut keys = relationships.keys();
    keys.sort_unstable();
    assert_eq!(keys, vec!["addresses", "orders"]);
}

#[test]
fn class_attribute_inspects_to_its_property() {
    let fx = fixture();
    let attr = fx.user.attr("addresses").unwrap();
    let prop = inspect(&attr);
    assert!(Arc::ptr_eq(&prop, &attr.property().unwrap()));
}

#[test]
fn relationship_property_capabilities() {
    let fx = fixture();
    let prop = inspect(&fx.user.attr("addresses").unwrap());

    assert!(Arc::ptr_eq(&prop.parent().unwrap(), &class_mapper(&fx.user)));
    assert!(Arc::ptr_eq(&prop.mapper().unwrap(), &class_mapper(&fx.address)));

    assert!(prop.columns().unwrap_err().is_no_such_attribute());
    assert!(prop.expression().unwrap_err().is_no_such_attribute());
}

#[test]
fn instance_attribute_values() {
    let fx = fixture();
    let u1 = fx.user.create([("name", "ed")]).unwrap();
    let insp = inspect(&u1);

    let attrs = insp.attrs();
    let mut keys = attrs.keys();
    keys.sort_unstable();
    assert_eq!(keys, vec!["addresses", "id", "name", "name_syn", "orders"]);

    let name = insp.attr("name").unwrap();
    assert_eq!(name.value(), AttrValue::from("ed"));
    assert_eq!(name.loaded_value(), LoadedValue::Loaded(AttrValue::from("ed")));
}

#[test]
fn passive_scalar_access() {
    let fx = fixture();
    let u1 = fx.user.create([("name", "ed")]).unwrap();
    let id = inspect(&u1).attr("id").unwrap();

    assert_eq!(id.loaded_value(), LoadedValue::NoValue);
    assert_eq!(id.value(), AttrValue::Scalar(Value::Null));
    assert_eq!(
        id.loaded_value(),
        LoadedValue::Loaded(AttrValue::Scalar(Value::Null))
    );
}

#[test]
fn passive_collection_access() {
    let fx = fixture();
    let u1 = fx.user.create([("name", "ed")]).unwrap();
    let addresses = inspect(&u1).attr("addresses").unwrap();

    assert!(addresses.loaded_value().is_no_value());
    assert_eq!(addresses.value(), AttrValue::Collection(Vec::new()));
    assert_eq!(
        addresses.loaded_value(),
        LoadedValue::Loaded(AttrValue::Collection(Vec::new()))
    );
}

#[test]
fn collection_history_before_and_after_access() {
    let fx = fixture();
    let u1 = fx.user.create([("name", "ed")]).unwrap();
    let insp = inspect(&u1);

    assert_eq!(insp.attr("addresses").unwrap().history().unchanged, None);
    u1.get("addresses").unwrap();
    assert_eq!(
        insp.attr("addresses").unwrap().history().unchanged,
        Some(Vec::new())
    );
}

#[test]
fn scalar_history_tracks_changes() {
    let fx = fixture();
    let u1 = fx.user.create([("name", "ed")]).unwrap();
    let name = inspect(&u1).attr("name_syn").unwrap();

    let history = name.history();
    assert_eq!(history.added, vec![HistoryItem::from("ed")]);
    assert!(history.deleted.is_empty());

    u1.set("name_syn", "jack").unwrap();
    assert_eq!(u1.get_value("name").unwrap(), Value::from("jack"));
    assert_eq!(name.history().added, vec![HistoryItem::from("jack")]);
}

#[test]
fn transient_instance_has_no_identity() {
    let fx = fixture();
    let u1 = fx.user.create([("name", "ed")]).unwrap();
    let insp = inspect(&u1);
    assert!(insp.identity().is_none());
    assert!(insp.identity_key().is_none());
}

#[test]
fn persistent_identity_and_identity_key() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let fx = fixture();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        unwrap_outcome(fx.metadata.create_all(&cx, &conn).await);
        let mut session = Session::new(conn);

        let u1 = fx.user.create([("name", "ed")]).unwrap();
        session.add(&u1).unwrap();
        unwrap_outcome(session.flush(&cx).await);

        let insp = inspect(&u1);
        let identity = insp.identity().expect("flushed instance has an identity");
        assert_eq!(identity, vec![u1.get_value("id").unwrap()]);

        let key = insp.identity_key().unwrap();
        assert_eq!(key.class_name(), "User");
        assert_eq!(key.key(), identity.as_slice());

        let fetched = unwrap_outcome(session.query(&fx.user).get(&cx, &identity).await);
        assert_eq!(fetched, Some(u1.clone()));
    });
}

#[test]
fn persistence_state_transitions() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let fx = fixture();

    rt.block_on(async {
        let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
        unwrap_outcome(fx.metadata.create_all(&cx, &conn).await);

        let u1 = fx.user.create([("name", "ed")]).unwrap();
        let insp = inspect(&u1);
        assert_eq!(flags(&insp), (true, false, false, false));

        let mut session = Session::new(conn);
        session.add(&u1).unwrap();
        assert_eq!(flags(&insp), (false, true, false, false));

        unwrap_outcome(session.flush(&cx).await);
        assert_eq!(flags(&insp), (false, false, true, false));

        let identity = insp.identity();
        session.expunge(&u1).unwrap();
        assert_eq!(flags(&insp), (false, false, false, true));
        assert_eq!(insp.status(), Status::Detached);
        assert_eq!(insp.identity(), identity);
    });
}

#[test]
fn session_accessor() {
    let fx = fixture();
    let u1 = fx.user.create([("name", "ed")]).unwrap();
    let insp = inspect(&u1);
    assert!(insp.session_id().is_none());

    let mut session = Session::new(SqliteConnection::open_memory().expect("open sqlite memory db"));
    session.add(&u1).unwrap();
    assert_eq!(insp.session_id(), Some(session.id()));
}

#[test]
fn object_accessor() {
    let fx = fixture();
    let u1 = fx.user.create([("name", "ed")]).unwrap();
    assert_eq!(inspect(&u1).object(), u1);
}

//! End-to-end flows against in-memory SQLite: DDL application, autoinc
//! inserts with id collection, lazy loads, updates, and deletes.

use std::rc::Rc;
use std::sync::Arc;

use sqlweave_core::{SqlConnection, SqlSource, Value};
use sqlweave_orm::{
    filter_eq, Cascade, DataObject, Engine, EngineMode, Expression, ObjectStatus, RelationObject,
    SelectExpr, Session,
};
use sqlweave_test_support::client_order_schema;

fn sqlite_engine() -> Engine {
    sqlweave_driver_sqlite::register();
    let source = SqlSource::from_url("sqlite://:memory:").unwrap();
    let conn = SqlConnection::open(source).unwrap();
    Engine::new(EngineMode::ReadWrite, conn)
}

fn prepared_session() -> Rc<Session> {
    let schema = client_order_schema(Cascade::Delete);
    let mut engine = sqlite_engine();
    engine.create_schema(&schema, false).unwrap();
    Session::new(schema, engine)
}

#[test]
fn create_schema_and_introspect() {
    let schema = client_order_schema(Cascade::Restrict);
    let mut engine = sqlite_engine();
    engine.create_schema(&schema, false).unwrap();
    assert!(engine.table_exists("T_CLIENT").unwrap());
    assert!(engine.table_exists("T_ORDER").unwrap());

    let introspected = sqlweave_orm::read_schema(&mut engine).unwrap();
    let order = introspected.table("T_ORDER").unwrap();
    assert!(order.column("ID").unwrap().is_pk());
    let fk = order.column("CLIENT_ID").unwrap();
    assert_eq!(fk.fk_table_name(), Some("T_CLIENT"));
    assert!(introspected.table("T_CLIENT").unwrap().depth() < order.depth());

    // Re-applying fails on existing tables unless errors are ignored.
    assert!(engine.create_schema(&schema, false).is_err());
    engine.create_schema(&schema, true).unwrap();
}

#[test]
fn flush_new_graph_collects_generated_ids_and_fk() {
    let session = prepared_session();
    let client = session.create_object("T_CLIENT").unwrap();
    client.borrow_mut().set("NAME", "acme").unwrap();
    let order = session.create_object("T_ORDER").unwrap();
    order.borrow_mut().set("AMOUNT", "12.5").unwrap();
    DataObject::link_to_slave(&client, &order, "orders").unwrap();

    session.flush().unwrap();
    session.commit().unwrap();

    assert_eq!(client.borrow().status(), ObjectStatus::Ghost);
    assert_eq!(order.borrow().status(), ObjectStatus::Ghost);
    let client_id = client.borrow_mut().get("ID").unwrap();
    assert!(!client_id.is_null());
    // The generated master key was propagated into the slave's FK.
    assert_eq!(order.borrow_mut().peek("CLIENT_ID").unwrap(), client_id);

    let mut engine = session.engine_mut();
    let rows = engine
        .select(
            Expression::sql("COUNT(*) CNT"),
            Expression::sql("T_ORDER"),
            filter_eq("CLIENT_ID", client_id.as_longint().unwrap()),
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            -1,
            false,
        )
        .unwrap();
    assert_eq!(rows[0][0].1, Value::LongInt(1));
}

#[test]
fn round_trip_key_load() {
    let session = prepared_session();
    {
        let table = session.schema().table("T_CLIENT").unwrap().clone();
        let mut engine = session.engine_mut();
        engine
            .insert(
                &table,
                vec![vec![
                    ("ID".to_string(), Value::LongInt(10)),
                    ("NAME".to_string(), Value::Str("x".to_string())),
                ]],
                false,
            )
            .unwrap();
    }
    let key = session.schema().table("T_CLIENT").unwrap().mk_id_key(10).unwrap();
    let obj = session.get_lazy(key.clone()).unwrap();
    assert_eq!(obj.borrow().status(), ObjectStatus::Ghost);
    obj.borrow_mut().load().unwrap();
    assert_eq!(obj.borrow().status(), ObjectStatus::Sync);
    assert_eq!(
        obj.borrow_mut().get("NAME").unwrap().as_string().unwrap(),
        "x"
    );
    let key_back = obj.borrow_mut().key().unwrap();
    assert_eq!(key_back.fields[0].1, Value::LongInt(10));
    assert_eq!(key_back, key);
}

#[test]
fn load_of_missing_key_fails() {
    let session = prepared_session();
    let key = session.schema().table("T_CLIENT").unwrap().mk_id_key(999).unwrap();
    let obj = session.get_lazy(key).unwrap();
    assert!(matches!(
        obj.borrow_mut().load(),
        Err(sqlweave_orm::OrmError::ObjectNotFoundByKey(_))
    ));
}

#[test]
fn update_and_delete_round_trip() {
    let session = prepared_session();
    let client = session.create_object("T_CLIENT").unwrap();
    client.borrow_mut().set("NAME", "before").unwrap();
    session.flush().unwrap();
    let id = client.borrow_mut().get("ID").unwrap().as_longint().unwrap();

    // Mutating a loaded object marks it dirty; flush turns it into an
    // UPDATE.
    let key = session.schema().table("T_CLIENT").unwrap().mk_id_key(id).unwrap();
    let obj = session.get_lazy(key).unwrap();
    assert!(Rc::ptr_eq(&obj, &client));
    obj.borrow_mut().set("NAME", "after").unwrap();
    assert_eq!(obj.borrow().status(), ObjectStatus::Dirty);
    session.flush().unwrap();

    {
        let mut engine = session.engine_mut();
        let rows = engine
            .select(
                Expression::sql("NAME"),
                Expression::sql("T_CLIENT"),
                filter_eq("ID", id),
                Expression::empty(),
                Expression::empty(),
                Expression::empty(),
                -1,
                false,
            )
            .unwrap();
        assert_eq!(rows[0][0].1, Value::Str("after".to_string()));
    }

    DataObject::delete(&obj).unwrap();
    session.flush().unwrap();
    assert_eq!(obj.borrow().status(), ObjectStatus::Deleted);
    assert_eq!(session.identity_map_size(), 0);

    let mut engine = session.engine_mut();
    let rows = engine
        .select(
            Expression::sql("COUNT(*) CNT"),
            Expression::sql("T_CLIENT"),
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            -1,
            false,
        )
        .unwrap();
    assert_eq!(rows[0][0].1, Value::LongInt(0));
}

#[test]
fn lazy_slaves_against_real_rows() {
    let session = prepared_session();
    let client = session.create_object("T_CLIENT").unwrap();
    client.borrow_mut().set("NAME", "acme").unwrap();
    for amount in ["1", "2"] {
        let order = session.create_object("T_ORDER").unwrap();
        order.borrow_mut().set("AMOUNT", amount).unwrap();
        DataObject::link_to_slave(&client, &order, "orders").unwrap();
    }
    session.flush().unwrap();
    session.commit().unwrap();

    // A second session sees the rows through lazy loading only.
    let schema = Arc::clone(session.schema());
    drop(session);
    let mut engine = sqlite_engine();
    // Different in-memory database; recreate and repopulate.
    engine.create_schema(&schema, false).unwrap();
    let session = Session::new(Arc::clone(&schema), engine);
    {
        let client_tbl = schema.table("T_CLIENT").unwrap().clone();
        let order_tbl = schema.table("T_ORDER").unwrap().clone();
        let mut engine = session.engine_mut();
        engine
            .insert(
                &client_tbl,
                vec![vec![
                    ("ID".to_string(), Value::LongInt(10)),
                    ("NAME".to_string(), Value::Str("acme".to_string())),
                ]],
                false,
            )
            .unwrap();
        engine
            .insert(
                &order_tbl,
                vec![
                    vec![
                        ("ID".to_string(), Value::LongInt(1)),
                        ("CLIENT_ID".to_string(), Value::LongInt(10)),
                        ("AMOUNT".to_string(), Value::Decimal("1".to_string())),
                    ],
                    vec![
                        ("ID".to_string(), Value::LongInt(2)),
                        ("CLIENT_ID".to_string(), Value::LongInt(10)),
                        ("AMOUNT".to_string(), Value::Decimal("2".to_string())),
                    ],
                ],
                false,
            )
            .unwrap();
    }
    let key = schema.table("T_CLIENT").unwrap().mk_id_key(10).unwrap();
    let client = session.get_lazy(key).unwrap();
    let slaves = DataObject::get_slaves(&client, "orders").unwrap();
    assert_eq!(RelationObject::count_slaves(&slaves).unwrap(), 2);
    RelationObject::lazy_load_slaves(&slaves).unwrap();
    let slave_list = slaves.borrow().slaves().to_vec();
    assert_eq!(slave_list.len(), 2);
    let master = DataObject::get_master(&slave_list[0], "owner").unwrap();
    assert!(Rc::ptr_eq(&master, &client));
}

#[test]
fn select_iter_and_row_limits() {
    let session = prepared_session();
    for i in 1..=5 {
        let client = session.create_object("T_CLIENT").unwrap();
        client.borrow_mut().set("ID", i as i64).unwrap();
        client.borrow_mut().set("NAME", format!("c{}", i)).unwrap();
    }
    session.flush().unwrap();

    let mut engine = session.engine_mut();
    let none = engine
        .select(
            Expression::sql("*"),
            Expression::sql("T_CLIENT"),
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            0,
            false,
        )
        .unwrap();
    assert!(none.is_empty());

    let all = engine
        .select(
            Expression::sql("*"),
            Expression::sql("T_CLIENT"),
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            Expression::sql("ID"),
            -1,
            false,
        )
        .unwrap();
    assert_eq!(all.len(), 5);

    let paged = SelectExpr::new(Expression::sql("*"))
        .from_(Expression::sql("T_CLIENT"))
        .order_by_(Expression::sql("ID"))
        .pager(2, 1)
        .unwrap();
    let rows: Vec<_> = engine
        .select_iter(paged)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0].1, Value::LongInt(2));
    assert_eq!(rows[1][0].1, Value::LongInt(3));
}

#[test]
fn flush_invariants_hold() {
    let session = prepared_session();
    let a = session.create_object("T_CLIENT").unwrap();
    a.borrow_mut().set("NAME", "a").unwrap();
    let b = session.create_object("T_CLIENT").unwrap();
    b.borrow_mut().set("ID", 77i64).unwrap();
    b.borrow_mut().set("NAME", "b").unwrap();
    session.flush().unwrap();

    for obj in [&a, &b] {
        let status = obj.borrow().status();
        assert!(
            status != ObjectStatus::New
                && status != ObjectStatus::Dirty
                && status != ObjectStatus::ToBeDeleted
        );
        assert!(obj.borrow_mut().assigned_key().unwrap());
    }
    assert_eq!(session.identity_map_size(), 2);
}

use std::sync::Arc;

use sqlweave_core::{Row, Value, ValueType};
use sqlweave_orm::{
    Cascade, Column, ColumnFlags, Relation, RelationAttrs, RelationKind, Schema, Table,
};

/// Build a fetched-row shape from (name, value) pairs.
pub fn row(fields: &[(&str, Value)]) -> Row {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// The classic two-table schema: clients owning orders, both with
/// sequences, with the given cascade policy on the relation.
pub fn client_order_schema(cascade: Cascade) -> Arc<Schema> {
    let mut schema = Schema::new();

    let mut client = Table::new("T_CLIENT", "", "Client");
    client
        .add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
        .expect("valid column");
    client
        .add_column(Column::new(
            "NAME",
            ValueType::Str,
            100,
            ColumnFlags::NULLABLE,
        ))
        .expect("valid column");
    client.set_seq_name("S_CLIENT_ID");
    schema.add_table(client).expect("valid table");

    let mut order = Table::new("T_ORDER", "", "Order");
    order
        .add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
        .expect("valid column");
    order
        .add_column(
            Column::new("CLIENT_ID", ValueType::LongInt, 0, ColumnFlags::NULLABLE)
                .with_fk("T_CLIENT", None),
        )
        .expect("valid column");
    order
        .add_column(Column::new(
            "AMOUNT",
            ValueType::Decimal,
            0,
            ColumnFlags::NULLABLE,
        ))
        .expect("valid column");
    order.set_seq_name("S_ORDER_ID");
    schema.add_table(order).expect("valid table");

    schema.add_relation(Relation::new(
        RelationKind::OneToMany,
        "Client",
        RelationAttrs::from([("property".to_string(), "orders".to_string())]),
        "Order",
        RelationAttrs::from([("property".to_string(), "owner".to_string())]),
        cascade,
    ));
    schema.fill_fkeys().expect("resolvable schema");
    schema.check_cycles().expect("acyclic schema");
    Arc::new(schema)
}

/// Users owning login sessions, autoinc keys; for lazy-load scenarios.
pub fn user_session_schema() -> Arc<Schema> {
    let mut schema = Schema::new();

    let mut user = Table::new("T_USER", "", "User");
    user.add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
        .expect("valid column");
    user.add_column(Column::new(
        "LOGIN",
        ValueType::Str,
        50,
        ColumnFlags::NULLABLE,
    ))
    .expect("valid column");
    user.set_autoinc(true);
    schema.add_table(user).expect("valid table");

    let mut session = Table::new("T_SESSION", "", "LoginSession");
    session
        .add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
        .expect("valid column");
    session
        .add_column(
            Column::new("USER_ID", ValueType::LongInt, 0, ColumnFlags::NULLABLE)
                .with_fk("T_USER", None),
        )
        .expect("valid column");
    session
        .add_column(Column::new(
            "APP_NAME",
            ValueType::Str,
            80,
            ColumnFlags::NULLABLE,
        ))
        .expect("valid column");
    session.set_autoinc(true);
    schema.add_table(session).expect("valid table");

    schema.add_relation(Relation::new(
        RelationKind::OneToMany,
        "User",
        RelationAttrs::from([("property".to_string(), "login_sessions".to_string())]),
        "LoginSession",
        RelationAttrs::from([
            ("property".to_string(), "owner".to_string()),
            ("order-by".to_string(), "ID".to_string()),
        ]),
        Cascade::Delete,
    ));
    schema.fill_fkeys().expect("resolvable schema");
    schema.check_cycles().expect("acyclic schema");
    Arc::new(schema)
}

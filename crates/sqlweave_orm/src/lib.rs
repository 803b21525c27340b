//! Schema metamodel, expression algebra, SQL generation, engine, and the
//! identity-map session.

mod data_object;
mod ddl;
mod engine;
mod error;
mod expression;
mod r#gen;
mod schema;
mod schema_reader;
mod schema_xml;
mod session;

pub use data_object::{
    DataObject, DataObjectPtr, DeletionMode, ObjectStatus, RelationObject, RelationObjectPtr,
    RelationStatus,
};
pub use ddl::{ddl_statements, drop_statements, generate_ddl, tables_in_depth_order};
pub use engine::{Engine, EngineMode};
pub use error::OrmError;
pub use expression::{
    filter_eq, filter_gt, filter_lt, filter_ne, find_all_tables, ColumnExpr, ConstExpr,
    Expression, ExpressionList, JoinExpr, KeyFilter, SelectExpr, SqlGenContext, SqlGenOptions,
};
pub use r#gen::{delete_sql, insert_sql, update_sql, StatementTemplate};
pub use schema::{
    is_identifier, mk_xml_name, Cascade, Column, ColumnFlags, Key, Relation, RelationAttrs,
    RelationKind, Schema, Table,
};
pub use schema_reader::{read_schema, sql_type_to_value_type};
pub use schema_xml::{load_schema, load_schema_from_str, parse_schema, schema_to_xml};
pub use session::Session;

pub use sqlweave_core;

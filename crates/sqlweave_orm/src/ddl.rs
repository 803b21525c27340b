use std::collections::BTreeSet;
use std::io::Write;

use sqlweave_core::{sql_dialect, SqlDialect};

use crate::error::OrmError;
use crate::r#gen::{create_table_ddl, fk_constraints_ddl};
use crate::schema::{Schema, Table};

/// Tables sorted by dependency depth, masters first.
pub fn tables_in_depth_order(schema: &Schema) -> Vec<&Table> {
    let mut tables: Vec<&Table> = schema.tables().collect();
    tables.sort_by_key(|t| (t.depth(), t.name().to_string()));
    tables
}

/// All DDL statements for a schema: CREATE TABLE in dependency order, then
/// CREATE SEQUENCE, then external FK constraints.
pub fn ddl_statements(schema: &Schema, dialect: &dyn SqlDialect) -> Result<Vec<String>, OrmError> {
    let tables = tables_in_depth_order(schema);
    let mut stmts = Vec::new();
    for table in &tables {
        stmts.push(create_table_ddl(table, dialect)?);
    }
    if dialect.has_sequences() {
        let mut sequences = BTreeSet::new();
        for table in &tables {
            if let Some(seq) = table.seq_name() {
                sequences.insert(seq.to_string());
            }
        }
        for seq in sequences {
            stmts.push(dialect.gen_sequence(&seq)?);
        }
    }
    for table in &tables {
        stmts.extend(fk_constraints_ddl(table, dialect));
    }
    Ok(stmts)
}

/// Statements that tear a schema down, in reverse dependency order.
pub fn drop_statements(schema: &Schema, dialect: &dyn SqlDialect) -> Result<Vec<String>, OrmError> {
    let mut tables = tables_in_depth_order(schema);
    tables.reverse();
    let mut stmts = Vec::new();
    for table in &tables {
        stmts.push(format!("DROP TABLE {}", table.name()));
    }
    if dialect.has_sequences() {
        let mut sequences = BTreeSet::new();
        for table in &tables {
            if let Some(seq) = table.seq_name() {
                sequences.insert(seq.to_string());
            }
        }
        for seq in sequences {
            stmts.push(format!("DROP SEQUENCE {}", seq));
        }
    }
    Ok(stmts)
}

/// Write the full DDL script for a schema to `out`, with COMMIT between
/// statements when the dialect requires committed DDL.
pub fn generate_ddl(
    schema: &Schema,
    out: &mut dyn Write,
    dialect_name: &str,
) -> Result<(), OrmError> {
    let dialect = sql_dialect(dialect_name)?;
    writeln!(out, "-- DBTYPE={}", dialect.name())
        .map_err(|e| OrmError::bad_sql(format!("can't write DDL: {}", e)))?;
    for stmt in ddl_statements(schema, dialect.as_ref())? {
        writeln!(out, "\n{};", stmt)
            .map_err(|e| OrmError::bad_sql(format!("can't write DDL: {}", e)))?;
        if dialect.commit_ddl() {
            writeln!(out, "COMMIT;")
                .map_err(|e| OrmError::bad_sql(format!("can't write DDL: {}", e)))?;
        }
    }
    Ok(())
}

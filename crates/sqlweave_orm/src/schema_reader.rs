use sqlweave_core::ValueType;

use crate::engine::Engine;
use crate::error::OrmError;
use crate::schema::{Column, ColumnFlags, Schema, Table};

/// Map a vendor type spelling back to a value tag, by keyword.
pub fn sql_type_to_value_type(sql_type: &str) -> ValueType {
    let t = sql_type.to_ascii_uppercase();
    if t.contains("BIGINT") || t.contains("INT8") {
        ValueType::LongInt
    } else if t.contains("INT") {
        // SQLite spells every integer column INTEGER, including rowid PKs,
        // so the wide tag is the safe one.
        ValueType::LongInt
    } else if t.contains("CHAR") || t.contains("TEXT") || t.contains("CLOB") {
        ValueType::Str
    } else if t.contains("DEC") || t.contains("NUMERIC") || t.contains("NUMBER") {
        ValueType::Decimal
    } else if t.contains("DATE") || t.contains("TIME") {
        ValueType::DateTime
    } else if t.contains("FLOAT") || t.contains("DOUBLE") || t.contains("REAL") {
        ValueType::Float
    } else if t.contains("BLOB") || t.contains("BINARY") || t.contains("BYTEA") {
        ValueType::Blob
    } else {
        ValueType::Str
    }
}

/// Build a Schema by introspecting the live database behind an engine.
///
/// Class names stay empty; the result describes tables and foreign keys,
/// not domain mappings.
pub fn read_schema(engine: &mut Engine) -> Result<Schema, OrmError> {
    let mut schema = Schema::new();
    for table_name in engine.get_tables()? {
        let mut table = Table::new(table_name.to_ascii_uppercase(), "", "");
        for descr in engine.get_columns(&table_name)? {
            let ty = sql_type_to_value_type(&descr.sql_type);
            let mut flags = ColumnFlags::empty();
            if descr.pk {
                flags |= ColumnFlags::PK;
            } else if !descr.not_null {
                flags |= ColumnFlags::NULLABLE;
            }
            let size = if ty == ValueType::Str {
                descr.size.unwrap_or(0)
            } else {
                0
            };
            let mut column = Column::new(descr.name.to_ascii_uppercase(), ty, size, flags);
            if let Some(default) = descr.default {
                column = column.with_default(sqlweave_core::Value::Str(default));
            }
            if let Some(fk_table) = descr.fk_table {
                column = column.with_fk(fk_table.to_ascii_uppercase(), descr.fk_column);
            }
            table.add_column(column)?;
        }
        schema.add_table(table)?;
    }
    schema.fill_fkeys()?;
    schema.check_cycles()?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(sql_type_to_value_type("VARCHAR(100)"), ValueType::Str);
        assert_eq!(sql_type_to_value_type("NVARCHAR(10)"), ValueType::Str);
        assert_eq!(sql_type_to_value_type("BIGINT"), ValueType::LongInt);
        assert_eq!(sql_type_to_value_type("integer"), ValueType::LongInt);
        assert_eq!(sql_type_to_value_type("DECIMAL(16, 6)"), ValueType::Decimal);
        assert_eq!(sql_type_to_value_type("NUMBER(19)"), ValueType::Decimal);
        assert_eq!(sql_type_to_value_type("TIMESTAMP"), ValueType::DateTime);
        assert_eq!(sql_type_to_value_type("DOUBLE PRECISION"), ValueType::Float);
        assert_eq!(sql_type_to_value_type("BYTEA"), ValueType::Blob);
        assert_eq!(sql_type_to_value_type("UUID"), ValueType::Str);
    }
}

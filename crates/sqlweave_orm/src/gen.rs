use indexmap::IndexMap;

use sqlweave_core::{PlaceholderStyle, SqlDialect, ValueType};

use crate::error::OrmError;
use crate::schema::{Column, Table};

/// A generated INSERT/UPDATE/DELETE statement with the metadata needed to
/// bind row values: per-parameter type codes and a column-name-to-index map.
#[derive(Debug, Clone)]
pub struct StatementTemplate {
    pub sql: String,
    pub type_codes: Vec<ValueType>,
    pub param_nums: IndexMap<String, usize>,
}

fn placeholder(style: PlaceholderStyle, num: usize, name: &str) -> String {
    match style {
        PlaceholderStyle::Positional => "?".to_string(),
        PlaceholderStyle::Numbered => format!(":{}", num),
        PlaceholderStyle::Named => format!(":{}", name.to_ascii_lowercase()),
    }
}

/// INSERT template. Read-only columns are always excluded; the PK columns
/// are excluded when `include_pk` is false (sequence/autoinc tables).
pub fn insert_sql(
    table: &Table,
    style: PlaceholderStyle,
    include_pk: bool,
) -> Result<StatementTemplate, OrmError> {
    let cols: Vec<&Column> = table
        .columns()
        .iter()
        .filter(|c| !c.is_ro() && (include_pk || !c.is_pk()))
        .collect();
    if cols.is_empty() {
        return Err(OrmError::bad_sql("can't do INSERT with an empty row"));
    }
    let mut names = Vec::with_capacity(cols.len());
    let mut placeholders = Vec::with_capacity(cols.len());
    let mut type_codes = Vec::with_capacity(cols.len());
    let mut param_nums = IndexMap::new();
    for (i, c) in cols.iter().enumerate() {
        names.push(c.name().to_string());
        placeholders.push(placeholder(style, i + 1, c.name()));
        type_codes.push(c.value_type());
        param_nums.insert(c.name().to_string(), i);
    }
    Ok(StatementTemplate {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name(),
            names.join(", "),
            placeholders.join(", ")
        ),
        type_codes,
        param_nums,
    })
}

/// UPDATE template: SET over non-PK, non-RO columns, WHERE over the PK.
pub fn update_sql(table: &Table, style: PlaceholderStyle) -> Result<StatementTemplate, OrmError> {
    if table.pk_fields().is_empty() {
        return Err(OrmError::bad_sql(format!(
            "can't do UPDATE on table '{}' without key fields",
            table.name()
        )));
    }
    let set_cols: Vec<&Column> = table
        .columns()
        .iter()
        .filter(|c| !c.is_pk() && !c.is_ro())
        .collect();
    if set_cols.is_empty() {
        return Err(OrmError::bad_sql(format!(
            "can't do UPDATE on table '{}' with no settable columns",
            table.name()
        )));
    }
    let mut type_codes = Vec::new();
    let mut param_nums = IndexMap::new();
    let mut set_parts = Vec::with_capacity(set_cols.len());
    for c in &set_cols {
        let num = param_nums.len();
        set_parts.push(format!(
            "{} = {}",
            c.name(),
            placeholder(style, num + 1, c.name())
        ));
        type_codes.push(c.value_type());
        param_nums.insert(c.name().to_string(), num);
    }
    let mut where_parts = Vec::with_capacity(table.pk_fields().len());
    for pk in table.pk_fields() {
        let c = table.column(pk)?;
        let num = param_nums.len();
        where_parts.push(format!(
            "({} = {})",
            c.name(),
            placeholder(style, num + 1, c.name())
        ));
        type_codes.push(c.value_type());
        param_nums.insert(c.name().to_string(), num);
    }
    Ok(StatementTemplate {
        sql: format!(
            "UPDATE {} SET {} WHERE {}",
            table.name(),
            set_parts.join(", "),
            where_parts.join(" AND ")
        ),
        type_codes,
        param_nums,
    })
}

/// DELETE template: WHERE is the PK equality conjunction.
pub fn delete_sql(table: &Table, style: PlaceholderStyle) -> Result<StatementTemplate, OrmError> {
    if table.pk_fields().is_empty() {
        return Err(OrmError::bad_sql(format!(
            "can't do DELETE on table '{}' without key fields",
            table.name()
        )));
    }
    let mut type_codes = Vec::new();
    let mut param_nums = IndexMap::new();
    let mut where_parts = Vec::with_capacity(table.pk_fields().len());
    for pk in table.pk_fields() {
        let c = table.column(pk)?;
        let num = param_nums.len();
        where_parts.push(format!(
            "{} = {}",
            c.name(),
            placeholder(style, num + 1, c.name())
        ));
        type_codes.push(c.value_type());
        param_nums.insert(c.name().to_string(), num);
    }
    Ok(StatementTemplate {
        sql: format!(
            "DELETE FROM {} WHERE {}",
            table.name(),
            where_parts.join(" AND ")
        ),
        type_codes,
        param_nums,
    })
}

fn fk_rule(column: &Column) -> String {
    format!(
        "FOREIGN KEY ({}) REFERENCES {}({})",
        column.name(),
        column.fk_table_name().unwrap_or_default(),
        column.fk_column_name().unwrap_or_default()
    )
}

fn typed_column(table: &Table, column: &Column, dialect: &dyn SqlDialect) -> Result<String, OrmError> {
    let mut out = format!(
        "{} {}",
        column.name(),
        dialect.type2sql(column.value_type(), column.size())?
    );
    let default_clause = if column.default_value().is_null() {
        String::new()
    } else {
        format!("DEFAULT {}", dialect.sql_value(column.default_value()))
    };
    let null_clause = if column.is_nullable() && !column.is_pk() {
        ""
    } else {
        "NOT NULL"
    };
    let combined = dialect.not_null_default(null_clause, &default_clause);
    if !combined.is_empty() {
        out.push(' ');
        out.push_str(&combined);
    }
    if column.is_pk() && table_generates_pk(table) && !dialect.autoinc_flag().is_empty() {
        if !dialect.primary_key_flag().is_empty() {
            out.push(' ');
            out.push_str(dialect.primary_key_flag());
        }
        out.push(' ');
        out.push_str(dialect.autoinc_flag());
    }
    Ok(out)
}

fn table_generates_pk(table: &Table) -> bool {
    table.autoinc() || table.seq_name().is_some()
}

/// CREATE TABLE statement, with inline FK rules when the dialect keeps
/// foreign keys inside the table definition.
pub fn create_table_ddl(table: &Table, dialect: &dyn SqlDialect) -> Result<String, OrmError> {
    let mut out = format!("CREATE TABLE {} (\n", table.name());
    let count = table.size();
    for (i, column) in table.columns().iter().enumerate() {
        out.push_str("    ");
        out.push_str(&typed_column(table, column, dialect)?);
        if i + 1 != count {
            out.push(',');
        }
        out.push('\n');
    }
    // The column-level PRIMARY KEY flag covers generated keys; everything
    // else gets the table-level constraint.
    let pk_on_column = table_generates_pk(table)
        && !dialect.autoinc_flag().is_empty()
        && table.pk_fields().len() == 1;
    if !table.pk_fields().is_empty() && !pk_on_column {
        out.push_str(&format!(
            "    , PRIMARY KEY ({})\n",
            table.pk_fields().join(", ")
        ));
    }
    if dialect.fk_internal() {
        for column in table.columns() {
            if column.has_fk() {
                out.push_str(&format!("    , {}\n", fk_rule(column)));
            }
        }
    }
    out.push(')');
    out.push_str(dialect.suffix_create_table());
    Ok(out)
}

/// `ALTER TABLE ... ADD FOREIGN KEY` statements, for dialects with external
/// FK constraints.
pub fn fk_constraints_ddl(table: &Table, dialect: &dyn SqlDialect) -> Vec<String> {
    if dialect.fk_internal() {
        return Vec::new();
    }
    table
        .columns()
        .iter()
        .filter(|c| c.has_fk())
        .map(|c| format!("ALTER TABLE {} ADD {}", table.name(), fk_rule(c)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnFlags;
    use sqlweave_core::{sql_dialect, Value};

    fn order_table() -> Table {
        let mut t = Table::new("T_ORDER", "", "Order");
        t.add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
            .unwrap();
        t.add_column(Column::new(
            "CLIENT_ID",
            ValueType::LongInt,
            0,
            ColumnFlags::empty(),
        ))
        .unwrap();
        t.add_column(
            Column::new("NAME", ValueType::Str, 100, ColumnFlags::empty())
                .with_default(Value::Str("a".to_string())),
        )
        .unwrap();
        t.add_column(
            Column::new("CREATED", ValueType::DateTime, 0, ColumnFlags::empty())
                .with_default(Value::Str("sysdate".to_string())),
        )
        .unwrap();
        t.add_column(Column::new("PAID", ValueType::Decimal, 0, ColumnFlags::RO))
            .unwrap();
        t.set_seq_name("S_ORDER_ID");
        t
    }

    #[test]
    fn test_insert_excludes_ro_and_optionally_pk() {
        let t = order_table();
        let tpl = insert_sql(&t, PlaceholderStyle::Positional, true).unwrap();
        assert_eq!(
            tpl.sql,
            "INSERT INTO T_ORDER (ID, CLIENT_ID, NAME, CREATED) VALUES (?, ?, ?, ?)"
        );
        assert_eq!(tpl.param_nums.get("ID"), Some(&0));
        assert_eq!(tpl.type_codes[0], ValueType::LongInt);

        let tpl = insert_sql(&t, PlaceholderStyle::Positional, false).unwrap();
        assert_eq!(
            tpl.sql,
            "INSERT INTO T_ORDER (CLIENT_ID, NAME, CREATED) VALUES (?, ?, ?)"
        );
    }

    #[test]
    fn test_insert_numbered_and_named() {
        let t = order_table();
        let tpl = insert_sql(&t, PlaceholderStyle::Numbered, false).unwrap();
        assert_eq!(
            tpl.sql,
            "INSERT INTO T_ORDER (CLIENT_ID, NAME, CREATED) VALUES (:1, :2, :3)"
        );
        let tpl = insert_sql(&t, PlaceholderStyle::Named, false).unwrap();
        assert_eq!(
            tpl.sql,
            "INSERT INTO T_ORDER (CLIENT_ID, NAME, CREATED) VALUES (:client_id, :name, :created)"
        );
    }

    #[test]
    fn test_update_sets_non_pk_non_ro() {
        let t = order_table();
        let tpl = update_sql(&t, PlaceholderStyle::Positional).unwrap();
        assert_eq!(
            tpl.sql,
            "UPDATE T_ORDER SET CLIENT_ID = ?, NAME = ?, CREATED = ? WHERE (ID = ?)"
        );
        assert_eq!(tpl.param_nums.get("ID"), Some(&3));
        assert_eq!(tpl.type_codes.len(), 4);
    }

    #[test]
    fn test_delete_by_pk() {
        let t = order_table();
        let tpl = delete_sql(&t, PlaceholderStyle::Positional).unwrap();
        assert_eq!(tpl.sql, "DELETE FROM T_ORDER WHERE ID = ?");
    }

    #[test]
    fn test_update_without_pk_rejected() {
        let mut t = Table::new("T_LOG", "", "");
        t.add_column(Column::new("MSG", ValueType::Str, 100, ColumnFlags::NULLABLE))
            .unwrap();
        assert!(matches!(
            update_sql(&t, PlaceholderStyle::Positional),
            Err(OrmError::BadSqlOperation(_))
        ));
        assert!(matches!(
            delete_sql(&t, PlaceholderStyle::Positional),
            Err(OrmError::BadSqlOperation(_))
        ));
    }

    #[test]
    fn test_create_table_mysql_autoinc() {
        let mut t = Table::new("T_A", "", "A");
        t.add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
            .unwrap();
        t.add_column(Column::new("NAME", ValueType::Str, 40, ColumnFlags::NULLABLE))
            .unwrap();
        t.set_autoinc(true);
        let my = sql_dialect("MYSQL").unwrap();
        let sql = create_table_ddl(&t, my.as_ref()).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE T_A (\n    ID BIGINT NOT NULL PRIMARY KEY AUTO_INCREMENT,\n    \
             NAME VARCHAR(40)\n) ENGINE=INNODB DEFAULT CHARSET=utf8"
        );
    }

    #[test]
    fn test_create_table_oracle_sequence_pk() {
        let t = order_table();
        let ora = sql_dialect("ORACLE").unwrap();
        let sql = create_table_ddl(&t, ora.as_ref()).unwrap();
        // Oracle has no autoinc flag, so the PK lands on the table level.
        assert!(sql.contains(", PRIMARY KEY (ID)"));
        assert!(sql.contains("CREATED DATE DEFAULT SYSDATE"));
        assert!(sql.contains("NAME VARCHAR2(100) DEFAULT 'a'"));
    }

    #[test]
    fn test_fk_constraints_internal_vs_external() {
        let mut t = Table::new("T_B", "", "B");
        t.add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
            .unwrap();
        t.add_column(
            Column::new("A_ID", ValueType::LongInt, 0, ColumnFlags::empty())
                .with_fk("T_A", Some("ID".to_string())),
        )
        .unwrap();

        let pg = sql_dialect("POSTGRES").unwrap();
        let stmts = fk_constraints_ddl(&t, pg.as_ref());
        assert_eq!(
            stmts,
            vec!["ALTER TABLE T_B ADD FOREIGN KEY (A_ID) REFERENCES T_A(ID)".to_string()]
        );

        let lite = sql_dialect("SQLITE").unwrap();
        assert!(fk_constraints_ddl(&t, lite.as_ref()).is_empty());
        let sql = create_table_ddl(&t, lite.as_ref()).unwrap();
        assert!(sql.contains(", FOREIGN KEY (A_ID) REFERENCES T_A(ID)"));
    }
}

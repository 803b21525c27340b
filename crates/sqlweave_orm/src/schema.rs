use bitflags::bitflags;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

use sqlweave_core::{Row, Value, ValueType};

use crate::error::OrmError;
use crate::expression::{ColumnExpr, Expression, JoinExpr};

bitflags! {
    /// Column behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ColumnFlags: u32 {
        const PK = 1 << 0;
        const RO = 1 << 1;
        const NULLABLE = 1 << 2;
    }
}

/// `true` for names usable as SQL identifiers.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Derive the XML element name for a table or column: an explicit `-`
/// suppresses it, an explicit name wins, otherwise lowercase with
/// underscores turned into dashes.
pub fn mk_xml_name(name: &str, xml_name: &str) -> String {
    if xml_name == "-" {
        return String::new();
    }
    if !xml_name.is_empty() {
        return xml_name.to_string();
    }
    name.to_ascii_lowercase().replace('_', "-")
}

/// Description of one relational column.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    ty: ValueType,
    size: usize,
    flags: ColumnFlags,
    default_value: Value,
    fk_table: Option<String>,
    fk_column: Option<String>,
    xml_name: String,
    prop_name: String,
    index_name: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ValueType, size: usize, flags: ColumnFlags) -> Column {
        let name = name.into();
        let xml_name = mk_xml_name(&name, "");
        let prop_name = name.to_ascii_lowercase();
        Column {
            name,
            ty,
            size,
            flags,
            default_value: Value::Null,
            fk_table: None,
            fk_column: None,
            xml_name,
            prop_name,
            index_name: None,
        }
    }

    pub fn with_default(mut self, default_value: Value) -> Column {
        self.default_value = default_value;
        self
    }

    /// Reference a foreign table; the key column may stay unresolved until
    /// `Schema::fill_fkeys` defaults it to the target's surrogate PK.
    pub fn with_fk(mut self, fk_table: impl Into<String>, fk_column: Option<String>) -> Column {
        self.fk_table = Some(fk_table.into());
        self.fk_column = fk_column.filter(|c| !c.is_empty());
        self
    }

    pub fn with_xml_name(mut self, xml_name: &str) -> Column {
        self.xml_name = mk_xml_name(&self.name, xml_name);
        self
    }

    pub fn with_prop_name(mut self, prop_name: &str) -> Column {
        if !prop_name.is_empty() {
            self.prop_name = prop_name.to_string();
        }
        self
    }

    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Column {
        self.index_name = Some(index_name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical uppercase spelling.
    pub fn uname(&self) -> String {
        self.name.to_ascii_uppercase()
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn is_pk(&self) -> bool {
        self.flags.contains(ColumnFlags::PK)
    }

    pub fn is_ro(&self) -> bool {
        self.flags.contains(ColumnFlags::RO)
    }

    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    pub fn has_fk(&self) -> bool {
        self.fk_table.is_some()
    }

    pub fn fk_table_name(&self) -> Option<&str> {
        self.fk_table.as_deref()
    }

    pub fn fk_column_name(&self) -> Option<&str> {
        self.fk_column.as_deref()
    }

    pub fn default_value(&self) -> &Value {
        &self.default_value
    }

    pub fn xml_name(&self) -> &str {
        &self.xml_name
    }

    pub fn prop_name(&self) -> &str {
        &self.prop_name
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }
}

/// Table-qualified row identity: ordered (column, value) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub table: String,
    pub fields: Vec<(String, Value)>,
}

impl Key {
    pub fn new(table: impl Into<String>, fields: Vec<(String, Value)>) -> Key {
        Key {
            table: table.into(),
            fields,
        }
    }

    /// A key is assigned when no component is null.
    pub fn is_assigned(&self) -> bool {
        !self.fields.is_empty() && self.fields.iter().all(|(_, v)| !v.is_null())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.table)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, value.sql_str())?;
        }
        f.write_str(")")
    }
}

/// Description of a relational table.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    xml_name: String,
    class_name: String,
    seq_name: Option<String>,
    autoinc: bool,
    columns: Vec<Column>,
    /// Lookup under the original, uppercase, and lowercase spellings.
    index: HashMap<String, usize>,
    pk_fields: Vec<String>,
    depth: i32,
}

impl Table {
    pub fn new(name: impl Into<String>, xml_name: &str, class_name: impl Into<String>) -> Table {
        let name = name.into();
        let xml_name = mk_xml_name(&name, xml_name);
        Table {
            name,
            xml_name,
            class_name: class_name.into(),
            seq_name: None,
            autoinc: false,
            columns: Vec::new(),
            index: HashMap::new(),
            pk_fields: Vec::new(),
            depth: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn xml_name(&self) -> &str {
        &self.xml_name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn seq_name(&self) -> Option<&str> {
        self.seq_name.as_deref()
    }

    pub fn set_seq_name(&mut self, seq_name: impl Into<String>) {
        let seq_name = seq_name.into();
        self.seq_name = if seq_name.is_empty() {
            None
        } else {
            Some(seq_name)
        };
    }

    pub fn autoinc(&self) -> bool {
        self.autoinc
    }

    pub fn set_autoinc(&mut self, autoinc: bool) {
        self.autoinc = autoinc;
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
    }

    /// Append a column, or replace an existing one with the same name.
    pub fn add_column(&mut self, column: Column) -> Result<(), OrmError> {
        if !is_identifier(column.name()) {
            return Err(OrmError::BadColumnName {
                table: self.name.clone(),
                column: column.name().to_string(),
            });
        }
        let uname = column.uname();
        let idx = match self.index.get(&uname) {
            Some(&idx) => {
                self.columns[idx] = column;
                idx
            }
            None => {
                let idx = self.columns.len();
                self.index.insert(column.name().to_string(), idx);
                self.index.insert(uname, idx);
                self.index.insert(column.name().to_ascii_lowercase(), idx);
                self.columns.push(column);
                idx
            }
        };
        if self.columns[idx].is_pk() && !self.pk_fields.contains(&self.columns[idx].name().to_string())
        {
            self.pk_fields.push(self.columns[idx].name().to_string());
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn idx_by_name(&self, col_name: &str) -> Result<usize, OrmError> {
        self.index
            .get(col_name)
            .copied()
            .ok_or_else(|| OrmError::ColumnNotFound {
                table: self.name.clone(),
                column: col_name.to_string(),
            })
    }

    pub fn column(&self, col_name: &str) -> Result<&Column, OrmError> {
        Ok(&self.columns[self.idx_by_name(col_name)?])
    }

    pub fn column_at(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    pub fn pk_fields(&self) -> &[String] {
        &self.pk_fields
    }

    /// Name of the surrogate primary key: exactly one PK column of integer
    /// or longint type.
    pub fn surrogate_pk(&self) -> Result<&str, OrmError> {
        if self.pk_fields.len() != 1 {
            return Err(OrmError::NoSurrogatePk(self.name.clone()));
        }
        let c = self.column(&self.pk_fields[0])?;
        if c.value_type() != ValueType::Int && c.value_type() != ValueType::LongInt {
            return Err(OrmError::NoSurrogatePk(self.name.clone()));
        }
        Ok(c.name())
    }

    /// Build the key from a full row of values in column order.
    pub fn mk_key(&self, row_values: &[Value]) -> Result<Key, OrmError> {
        let mut fields = Vec::with_capacity(self.pk_fields.len());
        for pk in &self.pk_fields {
            let idx = self.idx_by_name(pk)?;
            fields.push((pk.clone(), row_values[idx].clone()));
        }
        Ok(Key::new(self.name.clone(), fields))
    }

    /// Build the key from a fetched row of (name, value) pairs.
    pub fn mk_key_from_row(&self, row: &Row) -> Result<Key, OrmError> {
        let mut fields = Vec::with_capacity(self.pk_fields.len());
        for pk in &self.pk_fields {
            let value = row
                .iter()
                .find(|(n, _)| self.index.get(n).copied() == self.index.get(pk.as_str()).copied())
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            fields.push((pk.clone(), value));
        }
        Ok(Key::new(self.name.clone(), fields))
    }

    /// Surrogate-PK key from a plain id, carrying the column's own tag.
    pub fn mk_id_key(&self, id: i64) -> Result<Key, OrmError> {
        let pk = self.surrogate_pk()?.to_string();
        let value = Value::LongInt(id).fix_type(self.column(&pk)?.value_type())?;
        Ok(Key::new(self.name.clone(), vec![(pk, value)]))
    }

    /// Foreign-key columns pointing at the relation's master table: either
    /// the explicit `key` attribute or all columns whose FK target matches.
    pub fn fk_fields_for(&self, rel: &Relation) -> Result<Vec<String>, OrmError> {
        let master_tbl = rel.table_name(0).unwrap_or_default().to_string();
        if rel.has_attr(1, "key") {
            let mut parts = Vec::new();
            for part in rel.attr(1, "key")?.split(',') {
                let c = self.column(part.trim())?;
                if !c.has_fk() || c.fk_table_name() != Some(master_tbl.as_str()) {
                    return Err(OrmError::BadColumnName {
                        table: self.name.clone(),
                        column: c.name().to_string(),
                    });
                }
                parts.push(c.name().to_string());
            }
            Ok(parts)
        } else {
            Ok(self
                .columns
                .iter()
                .filter(|c| c.has_fk() && c.fk_table_name() == Some(master_tbl.as_str()))
                .map(|c| c.name().to_string())
                .collect())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToMany,
    ManyToMany,
    ParentToChild,
}

/// What happens to slaves when their master is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cascade {
    Restrict,
    Nullify,
    Delete,
}

pub type RelationAttrs = IndexMap<String, String>;

/// Declarative association between two table classes.
#[derive(Debug, Clone)]
pub struct Relation {
    kind: RelationKind,
    cascade: Cascade,
    sides: [String; 2],
    attrs: [RelationAttrs; 2],
    /// Resolved by `Schema::fill_fkeys`.
    table_names: [Option<String>; 2],
    fk_fields: Vec<String>,
}

impl Relation {
    pub fn new(
        kind: RelationKind,
        side_one: impl Into<String>,
        attrs_one: RelationAttrs,
        side_many: impl Into<String>,
        attrs_many: RelationAttrs,
        cascade: Cascade,
    ) -> Relation {
        Relation {
            kind,
            cascade,
            sides: [side_one.into(), side_many.into()],
            attrs: [attrs_one, attrs_many],
            table_names: [None, None],
            fk_fields: Vec::new(),
        }
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn cascade(&self) -> Cascade {
        self.cascade
    }

    /// Class name on side `n` (0 = one/master, 1 = many/slave).
    pub fn side(&self, n: usize) -> &str {
        &self.sides[n]
    }

    pub fn has_attr(&self, n: usize, name: &str) -> bool {
        self.attrs[n].contains_key(name)
    }

    pub fn attr(&self, n: usize, name: &str) -> Result<&str, OrmError> {
        self.attrs[n]
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| OrmError::BadAttributeName {
                object: "relation".to_string(),
                attr: name.to_string(),
            })
    }

    pub fn attrs(&self, n: usize) -> &RelationAttrs {
        &self.attrs[n]
    }

    /// Resolved table name on side `n`; present after `fill_fkeys`.
    pub fn table_name(&self, n: usize) -> Option<&str> {
        self.table_names[n].as_deref()
    }

    /// FK columns on the many side; present after `fill_fkeys`.
    pub fn fk_fields(&self) -> &[String] {
        &self.fk_fields
    }

    fn same_as(&self, other: &Relation) -> bool {
        self.kind == other.kind
            && self.cascade == other.cascade
            && self.sides == other.sides
            && self.attrs == other.attrs
    }

    /// Equality of master PK columns and slave FK columns, for joins.
    pub fn join_condition(&self, schema: &Schema) -> Result<Expression, OrmError> {
        let t1 = self
            .table_name(0)
            .ok_or_else(|| OrmError::integrity("relation tables unresolved"))?;
        let t2 = self
            .table_name(1)
            .ok_or_else(|| OrmError::integrity("relation tables unresolved"))?;
        let master = schema.table(t1)?;
        let mut expr = Expression::empty();
        for (pk, fk) in master.pk_fields().iter().zip(self.fk_fields.iter()) {
            let eq = ColumnExpr::new(t1, pk).eq(ColumnExpr::new(t2, fk));
            expr = expr & eq;
        }
        Ok(expr)
    }
}

/// The in-memory metamodel: owns tables and relations, resolves foreign
/// keys, and computes the dependency depths that order flushes and DDL.
#[derive(Debug, Default, Clone)]
pub struct Schema {
    tables: IndexMap<String, Table>,
    /// Case variants to the canonical table name.
    lookup: HashMap<String, String>,
    relations: Vec<Relation>,
    rels_by_class: HashMap<String, Vec<usize>>,
}

impl Schema {
    pub fn new() -> Schema {
        Schema::default()
    }

    pub fn add_table(&mut self, table: Table) -> Result<(), OrmError> {
        if !is_identifier(table.name()) {
            return Err(OrmError::BadTableName(table.name().to_string()));
        }
        if table.size() == 0 {
            return Err(OrmError::TableWithoutColumns(table.name().to_string()));
        }
        let name = table.name().to_string();
        self.lookup.insert(name.clone(), name.clone());
        self.lookup.insert(name.to_ascii_uppercase(), name.clone());
        self.lookup.insert(name.to_ascii_lowercase(), name.clone());
        self.tables.insert(name, table);
        Ok(())
    }

    /// Register a relation; an identical one is ignored.
    pub fn add_relation(&mut self, rel: Relation) {
        if self.relations.iter().any(|r| r.same_as(&rel)) {
            return;
        }
        let idx = self.relations.len();
        self.rels_by_class
            .entry(rel.side(0).to_string())
            .or_default()
            .push(idx);
        if rel.side(0) != rel.side(1) {
            self.rels_by_class
                .entry(rel.side(1).to_string())
                .or_default()
                .push(idx);
        }
        self.relations.push(rel);
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation_at(&self, idx: usize) -> &Relation {
        &self.relations[idx]
    }

    /// Case-insensitive table lookup.
    pub fn table(&self, name: &str) -> Result<&Table, OrmError> {
        let canonical = self
            .lookup
            .get(name)
            .or_else(|| self.lookup.get(&name.to_ascii_uppercase()))
            .ok_or_else(|| OrmError::TableNotFound(name.to_string()))?;
        self.tables
            .get(canonical)
            .ok_or_else(|| OrmError::TableNotFound(name.to_string()))
    }

    /// Positional index of a table, for handles that must not hold
    /// references into the schema.
    pub fn table_index(&self, name: &str) -> Result<usize, OrmError> {
        let canonical = self
            .lookup
            .get(name)
            .or_else(|| self.lookup.get(&name.to_ascii_uppercase()))
            .ok_or_else(|| OrmError::TableNotFound(name.to_string()))?;
        self.tables
            .get_index_of(canonical)
            .ok_or_else(|| OrmError::TableNotFound(name.to_string()))
    }

    pub fn table_at_index(&self, idx: usize) -> &Table {
        &self.tables[idx]
    }

    pub fn table_by_class(&self, class_name: &str) -> Result<&Table, OrmError> {
        self.tables
            .values()
            .find(|t| t.class_name() == class_name)
            .ok_or_else(|| OrmError::ClassNotFound(class_name.to_string()))
    }

    /// Resolve FK column defaults and bind relation tables and FK field
    /// lists. Must run once after all tables and relations are added.
    pub fn fill_fkeys(&mut self) -> Result<(), OrmError> {
        // Default unresolved FK columns to the target's surrogate PK.
        let mut fixes: Vec<(String, usize, String)> = Vec::new();
        for table in self.tables.values() {
            for (idx, col) in table.columns().iter().enumerate() {
                if let (Some(fk_table), None) = (col.fk_table_name(), col.fk_column_name()) {
                    if let Ok(target) = self.table(fk_table) {
                        if let Ok(pk) = target.surrogate_pk() {
                            fixes.push((table.name().to_string(), idx, pk.to_string()));
                        }
                    }
                }
            }
        }
        for (table_name, idx, pk) in fixes {
            if let Some(table) = self.tables.get_mut(&table_name) {
                table.columns[idx].fk_column = Some(pk);
            }
        }

        // Bind relation sides and slave-side FK fields.
        for i in 0..self.relations.len() {
            let (class0, class1, kind) = {
                let r = &self.relations[i];
                (r.side(0).to_string(), r.side(1).to_string(), r.kind())
            };
            if kind != RelationKind::OneToMany {
                return Err(OrmError::integrity(format!(
                    "relation kind {:?} between '{}' and '{}' is not supported",
                    kind, class0, class1
                )));
            }
            let t0 = self.table_by_class(&class0)?.name().to_string();
            let t1 = self.table_by_class(&class1)?.name().to_string();
            self.relations[i].table_names = [Some(t0.clone()), Some(t1.clone())];
            let fkey_parts = {
                let slave = self.table(&t1)?;
                slave.fk_fields_for(&self.relations[i])?
            };
            let master_pk_count = self.table(&t0)?.pk_fields().len();
            if fkey_parts.is_empty() || fkey_parts.len() != master_pk_count {
                return Err(OrmError::FkNotFound {
                    master: t0,
                    slave: t1,
                });
            }
            self.relations[i].fk_fields = fkey_parts;
        }
        Ok(())
    }

    /// Compute table depths along FK chains; reject cyclic schemas.
    pub fn check_cycles(&mut self) -> Result<(), OrmError> {
        // Parent -> children edges; roots hang off the synthetic "" parent.
        let mut tree: Vec<(String, String)> = Vec::new();
        for table in self.tables.values() {
            let mut has_parent = false;
            for col in table.columns() {
                if let Some(fk_table) = col.fk_table_name() {
                    self.check_foreign_key(table.name(), fk_table, col.fk_column_name())?;
                    let canonical = self.table(fk_table)?.name().to_string();
                    tree.push((canonical, table.name().to_string()));
                    has_parent = true;
                }
            }
            if !has_parent {
                tree.push((String::new(), table.name().to_string()));
            }
        }
        // A schema where every table has an FK parent has no root to walk
        // from; the reference chain must loop back on itself.
        if !self.tables.is_empty() && !tree.iter().any(|(parent, _)| parent.is_empty()) {
            return Err(OrmError::integrity("cyclic references in DB schema found"));
        }

        let mut depths: HashMap<String, i32> =
            self.tables.keys().map(|n| (n.clone(), 0)).collect();
        let edge_count = tree.len() as i32;
        let mut pending: VecDeque<String> = VecDeque::new();
        pending.push_back(String::new());
        while let Some(parent) = pending.pop_front() {
            let parent_depth = if parent.is_empty() {
                0
            } else {
                depths.get(&parent).copied().unwrap_or(0)
            };
            for (p, child) in tree.iter().filter(|(p, _)| *p == parent) {
                let _ = p;
                if pending.contains(child) {
                    continue;
                }
                pending.push_back(child.clone());
                let new_depth = parent_depth + 1;
                if new_depth > edge_count {
                    return Err(OrmError::integrity("cyclic references in DB schema found"));
                }
                let entry = depths.entry(child.clone()).or_insert(0);
                if *entry < new_depth {
                    *entry = new_depth;
                }
            }
        }
        for (name, depth) in depths {
            if let Some(table) = self.tables.get_mut(&name) {
                table.set_depth(depth);
            }
        }
        Ok(())
    }

    fn check_foreign_key(
        &self,
        table: &str,
        fk_table: &str,
        fk_column: Option<&str>,
    ) -> Result<(), OrmError> {
        let target = self.table(fk_table).map_err(|_| {
            OrmError::integrity(format!(
                "table '{}' not found as foreign key target for '{}'",
                fk_table, table
            ))
        })?;
        let fk_column = fk_column.unwrap_or("");
        target.column(fk_column).map_err(|_| {
            OrmError::integrity(format!(
                "field '{}' of table '{}' not found as foreign key field for '{}'",
                fk_column, fk_table, table
            ))
        })?;
        Ok(())
    }

    /// Find a relation for `class1`, optionally constrained by the property
    /// name on `prop_side` and/or the class on the other end. A second
    /// match is an ambiguity error.
    pub fn find_relation(
        &self,
        class1: &str,
        relation_name: Option<&str>,
        class2: Option<&str>,
        prop_side: usize,
    ) -> Result<Option<usize>, OrmError> {
        let mut found: Option<usize> = None;
        let candidates = match self.rels_by_class.get(class1) {
            Some(c) => c.as_slice(),
            None => return Ok(None),
        };
        for &idx in candidates {
            let r = &self.relations[idx];
            let classes_match = match class2 {
                None => true,
                Some(c2) => {
                    (r.side(0) == class1 && r.side(1) == c2)
                        || (r.side(0) == c2 && r.side(1) == class1)
                }
            };
            if !classes_match {
                continue;
            }
            let name_matches = match relation_name {
                None => true,
                Some(name) => {
                    r.has_attr(prop_side, "property")
                        && r.attr(prop_side, "property")? == name
                }
            };
            if !name_matches {
                continue;
            }
            if let Some(prev) = found {
                if prev != idx {
                    return Err(OrmError::AmbiguousRelation(
                        class1.to_string(),
                        class2.unwrap_or("").to_string(),
                    ));
                }
            } else {
                found = Some(idx);
            }
        }
        Ok(found)
    }

    fn find_single_relation_between_tables(
        &self,
        tbl1: &str,
        tbl2: &str,
    ) -> Result<&Relation, OrmError> {
        let class1 = self.table(tbl1)?.class_name().to_string();
        let class2 = self.table(tbl2)?.class_name().to_string();
        let idx = self
            .find_relation(&class1, None, Some(&class2), 0)?
            .ok_or_else(|| OrmError::FkNotFound {
                master: tbl1.to_string(),
                slave: tbl2.to_string(),
            })?;
        Ok(&self.relations[idx])
    }

    /// Left-associative chain of JOINs over consecutive pairs of tables,
    /// using the uniquely determined relation between each pair.
    pub fn join_expr(&self, tables: &[&str]) -> Result<Expression, OrmError> {
        let mut iter = tables.iter();
        let first = match iter.next() {
            Some(t) => *t,
            None => return Ok(Expression::empty()),
        };
        let mut expr = Expression::sql(first);
        let mut prev = first;
        for &next in iter {
            let rel = self.find_single_relation_between_tables(prev, next)?;
            let cond = rel.join_condition(self)?;
            expr = JoinExpr::new(expr, Expression::sql(next), cond).into_expr();
            prev = next;
        }
        Ok(expr)
    }
}

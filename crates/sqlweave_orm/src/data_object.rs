use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use sqlweave_core::{Row, Value};

use crate::error::OrmError;
use crate::expression::{Expression, ExpressionList, KeyFilter};
use crate::schema::{Cascade, Key, Relation, Schema, Table};
use crate::session::Session;

/// Lifecycle of a row avatar.
///
/// `New` is not yet in the database; `Ghost` has a known key but unloaded
/// attributes; `Sync` matches the database; `Dirty` was modified after
/// load; `ToBeDeleted` awaits the flush DELETE; `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    New,
    Ghost,
    Sync,
    Dirty,
    ToBeDeleted,
    Deleted,
}

/// How a delete walks the cascade graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionMode {
    /// Verify preconditions first, then delete.
    Normal,
    /// Walk and verify only; no state changes.
    DryRun,
    /// Delete without re-verifying.
    Unchecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationStatus {
    /// Slaves may exist in the database that are not loaded yet.
    Incomplete,
    Sync,
}

pub type DataObjectPtr = Rc<RefCell<DataObject>>;
pub type RelationObjectPtr = Rc<RefCell<RelationObject>>;

/// In-memory avatar of one table row: a value per column, a status, and
/// the relation objects linking it to masters and slaves.
pub struct DataObject {
    schema: Arc<Schema>,
    table_idx: usize,
    values: Vec<Value>,
    status: ObjectStatus,
    depth: i32,
    session: Option<Weak<Session>>,
    /// Relations where this object is the master; owned here.
    master_relations: Vec<RelationObjectPtr>,
    /// Relations where this object is a slave; non-owning.
    slave_relations: Vec<Weak<RefCell<RelationObject>>>,
    cached_key: Option<Key>,
}

impl DataObject {
    fn new_with_status(
        schema: Arc<Schema>,
        table_name: &str,
        status: ObjectStatus,
    ) -> Result<DataObjectPtr, OrmError> {
        let table_idx = schema.table_index(table_name)?;
        let values = vec![Value::Null; schema.table_at_index(table_idx).size()];
        Ok(Rc::new(RefCell::new(DataObject {
            schema,
            table_idx,
            values,
            status,
            depth: 0,
            session: None,
            master_relations: Vec::new(),
            slave_relations: Vec::new(),
            cached_key: None,
        })))
    }

    /// A fresh object destined for INSERT on the next flush.
    pub fn create_new(schema: Arc<Schema>, table_name: &str) -> Result<DataObjectPtr, OrmError> {
        Self::new_with_status(schema, table_name, ObjectStatus::New)
    }

    /// A shell with only its key known; used by the identity map.
    pub(crate) fn create_ghost(schema: Arc<Schema>, key: &Key) -> Result<DataObjectPtr, OrmError> {
        let obj = Self::new_with_status(schema, &key.table, ObjectStatus::Ghost)?;
        {
            let mut o = obj.borrow_mut();
            for (name, value) in &key.fields {
                let idx = o.table().idx_by_name(name)?;
                o.values[idx] = value.clone();
            }
        }
        Ok(obj)
    }

    pub fn table(&self) -> &Table {
        self.schema.table_at_index(self.table_idx)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn status(&self) -> ObjectStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub(crate) fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
    }

    pub fn session(&self) -> Option<Rc<Session>> {
        self.session.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_session(&mut self, session: Option<Weak<Session>>) {
        self.session = session;
    }

    pub(crate) fn in_session(&self) -> bool {
        self.session.is_some()
    }

    fn require_session(&self) -> Result<Rc<Session>, OrmError> {
        self.session().ok_or(OrmError::NoSessionAttached)
    }

    /// Load attributes on demand before touching a non-PK column of a
    /// Ghost.
    fn lazy_load(&mut self, col_idx: usize) -> Result<(), OrmError> {
        if self.status == ObjectStatus::Ghost && !self.table().column_at(col_idx).is_pk() {
            self.load()?;
        }
        Ok(())
    }

    /// Read a column value.
    pub fn get(&mut self, col_name: &str) -> Result<Value, OrmError> {
        let idx = self.table().idx_by_name(col_name)?;
        self.lazy_load(idx)?;
        Ok(self.values[idx].clone())
    }

    /// Read without triggering a load; nulls for unloaded attributes.
    pub fn peek(&self, col_name: &str) -> Result<Value, OrmError> {
        let idx = self.table().idx_by_name(col_name)?;
        Ok(self.values[idx].clone())
    }

    /// Write a column value.
    ///
    /// Writing a non-PK column of a Ghost loads the row first; a
    /// successful non-PK write on Sync moves the object to Dirty. PK
    /// mutation on an attached object is rejected unless the current value
    /// is null, and read-only columns are rejected outright.
    pub fn set(&mut self, col_name: &str, value: impl Into<Value>) -> Result<(), OrmError> {
        let idx = self.table().idx_by_name(col_name)?;
        let col = self.table().column_at(idx);
        if col.is_ro() {
            return Err(OrmError::ReadOnlyColumn {
                table: self.table().name().to_string(),
                column: col.name().to_string(),
            });
        }
        let value = value.into().fix_type(col.value_type())?;
        let is_pk = col.is_pk();
        self.lazy_load(idx)?;
        if is_pk && self.in_session() && self.values[idx] != value && !self.values[idx].is_null() {
            return Err(OrmError::ReadOnlyColumn {
                table: self.table().name().to_string(),
                column: self.table().column_at(idx).name().to_string(),
            });
        }
        self.values[idx] = value;
        if is_pk {
            self.cached_key = None;
        } else if self.status == ObjectStatus::Sync {
            self.status = ObjectStatus::Dirty;
        }
        Ok(())
    }

    pub(crate) fn set_raw(&mut self, idx: usize, value: Value) {
        self.values[idx] = value;
        if self.table().column_at(idx).is_pk() {
            self.cached_key = None;
        }
    }

    /// The object's key; computed lazily and memoized until a PK column
    /// changes.
    pub fn key(&mut self) -> Result<Key, OrmError> {
        if let Some(key) = &self.cached_key {
            return Ok(key.clone());
        }
        let key = self.table().mk_key(&self.values)?;
        self.cached_key = Some(key.clone());
        Ok(key)
    }

    pub fn assigned_key(&mut self) -> Result<bool, OrmError> {
        Ok(self.key()?.is_assigned())
    }

    /// All column values as a fetched-row shape, optionally without the
    /// key columns.
    pub fn values_row(&self, include_pk: bool) -> Row {
        self.table()
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, c)| include_pk || !c.is_pk())
            .map(|(i, c)| (c.name().to_string(), self.values[i].clone()))
            .collect()
    }

    /// Fetch the row by key and become Sync. Exactly one row is expected.
    pub fn load(&mut self) -> Result<(), OrmError> {
        let session = self.require_session()?;
        let key = self.key()?;
        let filter = KeyFilter::new(key).into_expr();
        let table_name = self.table().name().to_string();
        let cols: ExpressionList = self
            .table()
            .columns()
            .iter()
            .map(|c| Expression::sql(c.name()))
            .collect();
        let rows = session.engine_mut().select(
            cols.into_expr(),
            Expression::sql(table_name.clone()),
            filter.clone(),
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            -1,
            false,
        )?;
        if rows.len() != 1 {
            return Err(OrmError::ObjectNotFoundByKey(format!(
                "{}({})",
                table_name,
                filter.get_sql()?
            )));
        }
        self.fill_from_row(&rows[0])
    }

    pub(crate) fn fill_from_row(&mut self, row: &Row) -> Result<(), OrmError> {
        for (name, value) in row {
            let idx = self.table().idx_by_name(name)?;
            let fixed = value.fix_type(self.table().column_at(idx).value_type())?;
            self.values[idx] = fixed;
        }
        self.cached_key = None;
        self.status = ObjectStatus::Sync;
        Ok(())
    }

    pub fn master_relations(&self) -> &[RelationObjectPtr] {
        &self.master_relations
    }

    /// Longest slave-chain depth; propagates increments through outgoing
    /// relations and trips on cycles against the originating object.
    pub fn calc_depth(
        obj: &DataObjectPtr,
        depth: i32,
        origin: Option<&DataObjectPtr>,
    ) -> Result<(), OrmError> {
        let relations = {
            let mut o = obj.borrow_mut();
            if depth <= o.depth {
                return Ok(());
            }
            o.depth = depth;
            o.master_relations.clone()
        };
        for ro in relations {
            RelationObject::calc_depth(&ro, depth + 1, origin)?;
        }
        Ok(())
    }

    fn find_or_create_relation(master: &DataObjectPtr, rel_idx: usize) -> RelationObjectPtr {
        if let Some(existing) = master
            .borrow()
            .master_relations
            .iter()
            .find(|ro| ro.borrow().rel_idx == rel_idx)
        {
            return Rc::clone(existing);
        }
        let schema = Arc::clone(&master.borrow().schema);
        let ro = Rc::new(RefCell::new(RelationObject {
            schema,
            rel_idx,
            master: Rc::downgrade(master),
            slaves: Vec::new(),
            status: RelationStatus::Incomplete,
        }));
        master.borrow_mut().master_relations.push(Rc::clone(&ro));
        ro
    }

    /// Register `slave` under `master` for the given relation and
    /// recompute depths.
    pub fn link(
        master: &DataObjectPtr,
        slave: &DataObjectPtr,
        rel_idx: usize,
    ) -> Result<RelationObjectPtr, OrmError> {
        let ro = Self::find_or_create_relation(master, rel_idx);
        {
            let mut r = ro.borrow_mut();
            if !r.slaves.iter().any(|s| Rc::ptr_eq(s, slave)) {
                r.slaves.push(Rc::clone(slave));
            }
        }
        {
            let mut s = slave.borrow_mut();
            if !s
                .slave_relations
                .iter()
                .any(|w| w.upgrade().is_some_and(|r| Rc::ptr_eq(&r, &ro)))
            {
                s.slave_relations.push(Rc::downgrade(&ro));
            }
        }
        let master_depth = master.borrow().depth;
        Self::calc_depth(slave, master_depth + 1, Some(master))?;
        Ok(ro)
    }

    fn resolve_relation(
        obj: &DataObjectPtr,
        relation_name: &str,
        prop_side: usize,
    ) -> Result<usize, OrmError> {
        let (schema, class) = {
            let o = obj.borrow();
            (Arc::clone(&o.schema), o.table().class_name().to_string())
        };
        schema
            .find_relation(&class, Some(relation_name), None, prop_side)?
            .ok_or_else(|| OrmError::RelationNotFound {
                class,
                relation: relation_name.to_string(),
            })
    }

    /// Link `master` to `slave` through the master-side property name.
    pub fn link_to_slave(
        master: &DataObjectPtr,
        slave: &DataObjectPtr,
        relation_name: &str,
    ) -> Result<RelationObjectPtr, OrmError> {
        let rel_idx = Self::resolve_relation(master, relation_name, 0)?;
        Self::link(master, slave, rel_idx)
    }

    /// Link `slave` to `master` through the slave-side property name.
    pub fn link_to_master(
        slave: &DataObjectPtr,
        master: &DataObjectPtr,
        relation_name: &str,
    ) -> Result<RelationObjectPtr, OrmError> {
        let rel_idx = Self::resolve_relation(slave, relation_name, 1)?;
        Self::link(master, slave, rel_idx)
    }

    /// Resolve the master object through the slave's FK values, via the
    /// identity map.
    pub fn get_master(
        obj: &DataObjectPtr,
        relation_name: &str,
    ) -> Result<DataObjectPtr, OrmError> {
        let rel_idx = Self::resolve_relation(obj, relation_name, 1)?;
        let (schema, session) = {
            let o = obj.borrow();
            (Arc::clone(&o.schema), o.require_session()?)
        };
        let rel = schema.relation_at(rel_idx);
        let master_tbl = schema.table(
            rel.table_name(0)
                .ok_or_else(|| OrmError::integrity("relation tables unresolved"))?,
        )?;
        let mut fields = Vec::with_capacity(rel.fk_fields().len());
        for (pk, fk) in master_tbl.pk_fields().iter().zip(rel.fk_fields()) {
            let value = obj.borrow_mut().get(fk)?;
            fields.push((pk.clone(), value));
        }
        let fkey = Key::new(master_tbl.name().to_string(), fields);
        if !fkey.is_assigned() {
            return Err(OrmError::ObjectNotFoundByKey(format!(
                "{} (null foreign key)",
                fkey
            )));
        }
        let master = session.get_lazy(fkey)?;
        Self::link(&master, obj, rel_idx)?;
        Ok(master)
    }

    /// The relation object holding this master's slaves, creating an
    /// Incomplete one on first use.
    pub fn get_slaves(
        obj: &DataObjectPtr,
        relation_name: &str,
    ) -> Result<RelationObjectPtr, OrmError> {
        let rel_idx = Self::resolve_relation(obj, relation_name, 0)?;
        Ok(Self::find_or_create_relation(obj, rel_idx))
    }

    /// Push the master's generated key into every linked slave's FK
    /// columns.
    pub fn refresh_slaves_fkeys(obj: &DataObjectPtr) -> Result<(), OrmError> {
        let relations = obj.borrow().master_relations.clone();
        for ro in relations {
            RelationObject::refresh_slaves_fkeys(&ro)?;
        }
        Ok(())
    }

    /// Delete this object, honoring each outgoing relation's cascade
    /// policy. A dry-run pass verifies preconditions before anything is
    /// modified.
    pub fn delete_object(
        obj: &DataObjectPtr,
        mode: DeletionMode,
        depth: i32,
    ) -> Result<(), OrmError> {
        if mode != DeletionMode::Unchecked {
            Self::delete_master_relations(obj, DeletionMode::DryRun, depth + 1)?;
        }
        if mode != DeletionMode::DryRun {
            Self::delete_master_relations(obj, DeletionMode::Unchecked, depth + 1)?;
            Self::exclude_from_slave_relations(obj);
            let mut o = obj.borrow_mut();
            if o.status == ObjectStatus::New {
                o.status = ObjectStatus::Deleted;
            } else {
                o.depth = depth;
                o.status = ObjectStatus::ToBeDeleted;
            }
        }
        Ok(())
    }

    /// Delete with the default checked mode.
    pub fn delete(obj: &DataObjectPtr) -> Result<(), OrmError> {
        Self::delete_object(obj, DeletionMode::Normal, 0)
    }

    fn delete_master_relations(
        obj: &DataObjectPtr,
        mode: DeletionMode,
        depth: i32,
    ) -> Result<(), OrmError> {
        let relations = obj.borrow().master_relations.clone();
        for ro in &relations {
            RelationObject::delete_master(ro, mode, depth)?;
        }
        if mode != DeletionMode::DryRun {
            obj.borrow_mut().master_relations.clear();
        }
        Ok(())
    }

    fn exclude_from_slave_relations(obj: &DataObjectPtr) {
        let relations: Vec<_> = obj.borrow().slave_relations.clone();
        for weak in relations {
            if let Some(ro) = weak.upgrade() {
                RelationObject::exclude_slave(&ro, obj);
            }
        }
        obj.borrow_mut().slave_relations.clear();
    }

    /// Null out the FK columns that tie this object to the given relation.
    fn set_free_from(obj: &DataObjectPtr, ro: &RelationObject) -> Result<(), OrmError> {
        let fk_fields = ro.relation().fk_fields().to_vec();
        let mut o = obj.borrow_mut();
        for fk in fk_fields {
            o.set(&fk, Value::Null)?;
        }
        Ok(())
    }
}

/// Per-master instance of a relation: the set of slaves currently linked
/// in memory, plus whether the database may hold more.
pub struct RelationObject {
    schema: Arc<Schema>,
    rel_idx: usize,
    master: Weak<RefCell<DataObject>>,
    slaves: Vec<DataObjectPtr>,
    status: RelationStatus,
}

impl RelationObject {
    pub fn relation(&self) -> &Relation {
        self.schema.relation_at(self.rel_idx)
    }

    pub fn status(&self) -> RelationStatus {
        self.status
    }

    pub fn master(&self) -> Option<DataObjectPtr> {
        self.master.upgrade()
    }

    pub fn slaves(&self) -> &[DataObjectPtr] {
        &self.slaves
    }

    fn require_master(&self) -> Result<DataObjectPtr, OrmError> {
        self.master
            .upgrade()
            .ok_or_else(|| OrmError::integrity("relation object lost its master"))
    }

    /// The slave-table key selecting this master's slaves by FK columns.
    pub fn gen_fkey(&self) -> Result<Key, OrmError> {
        let rel = self.relation();
        let master_tbl = self.schema.table(
            rel.table_name(0)
                .ok_or_else(|| OrmError::integrity("relation tables unresolved"))?,
        )?;
        let slave_tbl = rel
            .table_name(1)
            .ok_or_else(|| OrmError::integrity("relation tables unresolved"))?
            .to_string();
        let master = self.require_master()?;
        let mut fields = Vec::with_capacity(rel.fk_fields().len());
        for (pk, fk) in master_tbl.pk_fields().iter().zip(rel.fk_fields()) {
            let value = master.borrow_mut().get(pk)?;
            fields.push((fk.clone(), value));
        }
        Ok(Key::new(slave_tbl, fields))
    }

    /// Slave count: from memory when Sync, otherwise a COUNT(*) filtered
    /// by the FK predicate.
    pub fn count_slaves(ro: &RelationObjectPtr) -> Result<u64, OrmError> {
        let (fkey, slave_tbl, session) = {
            let r = ro.borrow();
            if r.status == RelationStatus::Sync {
                return Ok(r.slaves.len() as u64);
            }
            let master = r.require_master()?;
            let session = master.borrow().require_session()?;
            let rel = r.relation();
            let slave_tbl = rel
                .table_name(1)
                .ok_or_else(|| OrmError::integrity("relation tables unresolved"))?
                .to_string();
            (r.gen_fkey()?, slave_tbl, session)
        };
        let filter = KeyFilter::new(fkey).into_expr();
        let rows = session.engine_mut().select(
            Expression::sql("COUNT(*) RCNT"),
            Expression::sql(slave_tbl.clone()),
            filter.clone(),
            Expression::empty(),
            Expression::empty(),
            Expression::empty(),
            -1,
            false,
        )?;
        if rows.len() != 1 {
            return Err(OrmError::ObjectNotFoundByKey(format!(
                "COUNT(*) FOR {}({})",
                slave_tbl,
                filter.get_sql()?
            )));
        }
        Ok(rows[0]
            .first()
            .map(|(_, v)| v.as_longint())
            .transpose()?
            .unwrap_or(0) as u64)
    }

    /// Fetch all slaves in one SELECT, wire them into the identity map and
    /// this relation, and become Sync.
    pub fn lazy_load_slaves(ro: &RelationObjectPtr) -> Result<(), OrmError> {
        let (fkey, slave_tbl_name, order_by, session, master) = {
            let r = ro.borrow();
            if r.status != RelationStatus::Incomplete {
                return Ok(());
            }
            let master = r.require_master()?;
            let session = master.borrow().require_session()?;
            let rel = r.relation();
            let slave_tbl = rel
                .table_name(1)
                .ok_or_else(|| OrmError::integrity("relation tables unresolved"))?
                .to_string();
            let order_by = if rel.has_attr(1, "order-by") {
                rel.attr(1, "order-by")?.to_string()
            } else {
                String::new()
            };
            (r.gen_fkey()?, slave_tbl, order_by, session, master)
        };
        let schema = Arc::clone(session.schema());
        let slave_tbl = schema.table(&slave_tbl_name)?;
        let cols: ExpressionList = slave_tbl
            .columns()
            .iter()
            .map(|c| Expression::sql(c.name()))
            .collect();
        let rows = session.engine_mut().select(
            cols.into_expr(),
            Expression::sql(slave_tbl_name.clone()),
            KeyFilter::new(fkey).into_expr(),
            Expression::empty(),
            Expression::empty(),
            Expression::sql(order_by),
            -1,
            false,
        )?;
        let rel_idx = ro.borrow().rel_idx;
        for row in rows {
            let pkey = slave_tbl.mk_key_from_row(&row)?;
            let slave = session.get_lazy(pkey)?;
            slave.borrow_mut().fill_from_row(&row)?;
            DataObject::link(&master, &slave, rel_idx)?;
        }
        ro.borrow_mut().status = RelationStatus::Sync;
        Ok(())
    }

    pub(crate) fn calc_depth(
        ro: &RelationObjectPtr,
        depth: i32,
        origin: Option<&DataObjectPtr>,
    ) -> Result<(), OrmError> {
        let slaves = ro.borrow().slaves.clone();
        for slave in slaves {
            if let Some(origin) = origin {
                if Rc::ptr_eq(&slave, origin) {
                    return Err(OrmError::CycleDetected);
                }
            }
            DataObject::calc_depth(&slave, depth, origin)?;
        }
        Ok(())
    }

    /// Apply this relation's cascade policy for a master delete.
    pub(crate) fn delete_master(
        ro: &RelationObjectPtr,
        mode: DeletionMode,
        depth: i32,
    ) -> Result<(), OrmError> {
        let cascade = ro.borrow().relation().cascade();
        match cascade {
            Cascade::Nullify => {
                if mode != DeletionMode::DryRun {
                    let slaves = std::mem::take(&mut ro.borrow_mut().slaves);
                    for slave in &slaves {
                        DataObject::set_free_from(slave, &ro.borrow())?;
                    }
                }
                Ok(())
            }
            Cascade::Delete => {
                let slaves = ro.borrow().slaves.clone();
                for slave in &slaves {
                    DataObject::delete_object(slave, mode, depth)?;
                }
                Ok(())
            }
            Cascade::Restrict => {
                let r = ro.borrow();
                if !r.slaves.is_empty() {
                    let rel = r.relation();
                    return Err(OrmError::CascadeDeleteRestricted(
                        rel.side(0).to_string(),
                        rel.side(1).to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Copy the master's PK values into every slave's FK columns. Called
    /// after the master has received a generated identity.
    pub fn refresh_slaves_fkeys(ro: &RelationObjectPtr) -> Result<(), OrmError> {
        let (pk_values, fk_fields, slaves) = {
            let r = ro.borrow();
            let rel = r.relation();
            let master_tbl = r.schema.table(
                rel.table_name(0)
                    .ok_or_else(|| OrmError::integrity("relation tables unresolved"))?,
            )?;
            let master = r.require_master()?;
            let mut pk_values = Vec::new();
            for pk in master_tbl.pk_fields() {
                pk_values.push(master.borrow_mut().get(pk)?);
            }
            (pk_values, rel.fk_fields().to_vec(), r.slaves.clone())
        };
        for slave in slaves {
            let mut s = slave.borrow_mut();
            for (fk, value) in fk_fields.iter().zip(pk_values.iter()) {
                let idx = s.table().idx_by_name(fk)?;
                s.set_raw(idx, value.clone());
            }
        }
        Ok(())
    }

    /// Drop a slave from the in-memory set; invoked when the slave is
    /// deleted or reassigned.
    pub fn exclude_slave(ro: &RelationObjectPtr, obj: &DataObjectPtr) {
        ro.borrow_mut().slaves.retain(|s| !Rc::ptr_eq(s, obj));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineMode};
    use crate::schema::{
        Cascade, Column, ColumnFlags, Relation, RelationAttrs, RelationKind, Table,
    };
    use sqlweave_core::ValueType;

    fn schema_with_cascade(cascade: Cascade) -> Arc<Schema> {
        let mut schema = Schema::new();
        let mut client = Table::new("T_CLIENT", "", "Client");
        client
            .add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
            .unwrap();
        client
            .add_column(Column::new(
                "NAME",
                ValueType::Str,
                100,
                ColumnFlags::NULLABLE,
            ))
            .unwrap();
        schema.add_table(client).unwrap();
        let mut order = Table::new("T_ORDER", "", "Order");
        order
            .add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
            .unwrap();
        order
            .add_column(
                Column::new("CLIENT_ID", ValueType::LongInt, 0, ColumnFlags::NULLABLE)
                    .with_fk("T_CLIENT", None),
            )
            .unwrap();
        schema.add_table(order).unwrap();
        schema.add_relation(Relation::new(
            RelationKind::OneToMany,
            "Client",
            RelationAttrs::from([("property".to_string(), "orders".to_string())]),
            "Order",
            RelationAttrs::from([("property".to_string(), "owner".to_string())]),
            cascade,
        ));
        schema.fill_fkeys().unwrap();
        schema.check_cycles().unwrap();
        Arc::new(schema)
    }

    fn session_for(schema: &Arc<Schema>) -> Rc<Session> {
        let engine = Engine::with_dialect(EngineMode::ReadWrite, "sqlite").unwrap();
        Session::new(Arc::clone(schema), engine)
    }

    #[test]
    fn test_create_new_starts_empty() {
        let schema = schema_with_cascade(Cascade::Restrict);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        assert_eq!(obj.borrow().status(), ObjectStatus::New);
        assert!(!obj.borrow_mut().assigned_key().unwrap());
        assert!(obj.borrow_mut().get("NAME").unwrap().is_null());
    }

    #[test]
    fn test_set_coerces_and_tracks_key() {
        let schema = schema_with_cascade(Cascade::Restrict);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        obj.borrow_mut().set("ID", Value::Str("42".to_string())).unwrap();
        assert_eq!(obj.borrow_mut().get("ID").unwrap(), Value::LongInt(42));
        assert!(obj.borrow_mut().assigned_key().unwrap());
        let key = obj.borrow_mut().key().unwrap();
        assert_eq!(key.fields[0].1, Value::LongInt(42));
    }

    #[test]
    fn test_pk_overwrite_rejected_when_attached() {
        let schema = schema_with_cascade(Cascade::Restrict);
        let session = session_for(&schema);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        obj.borrow_mut().set("ID", 7i64).unwrap();
        session.save(&obj).unwrap();
        // Same value is fine, a different one is not.
        obj.borrow_mut().set("ID", 7i64).unwrap();
        assert!(matches!(
            obj.borrow_mut().set("ID", 8i64),
            Err(OrmError::ReadOnlyColumn { .. })
        ));
    }

    #[test]
    fn test_detached_pk_overwrite_allowed() {
        let schema = schema_with_cascade(Cascade::Restrict);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        obj.borrow_mut().set("ID", 7i64).unwrap();
        obj.borrow_mut().set("ID", 8i64).unwrap();
        assert_eq!(obj.borrow_mut().get("ID").unwrap(), Value::LongInt(8));
    }

    #[test]
    fn test_link_and_depths() {
        let schema = schema_with_cascade(Cascade::Restrict);
        let master = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        let slave = DataObject::create_new(Arc::clone(&schema), "T_ORDER").unwrap();
        DataObject::link_to_slave(&master, &slave, "orders").unwrap();
        assert_eq!(master.borrow().depth(), 0);
        assert_eq!(slave.borrow().depth(), 1);
        let ro = DataObject::get_slaves(&master, "orders").unwrap();
        assert_eq!(ro.borrow().slaves().len(), 1);
    }

    #[test]
    fn test_cascade_restrict_leaves_graph_alone() {
        let schema = schema_with_cascade(Cascade::Restrict);
        let master = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        let slave = DataObject::create_new(Arc::clone(&schema), "T_ORDER").unwrap();
        DataObject::link_to_slave(&master, &slave, "orders").unwrap();
        assert!(matches!(
            DataObject::delete(&master),
            Err(OrmError::CascadeDeleteRestricted(_, _))
        ));
        assert_eq!(master.borrow().status(), ObjectStatus::New);
        assert_eq!(slave.borrow().status(), ObjectStatus::New);
        assert_eq!(master.borrow().master_relations().len(), 1);
    }

    #[test]
    fn test_cascade_delete_cascades_to_new_slaves() {
        let schema = schema_with_cascade(Cascade::Delete);
        let master = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        let slave = DataObject::create_new(Arc::clone(&schema), "T_ORDER").unwrap();
        DataObject::link_to_slave(&master, &slave, "orders").unwrap();
        DataObject::delete(&master).unwrap();
        assert_eq!(master.borrow().status(), ObjectStatus::Deleted);
        assert_eq!(slave.borrow().status(), ObjectStatus::Deleted);
    }

    #[test]
    fn test_cascade_nullify_clears_fk() {
        let schema = schema_with_cascade(Cascade::Nullify);
        let master = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        let slave = DataObject::create_new(Arc::clone(&schema), "T_ORDER").unwrap();
        slave.borrow_mut().set("CLIENT_ID", 5i64).unwrap();
        DataObject::link_to_slave(&master, &slave, "orders").unwrap();
        DataObject::delete(&master).unwrap();
        assert_eq!(master.borrow().status(), ObjectStatus::Deleted);
        assert_eq!(slave.borrow().status(), ObjectStatus::New);
        assert!(slave.borrow_mut().get("CLIENT_ID").unwrap().is_null());
    }

    #[test]
    fn test_cycle_detected_on_self_link() {
        let schema = schema_with_cascade(Cascade::Restrict);
        let a = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        let b = DataObject::create_new(Arc::clone(&schema), "T_ORDER").unwrap();
        DataObject::link_to_slave(&a, &b, "orders").unwrap();
        // Linking back the other way makes the chain loop onto itself.
        assert!(matches!(
            DataObject::link(&b, &a, 0),
            Err(OrmError::CycleDetected)
        ));
    }

    #[test]
    fn test_refresh_slaves_fkeys() {
        let schema = schema_with_cascade(Cascade::Restrict);
        let master = DataObject::create_new(Arc::clone(&schema), "T_CLIENT").unwrap();
        let slave = DataObject::create_new(Arc::clone(&schema), "T_ORDER").unwrap();
        DataObject::link_to_slave(&master, &slave, "orders").unwrap();
        master.borrow_mut().set("ID", 77i64).unwrap();
        DataObject::refresh_slaves_fkeys(&master).unwrap();
        assert_eq!(
            slave.borrow_mut().get("CLIENT_ID").unwrap(),
            Value::LongInt(77)
        );
    }

    #[test]
    fn test_ro_column_write_rejected() {
        let mut schema = Schema::new();
        let mut t = Table::new("T_A", "", "A");
        t.add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
            .unwrap();
        t.add_column(Column::new("STAMP", ValueType::DateTime, 0, ColumnFlags::RO))
            .unwrap();
        schema.add_table(t).unwrap();
        let schema = Arc::new(schema);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_A").unwrap();
        assert!(matches!(
            obj.borrow_mut().set("STAMP", Value::Str("x".to_string())),
            Err(OrmError::ReadOnlyColumn { .. })
        ));
    }
}

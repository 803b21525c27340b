use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use crate::data_object::{DataObject, DataObjectPtr, ObjectStatus};
use crate::engine::Engine;
use crate::error::OrmError;
use crate::schema::{Key, Schema};

#[derive(Default)]
struct SessionState {
    identity_map: HashMap<Key, DataObjectPtr>,
    objects: Vec<DataObjectPtr>,
}

/// Unit of work: tracks managed objects, enforces one instance per primary
/// key, and sequences INSERT/UPDATE/DELETE on flush.
///
/// A session and every object reachable through it belong to one thread.
/// A failed flush leaves the in-memory state partially advanced; the
/// contract is to roll the engine back and drop the session.
pub struct Session {
    schema: Arc<Schema>,
    engine: RefCell<Engine>,
    state: RefCell<SessionState>,
}

impl Session {
    pub fn new(schema: Arc<Schema>, engine: Engine) -> Rc<Session> {
        Rc::new(Session {
            schema,
            engine: RefCell::new(engine),
            state: RefCell::new(SessionState::default()),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn engine_mut(&self) -> RefMut<'_, Engine> {
        self.engine.borrow_mut()
    }

    /// Create a New object for a table, already tracked by this session.
    pub fn create_object(self: &Rc<Self>, table_name: &str) -> Result<DataObjectPtr, OrmError> {
        let obj = DataObject::create_new(Arc::clone(&self.schema), table_name)?;
        self.save(&obj)?;
        Ok(obj)
    }

    fn add_to_identity_map(&self, obj: &DataObjectPtr) -> Result<(), OrmError> {
        let assigned = obj.borrow_mut().assigned_key()?;
        if assigned {
            let key = obj.borrow_mut().key()?;
            self.state
                .borrow_mut()
                .identity_map
                .entry(key)
                .or_insert_with(|| Rc::clone(obj));
        }
        Ok(())
    }

    /// Track an object. Registers it in the identity map when its key is
    /// assigned. Idempotent; an object owned by another session is
    /// rejected.
    pub fn save(self: &Rc<Self>, obj: &DataObjectPtr) -> Result<(), OrmError> {
        if let Some(owner) = obj.borrow().session() {
            if !Rc::ptr_eq(&owner, self) {
                return Err(OrmError::AlreadyInSession);
            }
        }
        self.add_to_identity_map(obj)?;
        let mut state = self.state.borrow_mut();
        if !state.objects.iter().any(|o| Rc::ptr_eq(o, obj)) {
            state.objects.push(Rc::clone(obj));
        }
        drop(state);
        obj.borrow_mut().set_session(Some(Rc::downgrade(self)));
        Ok(())
    }

    /// The identity-mapped object for a key, creating a Ghost shell when
    /// the key is not mapped yet.
    pub fn get_lazy(self: &Rc<Self>, key: Key) -> Result<DataObjectPtr, OrmError> {
        if !key.is_assigned() {
            return Err(OrmError::ObjectNotFoundByKey(format!(
                "{} (unassigned key)",
                key
            )));
        }
        // Normalize the key values to the column tags so lookups cannot
        // miss on a numeric-width mismatch.
        let mut key = key;
        {
            let table = self.schema.table(&key.table)?;
            for (name, value) in &mut key.fields {
                *value = value.fix_type(table.column(name)?.value_type())?;
            }
        }
        if let Some(obj) = self.state.borrow().identity_map.get(&key) {
            return Ok(Rc::clone(obj));
        }
        let obj = DataObject::create_ghost(Arc::clone(&self.schema), &key)?;
        obj.borrow_mut().set_session(Some(Rc::downgrade(self)));
        let mut state = self.state.borrow_mut();
        state.identity_map.insert(key, Rc::clone(&obj));
        state.objects.push(Rc::clone(&obj));
        Ok(obj)
    }

    /// Stop tracking an object. Unknown objects are a no-op.
    pub fn detach(&self, obj: &DataObjectPtr) {
        let key = obj.borrow_mut().key().ok();
        let mut state = self.state.borrow_mut();
        if let Some(key) = key {
            if let Some(mapped) = state.identity_map.get(&key) {
                if Rc::ptr_eq(mapped, obj) {
                    state.identity_map.remove(&key);
                }
            }
        }
        state.objects.retain(|o| !Rc::ptr_eq(o, obj));
        drop(state);
        obj.borrow_mut().set_session(None);
    }

    pub fn identity_map_size(&self) -> usize {
        self.state.borrow().identity_map.len()
    }

    pub fn object_count(&self) -> usize {
        self.state.borrow().objects.len()
    }

    pub fn commit(&self) -> Result<(), OrmError> {
        self.engine.borrow_mut().commit()
    }

    pub fn rollback(&self) -> Result<(), OrmError> {
        self.engine.borrow_mut().rollback()
    }

    /// Push all pending changes to the database: INSERTs for New objects
    /// in ascending dependency depth, then UPDATEs for Dirty ones, then
    /// DELETEs in descending depth. Runs inside the engine's current
    /// transaction; the caller commits or rolls back.
    pub fn flush(self: &Rc<Self>) -> Result<(), OrmError> {
        let map_snapshot: Vec<DataObjectPtr> = {
            let state = self.state.borrow();
            state.identity_map.values().cloned().collect()
        };
        self.flush_new()?;
        self.flush_update(&map_snapshot)?;
        self.flush_delete(&map_snapshot)?;

        // Forget everything that reached the terminal state.
        let mut state = self.state.borrow_mut();
        state
            .identity_map
            .retain(|_, obj| obj.borrow().status() != ObjectStatus::Deleted);
        let (keep, gone): (Vec<_>, Vec<_>) = state
            .objects
            .drain(..)
            .partition(|obj| obj.borrow().status() != ObjectStatus::Deleted);
        state.objects = keep;
        drop(state);
        for obj in gone {
            obj.borrow_mut().set_session(None);
        }
        Ok(())
    }

    fn flush_new(self: &Rc<Self>) -> Result<(), OrmError> {
        let new_objs: Vec<DataObjectPtr> = {
            let state = self.state.borrow();
            state
                .objects
                .iter()
                .filter(|o| o.borrow().status() == ObjectStatus::New)
                .cloned()
                .collect()
        };
        if new_objs.is_empty() {
            return Ok(());
        }
        for obj in &new_objs {
            obj.borrow_mut().set_depth(-1);
        }
        for obj in &new_objs {
            DataObject::calc_depth(obj, 0, None)?;
        }

        let mut groups: BTreeMap<i32, BTreeMap<String, Vec<DataObjectPtr>>> = BTreeMap::new();
        for obj in &new_objs {
            let (depth, table_name) = {
                let o = obj.borrow();
                (o.depth(), o.table().name().to_string())
            };
            groups
                .entry(depth)
                .or_default()
                .entry(table_name)
                .or_default()
                .push(Rc::clone(obj));
        }

        for by_table in groups.values() {
            for (table_name, objs) in by_table {
                let table = self.schema.table(table_name)?;
                let mut keyed = Vec::new();
                let mut unkeyed = Vec::new();
                for obj in objs {
                    if obj.borrow_mut().assigned_key()? {
                        keyed.push(Rc::clone(obj));
                    } else {
                        unkeyed.push(Rc::clone(obj));
                    }
                }
                if !keyed.is_empty() {
                    let rows = keyed.iter().map(|o| o.borrow().values_row(true)).collect();
                    self.engine.borrow_mut().insert(table, rows, false)?;
                    for obj in &keyed {
                        self.add_to_identity_map(obj)?;
                    }
                }
                if !unkeyed.is_empty() {
                    let rows = unkeyed.iter().map(|o| o.borrow().values_row(true)).collect();
                    let new_ids = self.engine.borrow_mut().insert(table, rows, true)?;
                    if !new_ids.is_empty() {
                        let pk = table.surrogate_pk()?.to_string();
                        for (obj, id) in unkeyed.iter().zip(new_ids) {
                            obj.borrow_mut().set(&pk, id)?;
                        }
                    }
                    for obj in &unkeyed {
                        DataObject::refresh_slaves_fkeys(obj)?;
                        self.add_to_identity_map(obj)?;
                    }
                }
            }
        }
        for obj in &new_objs {
            obj.borrow_mut().set_status(ObjectStatus::Ghost);
        }
        Ok(())
    }

    fn flush_update(&self, snapshot: &[DataObjectPtr]) -> Result<(), OrmError> {
        let mut by_table: BTreeMap<String, Vec<DataObjectPtr>> = BTreeMap::new();
        for obj in snapshot {
            if obj.borrow().status() == ObjectStatus::Dirty {
                let table_name = obj.borrow().table().name().to_string();
                by_table.entry(table_name).or_default().push(Rc::clone(obj));
            }
        }
        for (table_name, objs) in by_table {
            let table = self.schema.table(&table_name)?;
            let rows: Vec<_> = objs.iter().map(|o| o.borrow().values_row(true)).collect();
            self.engine.borrow_mut().update(table, &rows)?;
            // In-memory values may be stale after defaults or triggers, so
            // the objects drop back to Ghost rather than Sync.
            for obj in &objs {
                obj.borrow_mut().set_status(ObjectStatus::Ghost);
            }
        }
        Ok(())
    }

    fn flush_delete(&self, snapshot: &[DataObjectPtr]) -> Result<(), OrmError> {
        let mut groups: BTreeMap<i32, BTreeMap<String, Vec<DataObjectPtr>>> = BTreeMap::new();
        for obj in snapshot {
            if obj.borrow().status() == ObjectStatus::ToBeDeleted {
                let (depth, table_name) = {
                    let o = obj.borrow();
                    (o.depth(), o.table().name().to_string())
                };
                groups
                    .entry(depth)
                    .or_default()
                    .entry(table_name)
                    .or_default()
                    .push(Rc::clone(obj));
            }
        }
        for (_, by_table) in groups.into_iter().rev() {
            for (table_name, objs) in by_table {
                let table = self.schema.table(&table_name)?;
                let mut keys = Vec::with_capacity(objs.len());
                for obj in &objs {
                    keys.push(obj.borrow_mut().key()?);
                }
                self.engine.borrow_mut().delete_from(table, &keys)?;
                for obj in &objs {
                    obj.borrow_mut().set_status(ObjectStatus::Deleted);
                }
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for obj in &state.objects {
            obj.borrow_mut().set_session(None);
        }
        state.objects.clear();
        state.identity_map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineMode;
    use crate::schema::{Column, ColumnFlags, Table};
    use sqlweave_core::{Value, ValueType};

    fn simple_schema() -> Arc<Schema> {
        let mut schema = Schema::new();
        let mut t = Table::new("T_A", "", "A");
        t.add_column(Column::new("ID", ValueType::LongInt, 0, ColumnFlags::PK))
            .unwrap();
        t.add_column(Column::new("NAME", ValueType::Str, 50, ColumnFlags::NULLABLE))
            .unwrap();
        schema.add_table(t).unwrap();
        schema.check_cycles().unwrap();
        Arc::new(schema)
    }

    fn session(schema: &Arc<Schema>) -> Rc<Session> {
        let engine = Engine::with_dialect(EngineMode::ReadWrite, "sqlite").unwrap();
        Session::new(Arc::clone(schema), engine)
    }

    #[test]
    fn test_save_is_idempotent() {
        let schema = simple_schema();
        let session = session(&schema);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_A").unwrap();
        obj.borrow_mut().set("ID", 1i64).unwrap();
        for _ in 0..3 {
            session.save(&obj).unwrap();
        }
        assert_eq!(session.object_count(), 1);
        assert_eq!(session.identity_map_size(), 1);
    }

    #[test]
    fn test_save_to_second_session_rejected() {
        let schema = simple_schema();
        let s1 = session(&schema);
        let s2 = session(&schema);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_A").unwrap();
        s1.save(&obj).unwrap();
        assert!(matches!(s2.save(&obj), Err(OrmError::AlreadyInSession)));
    }

    #[test]
    fn test_get_lazy_returns_same_instance() {
        let schema = simple_schema();
        let session = session(&schema);
        let key = schema.table("T_A").unwrap().mk_id_key(10).unwrap();
        let a = session.get_lazy(key.clone()).unwrap();
        let b = session.get_lazy(key).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.borrow().status(), ObjectStatus::Ghost);
        assert_eq!(session.identity_map_size(), 1);
    }

    #[test]
    fn test_get_lazy_rejects_unassigned_key() {
        let schema = simple_schema();
        let session = session(&schema);
        let key = Key::new("T_A", vec![("ID".to_string(), Value::Null)]);
        assert!(matches!(
            session.get_lazy(key),
            Err(OrmError::ObjectNotFoundByKey(_))
        ));
    }

    #[test]
    fn test_detach_unknown_is_noop() {
        let schema = simple_schema();
        let session = session(&schema);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_A").unwrap();
        session.detach(&obj);
        assert_eq!(session.object_count(), 0);
    }

    #[test]
    fn test_detach_removes_tracking() {
        let schema = simple_schema();
        let session = session(&schema);
        let obj = DataObject::create_new(Arc::clone(&schema), "T_A").unwrap();
        obj.borrow_mut().set("ID", 3i64).unwrap();
        session.save(&obj).unwrap();
        session.detach(&obj);
        assert_eq!(session.object_count(), 0);
        assert_eq!(session.identity_map_size(), 0);
        assert!(obj.borrow().session().is_none());
    }

    #[test]
    fn test_flush_with_nothing_pending_is_quiet() {
        let schema = simple_schema();
        let session = session(&schema);
        // The dialect-only engine would fail on any statement, so this
        // checks that an empty flush issues none.
        session.flush().unwrap();
    }

    #[test]
    fn test_flush_skips_statements_for_deleted_new_objects() {
        let schema = simple_schema();
        let session = session(&schema);
        let obj = session.create_object("T_A").unwrap();
        DataObject::delete(&obj).unwrap();
        assert_eq!(obj.borrow().status(), ObjectStatus::Deleted);
        session.flush().unwrap();
        assert_eq!(session.object_count(), 0);
    }
}

//! Per-instance state: identity, lifecycle and the attribute dict.
//!
//! An [`Instance`] is a handle to its [`InstanceState`]. The lifecycle is
//! derived from two facts, whether the instance has an identity and whether
//! a session holds it:
//!
//! | identity | attached | status |
//! |----------|----------|--------|
//! | no  | no  | transient |
//! | no  | yes | pending |
//! | yes | yes | persistent |
//! | yes | no  | detached |

use crate::attributes::{AttrValue, AttributeState, AttributeStates, History, LoadedValue};
use crate::mapper::{Direction, Mapper, MapperProperty, PropertyKind};
use crate::registry::{MappedClass, Registry};
use crate::session::SessionId;
use ormscope_core::{Error, Result, Value};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Transient,
    Pending,
    Persistent,
    Detached,
}

/// Class name plus primary-key values; keys the session's identity map.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    class: String,
    key: Vec<Value>,
}

impl IdentityKey {
    /// Identity of `class` with primary-key values `key`. Integer values are
    /// normalised so `Int` and `BigInt` keys compare equal.
    pub fn new(class: &MappedClass, key: Vec<Value>) -> Self {
        Self::for_class(class.name(), key)
    }

    pub(crate) fn for_class(class: &str, key: Vec<Value>) -> Self {
        Self {
            class: class.to_string(),
            key: key.iter().map(Value::normalized).collect(),
        }
    }

    /// Class the identity belongs to.
    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// Primary-key values, in primary-key column order.
    pub fn key(&self) -> &[Value] {
        &self.key
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.key == other.key
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state);
        for v in &self.key {
            v.hash_into(state);
        }
    }
}

#[derive(Default)]
struct StateInner {
    dict: HashMap<String, AttrValue>,
    /// Value of each modified attribute as of the last load or flush.
    committed: HashMap<String, LoadedValue>,
    key: Option<Vec<Value>>,
    session: Option<SessionId>,
}

impl StateInner {
    fn record_original(&mut self, key: &str) {
        if !self.committed.contains_key(key) {
            let original = self
                .dict
                .get(key)
                .cloned()
                .map_or(LoadedValue::NoValue, LoadedValue::Loaded);
            self.committed.insert(key.to_string(), original);
        }
    }
}

/// Tracking state of one mapped instance.
pub struct InstanceState {
    mapper: Arc<Mapper>,
    /// Held so relationship targets stay resolvable for the instance's
    /// lifetime.
    registry: Option<Arc<Registry>>,
    inner: Mutex<StateInner>,
}

impl InstanceState {
    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The mapper of the instance's class.
    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.mapper
    }

    pub(crate) fn registry(&self) -> Option<&Arc<Registry>> {
        self.registry.as_ref()
    }

    /// The class handle of the instance's mapper.
    pub fn class(&self) -> MappedClass {
        MappedClass::from_mapper(Arc::clone(&self.mapper))
    }

    /// The instance this state tracks.
    pub fn object(self: &Arc<Self>) -> Instance {
        Instance(Arc::clone(self))
    }

    /// Current lifecycle state, derived from the identity and the owning
    /// session.
    pub fn status(&self) -> Status {
        let inner = self.lock();
        match (inner.key.is_some(), inner.session.is_some()) {
            (false, false) => Status::Transient,
            (false, true) => Status::Pending,
            (true, true) => Status::Persistent,
            (true, false) => Status::Detached,
        }
    }

    /// No identity and no session.
    pub fn is_transient(&self) -> bool {
        self.status() == Status::Transient
    }

    /// Attached to a session but not yet flushed.
    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Flushed or loaded and still attached.
    pub fn is_persistent(&self) -> bool {
        self.status() == Status::Persistent
    }

    /// Has an identity but no session, e.g. after `expunge` or after its
    /// session was dropped.
    pub fn is_detached(&self) -> bool {
        self.status() == Status::Detached
    }

    /// Primary-key values, once the instance has been flushed or loaded.
    pub fn identity(&self) -> Option<Vec<Value>> {
        self.lock().key.clone()
    }

    /// Class-qualified identity, the key of the identity map.
    pub fn identity_key(&self) -> Option<IdentityKey> {
        self.identity()
            .map(|key| IdentityKey::for_class(self.mapper.class_name(), key))
    }

    /// The session this instance is attached to.
    pub fn session_id(&self) -> Option<SessionId> {
        self.lock().session
    }

    /// Every attribute's state, like `inspect(obj).attrs`.
    pub fn attrs(self: &Arc<Self>) -> AttributeStates {
        AttributeStates::new(Arc::clone(self))
    }

    /// State of one attribute.
    pub fn attr(self: &Arc<Self>, key: &str) -> Result<AttributeState> {
        self.attrs().get(key)
    }

    /// Whether any attribute has net changes since the last load or flush.
    pub fn is_modified(&self) -> bool {
        let inner = self.lock();
        inner
            .committed
            .keys()
            .any(|k| History::compute(inner.dict.get(k), inner.committed.get(k)).has_changes())
    }

    pub(crate) fn read(&self, prop: &MapperProperty) -> AttrValue {
        let mut inner = self.lock();
        inner
            .dict
            .entry(prop.key().to_string())
            .or_insert_with(|| default_value(prop))
            .clone()
    }

    pub(crate) fn peek(&self, key: &str) -> LoadedValue {
        self.lock()
            .dict
            .get(key)
            .cloned()
            .map_or(LoadedValue::NoValue, LoadedValue::Loaded)
    }

    pub(crate) fn history(&self, key: &str) -> History {
        let inner = self.lock();
        History::compute(inner.dict.get(key), inner.committed.get(key))
    }

    fn set_value(&self, key: &str, value: AttrValue) {
        let mut inner = self.lock();
        inner.record_original(key);
        inner.dict.insert(key.to_string(), value);
    }

    fn append(&self, key: &str, item: Instance) {
        let mut inner = self.lock();
        inner.record_original(key);
        let entry = inner
            .dict
            .entry(key.to_string())
            .or_insert_with(|| AttrValue::Collection(Vec::new()));
        if let AttrValue::Collection(items) = entry {
            if !items.contains(&item) {
                items.push(item);
            }
        }
    }

    fn remove(&self, key: &str, item: &Instance) -> bool {
        let mut inner = self.lock();
        let present = matches!(inner.dict.get(key), Some(AttrValue::Collection(items)) if items.contains(item));
        if present {
            inner.record_original(key);
            if let Some(AttrValue::Collection(items)) = inner.dict.get_mut(key) {
                items.retain(|i| i != item);
            }
        }
        present
    }

    /// Store a value as loaded from the database, without history.
    pub(crate) fn set_loaded(&self, key: &str, value: AttrValue) {
        let mut inner = self.lock();
        inner.committed.remove(key);
        inner.dict.insert(key.to_string(), value);
    }

    /// Set a foreign-key attribute during flush; recorded as a change.
    pub(crate) fn sync_value(&self, key: &str, value: Value) {
        let unchanged = matches!(self.lock().dict.get(key), Some(AttrValue::Scalar(v)) if *v == value);
        if !unchanged {
            self.set_value(key, AttrValue::Scalar(value));
        }
    }

    pub(crate) fn set_identity(&self, key: Vec<Value>) {
        self.lock().key = Some(key);
    }

    pub(crate) fn set_session(&self, session: Option<SessionId>) {
        self.lock().session = session;
    }

    /// Forget all history: current values become the committed state.
    pub(crate) fn commit_all(&self) {
        self.lock().committed.clear();
    }

    /// Current scalar value of a column-backed property key, if present.
    pub(crate) fn scalar(&self, key: &str) -> Option<Value> {
        match self.lock().dict.get(key) {
            Some(AttrValue::Scalar(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// `(column key, value)` for every column attribute present.
    pub(crate) fn column_values(&self) -> Vec<(String, Value)> {
        let props = self.mapper.column_attrs();
        let inner = self.lock();
        let mut values = Vec::new();
        for prop in &props {
            if let (Some(AttrValue::Scalar(v)), Ok(columns)) = (inner.dict.get(prop.key()), prop.columns()) {
                for column in columns {
                    values.retain(|(k, _): &(String, Value)| k != column.key());
                    values.push((column.key().to_string(), v.clone()));
                }
            }
        }
        values
    }

    /// `(column key, value)` for column attributes with net changes.
    pub(crate) fn changed_columns(&self) -> Vec<(String, Value)> {
        let props = self.mapper.column_attrs();
        let inner = self.lock();
        let mut values = Vec::new();
        for prop in &props {
            let history = History::compute(inner.dict.get(prop.key()), inner.committed.get(prop.key()));
            if !history.has_changes() {
                continue;
            }
            if let (Some(AttrValue::Scalar(v)), Ok(columns)) = (inner.dict.get(prop.key()), prop.columns()) {
                for column in columns {
                    values.push((column.key().to_string(), v.clone()));
                }
            }
        }
        values
    }

    /// Loaded relationship values, keyed by property.
    pub(crate) fn loaded_relationships(&self) -> Vec<(Arc<MapperProperty>, AttrValue)> {
        let props = self.mapper.relationships();
        let inner = self.lock();
        props
            .iter()
            .filter_map(|p| inner.dict.get(p.key()).map(|v| (Arc::clone(p), v.clone())))
            .collect()
    }
}

fn default_value(prop: &MapperProperty) -> AttrValue {
    match prop.kind() {
        PropertyKind::Relationship(r) if r.direction() == Direction::OneToMany => {
            AttrValue::Collection(Vec::new())
        }
        PropertyKind::Relationship(_) => AttrValue::Object(None),
        PropertyKind::Column(_) | PropertyKind::Synonym(_) => AttrValue::Scalar(Value::Null),
    }
}

impl fmt::Debug for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("InstanceState");
        s.field("class", &self.mapper.class_name());
        if let Ok(inner) = self.inner.try_lock() {
            s.field("key", &inner.key).field("session", &inner.session);
        }
        s.finish_non_exhaustive()
    }
}

/// A mapped object.
///
/// Cloning yields another handle to the same object; equality is identity.
#[derive(Clone)]
pub struct Instance(Arc<InstanceState>);

impl Instance {
    pub(crate) fn new(mapper: Arc<Mapper>) -> Self {
        Instance(Arc::new(InstanceState {
            registry: mapper.registry(),
            mapper,
            inner: Mutex::new(StateInner::default()),
        }))
    }

    /// The tracking state; the same `Arc` as `inspect(&instance)`.
    pub fn state(&self) -> Arc<InstanceState> {
        Arc::clone(&self.0)
    }

    /// The instance's class.
    pub fn class(&self) -> MappedClass {
        self.0.class()
    }

    fn property(&self, key: &str) -> Result<Arc<MapperProperty>> {
        self.0.mapper.resolve_property(key)
    }

    fn wrong_kind(&self, prop: &MapperProperty, expected: &str) -> Error {
        Error::invalid_state(
            self.0.mapper.class_name(),
            format!("attribute '{}' is not {}", prop.key(), expected),
        )
    }

    /// Read an attribute (synonyms resolve to their target).
    pub fn get(&self, key: &str) -> Result<AttrValue> {
        let prop = self.property(key)?;
        Ok(self.0.read(&prop))
    }

    /// Read a column attribute as a plain value.
    pub fn get_value(&self, key: &str) -> Result<Value> {
        let prop = self.property(key)?;
        if !prop.is_column() {
            return Err(self.wrong_kind(&prop, "a column attribute"));
        }
        match self.0.read(&prop) {
            AttrValue::Scalar(v) => Ok(v),
            _ => Err(self.wrong_kind(&prop, "a scalar")),
        }
    }

    /// Set a column attribute.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let prop = self.property(key)?;
        if !prop.is_column() {
            return Err(self.wrong_kind(&prop, "a column attribute"));
        }
        self.0.set_value(prop.key(), AttrValue::Scalar(value.into()));
        Ok(())
    }

    /// Set (or clear) a many-to-one attribute.
    pub fn set_related(&self, key: &str, target: Option<&Instance>) -> Result<()> {
        let prop = self.property(key)?;
        let rel = prop
            .as_relationship()
            .filter(|r| r.direction() == Direction::ManyToOne)
            .ok_or_else(|| self.wrong_kind(&prop, "a many-to-one relationship"))?;
        if let Some(t) = target {
            check_target(rel.target(), t)?;
        }
        self.0
            .set_value(prop.key(), AttrValue::Object(target.cloned()));
        Ok(())
    }

    /// Add `item` to a one-to-many collection.
    pub fn append(&self, key: &str, item: &Instance) -> Result<()> {
        let prop = self.property(key)?;
        let rel = prop
            .as_relationship()
            .filter(|r| r.is_collection())
            .ok_or_else(|| self.wrong_kind(&prop, "a collection"))?;
        check_target(rel.target(), item)?;
        self.0.append(prop.key(), item.clone());
        Ok(())
    }

    /// Remove `item` from a one-to-many collection.
    pub fn remove(&self, key: &str, item: &Instance) -> Result<()> {
        let prop = self.property(key)?;
        if !prop.as_relationship().is_some_and(|r| r.is_collection()) {
            return Err(self.wrong_kind(&prop, "a collection"));
        }
        if self.0.remove(prop.key(), item) {
            Ok(())
        } else {
            Err(Error::invalid_state(
                self.0.mapper.class_name(),
                format!("instance is not in collection '{}'", prop.key()),
            ))
        }
    }

    /// Identity comparison; same as `==`.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

fn check_target(expected: &str, instance: &Instance) -> Result<()> {
    let actual = instance.0.mapper.class_name();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::invalid_state(
            actual,
            format!("expected an instance of {expected}"),
        ))
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Instance {}

impl Hash for Instance {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} at {:p}>", self.0.mapper.class_name(), Arc::as_ptr(&self.0))
    }
}

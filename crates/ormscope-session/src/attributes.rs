//! Attribute values, passive access and per-attribute history.

use crate::mapper::MapperProperty;
use crate::state::{Instance, InstanceState};
use ormscope_core::{Result, Value};
use std::sync::Arc;

/// The value of one mapped attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A column-backed attribute.
    Scalar(Value),
    /// A one-to-many relationship.
    Collection(Vec<Instance>),
    /// A many-to-one relationship.
    Object(Option<Instance>),
}

impl AttrValue {
    /// The scalar, if this is a column value.
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            AttrValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// The members, if this is a one-to-many collection.
    pub fn as_collection(&self) -> Option<&[Instance]> {
        match self {
            AttrValue::Collection(items) => Some(items),
            _ => None,
        }
    }

    /// The target, if this is a many-to-one reference. The outer `None` means
    /// another kind of value; `Some(None)` is an empty reference.
    pub fn as_object(&self) -> Option<Option<&Instance>> {
        match self {
            AttrValue::Object(o) => Some(o.as_ref()),
            _ => None,
        }
    }

    /// Instances this value refers to.
    pub fn instances(&self) -> Vec<Instance> {
        match self {
            AttrValue::Scalar(_) | AttrValue::Object(None) => Vec::new(),
            AttrValue::Collection(items) => items.clone(),
            AttrValue::Object(Some(i)) => vec![i.clone()],
        }
    }

    fn items(&self) -> Vec<HistoryItem> {
        match self {
            AttrValue::Scalar(v) => vec![HistoryItem::Value(v.clone())],
            other => other.instances().into_iter().map(HistoryItem::Instance).collect(),
        }
    }
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        AttrValue::Scalar(v)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Scalar(Value::from(s))
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Scalar(Value::BigInt(v))
    }
}

impl From<Vec<Instance>> for AttrValue {
    fn from(items: Vec<Instance>) -> Self {
        AttrValue::Collection(items)
    }
}

impl From<Option<Instance>> for AttrValue {
    fn from(o: Option<Instance>) -> Self {
        AttrValue::Object(o)
    }
}

/// Result of a passive read.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedValue {
    /// The attribute was never loaded or set.
    NoValue,
    Loaded(AttrValue),
}

impl LoadedValue {
    /// Whether the attribute was never read or written.
    pub fn is_no_value(&self) -> bool {
        matches!(self, LoadedValue::NoValue)
    }

    /// The stored value, unless it is `NoValue`.
    pub fn value(&self) -> Option<&AttrValue> {
        match self {
            LoadedValue::NoValue => None,
            LoadedValue::Loaded(v) => Some(v),
        }
    }
}

/// One element of a [`History`].
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryItem {
    Value(Value),
    Instance(Instance),
}

impl From<Value> for HistoryItem {
    fn from(v: Value) -> Self {
        HistoryItem::Value(v)
    }
}

impl From<&str> for HistoryItem {
    fn from(s: &str) -> Self {
        HistoryItem::Value(Value::from(s))
    }
}

impl From<Instance> for HistoryItem {
    fn from(i: Instance) -> Self {
        HistoryItem::Instance(i)
    }
}

/// Net changes to an attribute since it was last loaded or flushed.
///
/// `unchanged` is `None` while the attribute is absent from the instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub added: Vec<HistoryItem>,
    pub unchanged: Option<Vec<HistoryItem>>,
    pub deleted: Vec<HistoryItem>,
}

impl History {
    pub(crate) fn compute(current: Option<&AttrValue>, original: Option<&LoadedValue>) -> Self {
        let Some(current) = current else {
            return History::default();
        };
        let original = match original {
            None => {
                return History {
                    added: Vec::new(),
                    unchanged: Some(current.items()),
                    deleted: Vec::new(),
                };
            }
            Some(LoadedValue::NoValue) => None,
            Some(LoadedValue::Loaded(v)) => Some(v),
        };

        if let AttrValue::Collection(items) = current {
            let before = original.map(AttrValue::instances).unwrap_or_default();
            let (unchanged, added): (Vec<_>, Vec<_>) =
                items.iter().cloned().partition(|i| before.contains(i));
            let deleted = before.into_iter().filter(|i| !items.contains(i));
            return History {
                added: added.into_iter().map(HistoryItem::Instance).collect(),
                unchanged: Some(unchanged.into_iter().map(HistoryItem::Instance).collect()),
                deleted: deleted.map(HistoryItem::Instance).collect(),
            };
        }

        if original == Some(current) {
            return History {
                added: Vec::new(),
                unchanged: Some(current.items()),
                deleted: Vec::new(),
            };
        }
        History {
            added: current.items(),
            unchanged: Some(Vec::new()),
            deleted: original.map(AttrValue::items).unwrap_or_default(),
        }
    }

    /// Whether anything was added or deleted since the last flush or load.
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.deleted.is_empty()
    }

    /// True when no part of the history holds a value.
    pub fn is_empty(&self) -> bool {
        !self.has_changes() && self.unchanged.as_ref().is_none_or(Vec::is_empty)
    }
}

/// One attribute of one instance, as seen through `inspect(instance)`.
#[derive(Debug, Clone)]
pub struct AttributeState {
    state: Arc<InstanceState>,
    property: Arc<MapperProperty>,
    target: Arc<MapperProperty>,
}

impl AttributeState {
    pub(crate) fn new(state: Arc<InstanceState>, property: Arc<MapperProperty>) -> Result<Self> {
        let target = state.mapper().resolve_property(property.key())?;
        Ok(Self {
            state,
            property,
            target,
        })
    }

    /// Attribute name.
    pub fn key(&self) -> &str {
        self.property.key()
    }

    /// The declared property (a synonym stays a synonym here).
    pub fn property(&self) -> &Arc<MapperProperty> {
        &self.property
    }

    /// Active read: an unset attribute is materialised (null, empty
    /// collection or no object) and stored on the instance.
    pub fn value(&self) -> AttrValue {
        self.state.read(&self.target)
    }

    /// Passive read: [`LoadedValue::NoValue`] until the attribute has been
    /// read or written.
    pub fn loaded_value(&self) -> LoadedValue {
        self.state.peek(self.target.key())
    }

    /// Net changes since the last flush or load.
    ///
    /// Reading history does not load the attribute.
    pub fn history(&self) -> History {
        self.state.history(self.target.key())
    }
}

/// The attributes of an instance, keyed like the mapper's `attrs()`.
#[derive(Debug, Clone)]
pub struct AttributeStates {
    state: Arc<InstanceState>,
    properties: Vec<Arc<MapperProperty>>,
}

impl AttributeStates {
    pub(crate) fn new(state: Arc<InstanceState>) -> Self {
        let properties = state.mapper().attrs().iter().cloned().collect();
        Self { state, properties }
    }

    /// Attribute names, column attributes first.
    pub fn keys(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.key()).collect()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// State of the attribute named `key`; unknown names are
    /// `NoSuchAttribute` errors.
    pub fn get(&self, key: &str) -> Result<AttributeState> {
        let property = self.state.mapper().get_property(key)?;
        AttributeState::new(Arc::clone(&self.state), property)
    }

    /// Attribute states in `keys()` order.
    pub fn iter(&self) -> impl Iterator<Item = Result<AttributeState>> + '_ {
        self.properties
            .iter()
            .map(|p| AttributeState::new(Arc::clone(&self.state), Arc::clone(p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_attribute_has_no_unchanged() {
        let h = History::compute(None, None);
        assert_eq!(h.unchanged, None);
        assert!(h.is_empty());
    }

    #[test]
    fn loaded_scalar_is_unchanged() {
        let current = AttrValue::from("ed");
        let h = History::compute(Some(&current), None);
        assert_eq!(h.unchanged, Some(vec![HistoryItem::from("ed")]));
        assert!(!h.has_changes());
    }

    #[test]
    fn modified_scalar_reports_added_and_deleted() {
        let current = AttrValue::from("jack");
        let original = LoadedValue::Loaded(AttrValue::from("ed"));
        let h = History::compute(Some(&current), Some(&original));
        assert_eq!(h.added, vec![HistoryItem::from("jack")]);
        assert_eq!(h.unchanged, Some(vec![]));
        assert_eq!(h.deleted, vec![HistoryItem::from("ed")]);
    }

    #[test]
    fn scalar_set_from_nothing_has_no_deleted() {
        let current = AttrValue::from("ed");
        let h = History::compute(Some(&current), Some(&LoadedValue::NoValue));
        assert_eq!(h.added, vec![HistoryItem::from("ed")]);
        assert!(h.deleted.is_empty());
    }

    #[test]
    fn reverted_scalar_is_unchanged() {
        let current = AttrValue::from("ed");
        let original = LoadedValue::Loaded(AttrValue::from("ed"));
        let h = History::compute(Some(&current), Some(&original));
        assert!(!h.has_changes());
        assert_eq!(h.unchanged, Some(vec![HistoryItem::from("ed")]));
    }

    #[test]
    fn empty_collection_history() {
        let current = AttrValue::Collection(Vec::new());
        let h = History::compute(Some(&current), None);
        assert_eq!(h.unchanged, Some(vec![]));
        assert!(h.is_empty());
    }

    #[test]
    fn no_value_is_distinct_from_null() {
        assert!(LoadedValue::NoValue.is_no_value());
        let null = LoadedValue::Loaded(AttrValue::Scalar(Value::Null));
        assert!(!null.is_no_value());
        assert_eq!(null.value(), Some(&AttrValue::Scalar(Value::Null)));
    }
}

//! Mappers and mapper properties.
//!
//! A [`Mapper`] binds a class name to a [`Table`] and holds an ordered set of
//! named properties. Column properties are generated from the table's columns
//! in declaration order; relationships and synonyms follow in the order they
//! were added.
//!
//! Properties expose kind-specific capabilities: asking a relationship for its
//! `columns()` or a column property for its `mapper()` is an
//! [`InspectionErrorKind::NoSuchAttribute`] error, not an empty answer.

use crate::registry::Registry;
use ormscope_core::{Error, InspectionError, InspectionErrorKind, Result};
use ormscope_query::{Column, ColumnCollection, Table};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Direction of a relationship, seen from the class that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The target's table has a foreign key to this table. Loads a collection.
    OneToMany,
    /// This table has a foreign key to the target's table. Loads one object.
    ManyToOne,
}

/// A property declaration, before it is attached to a mapper.
#[derive(Debug, Clone)]
pub enum PropertyDef {
    Column(Vec<Arc<Column>>),
    Relationship { target: String, direction: Direction },
    Synonym { name: String },
}

/// An alternate name for the property `name`.
pub fn synonym(name: impl Into<String>) -> PropertyDef {
    PropertyDef::Synonym { name: name.into() }
}

/// A collection of `target` instances whose table references this one.
pub fn one_to_many(target: impl Into<String>) -> PropertyDef {
    PropertyDef::Relationship {
        target: target.into(),
        direction: Direction::OneToMany,
    }
}

/// A single `target` instance referenced by this table's foreign key.
pub fn many_to_one(target: impl Into<String>) -> PropertyDef {
    PropertyDef::Relationship {
        target: target.into(),
        direction: Direction::ManyToOne,
    }
}

/// Map an additional attribute onto an existing column.
pub fn column_property(column: &Arc<Column>) -> PropertyDef {
    PropertyDef::Column(vec![Arc::clone(column)])
}

#[derive(Debug)]
pub struct ColumnProperty {
    columns: Vec<Arc<Column>>,
}

impl ColumnProperty {
    /// Mapped columns; the first is the property's expression.
    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    /// The column this property reads and writes.
    pub fn expression(&self) -> &Arc<Column> {
        &self.columns[0]
    }
}

pub struct RelationshipProperty {
    target: String,
    direction: Direction,
    registry: Weak<Registry>,
}

impl RelationshipProperty {
    /// Class name of the related mapper.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether the relationship points to one parent or many children.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True for one-to-many relationships.
    pub fn is_collection(&self) -> bool {
        self.direction == Direction::OneToMany
    }

    /// The related class's mapper, resolved through the registry.
    pub fn mapper(&self) -> Result<Arc<Mapper>> {
        match self.registry.upgrade() {
            Some(registry) => registry.mapper(&self.target),
            None => Err(Error::Inspection(InspectionError {
                kind: InspectionErrorKind::UnmappedClass,
                class: Some(self.target.clone()),
                attribute: None,
                message: "registry has been dropped".to_string(),
            })),
        }
    }

    /// The column pair joining `parent` to the target: `(local, remote)`.
    ///
    /// For one-to-many the remote column is the target's foreign key and the
    /// local column the parent column it references; many-to-one is the
    /// mirror image.
    pub fn join_columns(&self, parent: &Mapper) -> Result<(Arc<Column>, Arc<Column>)> {
        let target = self.mapper()?;
        let (referring, referred) = match self.direction {
            Direction::OneToMany => (target.local_table(), parent.local_table()),
            Direction::ManyToOne => (parent.local_table(), target.local_table()),
        };
        let fk_column = referring
            .foreign_keys_to(referred.name())
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::invalid_state(
                    parent.class_name(),
                    format!(
                        "no foreign key from '{}' to '{}' for relationship to {}",
                        referring.name(),
                        referred.name(),
                        self.target
                    ),
                )
            })?;
        let referred_column = fk_column
            .foreign_key()
            .and_then(|fk| referred.c().get(&fk.column))
            .cloned()
            .ok_or_else(|| {
                Error::invalid_state(
                    parent.class_name(),
                    format!(
                        "foreign key '{}.{}' names a missing column",
                        referring.name(),
                        fk_column.name()
                    ),
                )
            })?;
        Ok(match self.direction {
            Direction::OneToMany => (referred_column, fk_column),
            Direction::ManyToOne => (fk_column, referred_column),
        })
    }
}

impl fmt::Debug for RelationshipProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipProperty")
            .field("target", &self.target)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct SynonymProperty {
    name: String,
}

impl SynonymProperty {
    /// Key of the proxied property.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
pub enum PropertyKind {
    Column(ColumnProperty),
    Relationship(RelationshipProperty),
    Synonym(SynonymProperty),
}

impl PropertyKind {
    fn label(&self) -> &'static str {
        match self {
            PropertyKind::Column(_) => "column property",
            PropertyKind::Relationship(_) => "relationship",
            PropertyKind::Synonym(_) => "synonym",
        }
    }
}

/// A named property of a mapper.
pub struct MapperProperty {
    key: String,
    class_name: String,
    parent: Weak<Mapper>,
    kind: PropertyKind,
}

impl MapperProperty {
    /// Attribute name on the owning class.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Name of the class this property belongs to.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// What kind of property this is.
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// True for column properties.
    pub fn is_column(&self) -> bool {
        matches!(self.kind, PropertyKind::Column(_))
    }

    /// True for relationships.
    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, PropertyKind::Relationship(_))
    }

    /// True for synonyms.
    pub fn is_synonym(&self) -> bool {
        matches!(self.kind, PropertyKind::Synonym(_))
    }

    /// Typed view of a column property.
    ///
    /// ```rust,ignore
    /// let column = user.attr("name")?.property()?;
    /// assert_eq!(column.as_column().unwrap().expression().name(), "name");
    /// ```
    pub fn as_column(&self) -> Option<&ColumnProperty> {
        match &self.kind {
            PropertyKind::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Typed view of a relationship.
    pub fn as_relationship(&self) -> Option<&RelationshipProperty> {
        match &self.kind {
            PropertyKind::Relationship(r) => Some(r),
            _ => None,
        }
    }

    /// Typed view of a synonym.
    pub fn as_synonym(&self) -> Option<&SynonymProperty> {
        match &self.kind {
            PropertyKind::Synonym(s) => Some(s),
            _ => None,
        }
    }

    fn missing(&self, capability: &str) -> Error {
        Error::no_such_attribute(
            &self.class_name,
            &self.key,
            format!("{} has no attribute '{}'", self.kind.label(), capability),
        )
    }

    /// Columns of a column property.
    pub fn columns(&self) -> Result<&[Arc<Column>]> {
        self.as_column()
            .map(ColumnProperty::columns)
            .ok_or_else(|| self.missing("columns"))
    }

    /// SQL expression of a column property.
    pub fn expression(&self) -> Result<&Arc<Column>> {
        self.as_column()
            .map(ColumnProperty::expression)
            .ok_or_else(|| self.missing("expression"))
    }

    /// Target mapper of a relationship.
    pub fn mapper(&self) -> Result<Arc<Mapper>> {
        self.as_relationship()
            .ok_or_else(|| self.missing("mapper"))?
            .mapper()
    }

    pub(crate) fn parent_mapper(&self) -> Option<Arc<Mapper>> {
        self.parent.upgrade()
    }

    /// Mapper that declares a relationship.
    pub fn parent(&self) -> Result<Arc<Mapper>> {
        if !self.is_relationship() {
            return Err(self.missing("parent"));
        }
        self.parent
            .upgrade()
            .ok_or_else(|| Error::invalid_state(&self.class_name, "mapper has been dropped"))
    }
}

impl fmt::Debug for MapperProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapperProperty")
            .field("class", &self.class_name)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Which properties a [`PropertyView`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewKind {
    All,
    Columns,
    Synonyms,
    Relationships,
}

impl ViewKind {
    fn admits(self, prop: &MapperProperty) -> bool {
        match self {
            ViewKind::All => true,
            ViewKind::Columns => prop.is_column(),
            ViewKind::Synonyms => prop.is_synonym(),
            ViewKind::Relationships => prop.is_relationship(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            ViewKind::All => "mapped",
            ViewKind::Columns => "column",
            ViewKind::Synonyms => "synonym",
            ViewKind::Relationships => "relationship",
        }
    }
}

/// An ordered, keyed snapshot of a mapper's properties of one kind.
#[derive(Debug, Clone)]
pub struct PropertyView {
    class_name: String,
    kind: ViewKind,
    properties: Vec<Arc<MapperProperty>>,
}

impl PropertyView {
    /// Keys in view order.
    pub fn keys(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.key()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<MapperProperty>> {
        self.properties.iter()
    }

    /// Number of properties in the view.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Whether `key` names a property of this view's kind.
    pub fn contains_key(&self, key: &str) -> bool {
        self.properties.iter().any(|p| p.key() == key)
    }

    /// Property by key. A key outside this view is an error even when the
    /// mapper has a property of another kind under that name.
    pub fn get(&self, key: &str) -> Result<&Arc<MapperProperty>> {
        self.properties
            .iter()
            .find(|p| p.key() == key)
            .ok_or_else(|| {
                Error::no_such_attribute(
                    &self.class_name,
                    key,
                    format!("no {} property '{}'", self.kind.label(), key),
                )
            })
    }
}

impl<'a> IntoIterator for &'a PropertyView {
    type Item = &'a Arc<MapperProperty>;
    type IntoIter = std::slice::Iter<'a, Arc<MapperProperty>>;

    fn into_iter(self) -> Self::IntoIter {
        self.properties.iter()
    }
}

/// Metadata binding a class to a table and its properties.
pub struct Mapper {
    class_name: String,
    table: Table,
    registry: Weak<Registry>,
    this: Weak<Mapper>,
    properties: RwLock<Vec<Arc<MapperProperty>>>,
}

impl Mapper {
    /// A mapper with one column property per table column.
    pub(crate) fn new(class_name: String, table: &Table, registry: Weak<Registry>) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Mapper>| {
            let properties = table
                .columns()
                .iter()
                .map(|column| {
                    Arc::new(MapperProperty {
                        key: column.key().to_string(),
                        class_name: class_name.clone(),
                        parent: this.clone(),
                        kind: PropertyKind::Column(ColumnProperty {
                            columns: vec![Arc::clone(column)],
                        }),
                    })
                })
                .collect();
            Mapper {
                class_name,
                table: table.clone(),
                registry,
                this: this.clone(),
                properties: RwLock::new(properties),
            }
        })
    }

    /// Name the class was registered under.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// The table this class is mapped to.
    pub fn local_table(&self) -> &Table {
        &self.table
    }

    /// The mapped table's columns, in declaration order.
    pub fn columns(&self) -> &ColumnCollection {
        self.table.c()
    }

    /// Primary-key columns of the mapped table, in declaration order.
    pub fn primary_key(&self) -> Vec<Arc<Column>> {
        self.table.primary_key()
    }

    /// The owning registry, while something still holds it.
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    fn view(&self, kind: ViewKind) -> PropertyView {
        let properties = self
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| kind.admits(p))
            .cloned()
            .collect();
        PropertyView {
            class_name: self.class_name.clone(),
            kind,
            properties,
        }
    }

    /// Every property, including synonyms and relationships.
    pub fn attrs(&self) -> PropertyView {
        self.view(ViewKind::All)
    }

    /// Column properties only.
    pub fn column_attrs(&self) -> PropertyView {
        self.view(ViewKind::Columns)
    }

    /// Synonyms only.
    pub fn synonyms(&self) -> PropertyView {
        self.view(ViewKind::Synonyms)
    }

    /// Relationships only.
    pub fn relationships(&self) -> PropertyView {
        self.view(ViewKind::Relationships)
    }

    /// The property declared as `key`, synonyms included and unresolved.
    ///
    /// Unknown keys fail with `NoSuchAttribute`.
    pub fn get_property(&self, key: &str) -> Result<Arc<MapperProperty>> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.key() == key)
            .cloned()
            .ok_or_else(|| {
                Error::no_such_attribute(
                    &self.class_name,
                    key,
                    format!("Mapper '{}' has no property '{}'", self.class_name, key),
                )
            })
    }

    /// Look up `key`, following synonyms to the property they proxy.
    pub fn resolve_property(&self, key: &str) -> Result<Arc<MapperProperty>> {
        let mut prop = self.get_property(key)?;
        let mut hops = 0;
        while let Some(syn) = prop.as_synonym() {
            hops += 1;
            if hops > 8 {
                return Err(Error::invalid_state(
                    &self.class_name,
                    format!("synonym '{key}' does not resolve"),
                ));
            }
            prop = self.get_property(syn.name())?;
        }
        Ok(prop)
    }

    /// Column property mapped to `column`, if any.
    pub fn property_for_column(&self, column: &Arc<Column>) -> Option<Arc<MapperProperty>> {
        self.column_attrs()
            .iter()
            .find(|p| p.columns().is_ok_and(|cols| cols.iter().any(|c| Arc::ptr_eq(c, column))))
            .cloned()
    }

    /// Attach a property, replacing any property with the same key.
    ///
    /// New column properties go after the existing column properties; other
    /// kinds go last.
    pub fn add_property(
        &self,
        key: impl Into<String>,
        def: PropertyDef,
    ) -> Result<Arc<MapperProperty>> {
        let key = key.into();
        let kind = match def {
            PropertyDef::Column(columns) => {
                if columns.is_empty() || !columns.iter().all(|c| self.table.owns(c)) {
                    return Err(Error::invalid_state(
                        &self.class_name,
                        format!(
                            "column property '{}' must map columns of table '{}'",
                            key,
                            self.table.name()
                        ),
                    ));
                }
                PropertyKind::Column(ColumnProperty { columns })
            }
            PropertyDef::Relationship { target, direction } => {
                PropertyKind::Relationship(RelationshipProperty {
                    target,
                    direction,
                    registry: self.registry.clone(),
                })
            }
            PropertyDef::Synonym { name } => {
                if name == key {
                    return Err(Error::invalid_state(
                        &self.class_name,
                        format!("synonym '{key}' cannot proxy itself"),
                    ));
                }
                self.get_property(&name)?;
                PropertyKind::Synonym(SynonymProperty { name })
            }
        };

        let prop = Arc::new(MapperProperty {
            key: key.clone(),
            class_name: self.class_name.clone(),
            parent: self.this.clone(),
            kind,
        });

        let mut properties = self
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = properties.iter_mut().find(|p| p.key() == key) {
            *slot = Arc::clone(&prop);
        } else if prop.is_column() {
            let at = properties
                .iter()
                .rposition(|p| p.is_column())
                .map_or(0, |i| i + 1);
            properties.insert(at, Arc::clone(&prop));
        } else {
            properties.push(Arc::clone(&prop));
        }
        tracing::debug!(class = %self.class_name, key = %key, kind = prop.kind.label(), "Added property");
        Ok(prop)
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("class", &self.class_name)
            .field("table", &self.table.name())
            .field("properties", &self.attrs().keys())
            .finish()
    }
}

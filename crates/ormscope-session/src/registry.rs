//! The class registry and class-level handles.

use crate::mapper::{Mapper, MapperProperty, PropertyDef};
use crate::state::Instance;
use ormscope_core::{Error, InspectionError, InspectionErrorKind, Result, Value};
use ormscope_query::{MetaData, Table};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Owns the mappers of a set of classes and resolves relationship targets
/// by class name.
#[derive(Debug, Default)]
pub struct Registry {
    mappers: RwLock<Vec<Arc<Mapper>>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start mapping `class_name` to `table`.
    pub fn map(self: &Arc<Self>, class_name: impl Into<String>, table: &Table) -> MapperBuilder {
        MapperBuilder {
            registry: Arc::clone(self),
            class_name: class_name.into(),
            table: table.clone(),
            properties: Vec::new(),
        }
    }

    /// The mapper registered for `class_name`.
    pub fn mapper(&self, class_name: &str) -> Result<Arc<Mapper>> {
        self.mappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.class_name() == class_name)
            .cloned()
            .ok_or_else(|| {
                Error::Inspection(InspectionError {
                    kind: InspectionErrorKind::UnmappedClass,
                    class: Some(class_name.to_string()),
                    attribute: None,
                    message: "class is not mapped".to_string(),
                })
            })
    }

    /// The class handle for `class_name`.
    pub fn class(&self, class_name: &str) -> Result<MappedClass> {
        self.mapper(class_name).map(MappedClass::from_mapper)
    }

    /// Registered mappers in registration order.
    pub fn mappers(&self) -> Vec<Arc<Mapper>> {
        self.mappers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The mapped tables, for `create_all` / `drop_all`.
    pub fn metadata(&self) -> MetaData {
        let mut metadata = MetaData::new();
        for mapper in self.mappers() {
            metadata.add(mapper.local_table().clone());
        }
        metadata
    }
}

/// Builder returned by [`Registry::map`].
#[derive(Debug)]
pub struct MapperBuilder {
    registry: Arc<Registry>,
    class_name: String,
    table: Table,
    properties: Vec<(String, PropertyDef)>,
}

impl MapperBuilder {
    /// Declare an extra property (relationship, synonym, column alias).
    pub fn property(mut self, key: impl Into<String>, def: PropertyDef) -> Self {
        self.properties.push((key.into(), def));
        self
    }

    /// Create the mapper and register it.
    pub fn build(self) -> Result<MappedClass> {
        if self.registry.mapper(&self.class_name).is_ok() {
            return Err(Error::invalid_state(
                &self.class_name,
                "class is already mapped",
            ));
        }
        if self.table.primary_key().is_empty() {
            return Err(Error::invalid_state(
                &self.class_name,
                format!("table '{}' has no primary key", self.table.name()),
            ));
        }

        let mapper = Mapper::new(self.class_name, &self.table, Arc::downgrade(&self.registry));
        for (key, def) in self.properties {
            mapper.add_property(key, def)?;
        }
        self.registry
            .mappers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&mapper));
        tracing::debug!(class = %mapper.class_name(), table = %self.table.name(), "Mapped class");
        Ok(MappedClass {
            mapper,
            registry: Some(self.registry),
        })
    }
}

/// A mapped class: the handle user code holds in place of a type.
///
/// Mappers refer to their registry weakly; a class handle holds it
/// strongly, so `Registry::new().map(..).build()?` stays usable after the
/// temporary `Arc<Registry>` is gone.
#[derive(Clone)]
pub struct MappedClass {
    mapper: Arc<Mapper>,
    registry: Option<Arc<Registry>>,
}

impl MappedClass {
    /// The class name the mapper was registered under.
    pub fn name(&self) -> &str {
        self.mapper.class_name()
    }

    pub(crate) fn mapper(&self) -> &Arc<Mapper> {
        &self.mapper
    }

    /// The registry this class is mapped in. `None` only for mappers built
    /// outside a registry.
    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.registry.as_ref()
    }

    pub(crate) fn from_mapper(mapper: Arc<Mapper>) -> Self {
        let registry = mapper.registry();
        Self { mapper, registry }
    }

    /// Class-level attribute, e.g. `User.addresses`.
    pub fn attr(&self, key: &str) -> Result<ClassAttribute> {
        self.mapper
            .get_property(key)
            .map(|property| ClassAttribute { property })
    }

    /// A new, transient instance with no attributes set.
    pub fn instance(&self) -> Instance {
        Instance::new(Arc::clone(&self.mapper))
    }

    /// A new, transient instance with the given scalar attributes set.
    pub fn create<K: AsRef<str>, V: Into<Value>>(
        &self,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Instance> {
        let instance = self.instance();
        for (key, value) in values {
            instance.set(key.as_ref(), value)?;
        }
        Ok(instance)
    }
}

impl PartialEq for MappedClass {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.mapper, &other.mapper)
    }
}

impl Eq for MappedClass {}

impl fmt::Debug for MappedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name())
    }
}

/// A property accessed through its class, e.g. `User.attr("addresses")`.
#[derive(Debug, Clone)]
pub struct ClassAttribute {
    property: Arc<MapperProperty>,
}

impl ClassAttribute {
    /// Attribute name as declared on the class.
    pub fn key(&self) -> &str {
        self.property.key()
    }

    /// The property this attribute reads and writes; synonyms resolve to
    /// the property they proxy.
    pub fn property(&self) -> Result<Arc<MapperProperty>> {
        if !self.property.is_synonym() {
            return Ok(Arc::clone(&self.property));
        }
        let parent = self.property.parent_mapper().ok_or_else(|| {
            Error::invalid_state(self.property.class_name(), "mapper has been dropped")
        })?;
        parent.resolve_property(self.property.key())
    }

    /// The property as declared, without synonym resolution.
    pub fn original_property(&self) -> Arc<MapperProperty> {
        Arc::clone(&self.property)
    }
}

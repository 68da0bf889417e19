//! `inspect()`: one entry point for classes, instances and class attributes.
//!
//! ```ignore
//! let mapper = inspect(&user_class);          // Arc<Mapper>
//! let state = inspect(&user);                 // Arc<InstanceState>
//! let prop = inspect(&user_class.attr("addresses")?); // Arc<MapperProperty>
//! ```

use crate::mapper::{Mapper, MapperProperty};
use crate::registry::{ClassAttribute, MappedClass};
use crate::state::{Instance, InstanceState};
use std::sync::Arc;

/// Something `inspect()` accepts.
pub trait Inspectable {
    type Inspector;

    fn inspect(&self) -> Self::Inspector;
}

impl Inspectable for MappedClass {
    type Inspector = Arc<Mapper>;

    fn inspect(&self) -> Arc<Mapper> {
        Arc::clone(self.mapper())
    }
}

impl Inspectable for Instance {
    type Inspector = Arc<InstanceState>;

    fn inspect(&self) -> Arc<InstanceState> {
        self.state()
    }
}

impl Inspectable for ClassAttribute {
    type Inspector = Arc<MapperProperty>;

    fn inspect(&self) -> Arc<MapperProperty> {
        self.original_property()
    }
}

/// The inspector for `target`.
pub fn inspect<T: Inspectable + ?Sized>(target: &T) -> T::Inspector {
    target.inspect()
}

/// The mapper of a mapped class; the same `Arc` as `inspect(class)`.
pub fn class_mapper(class: &MappedClass) -> Arc<Mapper> {
    inspect(class)
}

/// The state of an instance; the same `Arc` as `inspect(instance)`.
pub fn instance_state(instance: &Instance) -> Arc<InstanceState> {
    inspect(instance)
}

//! Mappers, instance state, inspection and the unit of work for ormscope.
//!
//! `ormscope-session` is the **ORM layer**. Classes are mapped at runtime:
//! a [`Registry`] binds a class name to a `Table` and a set of properties,
//! and hands back a [`MappedClass`] whose instances carry their own tracked
//! state.
//!
//! # Role In The Architecture
//!
//! - **Mapping**: [`Mapper`] and [`MapperProperty`] describe columns,
//!   relationships and synonyms.
//! - **Inspection**: [`inspect`] returns the mapper of a class, the state of
//!   an instance, or the property behind a class attribute.
//! - **State tracking**: every [`Instance`] has an [`InstanceState`] with a
//!   lifecycle [`Status`], an identity, and per-attribute [`History`].
//! - **Unit of work**: [`Session`] attaches instances, flushes them to a
//!   `Connection` parent-first, and loads rows through an identity map.
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::new();
//! let user = registry
//!     .map("User", &users)
//!     .property("addresses", one_to_many("Address"))
//!     .build()?;
//!
//! let ed = user.create([("name", "ed")])?;
//! assert!(inspect(&ed).is_transient());
//!
//! let mut session = Session::new(conn);
//! session.add(&ed)?;
//! session.flush(&cx).await?;
//! assert!(inspect(&ed).is_persistent());
//! ```

pub mod attributes;
pub mod flush;
pub mod inspection;
pub mod mapper;
pub mod registry;
pub mod session;
pub mod state;

pub use attributes::{
    AttrValue, AttributeState, AttributeStates, History, HistoryItem, LoadedValue,
};
pub use flush::{FlushOrderer, FlushPlan};
pub use inspection::{Inspectable, class_mapper, inspect, instance_state};
pub use mapper::{
    ColumnProperty, Direction, Mapper, MapperProperty, PropertyDef, PropertyKind, PropertyView,
    RelationshipProperty, SynonymProperty, column_property, many_to_one, one_to_many, synonym,
};
pub use registry::{ClassAttribute, MappedClass, MapperBuilder, Registry};
pub use session::{Query, Session, SessionConfig, SessionId};
pub use state::{IdentityKey, Instance, InstanceState, Status};

//! The unit of work.
//!
//! A [`Session`] tracks pending instances and an identity map of persistent
//! ones over a single [`Connection`]. Nothing reaches the database until
//! [`Session::flush`], unless `SessionConfig::autoflush` is set, in which case
//! queries issued through the session flush first.

use crate::attributes::{AttrValue, HistoryItem};
use crate::flush::FlushOrderer;
use crate::mapper::{Direction, Mapper};
use crate::registry::MappedClass;
use crate::state::{IdentityKey, Instance, InstanceState};
use ormscope_core::{
    Connection, Cx, Error, InspectionError, InspectionErrorKind, Outcome, Result, Value,
    try_outcome, try_result,
};
use ormscope_query::{
    Column, Expr, MetaData, OrderBy, Params, ResultRow, ResultSet, Select, Statement,
    execute_compiled, select,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a session; instances record the id of the session they are
/// attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id, unique for the life of the process.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for Session behavior.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Flush pending changes before queries issued through the session.
    pub autoflush: bool,
}

impl SessionConfig {
    /// Defaults: autoflush off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flush before `get`, `query`, `load_relationship` and `execute` when
    /// enabled.
    pub fn autoflush(mut self, enabled: bool) -> Self {
        self.autoflush = enabled;
        self
    }
}

/// Unit of work over one connection.
pub struct Session<C: Connection> {
    connection: C,
    id: SessionId,
    config: SessionConfig,
    attached: Attached,
}

/// Instances attached to a session. Dropping it detaches them, so a
/// dropped session leaves no instance pointing at it.
#[derive(Default)]
struct Attached {
    /// Pending instances, in the order they were added.
    new: Vec<Instance>,
    /// Persistent instances by identity.
    identity_map: HashMap<IdentityKey, Instance>,
}

impl Attached {
    fn detach_all(&mut self) {
        for instance in self.new.drain(..).chain(self.identity_map.drain().map(|(_, i)| i)) {
            instance.state().set_session(None);
        }
    }
}

impl Drop for Attached {
    fn drop(&mut self) {
        self.detach_all();
    }
}

impl<C: Connection> Session<C> {
    /// A session over `connection` with the default configuration.
    pub fn new(connection: C) -> Self {
        Self::with_config(connection, SessionConfig::default())
    }

    /// A session over `connection` with explicit configuration.
    pub fn with_config(connection: C, config: SessionConfig) -> Self {
        let id = SessionId::next();
        tracing::debug!(session = %id, autoflush = config.autoflush, "Opened session");
        Self {
            connection,
            id,
            config,
            attached: Attached::default(),
        }
    }

    /// This session's id, as recorded on attached instances.
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The connection statements run on.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Give the connection back, detaching every instance.
    pub fn into_connection(mut self) -> C {
        self.expunge_all();
        self.connection
    }

    /// Attach `instance` and everything reachable through its loaded
    /// relationships. Transient instances become pending, detached ones
    /// persistent.
    pub fn add(&mut self, instance: &Instance) -> Result<()> {
        self.attach(instance)?;
        self.cascade_from(instance)
    }

    /// [`add`](Self::add) for each instance, stopping at the first error.
    pub fn add_all<'a>(&mut self, instances: impl IntoIterator<Item = &'a Instance>) -> Result<()> {
        for instance in instances {
            self.add(instance)?;
        }
        Ok(())
    }

    /// Whether `instance` is attached to this session.
    pub fn contains(&self, instance: &Instance) -> bool {
        instance.state().session_id() == Some(self.id)
    }

    /// Detach `instance`. Persistent instances become detached and keep
    /// their identity; pending ones become transient again.
    pub fn expunge(&mut self, instance: &Instance) -> Result<()> {
        let state = instance.state();
        if !self.contains(instance) {
            return Err(Error::invalid_state(
                state.mapper().class_name(),
                "instance is not present in this session",
            ));
        }
        self.attached.new.retain(|i| i != instance);
        if let Some(key) = state.identity_key() {
            if self.attached.identity_map.get(&key).is_some_and(|i| i == instance) {
                self.attached.identity_map.remove(&key);
            }
        }
        state.set_session(None);
        tracing::debug!(session = %self.id, class = state.mapper().class_name(), "Expunged instance");
        Ok(())
    }

    /// Detach every instance. Dropping the session does the same.
    pub fn expunge_all(&mut self) {
        self.attached.detach_all();
    }

    /// Pending instances, in the order they were added.
    pub fn pending_instances(&self) -> &[Instance] {
        &self.attached.new
    }

    /// Persistent instances in the identity map.
    pub fn persistent_instances(&self) -> Vec<Instance> {
        self.attached.identity_map.values().cloned().collect()
    }

    /// Persistent instances with unflushed changes.
    pub fn dirty_instances(&self) -> Vec<Instance> {
        self.attached.identity_map
            .values()
            .filter(|i| i.state().is_modified())
            .cloned()
            .collect()
    }

    /// Whether a flush would write anything.
    pub fn has_pending_changes(&self) -> bool {
        !self.attached.new.is_empty() || self.attached.identity_map.values().any(|i| i.state().is_modified())
    }

    /// The instance with `key`, if it is in the identity map.
    pub fn identity_lookup(&self, key: &IdentityKey) -> Option<&Instance> {
        self.attached.identity_map.get(key)
    }

    /// Returns whether the instance was newly attached.
    fn attach(&mut self, instance: &Instance) -> Result<bool> {
        let state = instance.state();
        match state.session_id() {
            Some(id) if id == self.id => return Ok(false),
            Some(other) => {
                return Err(Error::invalid_state(
                    state.mapper().class_name(),
                    format!("instance is already attached to session {other}"),
                ));
            }
            None => {}
        }
        ensure_mapped(&state)?;

        if let Some(key) = state.identity_key() {
            if self.attached.identity_map.get(&key).is_some_and(|i| i != instance) {
                return Err(Error::invalid_state(
                    state.mapper().class_name(),
                    format!(
                        "another instance with identity {:?} is already in this session",
                        key.key()
                    ),
                ));
            }
            self.attached.identity_map.insert(key, instance.clone());
        } else {
            self.attached.new.push(instance.clone());
        }
        state.set_session(Some(self.id));
        tracing::debug!(
            session = %self.id,
            class = state.mapper().class_name(),
            status = ?state.status(),
            "Attached instance"
        );
        Ok(true)
    }

    /// Save-update cascade along loaded relationships.
    fn cascade_from(&mut self, root: &Instance) -> Result<()> {
        let mut queue: VecDeque<Instance> = related_instances(&root.state()).into();
        while let Some(next) = queue.pop_front() {
            if self.attach(&next)? {
                queue.extend(related_instances(&next.state()));
            }
        }
        Ok(())
    }

    fn cascade(&mut self) -> Result<()> {
        let roots: Vec<Instance> = self
            .attached
            .new
            .iter()
            .chain(self.attached.identity_map.values())
            .cloned()
            .collect();
        for root in &roots {
            self.cascade_from(root)?;
        }
        Ok(())
    }

    /// Write pending changes: INSERT pending instances parent-first, then
    /// UPDATE modified persistent ones. Flushed instances are persistent and
    /// their attribute history is committed.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(session = %self.id))]
    pub async fn flush(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_result!(self.cascade());

        let mut metadata = MetaData::new();
        for instance in &self.attached.new {
            let table = instance.state().mapper().local_table().clone();
            if metadata.get(table.name()).is_none() {
                metadata.add(table);
            }
        }
        let plan = FlushOrderer::new(&metadata).order(self.attached.new.clone(), self.persistent_instances());
        if plan.is_empty() {
            tracing::trace!("Nothing to flush");
            return Outcome::Ok(());
        }
        tracing::debug!(
            inserts = plan.inserts.len(),
            persistent = plan.updates.len(),
            "Flushing"
        );

        for instance in &plan.updates {
            try_result!(push_to_children(&instance.state()));
        }

        for instance in &plan.inserts {
            let state = instance.state();
            try_result!(sync_from_parent(&state));
            let identity = try_outcome!(self.insert_instance(cx, &state).await);
            state.set_identity(identity);
            state.commit_all();
            if let Some(key) = state.identity_key() {
                tracing::debug!(class = state.mapper().class_name(), identity = ?key.key(), "Assigned identity");
                self.attached.new.retain(|i| i != instance);
                self.attached.identity_map.insert(key, instance.clone());
            }
            try_result!(push_to_children(&state));
        }

        let persistent = self.persistent_instances();
        for instance in &persistent {
            let state = instance.state();
            try_result!(sync_from_parent(&state));
            try_result!(push_to_children(&state));
        }
        for instance in &persistent {
            let state = instance.state();
            let changed = state.changed_columns();
            if !changed.is_empty() {
                try_outcome!(self.update_instance(cx, &state, changed).await);
            }
            state.commit_all();
        }
        Outcome::Ok(())
    }

    /// INSERT one pending instance; returns its primary-key values.
    async fn insert_instance(&self, cx: &Cx, state: &InstanceState) -> Outcome<Vec<Value>, Error> {
        let mapper = state.mapper();
        let table = mapper.local_table();
        let mut params = Params::new();
        for (key, value) in state.column_values() {
            let omit = value.is_null()
                && table
                    .c()
                    .get(&key)
                    .is_some_and(|c| c.is_primary_key() || c.server_default().is_some());
            if !omit {
                params.insert(key, value);
            }
        }

        let pk = mapper.primary_key();
        if let Some(missing) = pk
            .iter()
            .find(|c| !params.contains_key(c.key()) && !c.is_autoincrement())
        {
            return Outcome::Err(Error::invalid_state(
                mapper.class_name(),
                format!(
                    "instance has no value for primary key column '{}.{}'",
                    table.name(),
                    missing.name()
                ),
            ));
        }

        let compiled = try_result!(
            table
                .insert()
                .compile_with(self.connection.dialect(), Some(&params))
        );
        let result = try_outcome!(
            execute_compiled(cx, &self.connection, &compiled, std::slice::from_ref(&params)).await
        );

        let mut identity = Vec::with_capacity(pk.len());
        for column in &pk {
            let value = match params.get(column.key()) {
                Some(v) => v.clone(),
                None => match result.last_insert_id() {
                    Some(id) => Value::BigInt(id),
                    None => {
                        return Outcome::Err(Error::invalid_state(
                            mapper.class_name(),
                            format!("no generated value for '{}.{}'", table.name(), column.name()),
                        ));
                    }
                },
            };
            if let Some(prop) = mapper.property_for_column(column) {
                state.set_loaded(prop.key(), AttrValue::Scalar(value.clone()));
            }
            identity.push(value);
        }
        Outcome::Ok(identity)
    }

    async fn update_instance(
        &self,
        cx: &Cx,
        state: &InstanceState,
        changed: Vec<(String, Value)>,
    ) -> Outcome<(), Error> {
        let mapper = state.mapper();
        let table = mapper.local_table();
        let identity = state.identity().unwrap_or_default();
        let criteria = Expr::all(
            mapper
                .primary_key()
                .iter()
                .zip(identity.iter())
                .map(|(c, v)| Expr::col(c).eq(v.clone())),
        );
        let Some(criteria) = criteria else {
            return Outcome::Err(Error::invalid_state(
                mapper.class_name(),
                "cannot update an instance without identity",
            ));
        };

        let params: Params = changed.into_iter().collect();
        let compiled = try_result!(
            table
                .update()
                .where_(criteria)
                .compile_with(self.connection.dialect(), Some(&params))
        );
        let result = try_outcome!(
            execute_compiled(cx, &self.connection, &compiled, std::slice::from_ref(&params)).await
        );
        if result.rowcount() == 0 {
            tracing::warn!(
                class = mapper.class_name(),
                identity = ?identity,
                "UPDATE matched no rows"
            );
        }
        Outcome::Ok(())
    }

    async fn autoflush(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.config.autoflush && self.has_pending_changes() {
            tracing::trace!("Autoflush");
            return self.flush(cx).await;
        }
        Outcome::Ok(())
    }

    /// The instance of `class` with primary key `ident`: from the identity
    /// map when present, otherwise loaded with a SELECT.
    #[tracing::instrument(level = "debug", skip(self, cx, class), fields(class = class.name()))]
    pub async fn get(
        &mut self,
        cx: &Cx,
        class: &MappedClass,
        ident: &[Value],
    ) -> Outcome<Option<Instance>, Error> {
        let mapper = Arc::clone(class.mapper());
        let pk = mapper.primary_key();
        if ident.len() != pk.len() {
            return Outcome::Err(Error::invalid_state(
                class.name(),
                format!(
                    "expected {} primary key value(s), got {}",
                    pk.len(),
                    ident.len()
                ),
            ));
        }
        let key = IdentityKey::new(class, ident.to_vec());
        if let Some(found) = self.attached.identity_map.get(&key) {
            tracing::trace!("Identity map hit");
            return Outcome::Ok(Some(found.clone()));
        }

        try_outcome!(self.autoflush(cx).await);
        let criteria = Expr::all(
            pk.iter()
                .zip(ident)
                .map(|(c, v)| Expr::col(c).eq(v.clone())),
        );
        let mut stmt = select([mapper.local_table()]);
        if let Some(criteria) = criteria {
            stmt = stmt.where_(criteria);
        }
        let loaded = try_outcome!(self.load(cx, &mapper, stmt).await);
        Outcome::Ok(loaded.into_iter().next())
    }

    /// A query over `class`.
    pub fn query(&mut self, class: &MappedClass) -> Query<'_, C> {
        Query {
            mapper: Arc::clone(class.mapper()),
            session: self,
            criteria: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Run a SELECT over `mapper`'s table and turn its rows into instances.
    async fn load(&mut self, cx: &Cx, mapper: &Arc<Mapper>, stmt: Select) -> Outcome<Vec<Instance>, Error> {
        let result = try_outcome!(ormscope_query::execute(cx, &self.connection, stmt, &[]).await);
        let mut instances = Vec::with_capacity(result.len());
        for row in result.rows() {
            instances.push(try_result!(self.instance_from_row(mapper, row)));
        }
        tracing::debug!(class = mapper.class_name(), count = instances.len(), "Loaded instances");
        Outcome::Ok(instances)
    }

    /// The persistent instance for `row`. An instance already in the
    /// identity map is returned as is.
    fn instance_from_row(&mut self, mapper: &Arc<Mapper>, row: &ResultRow) -> Result<Instance> {
        let identity = mapper
            .primary_key()
            .iter()
            .map(|c| row.column(c).cloned())
            .collect::<Result<Vec<_>>>()?;
        if identity.iter().any(Value::is_null) {
            return Err(Error::invalid_state(
                mapper.class_name(),
                "row has a NULL primary key",
            ));
        }
        let key = IdentityKey::for_class(mapper.class_name(), identity.clone());
        if let Some(existing) = self.attached.identity_map.get(&key) {
            return Ok(existing.clone());
        }

        let instance = Instance::new(Arc::clone(mapper));
        let state = instance.state();
        for prop in &mapper.column_attrs() {
            if let Ok(value) = row.column(prop.expression()?) {
                state.set_loaded(prop.key(), AttrValue::Scalar(value.clone()));
            }
        }
        state.set_identity(identity);
        state.set_session(Some(self.id));
        tracing::trace!(class = mapper.class_name(), identity = ?key.key(), "Loaded instance");
        self.attached.identity_map.insert(key, instance.clone());
        Ok(instance)
    }

    /// Load relationship `key` of a persistent instance from the database.
    #[tracing::instrument(level = "debug", skip(self, cx, instance))]
    pub async fn load_relationship(
        &mut self,
        cx: &Cx,
        instance: &Instance,
        key: &str,
    ) -> Outcome<AttrValue, Error> {
        let state = instance.state();
        let mapper = Arc::clone(state.mapper());
        if !(state.is_persistent() && self.contains(instance)) {
            return Outcome::Err(Error::invalid_state(
                mapper.class_name(),
                format!("cannot load '{key}' of an instance that is not persistent in this session"),
            ));
        }
        let prop = try_result!(mapper.resolve_property(key));
        let Some(rel) = prop.as_relationship() else {
            return Outcome::Err(Error::invalid_state(
                mapper.class_name(),
                format!("'{key}' is not a relationship"),
            ));
        };
        try_outcome!(self.autoflush(cx).await);

        let target = try_result!(rel.mapper());
        let (local, remote) = try_result!(rel.join_columns(&mapper));
        let local_value = column_value(&state, &local);
        let value = match (rel.direction(), local_value) {
            (Direction::OneToMany, None) => AttrValue::Collection(Vec::new()),
            (Direction::OneToMany, Some(parent)) => {
                let mut stmt = select([target.local_table()]).where_(Expr::col(&remote).eq(parent));
                for column in target.primary_key() {
                    stmt = stmt.order_by(&column);
                }
                AttrValue::Collection(try_outcome!(self.load(cx, &target, stmt).await))
            }
            (Direction::ManyToOne, None) => AttrValue::Object(None),
            (Direction::ManyToOne, Some(fk)) => {
                let pk = target.primary_key();
                if pk.len() == 1 && Arc::ptr_eq(&pk[0], &remote) {
                    let class = MappedClass::from_mapper(Arc::clone(&target));
                    AttrValue::Object(try_outcome!(self.get(cx, &class, &[fk]).await))
                } else {
                    let stmt = select([target.local_table()])
                        .where_(Expr::col(&remote).eq(fk))
                        .limit(1);
                    let loaded = try_outcome!(self.load(cx, &target, stmt).await);
                    AttrValue::Object(loaded.into_iter().next())
                }
            }
        };
        state.set_loaded(prop.key(), value.clone());
        tracing::debug!(class = mapper.class_name(), key = prop.key(), "Loaded relationship");
        Outcome::Ok(value)
    }

    /// Execute a statement on the session's connection, autoflushing first.
    pub async fn execute(
        &mut self,
        cx: &Cx,
        statement: impl Into<Statement>,
        params: &[Params],
    ) -> Outcome<ResultSet, Error> {
        let statement = statement.into();
        try_outcome!(self.autoflush(cx).await);
        ormscope_query::execute(cx, &self.connection, statement, params).await
    }
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("new", &self.attached.new.len())
            .field("identity_map", &self.attached.identity_map.len())
            .finish_non_exhaustive()
    }
}

/// A SELECT over one mapped class, loading through the session.
pub struct Query<'s, C: Connection> {
    session: &'s mut Session<C>,
    mapper: Arc<Mapper>,
    criteria: Vec<Expr>,
    order: Vec<OrderBy>,
    limit: Option<u64>,
}

impl<'s, C: Connection> Query<'s, C> {
    /// Add a WHERE criterion; several criteria are joined with AND.
    pub fn filter(mut self, criterion: Expr) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Append an ORDER BY term.
    pub fn order_by(mut self, term: impl Into<OrderBy>) -> Self {
        self.order.push(term.into());
        self
    }

    /// Load at most `n` rows.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// The SELECT this query runs.
    pub fn statement(&self) -> Select {
        let mut stmt = select([self.mapper.local_table()]);
        for criterion in &self.criteria {
            stmt = stmt.where_(criterion.clone());
        }
        for term in &self.order {
            stmt = stmt.order_by(term.clone());
        }
        if let Some(n) = self.limit {
            stmt = stmt.limit(n);
        }
        stmt
    }

    /// Instance by primary key; filters do not apply.
    pub async fn get(self, cx: &Cx, ident: &[Value]) -> Outcome<Option<Instance>, Error> {
        let class = MappedClass::from_mapper(self.mapper);
        self.session.get(cx, &class, ident).await
    }

    /// Every matching instance, through the identity map.
    pub async fn all(self, cx: &Cx) -> Outcome<Vec<Instance>, Error> {
        try_outcome!(self.session.autoflush(cx).await);
        let stmt = self.statement();
        self.session.load(cx, &self.mapper, stmt).await
    }

    /// The first matching instance, if any.
    pub async fn first(self, cx: &Cx) -> Outcome<Option<Instance>, Error> {
        let found = try_outcome!(self.limit(1).all(cx).await);
        Outcome::Ok(found.into_iter().next())
    }
}

impl<C: Connection> fmt::Debug for Query<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("class", &self.mapper.class_name())
            .field("criteria", &self.criteria.len())
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

fn ensure_mapped(state: &InstanceState) -> Result<()> {
    let mapper = state.mapper();
    let registered = state
        .registry()
        .and_then(|r| r.mapper(mapper.class_name()).ok());
    match registered {
        Some(m) if Arc::ptr_eq(&m, mapper) => Ok(()),
        _ => Err(Error::Inspection(InspectionError {
            kind: InspectionErrorKind::UnmappedClass,
            class: Some(mapper.class_name().to_string()),
            attribute: None,
            message: "class is not mapped in a live registry".to_string(),
        })),
    }
}

fn related_instances(state: &InstanceState) -> Vec<Instance> {
    state
        .loaded_relationships()
        .into_iter()
        .flat_map(|(_, value)| value.instances())
        .collect()
}

/// Current non-null value of `column` on `state`.
fn column_value(state: &InstanceState, column: &Arc<Column>) -> Option<Value> {
    state
        .mapper()
        .property_for_column(column)
        .and_then(|p| state.scalar(p.key()))
        .filter(|v| !v.is_null())
}

/// Copy many-to-one targets' keys into this instance's foreign keys.
fn sync_from_parent(state: &InstanceState) -> Result<()> {
    let mapper = state.mapper();
    for (prop, value) in state.loaded_relationships() {
        let Some(rel) = prop.as_relationship() else {
            continue;
        };
        if rel.direction() != Direction::ManyToOne {
            continue;
        }
        let (local, remote) = rel.join_columns(mapper)?;
        let Some(fk) = mapper.property_for_column(&local) else {
            continue;
        };
        match value {
            AttrValue::Object(Some(target)) => {
                if let Some(v) = column_value(&target.state(), &remote) {
                    state.sync_value(fk.key(), v);
                }
            }
            AttrValue::Object(None) if state.history(prop.key()).has_changes() => {
                state.sync_value(fk.key(), Value::Null);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Copy this instance's key into the foreign keys of its one-to-many
/// members; members removed since the last flush get a NULL foreign key.
fn push_to_children(state: &InstanceState) -> Result<()> {
    let mapper = state.mapper();
    for (prop, value) in state.loaded_relationships() {
        let Some(rel) = prop.as_relationship() else {
            continue;
        };
        if rel.direction() != Direction::OneToMany {
            continue;
        }
        let (local, remote) = rel.join_columns(mapper)?;
        let Some(parent_value) = column_value(state, &local) else {
            continue;
        };
        let target = rel.mapper()?;
        let Some(fk) = target.property_for_column(&remote) else {
            continue;
        };
        for child in value.instances() {
            child.state().sync_value(fk.key(), parent_value.clone());
        }
        for removed in state.history(prop.key()).deleted {
            if let HistoryItem::Instance(child) = removed {
                let child = child.state();
                if child.scalar(fk.key()).is_some_and(|v| v == parent_value) {
                    child.sync_value(fk.key(), Value::Null);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{many_to_one, one_to_many};
    use crate::registry::Registry;
    use crate::state::Status;
    use asupersync::runtime::RuntimeBuilder;
    use ormscope_query::{Integer, StringType, Table, column};
    use ormscope_sqlite::SqliteConnection;

    fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    }

    struct Fixture {
        registry: Arc<Registry>,
        user: MappedClass,
        address: MappedClass,
    }

    fn fixture() -> Fixture {
        let users = Table::new(
            "users",
            [
                column("id", Integer).primary_key(),
                column("name", StringType::new()),
            ],
        );
        let addresses = Table::new(
            "addresses",
            [
                column("id", Integer).primary_key(),
                column("user_id", Integer).foreign_key("users.id"),
                column("email", StringType::new()),
            ],
        );
        let registry = Registry::new();
        let user = registry
            .map("User", &users)
            .property("addresses", one_to_many("Address"))
            .build()
            .unwrap();
        let address = registry
            .map("Address", &addresses)
            .property("user", many_to_one("User"))
            .build()
            .unwrap();
        Fixture {
            registry,
            user,
            address,
        }
    }

    fn open_session() -> Session<SqliteConnection> {
        Session::new(SqliteConnection::open_memory().expect("open sqlite memory db"))
    }

    #[test]
    fn add_flush_expunge_lifecycle() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let fx = fixture();

        rt.block_on(async {
            let mut session = open_session();
            unwrap_outcome(fx.registry.metadata().create_all(&cx, session.connection()).await);

            let ed = fx.user.create([("name", "ed")]).unwrap();
            session.add(&ed).unwrap();
            assert_eq!(ed.state().status(), Status::Pending);
            assert!(session.contains(&ed));
            assert_eq!(session.pending_instances().len(), 1);

            unwrap_outcome(session.flush(&cx).await);
            let state = ed.state();
            assert!(state.is_persistent());
            let id = state.identity().unwrap();
            assert_eq!(id.len(), 1);
            assert_eq!(ed.get_value("id").unwrap(), id[0]);
            assert!(session.pending_instances().is_empty());

            session.expunge(&ed).unwrap();
            assert!(state.is_detached());
            assert_eq!(state.identity(), Some(id));
            assert!(session.expunge(&ed).is_err());
        });
    }

    #[test]
    fn flush_cascades_and_fills_foreign_keys() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let fx = fixture();

        rt.block_on(async {
            let mut session = open_session();
            unwrap_outcome(fx.registry.metadata().create_all(&cx, session.connection()).await);

            let jack = fx.user.create([("name", "jack")]).unwrap();
            let a1 = fx.address.create([("email", "jack@bean.com")]).unwrap();
            let a2 = fx.address.create([("email", "j25@yahoo.com")]).unwrap();
            jack.append("addresses", &a1).unwrap();
            a2.set_related("user", Some(&jack)).unwrap();

            // Only the address is added; the user comes along through the cascade.
            session.add(&a2).unwrap();
            assert!(session.contains(&jack));
            assert!(session.contains(&a1));
            unwrap_outcome(session.flush(&cx).await);

            let jack_id = jack.get_value("id").unwrap();
            assert_eq!(a1.get_value("user_id").unwrap(), jack_id);
            assert_eq!(a2.get_value("user_id").unwrap(), jack_id);
            assert!(!a1.state().is_modified());
        });
    }

    #[test]
    fn get_uses_identity_map_then_database() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let fx = fixture();

        rt.block_on(async {
            let mut session = open_session();
            unwrap_outcome(fx.registry.metadata().create_all(&cx, session.connection()).await);

            let ed = fx.user.create([("id", Value::BigInt(7)), ("name", Value::from("ed"))]).unwrap();
            session.add(&ed).unwrap();
            unwrap_outcome(session.flush(&cx).await);

            let again = unwrap_outcome(session.get(&cx, &fx.user, &[Value::Int(7)]).await);
            assert_eq!(again, Some(ed.clone()));

            session.expunge_all();
            let loaded = unwrap_outcome(session.get(&cx, &fx.user, &[Value::BigInt(7)]).await)
                .expect("row 7");
            assert!(!loaded.ptr_eq(&ed));
            assert!(loaded.state().is_persistent());
            assert_eq!(loaded.get_value("name").unwrap(), Value::from("ed"));

            let missing = unwrap_outcome(session.get(&cx, &fx.user, &[Value::BigInt(99)]).await);
            assert!(missing.is_none());
        });
    }

    #[test]
    fn modified_persistent_instances_are_updated() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let fx = fixture();

        rt.block_on(async {
            let mut session = open_session();
            unwrap_outcome(fx.registry.metadata().create_all(&cx, session.connection()).await);

            let ed = fx.user.create([("name", "ed")]).unwrap();
            session.add(&ed).unwrap();
            unwrap_outcome(session.flush(&cx).await);

            ed.set("name", "edward").unwrap();
            assert_eq!(session.dirty_instances(), vec![ed.clone()]);
            unwrap_outcome(session.flush(&cx).await);
            assert!(session.dirty_instances().is_empty());

            let rows = unwrap_outcome(
                session
                    .connection()
                    .query(&cx, "SELECT name FROM users", &[])
                    .await,
            );
            assert_eq!(rows[0].get(0), Some(&Value::from("edward")));
        });
    }

    #[test]
    fn query_and_relationship_loading() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let fx = fixture();

        rt.block_on(async {
            let mut session = open_session();
            unwrap_outcome(fx.registry.metadata().create_all(&cx, session.connection()).await);

            let ed = fx.user.create([("name", "ed")]).unwrap();
            for email in ["ed@a.com", "ed@b.com"] {
                let a = fx.address.create([("email", email)]).unwrap();
                ed.append("addresses", &a).unwrap();
            }
            session.add(&ed).unwrap();
            unwrap_outcome(session.flush(&cx).await);
            session.expunge_all();

            let users = fx.user.mapper().local_table().clone();
            let found = unwrap_outcome(
                session
                    .query(&fx.user)
                    .filter(Expr::col(&users.c()["name"]).eq("ed"))
                    .first(&cx)
                    .await,
            )
            .expect("ed");

            let loaded = unwrap_outcome(session.load_relationship(&cx, &found, "addresses").await);
            let addresses = loaded.as_collection().unwrap().to_vec();
            assert_eq!(addresses.len(), 2);
            assert_eq!(addresses[0].get_value("email").unwrap(), Value::from("ed@a.com"));
            assert!(found.state().attr("addresses").unwrap().history().unchanged.is_some());

            let owner = unwrap_outcome(session.load_relationship(&cx, &addresses[1], "user").await);
            assert_eq!(owner.as_object(), Some(Some(&found)));
        });
    }

    #[test]
    fn misuse_is_reported() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let fx = fixture();

        rt.block_on(async {
            let mut session = open_session();
            let mut other = open_session();
            let ed = fx.user.instance();

            let outcome = session.load_relationship(&cx, &ed, "addresses").await;
            assert!(matches!(outcome, Outcome::Err(Error::Inspection(_))));

            session.add(&ed).unwrap();
            assert!(other.add(&ed).is_err());

            let outcome = session.get(&cx, &fx.user, &[]).await;
            assert!(matches!(outcome, Outcome::Err(Error::Inspection(_))));
        });
    }

    #[test]
    fn missing_primary_key_fails_flush() {
        let tags = Table::new(
            "tags",
            [column("name", StringType::new()).primary_key()],
        );
        let registry = Registry::new();
        let tag = registry.map("Tag", &tags).build().unwrap();

        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
            let mut session = Session::new(conn);
            unwrap_outcome(registry.metadata().create_all(&cx, session.connection()).await);

            session.add(&tag.instance()).unwrap();
            let outcome = session.flush(&cx).await;
            assert!(matches!(outcome, Outcome::Err(Error::Inspection(_))));
        });
    }

    #[test]
    fn autoflush_runs_before_queries() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let fx = fixture();

        rt.block_on(async {
            let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
            let mut session = Session::with_config(conn, SessionConfig::new().autoflush(true));
            unwrap_outcome(fx.registry.metadata().create_all(&cx, session.connection()).await);

            let ed = fx.user.create([("name", "ed")]).unwrap();
            session.add(&ed).unwrap();
            let all = unwrap_outcome(session.query(&fx.user).all(&cx).await);
            assert_eq!(all, vec![ed.clone()]);
            assert!(ed.state().is_persistent());

            // get misses the identity map for a key that is still pending
            let wendy = fx.user.create([("name", "wendy")]).unwrap();
            wendy.set("id", 7).unwrap();
            session.add(&wendy).unwrap();
            assert!(wendy.state().is_pending());
            let found = unwrap_outcome(session.get(&cx, &fx.user, &[Value::BigInt(7)]).await);
            assert_eq!(found, Some(wendy.clone()));
            assert!(wendy.state().is_persistent());

            let jack = fx.user.create([("name", "jack")]).unwrap();
            session.add(&jack).unwrap();
            let counted = unwrap_outcome(
                session
                    .execute(&cx, ormscope_query::text("SELECT count(*) FROM users"), &[])
                    .await,
            );
            assert_eq!(counted.scalar(), Some(&Value::BigInt(3)));
            assert!(jack.state().is_persistent());
            assert!(!session.has_pending_changes());
        });
    }

    #[test]
    fn dropping_a_session_detaches_its_instances() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        let fx = fixture();

        let (ed, fred) = rt.block_on(async {
            let mut session = open_session();
            unwrap_outcome(fx.registry.metadata().create_all(&cx, session.connection()).await);
            let ed = fx.user.create([("name", "ed")]).unwrap();
            session.add(&ed).unwrap();
            unwrap_outcome(session.flush(&cx).await);
            let fred = fx.user.create([("name", "fred")]).unwrap();
            session.add(&fred).unwrap();
            assert!(ed.state().is_persistent());
            assert!(fred.state().is_pending());
            (ed, fred)
        });

        assert_eq!(ed.state().status(), Status::Detached);
        assert_eq!(fred.state().status(), Status::Transient);
        assert_eq!(ed.state().session_id(), None);

        let mut next = open_session();
        next.add(&ed).unwrap();
        next.add(&fred).unwrap();
        assert!(ed.state().is_persistent());
        assert!(fred.state().is_pending());
    }

    #[test]
    fn class_keeps_a_temporary_registry_alive() {
        let users = Table::new(
            "users",
            [
                column("id", Integer).primary_key(),
                column("name", StringType::new()),
            ],
        );
        let user = Registry::new().map("User", &users).build().unwrap();
        assert!(user.registry().is_some());

        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        let cx = Cx::for_testing();
        rt.block_on(async {
            let mut session = open_session();
            let metadata = user.registry().map(|r| r.metadata()).unwrap();
            unwrap_outcome(metadata.create_all(&cx, session.connection()).await);

            let ed = user.create([("name", "ed")]).unwrap();
            session.add(&ed).unwrap();
            unwrap_outcome(session.flush(&cx).await);
            assert!(ed.state().is_persistent());
            assert_eq!(ed.class(), user);
        });
    }

    #[test]
    fn instances_outlive_their_class_handle() {
        let fx = fixture();
        let Fixture {
            registry,
            user,
            address,
        } = fx;
        let ed = user.create([("name", "ed")]).unwrap();
        let home = address.instance();
        drop((registry, user, address));

        let addresses = ed.class().attr("addresses").unwrap().property().unwrap();
        assert_eq!(addresses.mapper().unwrap().class_name(), "Address");
        let mut session = open_session();
        session.add(&ed).unwrap();
        ed.append("addresses", &home).unwrap();
        session.add(&ed).unwrap();
        assert!(home.state().is_pending());
    }
}

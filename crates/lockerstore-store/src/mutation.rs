//! Staged write intent
//!
//! A `Mutation` records what a builder will do: the operation, the target
//! table, field sets and clears, numeric deltas, and edge changes. Hooks see
//! and may rewrite it before it executes.

use crate::driver::Driver;
use crate::errors::Result;
use crate::predicate::Node;
use crate::record::IntoValue;
use crate::schema::{quote, ColumnType, TableDescriptor, ID};
use lockerstore_core::{Context, StoreError};
use rusqlite::types::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    UpdateOne,
    Update,
    DeleteOne,
    Delete,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::UpdateOne => "update_one",
            Op::Update => "update",
            Op::DeleteOne => "delete_one",
            Op::Delete => "delete",
        }
    }

    pub fn is(&self, ops: &[Op]) -> bool {
        ops.contains(self)
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Built, nothing recorded yet
    Fresh,
    /// At least one change recorded
    Staged,
    Executed,
    /// Execution failed
    Aborted,
}

/// What a mutation produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutput {
    /// Id of the inserted row
    Created(i64),
    /// Id of the updated row
    Updated(i64),
    /// Rows touched by an update or delete by predicate
    Affected(usize),
    Deleted,
    /// Queued in a bulk create; ids are assigned when the batch inserts
    Staged,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EdgeChange {
    pub(crate) added: BTreeSet<i64>,
    pub(crate) removed: BTreeSet<i64>,
    pub(crate) cleared: bool,
}

#[derive(Clone)]
pub struct Mutation {
    table: &'static TableDescriptor,
    op: Op,
    id: Option<i64>,
    pub(crate) predicates: Vec<Node>,
    pub(crate) fields: BTreeMap<&'static str, Value>,
    pub(crate) cleared: BTreeSet<&'static str>,
    pub(crate) deltas: BTreeMap<&'static str, i64>,
    /// Columns whose accumulated delta left the i64 range
    overflowed: BTreeSet<&'static str>,
    pub(crate) edges: BTreeMap<&'static str, EdgeChange>,
    state: MutationState,
    driver: Driver,
}

impl std::fmt::Debug for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("label", &self.table.label)
            .field("op", &self.op)
            .field("id", &self.id)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("cleared", &self.cleared)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Mutation {
    pub(crate) fn new(table: &'static TableDescriptor, op: Op, driver: Driver) -> Self {
        Self {
            table,
            op,
            id: None,
            predicates: Vec::new(),
            fields: BTreeMap::new(),
            cleared: BTreeSet::new(),
            deltas: BTreeMap::new(),
            overflowed: BTreeSet::new(),
            edges: BTreeMap::new(),
            state: MutationState::Fresh,
            driver,
        }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    /// Entity label, e.g. `account`
    pub fn label(&self) -> &'static str {
        self.table.label
    }

    pub fn table(&self) -> &'static TableDescriptor {
        self.table
    }

    /// Target id for `UpdateOne` and `DeleteOne`
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    /// Value set for `name`, if any
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_cleared(&self, name: &str) -> bool {
        self.cleared.contains(name)
    }

    /// Pending numeric delta for `name`
    pub fn added_field(&self, name: &str) -> Option<i64> {
        self.deltas.get(name).copied()
    }

    /// Names of the fields with a value set
    pub fn fields(&self) -> Vec<&'static str> {
        self.fields.keys().copied().collect()
    }

    pub fn added_ids(&self, edge: &str) -> Vec<i64> {
        self.edges
            .get(edge)
            .map(|e| e.added.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn removed_ids(&self, edge: &str) -> Vec<i64> {
        self.edges
            .get(edge)
            .map(|e| e.removed.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn edge_cleared(&self, edge: &str) -> bool {
        self.edges.get(edge).is_some_and(|e| e.cleared)
    }

    /// Set a field by name, checking it against the table's columns
    ///
    /// # Errors
    ///
    /// Validation when the column is unknown, is the id or a foreign key, or
    /// the value's type does not fit the column.
    pub fn set_field(&mut self, name: &str, value: impl IntoValue) -> Result<()> {
        let column = self.table.validate_column(name)?;
        let value = value.into_value();
        let fits = match (column.ty, &value) {
            (ColumnType::Id | ColumnType::ForeignKey, _) => false,
            (ColumnType::Int32, Value::Integer(i)) => i32::try_from(*i).is_ok(),
            (ColumnType::Time, Value::Integer(_)) => true,
            (ColumnType::String, Value::Text(_)) => true,
            (ColumnType::Json, Value::Text(raw)) => {
                serde_json::from_str::<serde_json::Value>(raw).is_ok()
            }
            _ => false,
        };
        if !fits {
            return Err(StoreError::validation(
                column.name,
                format!("value {:?} cannot be set on {}.{}", value, self.table.name, name),
            )
            .with_label(self.label()));
        }
        self.set(column.name, value);
        Ok(())
    }

    /// Clear a nullable field
    ///
    /// # Errors
    ///
    /// Validation when the column is unknown or not nullable.
    pub fn clear_field(&mut self, name: &str) -> Result<()> {
        let column = self.table.validate_column(name)?;
        if !column.nullable || column.ty == ColumnType::ForeignKey {
            return Err(StoreError::validation(
                column.name,
                format!("field {}.{} cannot be cleared", self.table.name, name),
            )
            .with_label(self.label()));
        }
        self.clear(column.name);
        Ok(())
    }

    /// Add `delta` to a numeric field
    ///
    /// # Errors
    ///
    /// Validation when the column is not an int32 column, or when the
    /// accumulated delta overflows.
    pub fn add_field(&mut self, name: &str, delta: i64) -> Result<()> {
        let column = self.table.validate_column(name)?;
        if column.ty != ColumnType::Int32 {
            return Err(StoreError::validation(
                column.name,
                format!("field {}.{} is not numeric", self.table.name, name),
            )
            .with_label(self.label()));
        }
        self.add(column.name, delta)
    }

    /// Drop every pending change to `name`
    pub fn reset_field(&mut self, name: &str) {
        self.fields.remove(name);
        self.cleared.remove(name);
        self.deltas.remove(name);
        self.overflowed.remove(name);
    }

    /// The stored value of `name` before this mutation
    ///
    /// # Errors
    ///
    /// Only valid for `UpdateOne` before it executes; NotFound when the row
    /// is gone.
    pub fn old_field(&self, ctx: &Context, name: &str) -> Result<Value> {
        if self.op != Op::UpdateOne {
            return Err(StoreError::validation(
                name,
                format!("old_field is only allowed on update_one, not {}", self.op),
            ));
        }
        if matches!(self.state, MutationState::Executed | MutationState::Aborted) {
            return Err(StoreError::validation(
                name,
                "querying old values after the mutation ran is not allowed",
            ));
        }
        let id = self
            .id
            .ok_or_else(|| StoreError::validation(ID, "update_one mutation has no id"))?;
        let column = self.table.validate_column(name)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?",
            quote(column.name),
            quote(self.table.name),
            quote(ID)
        );
        let mut rows = self
            .driver
            .with_conn(ctx, |c| c.query(&sql, &[Value::Integer(id)]))?;
        match rows.pop().and_then(|mut r| r.pop()) {
            Some(value) => Ok(value),
            None => Err(StoreError::not_found(self.label())),
        }
    }

    pub(crate) fn driver(&self) -> &Driver {
        &self.driver
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub(crate) fn push_predicate(&mut self, node: Node) {
        self.predicates.push(node);
    }

    pub(crate) fn set(&mut self, name: &'static str, value: Value) {
        self.fields.insert(name, value);
        self.deltas.remove(name);
        self.overflowed.remove(name);
        self.touch();
    }

    pub(crate) fn clear(&mut self, name: &'static str) {
        self.cleared.insert(name);
        self.touch();
    }

    /// Accumulate a delta; an overflow is also reported by `validate`
    pub(crate) fn add(&mut self, name: &'static str, delta: i64) -> Result<()> {
        let total = self.deltas.get(name).copied().unwrap_or(0).checked_add(delta);
        self.touch();
        match total {
            Some(total) => {
                self.deltas.insert(name, total);
                Ok(())
            }
            None => {
                self.overflowed.insert(name);
                Err(self.overflow(name))
            }
        }
    }

    fn overflow(&self, name: &str) -> StoreError {
        StoreError::validation(
            name,
            format!("accumulated delta on {}.{} overflows", self.table.name, name),
        )
        .with_label(self.label())
    }

    pub(crate) fn add_edge_ids(&mut self, edge: &'static str, ids: impl IntoIterator<Item = i64>) {
        self.edges.entry(edge).or_default().added.extend(ids);
        self.touch();
    }

    pub(crate) fn remove_edge_ids(
        &mut self,
        edge: &'static str,
        ids: impl IntoIterator<Item = i64>,
    ) {
        self.edges.entry(edge).or_default().removed.extend(ids);
        self.touch();
    }

    pub(crate) fn clear_edge(&mut self, edge: &'static str) {
        self.edges.entry(edge).or_default().cleared = true;
        self.touch();
    }

    /// Point a unique (many-to-one) edge at `id`, replacing any earlier pick
    pub(crate) fn set_unique_edge(&mut self, edge: &'static str, id: i64) {
        let change = self.edges.entry(edge).or_default();
        change.added.clear();
        change.added.insert(id);
        self.touch();
    }

    fn touch(&mut self) {
        if self.state == MutationState::Fresh {
            self.state = MutationState::Staged;
        }
    }

    pub(crate) fn mark(&mut self, state: MutationState) {
        self.state = state;
    }

    /// Checks run at the terminal, after hooks and before any SQL
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(name) = self.overflowed.iter().next() {
            return Err(self.overflow(name));
        }
        if self.op == Op::Create {
            if let Some(missing) = self
                .table
                .required_columns()
                .find(|c| !self.fields.contains_key(c.name))
            {
                return Err(StoreError::validation(
                    missing.name,
                    format!("missing required field \"{}.{}\"", self.label(), missing.name),
                )
                .with_label(self.label()));
            }
        }
        if matches!(self.op, Op::UpdateOne | Op::DeleteOne) && self.id.is_none() {
            return Err(StoreError::validation(ID, "missing id").with_label(self.label()));
        }
        for node in &self.predicates {
            node.validate(self.table)?;
        }
        for (name, change) in &self.edges {
            if self.table.edge(name).is_none() {
                return Err(StoreError::validation(
                    *name,
                    format!("unknown edge {} on {}", name, self.label()),
                ));
            }
            if change.added.intersection(&change.removed).next().is_some() {
                tracing::warn!(
                    entity = self.label(),
                    edge = *name,
                    "ids both added to and removed from edge; removal runs first"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectOptions, Target};
    use crate::pool::Pool;
    use crate::schema::{ACCOUNTS, IDENTITIES};
    use std::time::Duration;

    fn mutation(table: &'static TableDescriptor, op: Op) -> Mutation {
        let options = ConnectOptions {
            target: Target::memory(),
            busy_timeout: Duration::from_millis(100),
            wal: false,
        };
        let pool = Pool::new(options, 1, Duration::from_secs(1)).unwrap();
        Mutation::new(table, op, Driver::new(pool))
    }

    #[test]
    fn test_create_requires_non_nullable_fields() {
        let mut m = mutation(&ACCOUNTS, Op::Create);
        m.set_field("did", "did:a").unwrap();
        m.set_field("state", "active").unwrap();
        let err = m.validate().unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.field(), Some("body"));

        m.set_field("body", serde_json::json!({})).unwrap();
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_set_field_rejects_wrong_type_and_fk() {
        let mut m = mutation(&IDENTITIES, Op::Create);
        assert!(m.set_field("level", "high").is_err());
        assert!(m.set_field("account", 1i64).is_err());
        assert!(m.set_field("level", i64::from(i32::MAX) + 1).is_err());
        assert!(m.set_field("level", 3i32).is_ok());
        assert_eq!(m.field("level"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_clear_only_nullable() {
        let mut m = mutation(&ACCOUNTS, Op::Update);
        assert!(m.clear_field("did").is_err());
        m.clear_field("email").unwrap();
        assert!(m.field_cleared("email"));
        assert_eq!(m.state(), MutationState::Staged);
    }

    #[test]
    fn test_set_resets_pending_delta() {
        let mut m = mutation(&IDENTITIES, Op::UpdateOne);
        m.add_field("level", 2).unwrap();
        m.add_field("level", 3).unwrap();
        assert_eq!(m.added_field("level"), Some(5));
        m.set_field("level", 1i32).unwrap();
        assert_eq!(m.added_field("level"), None);
    }

    #[test]
    fn test_delta_overflow_is_a_validation_error() {
        let mut m = mutation(&IDENTITIES, Op::Update);
        m.add_field("level", i64::MAX).unwrap();
        let err = m.add_field("level", 1).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.field(), Some("level"));
        assert_eq!(m.added_field("level"), Some(i64::MAX));
        assert!(m.validate().unwrap_err().is_validation());

        m.reset_field("level");
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_old_field_only_on_update_one() {
        let m = mutation(&ACCOUNTS, Op::Update);
        let err = m.old_field(&Context::background(), "email").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_unique_edge_keeps_last_pick() {
        let mut m = mutation(&IDENTITIES, Op::Create);
        m.set_unique_edge("account", 1);
        m.set_unique_edge("account", 2);
        assert_eq!(m.added_ids("account"), vec![2]);
    }
}

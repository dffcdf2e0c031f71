//! Typed query builder
//!
//! `Query<E>` accumulates predicates, ordering, paging and eager-load
//! requests. A terminal (`all`, `only`, `count`, ...) turns that state into a
//! [`QueryPlan`], passes it through the table's interceptors, and runs the
//! resulting SELECT.

use crate::client::Config;
use crate::eager::EagerLoad;
use crate::entity::Entity;
use crate::errors::{internal, Result};
use crate::hook::{chain_interceptors, querier, Querier};
use crate::predicate::{compile_all, Node, Predicate};
use crate::record::{to_json, Record};
use crate::schema::{quote, ColumnType, TableDescriptor, ID};
use crate::sql::SqlBuilder;
use lockerstore_core::{Context, StoreError};
use rusqlite::types::Value;
use serde::de::DeserializeOwned;

/// Stands in for "no limit" when only an offset is given
const NO_LIMIT: usize = 2_147_483_647;

/// Sort term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    column: String,
    descending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    Mean,
}

/// An aggregate output column, named by its alias in `scan` results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    func: AggregateFn,
    column: Option<String>,
    alias: String,
}

impl Aggregate {
    pub fn count() -> Self {
        Self {
            func: AggregateFn::Count,
            column: None,
            alias: "count".into(),
        }
    }

    fn over(func: AggregateFn, column: &str, alias: &str) -> Self {
        Self {
            func,
            column: Some(column.to_string()),
            alias: alias.to_string(),
        }
    }

    pub fn sum(column: &str) -> Self {
        Self::over(AggregateFn::Sum, column, "sum")
    }

    pub fn min(column: &str) -> Self {
        Self::over(AggregateFn::Min, column, "min")
    }

    pub fn max(column: &str) -> Self {
        Self::over(AggregateFn::Max, column, "max")
    }

    pub fn mean(column: &str) -> Self {
        Self::over(AggregateFn::Mean, column, "mean")
    }

    /// Rename the output column
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    fn sql(&self, qualify: impl Fn(&str) -> String) -> String {
        let arg = self
            .column
            .as_deref()
            .map(qualify)
            .unwrap_or_else(|| "*".to_string());
        let func = match self.func {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Mean => "AVG",
        };
        format!("{}({}) AS {}", func, arg, quote(&self.alias))
    }
}

/// What a terminal selects
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Entities,
    Ids,
    Columns(Vec<String>),
    Count,
    Exist,
    Aggregate {
        group_by: Vec<String>,
        aggregates: Vec<Aggregate>,
    },
}

/// Query state as seen by interceptors
#[derive(Debug, Clone)]
pub struct QueryPlan {
    table: &'static TableDescriptor,
    predicates: Vec<Node>,
    order: Vec<Order>,
    limit: Option<usize>,
    offset: Option<usize>,
    unique: bool,
    projection: Projection,
}

impl QueryPlan {
    fn new(table: &'static TableDescriptor) -> Self {
        Self {
            table,
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            unique: false,
            projection: Projection::Entities,
        }
    }

    pub fn label(&self) -> &'static str {
        self.table.label
    }

    pub fn table(&self) -> &'static TableDescriptor {
        self.table
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Add a predicate from inside an interceptor
    ///
    /// # Errors
    ///
    /// Validation when `E` is not the entity this plan queries.
    pub fn filter<E: Entity>(&mut self, predicate: Predicate<E>) -> Result<()> {
        if E::table() != self.table {
            return Err(StoreError::validation(
                E::table().label,
                format!("predicate on {} applied to a {} query", E::table().label, self.label()),
            ));
        }
        self.predicates.push(predicate.node);
        Ok(())
    }

    /// Reject unknown columns anywhere in the plan
    pub(crate) fn validate(&self) -> Result<()> {
        for node in &self.predicates {
            node.validate(self.table)?;
        }
        for order in &self.order {
            self.table.validate_column(&order.column)?;
        }
        match &self.projection {
            Projection::Columns(cols) => {
                for col in cols {
                    self.table.validate_column(col)?;
                }
            }
            Projection::Aggregate {
                group_by,
                aggregates,
            } => {
                for col in group_by {
                    self.table.validate_column(col)?;
                }
                for agg in aggregates {
                    if let Some(col) = &agg.column {
                        self.table.validate_column(col)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        let table = quote(self.table.name);
        let qualify = |c: &str| format!("{}.{}", table, quote(c));

        let select = match &self.projection {
            Projection::Entities => self
                .table
                .column_names()
                .map(qualify)
                .collect::<Vec<_>>()
                .join(", "),
            Projection::Ids | Projection::Count => qualify(ID),
            Projection::Columns(cols) => cols
                .iter()
                .map(|c| qualify(c))
                .collect::<Vec<_>>()
                .join(", "),
            Projection::Exist => "1".to_string(),
            Projection::Aggregate {
                group_by,
                aggregates,
            } => group_by
                .iter()
                .map(|c| qualify(c))
                .chain(aggregates.iter().map(|a| a.sql(qualify)))
                .collect::<Vec<_>>()
                .join(", "),
        };

        let mut b = SqlBuilder::new("SELECT ");
        if self.unique && !matches!(self.projection, Projection::Aggregate { .. }) {
            b.push("DISTINCT ");
        }
        b.push(&select).push(" FROM ").push(&table);

        if !self.predicates.is_empty() {
            b.push(" WHERE ");
            compile_all(&self.predicates, self.table, &mut b);
        }

        if let Projection::Aggregate { group_by, .. } = &self.projection {
            if !group_by.is_empty() {
                let cols: Vec<String> = group_by.iter().map(|c| qualify(c)).collect();
                b.push(" GROUP BY ").push(&cols.join(", "));
            }
        }

        if !self.order.is_empty() && !matches!(self.projection, Projection::Count) {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|o| {
                    format!(
                        "{} {}",
                        qualify(&o.column),
                        if o.descending { "DESC" } else { "ASC" }
                    )
                })
                .collect();
            b.push(" ORDER BY ").push(&terms.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                b.push(&format!(" LIMIT {} OFFSET {}", limit, offset));
            }
            (Some(limit), None) => {
                b.push(&format!(" LIMIT {}", limit));
            }
            (None, Some(offset)) => {
                b.push(&format!(" LIMIT {} OFFSET {}", NO_LIMIT, offset));
            }
            (None, None) => {}
        }

        let (sql, args) = b.finish();
        if self.projection == Projection::Count {
            return (format!("SELECT COUNT(*) FROM ({}) AS \"t1\"", sql), args);
        }
        (sql, args)
    }
}

/// The innermost querier: validate, compile, execute
fn base_querier(config: &Config) -> Querier {
    let driver = config.driver.clone();
    querier(move |ctx, plan| {
        plan.validate()?;
        let (sql, args) = plan.to_sql();
        driver.with_conn(ctx, |c| c.query(&sql, &args))
    })
}

fn int_at(record: &Record, index: usize) -> Result<i64> {
    match record.get(index) {
        Some(Value::Integer(i)) => Ok(*i),
        other => Err(internal(format!("expected integer column, got {:?}", other))),
    }
}

pub(crate) fn panic_on_err<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{}", err),
    }
}

/// Query over entity `E`
pub struct Query<E: Entity> {
    config: Config,
    plan: QueryPlan,
    eager: Vec<Box<dyn EagerLoad<E>>>,
}

impl<E: Entity> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            plan: self.plan.clone(),
            eager: self.eager.iter().map(|e| e.box_clone()).collect(),
        }
    }
}

impl<E: Entity> std::fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("plan", &self.plan)
            .field("eager", &self.eager.len())
            .finish()
    }
}

impl<E: Entity> Query<E> {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            config,
            plan: QueryPlan::new(E::table()),
            eager: Vec::new(),
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// The predicates added so far, for edge traversal
    pub(crate) fn predicates(&self) -> Vec<Predicate<E>> {
        self.plan
            .predicates
            .iter()
            .cloned()
            .map(Predicate::from_node)
            .collect()
    }

    pub(crate) fn with_eager(mut self, loader: Box<dyn EagerLoad<E>>) -> Self {
        self.eager.push(loader);
        self
    }

    /// Add a predicate; multiple calls are ANDed
    pub fn filter(mut self, predicate: Predicate<E>) -> Self {
        self.plan.predicates.push(predicate.node);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.plan.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.plan.offset = Some(offset);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.plan.order.push(order);
        self
    }

    /// SELECT DISTINCT
    pub fn unique(mut self, unique: bool) -> Self {
        self.plan.unique = unique;
        self
    }

    fn run(&self, ctx: &Context, mut plan: QueryPlan) -> Result<Vec<Record>> {
        let table = E::table();
        let chain = chain_interceptors(
            &self.config.registry.interceptors(table.name),
            base_querier(&self.config),
        );
        tracing::debug!(entity = table.label, projection = ?plan.projection, "query");
        chain(ctx, &mut plan)
    }

    fn plan_for(&self, projection: Projection) -> QueryPlan {
        let mut plan = self.plan.clone();
        plan.projection = projection;
        plan
    }

    fn load(&self, ctx: &Context, plan: QueryPlan) -> Result<Vec<E>> {
        let mut rows = self
            .run(ctx, plan)?
            .into_iter()
            .map(E::from_record)
            .collect::<Result<Vec<_>>>()?;
        for loader in &self.eager {
            loader.load(ctx, &mut rows)?;
        }
        Ok(rows)
    }

    pub fn all(&self, ctx: &Context) -> Result<Vec<E>> {
        self.load(ctx, self.plan_for(Projection::Entities))
    }

    pub fn all_x(&self, ctx: &Context) -> Vec<E> {
        panic_on_err(self.all(ctx))
    }

    /// The first match, `None` when nothing matches
    pub fn first(&self, ctx: &Context) -> Result<Option<E>> {
        let mut plan = self.plan_for(Projection::Entities);
        plan.limit = Some(1);
        Ok(self.load(ctx, plan)?.into_iter().next())
    }

    pub fn first_x(&self, ctx: &Context) -> Option<E> {
        panic_on_err(self.first(ctx))
    }

    pub fn first_id(&self, ctx: &Context) -> Result<Option<i64>> {
        let mut plan = self.plan_for(Projection::Ids);
        plan.limit = Some(1);
        let rows = self.run(ctx, plan)?;
        rows.first().map(|r| int_at(r, 0)).transpose()
    }

    /// Exactly one match
    ///
    /// # Errors
    ///
    /// NotFound for zero matches, NotSingular for more than one.
    pub fn only(&self, ctx: &Context) -> Result<E> {
        let mut plan = self.plan_for(Projection::Entities);
        plan.limit = Some(2);
        let mut rows = self.load(ctx, plan)?;
        match rows.len() {
            0 => Err(StoreError::not_found(E::table().label)),
            1 => rows
                .pop()
                .ok_or_else(|| internal("row vanished during only")),
            _ => Err(StoreError::not_singular(E::table().label)),
        }
    }

    pub fn only_x(&self, ctx: &Context) -> E {
        panic_on_err(self.only(ctx))
    }

    pub fn only_id(&self, ctx: &Context) -> Result<i64> {
        let mut plan = self.plan_for(Projection::Ids);
        plan.limit = Some(2);
        let rows = self.run(ctx, plan)?;
        match rows.as_slice() {
            [] => Err(StoreError::not_found(E::table().label)),
            [row] => int_at(row, 0),
            _ => Err(StoreError::not_singular(E::table().label)),
        }
    }

    pub fn ids(&self, ctx: &Context) -> Result<Vec<i64>> {
        self.run(ctx, self.plan_for(Projection::Ids))?
            .iter()
            .map(|r| int_at(r, 0))
            .collect()
    }

    pub fn ids_x(&self, ctx: &Context) -> Vec<i64> {
        panic_on_err(self.ids(ctx))
    }

    pub fn count(&self, ctx: &Context) -> Result<usize> {
        let rows = self.run(ctx, self.plan_for(Projection::Count))?;
        let n = rows
            .first()
            .ok_or_else(|| internal("COUNT returned no rows"))
            .and_then(|r| int_at(r, 0))?;
        usize::try_from(n).map_err(|_| internal(format!("negative count {}", n)))
    }

    pub fn count_x(&self, ctx: &Context) -> usize {
        panic_on_err(self.count(ctx))
    }

    pub fn exist(&self, ctx: &Context) -> Result<bool> {
        let mut plan = self.plan_for(Projection::Exist);
        plan.limit = Some(1);
        Ok(!self.run(ctx, plan)?.is_empty())
    }

    pub fn exist_x(&self, ctx: &Context) -> bool {
        panic_on_err(self.exist(ctx))
    }

    /// Project onto `columns`; names are validated when the query runs
    pub fn select(self, columns: &[&str]) -> Selection<E> {
        Selection {
            query: self,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn group_by(self, columns: &[&str]) -> GroupBy<E> {
        GroupBy {
            query: self,
            group_by: columns.iter().map(|c| c.to_string()).collect(),
            aggregates: Vec::new(),
        }
    }

    /// Aggregate over every matching row
    pub fn aggregate(self, aggregate: Aggregate) -> GroupBy<E> {
        self.group_by(&[]).aggregate(aggregate)
    }
}

/// Turn projected rows into JSON objects keyed by output name
fn rows_to_objects(
    table: &'static TableDescriptor,
    names: &[String],
    rows: Vec<Record>,
) -> Vec<serde_json::Value> {
    rows.into_iter()
        .map(|row| {
            let object: serde_json::Map<String, serde_json::Value> = names
                .iter()
                .zip(row)
                .map(|(name, value)| {
                    let json_column = table
                        .column(name)
                        .is_some_and(|c| c.ty == ColumnType::Json);
                    let value = match value {
                        Value::Text(raw) if json_column => serde_json::from_str(&raw)
                            .unwrap_or(serde_json::Value::String(raw)),
                        other => to_json(other),
                    };
                    (name.clone(), value)
                })
                .collect();
            serde_json::Value::Object(object)
        })
        .collect()
}

fn deserialize_all<T: DeserializeOwned>(values: Vec<serde_json::Value>) -> Result<Vec<T>> {
    values
        .into_iter()
        .map(|v| {
            serde_json::from_value(v)
                .map_err(|e| crate::errors::serialization(format!("scan failed: {}", e)))
        })
        .collect()
}

/// A column projection
pub struct Selection<E: Entity> {
    query: Query<E>,
    columns: Vec<String>,
}

impl<E: Entity> Selection<E> {
    fn rows(&self, ctx: &Context) -> Result<Vec<Record>> {
        let plan = self
            .query
            .plan_for(Projection::Columns(self.columns.clone()));
        self.query.run(ctx, plan)
    }

    /// Deserialize each row, as an object keyed by column name, into `T`
    pub fn scan<T: DeserializeOwned>(&self, ctx: &Context) -> Result<Vec<T>> {
        let rows = self.rows(ctx)?;
        deserialize_all(rows_to_objects(E::table(), &self.columns, rows))
    }

    fn single_column(&self) -> Result<()> {
        if self.columns.len() != 1 {
            return Err(StoreError::validation(
                self.columns.join(","),
                "a scalar scan needs exactly one selected column",
            ));
        }
        Ok(())
    }

    pub fn strings(&self, ctx: &Context) -> Result<Vec<String>> {
        self.single_column()?;
        self.rows(ctx)?
            .into_iter()
            .map(|mut r| match r.pop() {
                Some(Value::Text(s)) => Ok(s),
                other => Err(crate::errors::serialization(format!(
                    "expected text, got {:?}",
                    other
                ))),
            })
            .collect()
    }

    pub fn ints(&self, ctx: &Context) -> Result<Vec<i64>> {
        self.single_column()?;
        self.rows(ctx)?.iter().map(|r| int_at(r, 0)).collect()
    }
}

/// Grouped aggregation
pub struct GroupBy<E: Entity> {
    query: Query<E>,
    group_by: Vec<String>,
    aggregates: Vec<Aggregate>,
}

impl<E: Entity> GroupBy<E> {
    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregates.push(aggregate);
        self
    }

    /// One object per group, keyed by group column and aggregate alias
    pub fn scan<T: DeserializeOwned>(&self, ctx: &Context) -> Result<Vec<T>> {
        let plan = self.query.plan_for(Projection::Aggregate {
            group_by: self.group_by.clone(),
            aggregates: self.aggregates.clone(),
        });
        let rows = self.query.run(ctx, plan)?;
        let names: Vec<String> = self
            .group_by
            .iter()
            .cloned()
            .chain(self.aggregates.iter().map(|a| a.alias.clone()))
            .collect();
        deserialize_all(rows_to_objects(E::table(), &names, rows))
    }

    /// The first aggregate of the first group as an integer
    pub fn int(&self, ctx: &Context) -> Result<Option<i64>> {
        let rows: Vec<serde_json::Value> = self.scan(ctx)?;
        let Some(alias) = self.aggregates.first().map(|a| a.alias.as_str()) else {
            return Err(StoreError::validation("aggregate", "no aggregate requested"));
        };
        Ok(rows.first().and_then(|r| r.get(alias)).and_then(|v| {
            v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
        }))
    }
}

//! SQL execution of staged mutations
//!
//! Each mutation runs atomically: a fresh transaction when the connection is
//! idle, a savepoint when it already belongs to one.

use crate::driver::{Conn, Driver};
use crate::errors::{internal, Result};
use crate::mutation::{EdgeChange, Mutation, MutationOutput, Op};
use crate::predicate::compile_all;
use crate::schema::{quote, EdgeDescriptor, EdgeKind, TableDescriptor, ID};
use crate::sql::{SqlBuilder, ID_CHUNK, INSERT_CHUNK, MAX_BIND_PARAMS};
use lockerstore_core::{Context, StoreError};
use rusqlite::types::Value;
use std::collections::BTreeSet;

pub(crate) fn execute(ctx: &Context, m: &Mutation) -> Result<MutationOutput> {
    m.validate()?;
    m.driver().with_conn(ctx, |c| {
        c.atomic(|c| match m.op() {
            Op::Create => create(c, m).map(MutationOutput::Created),
            Op::UpdateOne => update_one(c, m).map(MutationOutput::Updated),
            Op::Update => update_many(c, m).map(MutationOutput::Affected),
            Op::DeleteOne => delete_one(c, m).map(|_| MutationOutput::Deleted),
            Op::Delete => delete_many(c, m).map(MutationOutput::Affected),
        })
    })
}

/// Insert every mutation; ids come back in builder order
///
/// Rows go in as multi-row INSERTs sized under the bound-parameter limit,
/// all inside one atomic scope.
pub(crate) fn execute_bulk(ctx: &Context, driver: &Driver, batch: &[Mutation]) -> Result<Vec<i64>> {
    let Some(first) = batch.first() else {
        return Ok(Vec::new());
    };
    let table = first.table();
    for m in batch {
        m.validate()?;
    }

    let rows: Vec<Vec<(&'static str, Value)>> = batch
        .iter()
        .map(|m| insert_values(table, m))
        .collect::<Result<_>>()?;
    let columns: Vec<&'static str> = rows
        .iter()
        .flat_map(|r| r.iter().map(|(c, _)| *c))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let per_statement = (MAX_BIND_PARAMS / columns.len().max(1)).clamp(1, INSERT_CHUNK);

    driver.with_conn(ctx, |c| {
        c.atomic(|c| {
            let mut ids = Vec::with_capacity(batch.len());
            for chunk in rows.chunks(per_statement) {
                ids.extend(insert_rows(c, table, &columns, chunk)?);
            }
            if ids.len() != batch.len() {
                return Err(internal(format!(
                    "inserted {} rows for {} builders",
                    ids.len(),
                    batch.len()
                )));
            }
            ids.sort_unstable();
            for (m, id) in batch.iter().zip(&ids) {
                apply_children(c, table, &[*id], m)?;
            }
            Ok(ids)
        })
    })
}

/// One multi-row INSERT ... RETURNING; absent columns bind NULL
fn insert_rows(
    c: &Conn<'_>,
    table: &'static TableDescriptor,
    columns: &[&'static str],
    rows: &[Vec<(&'static str, Value)>],
) -> Result<Vec<i64>> {
    let returned = |b: SqlBuilder| -> Result<Vec<i64>> {
        let (sql, args) = b.finish();
        c.query(&sql, &args)?
            .into_iter()
            .map(|r| match r.first() {
                Some(Value::Integer(id)) => Ok(*id),
                other => Err(internal(format!("RETURNING gave {:?}", other))),
            })
            .collect()
    };

    if columns.is_empty() {
        let mut ids = Vec::with_capacity(rows.len());
        for _ in rows {
            ids.extend(returned(SqlBuilder::new(&format!(
                "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                quote(table.name),
                quote(ID)
            )))?);
        }
        return Ok(ids);
    }

    let mut b = SqlBuilder::new(&format!("INSERT INTO {} (", quote(table.name)));
    b.push(
        &columns
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", "),
    );
    b.push(") VALUES ");
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            b.push(", ");
        }
        let values = columns.iter().map(|c| {
            row.iter()
                .find(|(name, _)| name == c)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null)
        });
        b.push("(");
        b.args(values.collect::<Vec<_>>());
        b.push(")");
    }
    b.push(&format!(" RETURNING {}", quote(ID)));
    returned(b)
}

fn apply_delta(table: &TableDescriptor, column: &str, base: &Value, delta: i64) -> Result<Value> {
    let Value::Integer(base) = base else {
        return Err(StoreError::validation(column, "delta applied to a non-integer value"));
    };
    base.checked_add(delta)
        .filter(|v| i32::try_from(*v).is_ok())
        .map(Value::Integer)
        .ok_or_else(|| {
            StoreError::validation(column, format!("{}.{} overflows int32", table.name, column))
        })
}

fn edges_of_kind<'m>(
    table: &'static TableDescriptor,
    m: &'m Mutation,
    kind: EdgeKind,
) -> impl Iterator<Item = (&'static EdgeDescriptor, &'m EdgeChange)> + 'm {
    m.edges.iter().filter_map(move |(name, change)| {
        table
            .edge(name)
            .filter(|e| e.kind == kind)
            .map(|e| (e, change))
    })
}

/// Column/value pairs for an INSERT: set fields plus owned foreign keys
fn insert_values(table: &'static TableDescriptor, m: &Mutation) -> Result<Vec<(&'static str, Value)>> {
    let mut values = Vec::new();
    for (name, value) in &m.fields {
        let value = match m.deltas.get(name) {
            Some(delta) => apply_delta(table, name, value, *delta)?,
            None => value.clone(),
        };
        values.push((*name, value));
    }
    for (edge, change) in edges_of_kind(table, m, EdgeKind::ManyToOne) {
        if let Some(id) = change.added.iter().next_back() {
            values.push((edge.column, Value::Integer(*id)));
        }
    }
    Ok(values)
}

fn create(c: &Conn<'_>, m: &Mutation) -> Result<i64> {
    let table = m.table();
    let values = insert_values(table, m)?;
    let mut b = SqlBuilder::new(&format!("INSERT INTO {}", quote(table.name)));
    if values.is_empty() {
        b.push(" DEFAULT VALUES");
    } else {
        let cols: Vec<String> = values.iter().map(|(c, _)| quote(c)).collect();
        b.push(&format!(" ({}) VALUES (", cols.join(", ")));
        b.args(values.into_iter().map(|(_, v)| v));
        b.push(")");
    }
    let (sql, args) = b.finish();
    c.execute(&sql, &args)?;
    let id = c.last_insert_rowid();
    apply_children(c, table, &[id], m)?;
    Ok(id)
}

/// Append `SET` assignments; returns false when there is nothing to assign
fn push_assignments(b: &mut SqlBuilder, m: &Mutation) -> Result<bool> {
    let table = m.table();
    let mut parts = 0usize;
    let mut next = |b: &mut SqlBuilder| {
        b.push(if parts == 0 { " SET " } else { ", " });
        parts += 1;
    };

    for (name, value) in &m.fields {
        let value = match m.deltas.get(name) {
            Some(delta) => apply_delta(table, name, value, *delta)?,
            None => value.clone(),
        };
        next(b);
        b.push(&format!("{} = ", quote(name)));
        b.arg(value);
    }
    for name in &m.cleared {
        if !m.fields.contains_key(name) && !m.deltas.contains_key(name) {
            next(b);
            b.push(&format!("{} = NULL", quote(name)));
        }
    }
    for (name, delta) in &m.deltas {
        if !m.fields.contains_key(name) {
            next(b);
            b.push(&format!("{} = COALESCE({}, 0) + ", quote(name), quote(name)));
            b.arg(Value::Integer(*delta));
        }
    }
    for (edge, change) in edges_of_kind(table, m, EdgeKind::ManyToOne) {
        if let Some(id) = change.added.iter().next_back() {
            next(b);
            b.push(&format!("{} = ", quote(edge.column)));
            b.arg(Value::Integer(*id));
        } else if change.cleared {
            next(b);
            b.push(&format!("{} = NULL", quote(edge.column)));
        }
    }
    Ok(parts > 0)
}

fn ids_matching(c: &Conn<'_>, m: &Mutation, id: Option<i64>) -> Result<Vec<i64>> {
    let table = m.table();
    let mut b = SqlBuilder::new(&format!(
        "SELECT {}.{} FROM {}",
        quote(table.name),
        quote(ID),
        quote(table.name)
    ));
    push_where(&mut b, m, id);
    let (sql, args) = b.finish();
    c.query(&sql, &args)?
        .into_iter()
        .map(|r| match r.first() {
            Some(Value::Integer(id)) => Ok(*id),
            other => Err(internal(format!("expected id, got {:?}", other))),
        })
        .collect()
}

fn push_where(b: &mut SqlBuilder, m: &Mutation, id: Option<i64>) {
    let table = m.table();
    let mut any = false;
    if let Some(id) = id {
        b.push(&format!(" WHERE {}.{} = ", quote(table.name), quote(ID)));
        b.arg(Value::Integer(id));
        any = true;
    }
    if !m.predicates.is_empty() {
        b.push(if any { " AND (" } else { " WHERE (" });
        compile_all(&m.predicates, table, b);
        b.push(")");
    }
}

/// Keep delta-only columns inside int32; returns the first guarded column
fn push_delta_guards(b: &mut SqlBuilder, m: &Mutation) -> Option<&'static str> {
    let mut guarded = None;
    for (name, delta) in &m.deltas {
        if m.fields.contains_key(name) {
            continue;
        }
        b.push(&format!(" AND COALESCE({}, 0) + ", quote(name)));
        b.arg(Value::Integer(*delta));
        b.push(" BETWEEN ");
        b.arg(Value::Integer(i64::from(i32::MIN)));
        b.push(" AND ");
        b.arg(Value::Integer(i64::from(i32::MAX)));
        guarded.get_or_insert(*name);
    }
    guarded
}

fn update_by_ids(c: &Conn<'_>, m: &Mutation, ids: &[i64]) -> Result<()> {
    let table = m.table();
    for chunk in ids.chunks(ID_CHUNK) {
        let mut b = SqlBuilder::new(&format!("UPDATE {}", quote(table.name)));
        if !push_assignments(&mut b, m)? {
            break;
        }
        b.push(&format!(" WHERE {} IN (", quote(ID)));
        b.args(chunk.iter().map(|id| Value::Integer(*id)));
        b.push(")");
        let guarded = push_delta_guards(&mut b, m);
        let (sql, args) = b.finish();
        let affected = c.execute(&sql, &args)?;
        // Ids were matched in this transaction; a shortfall is a guarded row
        if affected < chunk.len() {
            if let Some(column) = guarded {
                return Err(StoreError::validation(
                    column,
                    format!("{}.{} overflows int32", table.name, column),
                ));
            }
        }
    }
    apply_children(c, table, ids, m)
}

fn update_one(c: &Conn<'_>, m: &Mutation) -> Result<i64> {
    let id = m
        .id()
        .ok_or_else(|| StoreError::validation(ID, "missing id"))?;
    if ids_matching(c, m, Some(id))?.is_empty() {
        return Err(StoreError::not_found(m.label()));
    }
    update_by_ids(c, m, &[id])?;
    Ok(id)
}

fn update_many(c: &Conn<'_>, m: &Mutation) -> Result<usize> {
    let ids = ids_matching(c, m, None)?;
    if ids.is_empty() {
        return Ok(0);
    }
    if ids.len() > 1
        && edges_of_kind(m.table(), m, EdgeKind::OneToMany).any(|(_, ch)| !ch.added.is_empty())
    {
        return Err(StoreError::constraint(format!(
            "unable to link one-to-many edge to {} {} rows",
            ids.len(),
            m.label()
        )));
    }
    update_by_ids(c, m, &ids)?;
    Ok(ids.len())
}

fn delete_one(c: &Conn<'_>, m: &Mutation) -> Result<()> {
    let table = m.table();
    let id = m
        .id()
        .ok_or_else(|| StoreError::validation(ID, "missing id"))?;
    let mut b = SqlBuilder::new(&format!("DELETE FROM {}", quote(table.name)));
    push_where(&mut b, m, Some(id));
    let (sql, args) = b.finish();
    match c.execute(&sql, &args)? {
        0 => Err(StoreError::not_found(m.label())),
        _ => Ok(()),
    }
}

fn delete_many(c: &Conn<'_>, m: &Mutation) -> Result<usize> {
    let table = m.table();
    let mut b = SqlBuilder::new(&format!("DELETE FROM {}", quote(table.name)));
    push_where(&mut b, m, None);
    let (sql, args) = b.finish();
    c.execute(&sql, &args)
}

/// Apply one-to-many edge changes for `parents`: clears, then removals, then adds
fn apply_children(
    c: &Conn<'_>,
    table: &'static TableDescriptor,
    parents: &[i64],
    m: &Mutation,
) -> Result<()> {
    for (edge, change) in edges_of_kind(table, m, EdgeKind::OneToMany) {
        let child = quote(edge.target.name);
        let fk = quote(edge.column);

        for chunk in parents.chunks(ID_CHUNK) {
            let parent_args = || chunk.iter().map(|id| Value::Integer(*id));

            if change.cleared {
                let mut b = SqlBuilder::new(&format!(
                    "UPDATE {} SET {} = NULL WHERE {} IN (",
                    child, fk, fk
                ));
                b.args(parent_args()).push(")");
                let (sql, args) = b.finish();
                c.execute(&sql, &args)?;
            }

            if !change.removed.is_empty() {
                let mut b = SqlBuilder::new(&format!(
                    "UPDATE {} SET {} = NULL WHERE {} IN (",
                    child,
                    fk,
                    quote(ID)
                ));
                b.args(change.removed.iter().map(|id| Value::Integer(*id)));
                b.push(&format!(") AND {} IN (", fk));
                b.args(parent_args()).push(")");
                let (sql, args) = b.finish();
                c.execute(&sql, &args)?;
            }
        }

        if !change.added.is_empty() {
            let [parent] = parents else {
                return Err(StoreError::constraint(format!(
                    "unable to link {} to {} parents",
                    edge.name,
                    parents.len()
                )));
            };
            let mut b = SqlBuilder::new(&format!("UPDATE {} SET {} = ", child, fk));
            b.arg(Value::Integer(*parent));
            b.push(&format!(" WHERE {} IN (", quote(ID)));
            b.args(change.added.iter().map(|id| Value::Integer(*id)));
            b.push(&format!(") AND ({} IS NULL OR {} = ", fk, fk));
            b.arg(Value::Integer(*parent));
            b.push(")");
            let (sql, args) = b.finish();
            let affected = c.execute(&sql, &args)?;
            if affected != change.added.len() {
                return Err(StoreError::constraint(format!(
                    "one of {:?} is missing or already connected to a different {}",
                    change.added, table.label
                ))
                .with_field(edge.name));
            }
        }
    }
    Ok(())
}

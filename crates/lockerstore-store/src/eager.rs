//! Eager loading of edges
//!
//! Each requested edge costs one extra query, issued after the primary rows
//! are read: an `IN` over the parent ids (or foreign keys), with the results
//! bucketed back onto their owners. Long id lists are split across several
//! queries.

use crate::entity::Entity;
use crate::errors::{internal, Result};
use crate::predicate::Predicate;
use crate::query::Query;
use crate::schema::EdgeDescriptor;
use crate::sql::ID_CHUNK;
use lockerstore_core::Context;
use std::collections::{BTreeSet, HashMap};

pub(crate) trait EagerLoad<P>: Send + Sync {
    fn load(&self, ctx: &Context, owners: &mut [P]) -> Result<()>;
    fn box_clone(&self) -> Box<dyn EagerLoad<P>>;
}

/// Loads a one-to-many edge: parents receive every child pointing at them
pub(crate) struct LoadChildren<P, C: Entity> {
    pub(crate) query: Query<C>,
    pub(crate) edge: &'static EdgeDescriptor,
    pub(crate) foreign_key: fn(&C) -> Option<i64>,
    pub(crate) assign: fn(&mut P, Vec<C>),
}

impl<P: Entity, C: Entity> EagerLoad<P> for LoadChildren<P, C> {
    fn load(&self, ctx: &Context, parents: &mut [P]) -> Result<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let mut buckets: HashMap<i64, Vec<C>> =
            parents.iter().map(|p| (p.id(), Vec::new())).collect();
        let ids: Vec<i64> = parents.iter().map(|p| p.id()).collect();

        let mut children = Vec::new();
        for chunk in ids.chunks(ID_CHUNK) {
            children.extend(
                self.query
                    .clone()
                    .filter(Predicate::column_in(self.edge.column, chunk.iter().copied()))
                    .all(ctx)?,
            );
        }

        for child in children {
            let fk = (self.foreign_key)(&child).ok_or_else(|| {
                internal(format!(
                    "{} {} loaded for edge {} has no foreign key",
                    C::table().label,
                    child.id(),
                    self.edge.name
                ))
            })?;
            buckets
                .get_mut(&fk)
                .ok_or_else(|| {
                    internal(format!(
                        "unexpected foreign-key {} returned for {}",
                        fk, self.edge.name
                    ))
                })?
                .push(child);
        }

        for parent in parents.iter_mut() {
            let children = buckets.remove(&parent.id()).unwrap_or_default();
            (self.assign)(parent, children);
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn EagerLoad<P>> {
        Box::new(Self {
            query: self.query.clone(),
            edge: self.edge,
            foreign_key: self.foreign_key,
            assign: self.assign,
        })
    }
}

/// Loads a many-to-one edge: each child receives its parent, if any
pub(crate) struct LoadParent<C, P: Entity> {
    pub(crate) query: Query<P>,
    pub(crate) edge: &'static EdgeDescriptor,
    pub(crate) foreign_key: fn(&C) -> Option<i64>,
    pub(crate) assign: fn(&mut C, Option<P>),
}

impl<C: Entity, P: Entity> EagerLoad<C> for LoadParent<C, P> {
    fn load(&self, ctx: &Context, children: &mut [C]) -> Result<()> {
        let fks: Vec<i64> = children
            .iter()
            .filter_map(|c| (self.foreign_key)(c))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut parents: HashMap<i64, P> = HashMap::new();
        for chunk in fks.chunks(ID_CHUNK) {
            for parent in self
                .query
                .clone()
                .filter(Predicate::id_in(chunk.iter().copied()))
                .all(ctx)?
            {
                parents.insert(parent.id(), parent);
            }
        }

        for child in children.iter_mut() {
            let parent = match (self.foreign_key)(child) {
                None => None,
                Some(fk) => match parents.get(&fk) {
                    Some(parent) => Some(parent.clone()),
                    // The parent query may carry its own filter
                    None if !self.query.predicates().is_empty() => None,
                    None => {
                        return Err(internal(format!(
                            "unexpected foreign-key {} returned for {}",
                            fk, self.edge.name
                        )))
                    }
                },
            };
            (self.assign)(child, parent);
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn EagerLoad<C>> {
        Box::new(Self {
            query: self.query.clone(),
            edge: self.edge,
            foreign_key: self.foreign_key,
            assign: self.assign,
        })
    }
}

//! Mutation hooks and query interceptors
//!
//! A hook wraps a [`Mutator`] and returns a new one; an interceptor does the
//! same for a [`Querier`]. Both are registered per table and composed so the
//! first registered is the outermost: it sees the intent first and the
//! result last.

use crate::errors::Result;
use crate::mutation::{Mutation, MutationOutput, Op};
use crate::query::QueryPlan;
use crate::record::Record;
use lockerstore_core::{Context, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub type Mutator = Arc<dyn Fn(&Context, &mut Mutation) -> Result<MutationOutput> + Send + Sync>;
pub type Hook = Arc<dyn Fn(Mutator) -> Mutator + Send + Sync>;
pub type Querier = Arc<dyn Fn(&Context, &mut QueryPlan) -> Result<Vec<Record>> + Send + Sync>;
pub type Interceptor = Arc<dyn Fn(Querier) -> Querier + Send + Sync>;

pub fn mutator<F>(f: F) -> Mutator
where
    F: Fn(&Context, &mut Mutation) -> Result<MutationOutput> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn hook<F>(f: F) -> Hook
where
    F: Fn(Mutator) -> Mutator + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn querier<F>(f: F) -> Querier
where
    F: Fn(&Context, &mut QueryPlan) -> Result<Vec<Record>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn interceptor<F>(f: F) -> Interceptor
where
    F: Fn(Querier) -> Querier + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Apply `inner` only to mutations whose op is in `ops`
pub fn on(inner: Hook, ops: &[Op]) -> Hook {
    let ops = ops.to_vec();
    hook(move |next: Mutator| {
        let wrapped = inner(next.clone());
        let ops = ops.clone();
        mutator(move |ctx, m| {
            if m.op().is(&ops) {
                wrapped(ctx, m)
            } else {
                next(ctx, m)
            }
        })
    })
}

/// Refuse mutations whose op is in `ops`
pub fn reject(ops: &[Op]) -> Hook {
    let ops = ops.to_vec();
    hook(move |next: Mutator| {
        let ops = ops.clone();
        mutator(move |ctx, m| {
            if m.op().is(&ops) {
                return Err(StoreError::validation(
                    m.label(),
                    format!("{} operation is not allowed on {}", m.op(), m.label()),
                ));
            }
            next(ctx, m)
        })
    })
}

pub(crate) fn chain_hooks(hooks: &[Hook], inner: Mutator) -> Mutator {
    hooks.iter().rev().fold(inner, |next, h| h(next))
}

pub(crate) fn chain_interceptors(interceptors: &[Interceptor], inner: Querier) -> Querier {
    interceptors.iter().rev().fold(inner, |next, i| i(next))
}

/// Hooks and interceptors keyed by table name
#[derive(Default)]
pub(crate) struct Registry {
    hooks: RwLock<HashMap<&'static str, Vec<Hook>>>,
    interceptors: RwLock<HashMap<&'static str, Vec<Interceptor>>>,
}

impl Registry {
    pub(crate) fn add_hook(&self, table: &'static str, hook: Hook) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table)
            .or_default()
            .push(hook);
    }

    pub(crate) fn add_interceptor(&self, table: &'static str, interceptor: Interceptor) {
        self.interceptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table)
            .or_default()
            .push(interceptor);
    }

    /// Snapshot, so registration during a call does not affect it
    pub(crate) fn hooks(&self, table: &str) -> Vec<Hook> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn interceptors(&self, table: &str) -> Vec<Interceptor> {
        self.interceptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

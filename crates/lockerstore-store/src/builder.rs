//! Mutation builders
//!
//! Builders stage a [`Mutation`], run it through the table's hooks, and log
//! the operation lifecycle. Typed setters (`set_did`, `add_identity_ids`,
//! ...) live next to each entity.

use crate::client::Config;
use crate::entity::Entity;
use crate::errors::{internal, Result};
use crate::executor;
use crate::hook::{chain_hooks, mutator, Mutator};
use crate::mutation::{Mutation, MutationOutput, MutationState, Op};
use crate::predicate::Predicate;
use crate::query::{panic_on_err, Query};
use crate::sql::ID_CHUNK;
use lockerstore_core::{log_op_end, log_op_error, log_op_start, Context};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Wrap a mutation terminal in start/end logging
fn observe<T>(ctx: &Context, label: &str, op: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let op_name = format!("{}.{}", label, op);
    log_op_start!(op_name.as_str(), entity = label, request_id = ctx.request_id());
    let started = Instant::now();
    let result = f();
    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(value) => {
            log_op_end!(op_name.as_str(), duration_ms = duration_ms, entity = label);
            Ok(value)
        }
        Err(err) => {
            log_op_error!(op_name.as_str(), err, duration_ms = duration_ms, entity = label);
            let err = if err.label().is_none() {
                err.with_label(label)
            } else {
                err
            };
            Err(if err.op().is_none() {
                err.with_op(op_name)
            } else {
                err
            })
        }
    }
}

fn terminal() -> Mutator {
    mutator(|ctx, m| {
        let result = executor::execute(ctx, m);
        m.mark(if result.is_ok() {
            MutationState::Executed
        } else {
            MutationState::Aborted
        });
        result
    })
}

fn run(config: &Config, ctx: &Context, m: &mut Mutation) -> Result<MutationOutput> {
    let hooks = config.registry.hooks(m.table().name);
    chain_hooks(&hooks, terminal())(ctx, m)
}

fn fetch<E: Entity>(config: &Config, ctx: &Context, id: i64) -> Result<E> {
    Query::<E>::new(config.clone())
        .filter(Predicate::id_in([id]))
        .only(ctx)
}

fn unexpected(output: MutationOutput) -> lockerstore_core::StoreError {
    internal(format!("unexpected mutation output {:?}", output))
}

pub struct CreateBuilder<E: Entity> {
    pub(crate) config: Config,
    pub(crate) mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> CreateBuilder<E> {
    pub(crate) fn new(config: Config) -> Self {
        let mutation = Mutation::new(E::table(), Op::Create, config.driver.clone());
        Self {
            config,
            mutation,
            _entity: PhantomData,
        }
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    pub fn mutation_mut(&mut self) -> &mut Mutation {
        &mut self.mutation
    }

    /// Insert the row and return it as stored
    pub fn save(mut self, ctx: &Context) -> Result<E> {
        observe(ctx, E::table().label, Op::Create.as_str(), || {
            match run(&self.config, ctx, &mut self.mutation)? {
                MutationOutput::Created(id) => fetch(&self.config, ctx, id),
                other => Err(unexpected(other)),
            }
        })
    }

    pub fn save_x(self, ctx: &Context) -> E {
        panic_on_err(self.save(ctx))
    }

    /// Insert without reading the row back
    pub fn exec(mut self, ctx: &Context) -> Result<()> {
        observe(ctx, E::table().label, Op::Create.as_str(), || {
            run(&self.config, ctx, &mut self.mutation).map(|_| ())
        })
    }
}

/// Insert many rows in one atomic batch
///
/// Each builder's mutation passes through the hooks on its own. The innermost
/// call only stages it and reports [`MutationOutput::Staged`]; the INSERT
/// runs once every builder has been staged.
pub struct BulkCreateBuilder<E: Entity> {
    config: Config,
    builders: Vec<CreateBuilder<E>>,
}

impl<E: Entity> BulkCreateBuilder<E> {
    pub(crate) fn new(config: Config, builders: Vec<CreateBuilder<E>>) -> Self {
        Self { config, builders }
    }

    fn run_bulk(self, ctx: &Context) -> Result<Vec<i64>> {
        if self.builders.is_empty() {
            return Ok(Vec::new());
        }
        let staged = Arc::new(Mutex::new(Vec::<Mutation>::with_capacity(self.builders.len())));
        let stage = {
            let staged = staged.clone();
            mutator(move |_, m| {
                m.validate()?;
                staged
                    .lock()
                    .map_err(|_| internal("bulk batch mutex poisoned"))?
                    .push(m.clone());
                Ok(MutationOutput::Staged)
            })
        };
        let chain = chain_hooks(&self.config.registry.hooks(E::table().name), stage);

        for builder in self.builders {
            let mut m = builder.mutation;
            chain(ctx, &mut m)?;
        }

        let batch = std::mem::take(
            &mut *staged
                .lock()
                .map_err(|_| internal("bulk batch mutex poisoned"))?,
        );
        executor::execute_bulk(ctx, &self.config.driver, &batch)
    }

    /// Insert every row; results come back in builder order
    pub fn save(self, ctx: &Context) -> Result<Vec<E>> {
        let config = self.config.clone();
        observe(ctx, E::table().label, "create_bulk", || {
            let ids = self.run_bulk(ctx)?;
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let mut rows = Vec::with_capacity(ids.len());
            for chunk in ids.chunks(ID_CHUNK) {
                rows.extend(
                    Query::<E>::new(config.clone())
                        .filter(Predicate::id_in(chunk.iter().copied()))
                        .all(ctx)?,
                );
            }
            rows.sort_by_key(|e| e.id());
            Ok(rows)
        })
    }

    pub fn save_x(self, ctx: &Context) -> Vec<E> {
        panic_on_err(self.save(ctx))
    }

    pub fn exec(self, ctx: &Context) -> Result<()> {
        observe(ctx, E::table().label, "create_bulk", || {
            self.run_bulk(ctx).map(|_| ())
        })
    }
}

/// Update every row matching the filters
pub struct UpdateBuilder<E: Entity> {
    pub(crate) config: Config,
    pub(crate) mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> UpdateBuilder<E> {
    pub(crate) fn new(config: Config) -> Self {
        let mutation = Mutation::new(E::table(), Op::Update, config.driver.clone());
        Self {
            config,
            mutation,
            _entity: PhantomData,
        }
    }

    pub fn filter(mut self, predicate: Predicate<E>) -> Self {
        self.mutation.push_predicate(predicate.node);
        self
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    pub fn mutation_mut(&mut self) -> &mut Mutation {
        &mut self.mutation
    }

    /// Number of rows matched
    pub fn save(mut self, ctx: &Context) -> Result<usize> {
        observe(ctx, E::table().label, Op::Update.as_str(), || {
            match run(&self.config, ctx, &mut self.mutation)? {
                MutationOutput::Affected(n) => Ok(n),
                other => Err(unexpected(other)),
            }
        })
    }

    pub fn save_x(self, ctx: &Context) -> usize {
        panic_on_err(self.save(ctx))
    }

    pub fn exec(self, ctx: &Context) -> Result<()> {
        self.save(ctx).map(|_| ())
    }
}

/// Update a single row by id
pub struct UpdateOneBuilder<E: Entity> {
    pub(crate) config: Config,
    pub(crate) mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> UpdateOneBuilder<E> {
    pub(crate) fn new(config: Config, id: i64) -> Self {
        let mut mutation = Mutation::new(E::table(), Op::UpdateOne, config.driver.clone());
        mutation.set_id(id);
        Self {
            config,
            mutation,
            _entity: PhantomData,
        }
    }

    /// Extra condition; a row failing it is reported as not found
    pub fn filter(mut self, predicate: Predicate<E>) -> Self {
        self.mutation.push_predicate(predicate.node);
        self
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    pub fn mutation_mut(&mut self) -> &mut Mutation {
        &mut self.mutation
    }

    /// Apply the changes and return the updated row
    pub fn save(mut self, ctx: &Context) -> Result<E> {
        observe(ctx, E::table().label, Op::UpdateOne.as_str(), || {
            match run(&self.config, ctx, &mut self.mutation)? {
                MutationOutput::Updated(id) => fetch(&self.config, ctx, id),
                other => Err(unexpected(other)),
            }
        })
    }

    pub fn save_x(self, ctx: &Context) -> E {
        panic_on_err(self.save(ctx))
    }

    pub fn exec(mut self, ctx: &Context) -> Result<()> {
        observe(ctx, E::table().label, Op::UpdateOne.as_str(), || {
            run(&self.config, ctx, &mut self.mutation).map(|_| ())
        })
    }
}

/// Delete every row matching the filters
pub struct DeleteBuilder<E: Entity> {
    config: Config,
    mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> DeleteBuilder<E> {
    pub(crate) fn new(config: Config) -> Self {
        let mutation = Mutation::new(E::table(), Op::Delete, config.driver.clone());
        Self {
            config,
            mutation,
            _entity: PhantomData,
        }
    }

    pub fn filter(mut self, predicate: Predicate<E>) -> Self {
        self.mutation.push_predicate(predicate.node);
        self
    }

    pub fn mutation_mut(&mut self) -> &mut Mutation {
        &mut self.mutation
    }

    /// Number of rows deleted
    pub fn exec(mut self, ctx: &Context) -> Result<usize> {
        observe(ctx, E::table().label, Op::Delete.as_str(), || {
            match run(&self.config, ctx, &mut self.mutation)? {
                MutationOutput::Affected(n) => Ok(n),
                other => Err(unexpected(other)),
            }
        })
    }

    pub fn exec_x(self, ctx: &Context) -> usize {
        panic_on_err(self.exec(ctx))
    }
}

/// Delete a single row by id
pub struct DeleteOneBuilder<E: Entity> {
    config: Config,
    mutation: Mutation,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> DeleteOneBuilder<E> {
    pub(crate) fn new(config: Config, id: i64) -> Self {
        let mut mutation = Mutation::new(E::table(), Op::DeleteOne, config.driver.clone());
        mutation.set_id(id);
        Self {
            config,
            mutation,
            _entity: PhantomData,
        }
    }

    pub fn filter(mut self, predicate: Predicate<E>) -> Self {
        self.mutation.push_predicate(predicate.node);
        self
    }

    pub fn mutation_mut(&mut self) -> &mut Mutation {
        &mut self.mutation
    }

    /// # Errors
    ///
    /// NotFound when no row has the id.
    pub fn exec(mut self, ctx: &Context) -> Result<()> {
        observe(ctx, E::table().label, Op::DeleteOne.as_str(), || {
            run(&self.config, ctx, &mut self.mutation).map(|_| ())
        })
    }

    pub fn exec_x(self, ctx: &Context) {
        panic_on_err(self.exec(ctx))
    }
}

//! Per-entity repository
//!
//! One generic repository serves every entity kind; the typed surface
//! (setters, edge loaders, traversals) is attached per entity.

use crate::builder::{
    BulkCreateBuilder, CreateBuilder, DeleteBuilder, DeleteOneBuilder, UpdateBuilder,
    UpdateOneBuilder,
};
use crate::client::Config;
use crate::entity::Entity;
use crate::errors::Result;
use crate::hook::{Hook, Interceptor};
use crate::predicate::Predicate;
use crate::query::{panic_on_err, Query};
use lockerstore_core::Context;
use std::marker::PhantomData;

pub struct Repository<E: Entity> {
    config: Config,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &E::table().label)
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            config,
            _entity: PhantomData,
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub fn query(&self) -> Query<E> {
        Query::new(self.config.clone())
    }

    /// # Errors
    ///
    /// NotFound when no row has the id.
    pub fn get(&self, ctx: &Context, id: i64) -> Result<E> {
        self.query().filter(Predicate::id_in([id])).only(ctx)
    }

    pub fn get_x(&self, ctx: &Context, id: i64) -> E {
        panic_on_err(self.get(ctx, id))
    }

    pub fn create(&self) -> CreateBuilder<E> {
        CreateBuilder::new(self.config.clone())
    }

    /// Insert every builder's row in one statement, all or nothing
    pub fn create_bulk(
        &self,
        builders: impl IntoIterator<Item = CreateBuilder<E>>,
    ) -> BulkCreateBuilder<E> {
        BulkCreateBuilder::new(self.config.clone(), builders.into_iter().collect())
    }

    pub fn update(&self) -> UpdateBuilder<E> {
        UpdateBuilder::new(self.config.clone())
    }

    pub fn update_one_id(&self, id: i64) -> UpdateOneBuilder<E> {
        UpdateOneBuilder::new(self.config.clone(), id)
    }

    pub fn update_one(&self, entity: &E) -> UpdateOneBuilder<E> {
        self.update_one_id(entity.id())
    }

    pub fn delete(&self) -> DeleteBuilder<E> {
        DeleteBuilder::new(self.config.clone())
    }

    pub fn delete_one_id(&self, id: i64) -> DeleteOneBuilder<E> {
        DeleteOneBuilder::new(self.config.clone(), id)
    }

    pub fn delete_one(&self, entity: &E) -> DeleteOneBuilder<E> {
        self.delete_one_id(entity.id())
    }

    /// Register a hook for this entity kind only
    pub fn use_hook(&self, hook: Hook) {
        self.config.registry.add_hook(E::table().name, hook);
    }

    pub fn intercept(&self, interceptor: Interceptor) {
        self.config
            .registry
            .add_interceptor(E::table().name, interceptor);
    }
}

//! Entity value types
//!
//! One module per entity kind. Each holds the row struct, its typed field
//! handles (`account::DID`, `identity::HASH`, ...), edge predicates, and the
//! typed setters and eager loaders grafted onto the generic builders.

use crate::errors::Result;
use crate::record::Record;
use crate::schema::TableDescriptor;
use lockerstore_core::StoreError;

/// A row type backed by one table
pub trait Entity: Clone + std::fmt::Debug + Send + Sync + 'static {
    fn table() -> &'static TableDescriptor;

    fn id(&self) -> i64;

    /// Decode a row selected with every column in descriptor order
    fn from_record(record: Record) -> Result<Self>;
}

/// Eager-load slot for a child's owning account
///
/// `None` until `with_account` ran; then `Some(None)` for an orphan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerEdge {
    pub(crate) account: Option<Option<account::Account>>,
}

impl OwnerEdge {
    /// # Errors
    ///
    /// NotLoaded unless the query requested `with_account`.
    pub fn account(&self) -> Result<Option<&account::Account>> {
        self.account
            .as_ref()
            .map(Option::as_ref)
            .ok_or_else(|| StoreError::not_loaded("account"))
    }
}

/// Graft the same inherent methods onto several builders of one entity
macro_rules! builder_methods {
    ([$($builder:ident),+] <$entity:ty> $body:tt) => {
        $(impl $crate::builder::$builder<$entity> $body)+
    };
}

/// Account side of a one-to-many edge
macro_rules! parent_edge {
    (
        edge: $edge:path,
        inverse: $inverse:path,
        child: $child:ty,
        slot: $slot:ident,
        has: $has:ident,
        has_with: $has_with:ident,
        with: $with:ident,
        with_query: $with_query:ident,
        query: $query:ident,
        add_ids: $add_ids:ident,
        add: $add:ident,
        remove_ids: $remove_ids:ident,
        remove: $remove:ident,
        clear: $clear:ident $(,)?
    ) => {
        pub fn $has() -> $crate::predicate::Predicate<Account> {
            $crate::predicate::Predicate::edge::<$child>(&$edge, Vec::new())
        }

        pub fn $has_with(
            filter: impl IntoIterator<Item = $crate::predicate::Predicate<$child>>,
        ) -> $crate::predicate::Predicate<Account> {
            $crate::predicate::Predicate::edge(&$edge, filter.into_iter().collect())
        }

        impl $crate::query::Query<Account> {
            pub fn $with(self) -> Self {
                self.$with_query(|q| q)
            }

            /// Eager-load the edge through a caller-shaped query
            pub fn $with_query(
                self,
                shape: impl FnOnce($crate::query::Query<$child>) -> $crate::query::Query<$child>,
            ) -> Self {
                let query = shape($crate::query::Query::new(self.config().clone()));
                self.with_eager(Box::new($crate::eager::LoadChildren {
                    query,
                    edge: &$edge,
                    foreign_key: |c: &$child| c.account_id,
                    assign: |p: &mut Account, children: Vec<$child>| {
                        p.edges.$slot = Some(children)
                    },
                }))
            }

            /// Rows on the far side of the edge from the accounts matched so far
            pub fn $query(&self) -> $crate::query::Query<$child> {
                $crate::query::Query::new(self.config().clone()).filter(
                    $crate::predicate::Predicate::edge(&$inverse, self.predicates()),
                )
            }
        }

        impl $crate::repository::Repository<Account> {
            pub fn $query(&self, account: &Account) -> $crate::query::Query<$child> {
                $crate::query::Query::new(self.config().clone()).filter(
                    $crate::predicate::Predicate::column_in(
                        $crate::schema::ACCOUNT_FK,
                        [account.id],
                    ),
                )
            }
        }

        builder_methods!([CreateBuilder, UpdateBuilder, UpdateOneBuilder] <Account> {
            pub fn $add_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
                self.mutation.add_edge_ids($edge.name, ids);
                self
            }

            pub fn $add<'a>(self, children: impl IntoIterator<Item = &'a $child>) -> Self {
                self.$add_ids(children.into_iter().map(|c| c.id))
            }
        });

        builder_methods!([UpdateBuilder, UpdateOneBuilder] <Account> {
            /// Detach the given children; rows owned by another account are untouched
            pub fn $remove_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
                self.mutation.remove_edge_ids($edge.name, ids);
                self
            }

            pub fn $remove<'a>(self, children: impl IntoIterator<Item = &'a $child>) -> Self {
                self.$remove_ids(children.into_iter().map(|c| c.id))
            }

            /// Detach every child
            pub fn $clear(mut self) -> Self {
                self.mutation.clear_edge($edge.name);
                self
            }
        });
    };
}

/// Child side of an edge to the owning account
macro_rules! child_edge {
    ($entity:ident, edge: $edge:path, inverse: $inverse:path) => {
        pub fn has_account() -> $crate::predicate::Predicate<$entity> {
            $crate::predicate::Predicate::edge::<$crate::entity::account::Account>(&$edge, Vec::new())
        }

        pub fn has_account_with(
            filter: impl IntoIterator<Item = $crate::predicate::Predicate<$crate::entity::account::Account>>,
        ) -> $crate::predicate::Predicate<$entity> {
            $crate::predicate::Predicate::edge(&$edge, filter.into_iter().collect())
        }

        impl $crate::query::Query<$entity> {
            pub fn with_account(self) -> Self {
                self.with_account_query(|q| q)
            }

            pub fn with_account_query(
                self,
                shape: impl FnOnce(
                    $crate::query::Query<$crate::entity::account::Account>,
                ) -> $crate::query::Query<$crate::entity::account::Account>,
            ) -> Self {
                let query = shape($crate::query::Query::new(self.config().clone()));
                self.with_eager(Box::new($crate::eager::LoadParent {
                    query,
                    edge: &$edge,
                    foreign_key: |c: &$entity| c.account_id,
                    assign: |c: &mut $entity, p: Option<$crate::entity::account::Account>| {
                        c.edges.account = Some(p)
                    },
                }))
            }

            /// Accounts owning any of the rows matched so far
            pub fn query_account(&self) -> $crate::query::Query<$crate::entity::account::Account> {
                $crate::query::Query::new(self.config().clone()).filter(
                    $crate::predicate::Predicate::edge(&$inverse, self.predicates()),
                )
            }
        }

        impl $crate::repository::Repository<$entity> {
            pub fn query_account(
                &self,
                row: &$entity,
            ) -> $crate::query::Query<$crate::entity::account::Account> {
                $crate::query::Query::new(self.config().clone())
                    .filter($crate::predicate::Predicate::id_in(row.account_id))
            }
        }

        builder_methods!([CreateBuilder, UpdateBuilder, UpdateOneBuilder] <$entity> {
            pub fn set_account_id(mut self, id: i64) -> Self {
                self.mutation.set_unique_edge($edge.name, id);
                self
            }

            pub fn set_nillable_account_id(self, id: Option<i64>) -> Self {
                match id {
                    Some(id) => self.set_account_id(id),
                    None => self,
                }
            }

            pub fn set_account(self, account: &$crate::entity::account::Account) -> Self {
                self.set_account_id(account.id)
            }
        });

        builder_methods!([UpdateBuilder, UpdateOneBuilder] <$entity> {
            /// Detach from the owning account
            pub fn clear_account(mut self) -> Self {
                self.mutation.clear_edge($edge.name);
                self
            }
        });
    };
}

/// Identity, Locker and Property share one shape: an opaque encrypted
/// payload addressed by its hash, with a numeric access level
macro_rules! encrypted_entity {
    (
        $(#[$meta:meta])*
        $entity:ident,
        table: $table:path,
        edge: $edge:path,
        inverse: $inverse:path $(,)?
    ) => {
        use $crate::entity::{Entity, OwnerEdge};
        use $crate::errors::Result;
        use $crate::predicate::Field;
        use $crate::record::{Record, RecordReader};
        use $crate::schema::TableDescriptor;
        use lockerstore_core_types::Sensitive;
        use rusqlite::types::Value;

        pub const ID: Field<$entity, i64> = Field::new("id");
        pub const HASH: Field<$entity, String> = Field::new("hash");
        pub const LEVEL: Field<$entity, i32> = Field::new("level");
        pub const ENCRYPTED_ID: Field<$entity, String> = Field::new("encrypted_id");
        pub const ENCRYPTED_BODY: Field<$entity, String> = Field::new("encrypted_body");
        /// Foreign key to the owning account
        pub const ACCOUNT_ID: Field<$entity, i64> = Field::new("account");

        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $entity {
            pub id: i64,
            pub hash: String,
            pub level: i32,
            pub encrypted_id: Sensitive<String>,
            pub encrypted_body: Sensitive<String>,
            pub account_id: Option<i64>,
            pub edges: OwnerEdge,
        }

        impl Entity for $entity {
            fn table() -> &'static TableDescriptor {
                &$table
            }

            fn id(&self) -> i64 {
                self.id
            }

            fn from_record(record: Record) -> Result<Self> {
                let mut r = RecordReader::new($table.label, record);
                Ok(Self {
                    id: r.int64()?,
                    hash: r.string()?,
                    level: r.int32()?,
                    encrypted_id: Sensitive::new(r.string()?),
                    encrypted_body: Sensitive::new(r.string()?),
                    account_id: r.opt_int64()?,
                    edges: OwnerEdge::default(),
                })
            }
        }

        child_edge!($entity, edge: $edge, inverse: $inverse);

        builder_methods!([CreateBuilder, UpdateBuilder, UpdateOneBuilder] <$entity> {
            pub fn set_hash(mut self, hash: impl Into<String>) -> Self {
                self.mutation.set(HASH.name(), Value::Text(hash.into()));
                self
            }

            /// Overrides any pending `add_level`
            pub fn set_level(mut self, level: i32) -> Self {
                self.mutation.set(LEVEL.name(), Value::Integer(i64::from(level)));
                self
            }

            pub fn set_encrypted_id(mut self, encrypted_id: impl Into<String>) -> Self {
                self.mutation.set(ENCRYPTED_ID.name(), Value::Text(encrypted_id.into()));
                self
            }

            pub fn set_encrypted_body(mut self, encrypted_body: impl Into<String>) -> Self {
                self.mutation.set(ENCRYPTED_BODY.name(), Value::Text(encrypted_body.into()));
                self
            }
        });

        builder_methods!([UpdateBuilder, UpdateOneBuilder] <$entity> {
            /// Add to the stored level; repeated calls accumulate
            pub fn add_level(mut self, delta: i32) -> Self {
                // An overflow resurfaces when the mutation is validated
                let _ = self.mutation.add(LEVEL.name(), i64::from(delta));
                self
            }
        });
    };
}

pub mod access_key;
pub mod account;
pub mod did;
pub mod identity;
pub mod locker;
pub mod property;
pub mod recovery_code;

pub use access_key::AccessKey;
pub use account::{Account, AccountEdges};
pub use did::Did;
pub use identity::Identity;
pub use locker::Locker;
pub use property::Property;
pub use recovery_code::RecoveryCode;

//! Client and Transaction
//!
//! A [`Client`] owns the driver and the hook registry and hands out one
//! repository per entity kind. A [`Transaction`] is the same surface bound to
//! a single pinned connection; every repository obtained through it shares
//! that connection until `commit` or `rollback`.

use crate::config::StoreConfig;
use crate::db::ConnectOptions;
use crate::driver::{DebugLog, Driver, TxState};
use crate::entity::{AccessKey, Account, Did, Identity, Locker, Property, RecoveryCode};
use crate::errors::Result;
use crate::hook::{Hook, Interceptor, Registry};
use crate::migrations::apply_migrations;
use crate::pool::{Pool, PoolStats};
use crate::repository::Repository;
use crate::schema::TABLES;
use lockerstore_core::{Context, StoreError, StoreErrorKind};
use std::path::Path;
use std::sync::Arc;

/// State shared by every builder rooted in one client or transaction
#[derive(Clone)]
pub(crate) struct Config {
    pub(crate) driver: Driver,
    pub(crate) registry: Arc<Registry>,
}

macro_rules! repositories {
    () => {
        pub fn account(&self) -> Repository<Account> {
            Repository::new(self.config.clone())
        }

        pub fn recovery_code(&self) -> Repository<RecoveryCode> {
            Repository::new(self.config.clone())
        }

        pub fn access_key(&self) -> Repository<AccessKey> {
            Repository::new(self.config.clone())
        }

        pub fn identity(&self) -> Repository<Identity> {
            Repository::new(self.config.clone())
        }

        pub fn locker(&self) -> Repository<Locker> {
            Repository::new(self.config.clone())
        }

        pub fn property(&self) -> Repository<Property> {
            Repository::new(self.config.clone())
        }

        pub fn did(&self) -> Repository<Did> {
            Repository::new(self.config.clone())
        }
    };
}

#[derive(Clone)]
pub struct Client {
    config: Config,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("in_transaction", &self.config.driver.is_tx())
            .field("pool", &self.config.driver.pool_stats())
            .finish()
    }
}

impl Client {
    /// Open a pool as described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let pool = Pool::new(
            ConnectOptions::from_config(config),
            config.max_open_connections(),
            config.acquire_timeout(),
        )?;
        tracing::debug!(
            in_memory = config.is_in_memory(),
            max_open = config.max_open_connections(),
            "client opened"
        );
        let client = Self {
            config: Config {
                driver: Driver::new(pool),
                registry: Arc::new(Registry::default()),
            },
        };
        Ok(if config.logging.debug_sql {
            client.debug()
        } else {
            client
        })
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&StoreConfig::file(path.as_ref()))
    }

    /// Fresh private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Apply pending migrations; returns how many ran
    pub fn migrate(&self, ctx: &Context) -> Result<usize> {
        if self.config.driver.is_tx() {
            return Err(StoreError::new(StoreErrorKind::TxStarted)
                .with_op("migrate")
                .with_message("migrations cannot run inside a transaction"));
        }
        self.config
            .driver
            .with_conn(ctx, |conn| apply_migrations(conn.raw()))
    }

    /// Start a transaction on a dedicated connection
    ///
    /// # Errors
    ///
    /// TxStarted when called on a client that is already transactional.
    pub fn begin(&self, ctx: &Context) -> Result<Transaction> {
        let driver = self.config.driver.begin(ctx)?;
        tracing::debug!("transaction started");
        Ok(Transaction {
            config: Config {
                driver,
                registry: self.config.registry.clone(),
            },
        })
    }

    /// Same client, with every statement logged through `tracing`
    pub fn debug(&self) -> Self {
        self.with_debug_log(|line| tracing::debug!(target: "lockerstore::sql", "{}", line))
    }

    /// Same client, with every statement handed to `log`
    pub fn with_debug_log(&self, log: impl Fn(&str) + Send + Sync + 'static) -> Self {
        let log: DebugLog = Arc::new(log);
        Self {
            config: Config {
                driver: self.config.driver.with_log(log),
                registry: self.config.registry.clone(),
            },
        }
    }

    /// Cap the pool at one connection
    ///
    /// A no-op on a transaction-bound client, which already has one.
    pub fn set_one_open_connection(&self) -> Result<()> {
        match self.config.driver.pool() {
            Some(pool) => pool.set_max_open(1),
            None => Ok(()),
        }
    }

    /// Register a hook on every entity kind
    pub fn use_hook(&self, hook: Hook) {
        for table in TABLES {
            self.config.registry.add_hook(table.name, hook.clone());
        }
    }

    /// Register a query interceptor on every entity kind
    pub fn intercept(&self, interceptor: Interceptor) {
        for table in TABLES {
            self.config
                .registry
                .add_interceptor(table.name, interceptor.clone());
        }
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.config.driver.pool_stats()
    }

    repositories!();
}

/// A client bound to one backend transaction
///
/// `commit` and `rollback` are terminal: afterwards every handle obtained
/// from the transaction fails with NotInTransaction. Dropping an open
/// transaction rolls it back.
pub struct Transaction {
    config: Config,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state())
            .finish()
    }
}

impl Transaction {
    /// A client sharing this transaction
    pub fn client(&self) -> Client {
        Client {
            config: self.config.clone(),
        }
    }

    pub fn state(&self) -> TxState {
        self.config.driver.tx_state().unwrap_or(TxState::RolledBack)
    }

    pub fn commit(&self) -> Result<()> {
        self.config.driver.commit()?;
        tracing::debug!("transaction committed");
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.config.driver.rollback()?;
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    repositories!();
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state() == TxState::Open {
            tracing::warn!("open transaction dropped, rolling back");
            if let Err(err) = self.config.driver.rollback() {
                tracing::warn!(err.code = err.code(), "rollback on drop failed");
            }
        }
    }
}

//! Accounts and their owned rows

use crate::entity::{AccessKey, Entity, Identity, Locker, Property, RecoveryCode};
use crate::errors::Result;
use crate::predicate::Field;
use crate::record::{IntoValue, Record, RecordReader};
use crate::schema::{
    TableDescriptor, ACCESS_KEY_ACCOUNT, ACCOUNTS, ACCOUNT_ACCESS_KEYS, ACCOUNT_IDENTITIES,
    ACCOUNT_LOCKERS, ACCOUNT_PROPERTIES, ACCOUNT_RECOVERY_CODES, IDENTITY_ACCOUNT, LOCKER_ACCOUNT,
    PROPERTY_ACCOUNT, RECOVERY_CODE_ACCOUNT,
};
use lockerstore_core::StoreError;
use rusqlite::types::Value;

pub const ID: Field<Account, i64> = Field::new("id");
pub const DID: Field<Account, String> = Field::new("did");
pub const STATE: Field<Account, String> = Field::new("state");
pub const EMAIL: Field<Account, String> = Field::new("email");
/// Opaque string; not a foreign key
pub const PARENT_ACCOUNT: Field<Account, String> = Field::new("parent_account");
pub const BODY: Field<Account, serde_json::Value> = Field::new("body");

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub did: String,
    pub state: String,
    pub email: Option<String>,
    pub parent_account: Option<String>,
    pub body: serde_json::Value,
    pub edges: AccountEdges,
}

/// Eager-loaded children; each slot stays `None` unless requested
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountEdges {
    pub(crate) recovery_codes: Option<Vec<RecoveryCode>>,
    pub(crate) access_keys: Option<Vec<AccessKey>>,
    pub(crate) identities: Option<Vec<Identity>>,
    pub(crate) lockers: Option<Vec<Locker>>,
    pub(crate) properties: Option<Vec<Property>>,
}

fn loaded<'a, T>(slot: &'a Option<Vec<T>>, edge: &str) -> Result<&'a [T]> {
    slot.as_deref()
        .ok_or_else(|| StoreError::not_loaded(edge).with_label("account"))
}

impl AccountEdges {
    pub fn recovery_codes(&self) -> Result<&[RecoveryCode]> {
        loaded(&self.recovery_codes, ACCOUNT_RECOVERY_CODES.name)
    }

    pub fn access_keys(&self) -> Result<&[AccessKey]> {
        loaded(&self.access_keys, ACCOUNT_ACCESS_KEYS.name)
    }

    pub fn identities(&self) -> Result<&[Identity]> {
        loaded(&self.identities, ACCOUNT_IDENTITIES.name)
    }

    pub fn lockers(&self) -> Result<&[Locker]> {
        loaded(&self.lockers, ACCOUNT_LOCKERS.name)
    }

    pub fn properties(&self) -> Result<&[Property]> {
        loaded(&self.properties, ACCOUNT_PROPERTIES.name)
    }
}

impl Entity for Account {
    fn table() -> &'static TableDescriptor {
        &ACCOUNTS
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn from_record(record: Record) -> Result<Self> {
        let mut r = RecordReader::new(ACCOUNTS.label, record);
        Ok(Self {
            id: r.int64()?,
            did: r.string()?,
            state: r.string()?,
            email: r.opt_string()?,
            parent_account: r.opt_string()?,
            body: r.json()?,
            edges: AccountEdges::default(),
        })
    }
}

builder_methods!([CreateBuilder, UpdateBuilder, UpdateOneBuilder] <Account> {
    pub fn set_did(mut self, did: impl Into<String>) -> Self {
        self.mutation.set(DID.name(), Value::Text(did.into()));
        self
    }

    pub fn set_state(mut self, state: impl Into<String>) -> Self {
        self.mutation.set(STATE.name(), Value::Text(state.into()));
        self
    }

    pub fn set_email(mut self, email: impl Into<String>) -> Self {
        self.mutation.set(EMAIL.name(), Value::Text(email.into()));
        self
    }

    pub fn set_nillable_email(self, email: Option<String>) -> Self {
        match email {
            Some(email) => self.set_email(email),
            None => self,
        }
    }

    pub fn set_parent_account(mut self, parent: impl Into<String>) -> Self {
        self.mutation.set(PARENT_ACCOUNT.name(), Value::Text(parent.into()));
        self
    }

    pub fn set_nillable_parent_account(self, parent: Option<String>) -> Self {
        match parent {
            Some(parent) => self.set_parent_account(parent),
            None => self,
        }
    }

    pub fn set_body(mut self, body: serde_json::Value) -> Self {
        self.mutation.set(BODY.name(), body.into_value());
        self
    }
});

builder_methods!([UpdateBuilder, UpdateOneBuilder] <Account> {
    pub fn clear_email(mut self) -> Self {
        self.mutation.clear(EMAIL.name());
        self
    }

    pub fn clear_parent_account(mut self) -> Self {
        self.mutation.clear(PARENT_ACCOUNT.name());
        self
    }
});

parent_edge! {
    edge: ACCOUNT_RECOVERY_CODES,
    inverse: RECOVERY_CODE_ACCOUNT,
    child: RecoveryCode,
    slot: recovery_codes,
    has: has_recovery_codes,
    has_with: has_recovery_codes_with,
    with: with_recovery_codes,
    with_query: with_recovery_codes_query,
    query: query_recovery_codes,
    add_ids: add_recovery_code_ids,
    add: add_recovery_codes,
    remove_ids: remove_recovery_code_ids,
    remove: remove_recovery_codes,
    clear: clear_recovery_codes,
}

parent_edge! {
    edge: ACCOUNT_ACCESS_KEYS,
    inverse: ACCESS_KEY_ACCOUNT,
    child: AccessKey,
    slot: access_keys,
    has: has_access_keys,
    has_with: has_access_keys_with,
    with: with_access_keys,
    with_query: with_access_keys_query,
    query: query_access_keys,
    add_ids: add_access_key_ids,
    add: add_access_keys,
    remove_ids: remove_access_key_ids,
    remove: remove_access_keys,
    clear: clear_access_keys,
}

parent_edge! {
    edge: ACCOUNT_IDENTITIES,
    inverse: IDENTITY_ACCOUNT,
    child: Identity,
    slot: identities,
    has: has_identities,
    has_with: has_identities_with,
    with: with_identities,
    with_query: with_identities_query,
    query: query_identities,
    add_ids: add_identity_ids,
    add: add_identities,
    remove_ids: remove_identity_ids,
    remove: remove_identities,
    clear: clear_identities,
}

parent_edge! {
    edge: ACCOUNT_LOCKERS,
    inverse: LOCKER_ACCOUNT,
    child: Locker,
    slot: lockers,
    has: has_lockers,
    has_with: has_lockers_with,
    with: with_lockers,
    with_query: with_lockers_query,
    query: query_lockers,
    add_ids: add_locker_ids,
    add: add_lockers,
    remove_ids: remove_locker_ids,
    remove: remove_lockers,
    clear: clear_lockers,
}

parent_edge! {
    edge: ACCOUNT_PROPERTIES,
    inverse: PROPERTY_ACCOUNT,
    child: Property,
    slot: properties,
    has: has_properties,
    has_with: has_properties_with,
    with: with_properties,
    with_query: with_properties_query,
    query: query_properties,
    add_ids: add_property_ids,
    add: add_properties,
    remove_ids: remove_property_ids,
    remove: remove_properties,
    clear: clear_properties,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unloaded_edges_report_their_name() {
        let edges = AccountEdges::default();
        assert_eq!(edges.identities().unwrap_err().field(), Some("identities"));
        assert_eq!(
            edges.recovery_codes().unwrap_err().field(),
            Some("recovery_codes")
        );
        assert!(edges.access_keys().unwrap_err().is_not_loaded());
    }

    #[test]
    fn test_loaded_empty_edge_is_ok() {
        let edges = AccountEdges {
            lockers: Some(Vec::new()),
            ..Default::default()
        };
        assert!(edges.lockers().unwrap().is_empty());
        assert!(edges.properties().is_err());
    }

    #[test]
    fn test_from_record() {
        let account = Account::from_record(vec![
            Value::Integer(1),
            Value::Text("did:example:a".into()),
            Value::Text("active".into()),
            Value::Null,
            Value::Text("did:example:root".into()),
            Value::Text("{\"k\":[1,2]}".into()),
        ])
        .unwrap();
        assert_eq!(account.did, "did:example:a");
        assert_eq!(account.email, None);
        assert_eq!(account.parent_account.as_deref(), Some("did:example:root"));
        assert_eq!(account.body, serde_json::json!({"k": [1, 2]}));
    }

    #[test]
    fn test_edge_predicates_target_children() {
        let p = has_identities_with([crate::entity::identity::HASH.eq("h1")]);
        assert!(matches!(p.node, crate::predicate::Node::Edge { .. }));
    }
}

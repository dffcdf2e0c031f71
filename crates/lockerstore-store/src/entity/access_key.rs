//! API-style access credentials

use crate::entity::{Entity, OwnerEdge};
use crate::errors::Result;
use crate::predicate::Field;
use crate::record::{IntoValue, Record, RecordReader};
use crate::schema::{TableDescriptor, ACCESS_KEYS, ACCESS_KEY_ACCOUNT, ACCOUNT_ACCESS_KEYS};
use rusqlite::types::Value;

pub const ID: Field<AccessKey, i64> = Field::new("id");
pub const DID: Field<AccessKey, String> = Field::new("did");
pub const BODY: Field<AccessKey, serde_json::Value> = Field::new("body");
pub const ACCOUNT_ID: Field<AccessKey, i64> = Field::new("account");

#[derive(Debug, Clone, PartialEq)]
pub struct AccessKey {
    pub id: i64,
    pub did: String,
    pub body: serde_json::Value,
    pub account_id: Option<i64>,
    pub edges: OwnerEdge,
}

impl Entity for AccessKey {
    fn table() -> &'static TableDescriptor {
        &ACCESS_KEYS
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn from_record(record: Record) -> Result<Self> {
        let mut r = RecordReader::new(ACCESS_KEYS.label, record);
        Ok(Self {
            id: r.int64()?,
            did: r.string()?,
            body: r.json()?,
            account_id: r.opt_int64()?,
            edges: OwnerEdge::default(),
        })
    }
}

child_edge!(AccessKey, edge: ACCESS_KEY_ACCOUNT, inverse: ACCOUNT_ACCESS_KEYS);

builder_methods!([CreateBuilder, UpdateBuilder, UpdateOneBuilder] <AccessKey> {
    pub fn set_did(mut self, did: impl Into<String>) -> Self {
        self.mutation.set(DID.name(), Value::Text(did.into()));
        self
    }

    pub fn set_body(mut self, body: serde_json::Value) -> Self {
        self.mutation.set(BODY.name(), body.into_value());
        self
    }
});

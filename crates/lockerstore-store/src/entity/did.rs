//! DID document registry

use crate::entity::Entity;
use crate::errors::Result;
use crate::predicate::Field;
use crate::record::{IntoValue, Record, RecordReader};
use crate::schema::{TableDescriptor, DID_DOCUMENTS};
use rusqlite::types::Value;

pub const ID: Field<Did, i64> = Field::new("id");
pub const DID: Field<Did, String> = Field::new("did");
pub const BODY: Field<Did, serde_json::Value> = Field::new("body");

/// A resolvable DID document, keyed by its DID
#[derive(Debug, Clone, PartialEq)]
pub struct Did {
    pub id: i64,
    pub did: String,
    pub body: serde_json::Value,
}

impl Entity for Did {
    fn table() -> &'static TableDescriptor {
        &DID_DOCUMENTS
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn from_record(record: Record) -> Result<Self> {
        let mut r = RecordReader::new(DID_DOCUMENTS.label, record);
        Ok(Self {
            id: r.int64()?,
            did: r.string()?,
            body: r.json()?,
        })
    }
}

builder_methods!([CreateBuilder, UpdateBuilder, UpdateOneBuilder] <Did> {
    pub fn set_did(mut self, did: impl Into<String>) -> Self {
        self.mutation.set(DID.name(), Value::Text(did.into()));
        self
    }

    pub fn set_body(mut self, body: serde_json::Value) -> Self {
        self.mutation.set(BODY.name(), body.into_value());
        self
    }
});

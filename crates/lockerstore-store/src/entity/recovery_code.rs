//! One-use account recovery codes

use crate::entity::{Entity, OwnerEdge};
use crate::errors::Result;
use crate::predicate::Field;
use crate::record::{IntoValue, Record, RecordReader};
use crate::schema::{TableDescriptor, ACCOUNT_RECOVERY_CODES, RECOVERY_CODES, RECOVERY_CODE_ACCOUNT};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;

pub const ID: Field<RecoveryCode, i64> = Field::new("id");
pub const CODE: Field<RecoveryCode, String> = Field::new("code");
pub const EXPIRES_AT: Field<RecoveryCode, DateTime<Utc>> = Field::new("expires_at");
pub const ACCOUNT_ID: Field<RecoveryCode, i64> = Field::new("account");

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryCode {
    pub id: i64,
    pub code: String,
    /// Stored with millisecond resolution
    pub expires_at: Option<DateTime<Utc>>,
    pub account_id: Option<i64>,
    pub edges: OwnerEdge,
}

impl Entity for RecoveryCode {
    fn table() -> &'static TableDescriptor {
        &RECOVERY_CODES
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn from_record(record: Record) -> Result<Self> {
        let mut r = RecordReader::new(RECOVERY_CODES.label, record);
        Ok(Self {
            id: r.int64()?,
            code: r.string()?,
            expires_at: r.opt_time()?,
            account_id: r.opt_int64()?,
            edges: OwnerEdge::default(),
        })
    }
}

child_edge!(RecoveryCode, edge: RECOVERY_CODE_ACCOUNT, inverse: ACCOUNT_RECOVERY_CODES);

builder_methods!([CreateBuilder, UpdateBuilder, UpdateOneBuilder] <RecoveryCode> {
    pub fn set_code(mut self, code: impl Into<String>) -> Self {
        self.mutation.set(CODE.name(), Value::Text(code.into()));
        self
    }

    pub fn set_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.mutation.set(EXPIRES_AT.name(), expires_at.into_value());
        self
    }

    pub fn set_nillable_expires_at(self, expires_at: Option<DateTime<Utc>>) -> Self {
        match expires_at {
            Some(t) => self.set_expires_at(t),
            None => self,
        }
    }
});

builder_methods!([UpdateBuilder, UpdateOneBuilder] <RecoveryCode> {
    pub fn clear_expires_at(mut self) -> Self {
        self.mutation.clear(EXPIRES_AT.name());
        self
    }
});

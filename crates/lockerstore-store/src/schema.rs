//! Table, column, index and edge descriptors
//!
//! The descriptors below are the single declaration of the physical schema.
//! They drive the DDL emitted by migration `001_initial_schema` and the
//! runtime column validation performed before any SQL is generated.

use lockerstore_core::{Result, StoreError};

/// Logical column type; maps onto a SQLite storage class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing 64-bit primary key
    Id,
    Int32,
    String,
    /// JSON document stored as text
    Json,
    /// Unix milliseconds
    Time,
    /// Nullable reference to `accounts.id`
    ForeignKey,
}

impl ColumnType {
    fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Id | ColumnType::Int32 | ColumnType::Time | ColumnType::ForeignKey => {
                "integer"
            }
            ColumnType::String | ColumnType::Json => "text",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDescriptor {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
}

impl ColumnDescriptor {
    const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            unique: false,
        }
    }

    const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Must be present on create
    pub fn is_required(&self) -> bool {
        !self.nullable && !matches!(self.ty, ColumnType::Id | ColumnType::ForeignKey)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Parent side: the foreign key lives on the target table
    OneToMany,
    /// Child side: the foreign key lives on this table
    ManyToOne,
}

/// A typed relationship between two tables
///
/// `column` always names the foreign-key column on the child table.
pub struct EdgeDescriptor {
    pub name: &'static str,
    pub kind: EdgeKind,
    pub target: &'static TableDescriptor,
    pub column: &'static str,
}

impl std::fmt::Debug for EdgeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target.name)
            .field("column", &self.column)
            .finish()
    }
}

#[derive(Debug)]
pub struct ForeignKeyDescriptor {
    pub symbol: &'static str,
    pub column: &'static str,
    pub ref_table: &'static str,
    pub ref_column: &'static str,
}

#[derive(Debug)]
pub struct IndexDescriptor {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

pub struct TableDescriptor {
    pub name: &'static str,
    /// Entity label used in errors and logs
    pub label: &'static str,
    pub columns: &'static [ColumnDescriptor],
    pub foreign_keys: &'static [ForeignKeyDescriptor],
    pub indexes: &'static [IndexDescriptor],
    pub edges: &'static [&'static EdgeDescriptor],
}

impl std::fmt::Debug for TableDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableDescriptor")
            .field("name", &self.name)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl PartialEq for TableDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl TableDescriptor {
    pub fn column(&'static self, name: &str) -> Option<&'static ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Resolve a caller-supplied column name against the declared columns
    pub fn validate_column(&'static self, name: &str) -> Result<&'static ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name).ok_or_else(|| {
            StoreError::validation(
                name,
                format!("invalid field {:?} for query on {}", name, self.name),
            )
            .with_label(self.label)
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    pub fn edge(&'static self, name: &str) -> Option<&'static EdgeDescriptor> {
        self.edges.iter().copied().find(|e| e.name == name)
    }

    pub fn required_columns(&'static self) -> impl Iterator<Item = &'static ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_required())
    }

    pub fn create_table_sql(&self) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote(c.name), c.ty.sql_type());
                if c.ty == ColumnType::Id {
                    def.push_str(" NOT NULL PRIMARY KEY AUTOINCREMENT");
                    return def;
                }
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                if c.unique {
                    def.push_str(" UNIQUE");
                }
                def
            })
            .collect();

        for fk in self.foreign_keys {
            parts.push(format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE SET NULL",
                quote(fk.symbol),
                quote(fk.column),
                quote(fk.ref_table),
                quote(fk.ref_column)
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(self.name),
            parts.join(", ")
        )
    }

    pub fn create_index_sql(&self) -> Vec<String> {
        self.indexes
            .iter()
            .map(|idx| {
                let cols: Vec<String> = idx.columns.iter().map(|c| quote(c)).collect();
                format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if idx.unique { "UNIQUE " } else { "" },
                    quote(idx.name),
                    quote(self.name),
                    cols.join(", ")
                )
            })
            .collect()
    }
}

/// Double-quote an SQL identifier
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub const ID: &str = "id";
pub const ACCOUNT_FK: &str = "account";

const FK_COLUMN: ColumnDescriptor =
    ColumnDescriptor::new(ACCOUNT_FK, ColumnType::ForeignKey).nullable();
const ID_COLUMN: ColumnDescriptor = ColumnDescriptor::new(ID, ColumnType::Id);

macro_rules! edge {
    ($static:ident, $name:literal, $kind:ident, $target:ident) => {
        pub static $static: EdgeDescriptor = EdgeDescriptor {
            name: $name,
            kind: EdgeKind::$kind,
            target: &$target,
            column: ACCOUNT_FK,
        };
    };
}

edge!(ACCOUNT_RECOVERY_CODES, "recovery_codes", OneToMany, RECOVERY_CODES);
edge!(ACCOUNT_ACCESS_KEYS, "access_keys", OneToMany, ACCESS_KEYS);
edge!(ACCOUNT_IDENTITIES, "identities", OneToMany, IDENTITIES);
edge!(ACCOUNT_LOCKERS, "lockers", OneToMany, LOCKERS);
edge!(ACCOUNT_PROPERTIES, "properties", OneToMany, PROPERTIES);
edge!(RECOVERY_CODE_ACCOUNT, "account", ManyToOne, ACCOUNTS);
edge!(ACCESS_KEY_ACCOUNT, "account", ManyToOne, ACCOUNTS);
edge!(IDENTITY_ACCOUNT, "account", ManyToOne, ACCOUNTS);
edge!(LOCKER_ACCOUNT, "account", ManyToOne, ACCOUNTS);
edge!(PROPERTY_ACCOUNT, "account", ManyToOne, ACCOUNTS);

pub static ACCOUNTS: TableDescriptor = TableDescriptor {
    name: "accounts",
    label: "account",
    columns: &[
        ID_COLUMN,
        ColumnDescriptor::new("did", ColumnType::String).unique(),
        ColumnDescriptor::new("state", ColumnType::String),
        ColumnDescriptor::new("email", ColumnType::String).nullable(),
        ColumnDescriptor::new("parent_account", ColumnType::String).nullable(),
        ColumnDescriptor::new("body", ColumnType::Json),
    ],
    foreign_keys: &[],
    indexes: &[
        IndexDescriptor {
            name: "account_did",
            columns: &["did"],
            unique: false,
        },
        IndexDescriptor {
            name: "account_state",
            columns: &["state"],
            unique: false,
        },
        IndexDescriptor {
            name: "account_email",
            columns: &["email"],
            unique: false,
        },
        IndexDescriptor {
            name: "account_parent_account",
            columns: &["parent_account"],
            unique: false,
        },
    ],
    edges: &[
        &ACCOUNT_RECOVERY_CODES,
        &ACCOUNT_ACCESS_KEYS,
        &ACCOUNT_IDENTITIES,
        &ACCOUNT_LOCKERS,
        &ACCOUNT_PROPERTIES,
    ],
};

pub static RECOVERY_CODES: TableDescriptor = TableDescriptor {
    name: "recovery_codes",
    label: "recovery_code",
    columns: &[
        ID_COLUMN,
        ColumnDescriptor::new("code", ColumnType::String).unique(),
        ColumnDescriptor::new("expires_at", ColumnType::Time).nullable(),
        FK_COLUMN,
    ],
    foreign_keys: &[ForeignKeyDescriptor {
        symbol: "recovery_codes_accounts_recovery_codes",
        column: ACCOUNT_FK,
        ref_table: "accounts",
        ref_column: ID,
    }],
    indexes: &[IndexDescriptor {
        name: "recoverycode_code",
        columns: &["code"],
        unique: true,
    }],
    edges: &[&RECOVERY_CODE_ACCOUNT],
};

pub static ACCESS_KEYS: TableDescriptor = TableDescriptor {
    name: "access_keys",
    label: "access_key",
    columns: &[
        ID_COLUMN,
        ColumnDescriptor::new("did", ColumnType::String).unique(),
        ColumnDescriptor::new("body", ColumnType::Json),
        FK_COLUMN,
    ],
    foreign_keys: &[ForeignKeyDescriptor {
        symbol: "access_keys_accounts_access_keys",
        column: ACCOUNT_FK,
        ref_table: "accounts",
        ref_column: ID,
    }],
    indexes: &[IndexDescriptor {
        name: "accesskey_did",
        columns: &["did"],
        unique: true,
    }],
    edges: &[&ACCESS_KEY_ACCOUNT],
};

const ENCRYPTED_COLUMNS: &[ColumnDescriptor] = &[
    ID_COLUMN,
    ColumnDescriptor::new("hash", ColumnType::String).unique(),
    ColumnDescriptor::new("level", ColumnType::Int32),
    ColumnDescriptor::new("encrypted_id", ColumnType::String),
    ColumnDescriptor::new("encrypted_body", ColumnType::String),
    FK_COLUMN,
];

pub static IDENTITIES: TableDescriptor = TableDescriptor {
    name: "identities",
    label: "identity",
    columns: ENCRYPTED_COLUMNS,
    foreign_keys: &[ForeignKeyDescriptor {
        symbol: "identities_accounts_identities",
        column: ACCOUNT_FK,
        ref_table: "accounts",
        ref_column: ID,
    }],
    indexes: &[IndexDescriptor {
        name: "identity_hash",
        columns: &["hash"],
        unique: true,
    }],
    edges: &[&IDENTITY_ACCOUNT],
};

pub static LOCKERS: TableDescriptor = TableDescriptor {
    name: "lockers",
    label: "locker",
    columns: ENCRYPTED_COLUMNS,
    foreign_keys: &[ForeignKeyDescriptor {
        symbol: "lockers_accounts_lockers",
        column: ACCOUNT_FK,
        ref_table: "accounts",
        ref_column: ID,
    }],
    indexes: &[IndexDescriptor {
        name: "locker_hash",
        columns: &["hash"],
        unique: true,
    }],
    edges: &[&LOCKER_ACCOUNT],
};

pub static PROPERTIES: TableDescriptor = TableDescriptor {
    name: "properties",
    label: "property",
    columns: ENCRYPTED_COLUMNS,
    foreign_keys: &[ForeignKeyDescriptor {
        symbol: "properties_accounts_properties",
        column: ACCOUNT_FK,
        ref_table: "accounts",
        ref_column: ID,
    }],
    indexes: &[IndexDescriptor {
        name: "property_hash",
        columns: &["hash"],
        unique: true,
    }],
    edges: &[&PROPERTY_ACCOUNT],
};

pub static DID_DOCUMENTS: TableDescriptor = TableDescriptor {
    name: "did_documents",
    label: "did",
    columns: &[
        ID_COLUMN,
        ColumnDescriptor::new("did", ColumnType::String).unique(),
        ColumnDescriptor::new("body", ColumnType::Json),
    ],
    foreign_keys: &[],
    indexes: &[IndexDescriptor {
        name: "did_did",
        columns: &["did"],
        unique: true,
    }],
    edges: &[],
};

/// Every table, parents before children
pub static TABLES: [&TableDescriptor; 7] = [
    &ACCOUNTS,
    &ACCESS_KEYS,
    &DID_DOCUMENTS,
    &IDENTITIES,
    &LOCKERS,
    &PROPERTIES,
    &RECOVERY_CODES,
];

/// Full DDL for the declared schema, one statement per line
pub fn ddl() -> String {
    let mut statements = Vec::new();
    for table in TABLES.iter() {
        statements.push(table.create_table_sql());
        statements.extend(table.create_index_sql());
    }
    statements
        .into_iter()
        .map(|s| format!("{};", s))
        .collect::<Vec<_>>()
        .join("\n")
}

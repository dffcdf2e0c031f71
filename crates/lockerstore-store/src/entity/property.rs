//! Encrypted per-account properties

encrypted_entity! {
    Property,
    table: crate::schema::PROPERTIES,
    edge: crate::schema::PROPERTY_ACCOUNT,
    inverse: crate::schema::ACCOUNT_PROPERTIES,
}

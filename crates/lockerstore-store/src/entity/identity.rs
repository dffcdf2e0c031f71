//! Cryptographic identities held by an account

encrypted_entity! {
    /// An identity; `encrypted_id` and `encrypted_body` are opaque ciphertext
    Identity,
    table: crate::schema::IDENTITIES,
    edge: crate::schema::IDENTITY_ACCOUNT,
    inverse: crate::schema::ACCOUNT_IDENTITIES,
}

//! Encrypted sharing containers

encrypted_entity! {
    /// A locker owned by an account
    Locker,
    table: crate::schema::LOCKERS,
    edge: crate::schema::LOCKER_ACCOUNT,
    inverse: crate::schema::ACCOUNT_LOCKERS,
}

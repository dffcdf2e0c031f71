use lockerstore_core::{StoreError, StoreErrorKind};

#[test]
fn test_kind_codes_are_stable() {
    let kinds = [
        (StoreErrorKind::Validation, "ERR_VALIDATION"),
        (StoreErrorKind::NotFound, "ERR_NOT_FOUND"),
        (StoreErrorKind::NotSingular, "ERR_NOT_SINGULAR"),
        (StoreErrorKind::Constraint, "ERR_CONSTRAINT"),
        (StoreErrorKind::NotLoaded, "ERR_NOT_LOADED"),
        (StoreErrorKind::NotInTransaction, "ERR_NOT_IN_TRANSACTION"),
        (StoreErrorKind::Cancelled, "ERR_CANCELLED"),
    ];

    for (kind, code) in kinds {
        assert_eq!(kind.code(), code);
    }
}

#[test]
fn test_not_found_and_not_singular_are_distinct() {
    let missing = StoreError::not_found("locker");
    let many = StoreError::not_singular("locker");

    assert!(missing.is_not_found());
    assert!(!missing.is_not_singular());
    assert!(many.is_not_singular());
    assert_eq!(missing.label(), many.label());
}

#[test]
fn test_not_loaded_names_the_edge() {
    let err = StoreError::not_loaded("identities");
    assert!(err.is_not_loaded());
    assert_eq!(err.field(), Some("identities"));
    assert!(err.to_string().contains("identities"));
}

#[test]
fn test_validation_names_field() {
    let err = StoreError::validation("encrypted_body", "missing required field");
    assert_eq!(err.kind(), StoreErrorKind::Validation);
    assert_eq!(err.field(), Some("encrypted_body"));
}

#[test]
fn test_deadline_counts_as_cancellation() {
    assert!(StoreError::deadline_exceeded().is_cancelled());
    assert!(StoreError::cancelled().is_cancelled());
    assert!(!StoreError::not_in_transaction().is_cancelled());
}

pub mod account;
pub mod did;
pub mod migrate;
pub mod schema;
pub mod stats;

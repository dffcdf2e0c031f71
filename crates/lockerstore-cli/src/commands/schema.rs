//! Print the DDL generated from the schema descriptors

pub fn execute() -> anyhow::Result<()> {
    println!("{}", lockerstore_store::schema::ddl());
    Ok(())
}

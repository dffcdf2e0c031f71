//! Incremental SQL text plus positional arguments

use rusqlite::types::Value;

/// SQLite's default cap on bound parameters per statement
pub(crate) const MAX_BIND_PARAMS: usize = 32766;

/// Ids bound per `IN (...)` list when a set is split across statements
pub(crate) const ID_CHUNK: usize = 1000;

/// Rows per multi-row INSERT
pub(crate) const INSERT_CHUNK: usize = 500;

#[derive(Debug, Default)]
pub(crate) struct SqlBuilder {
    sql: String,
    args: Vec<Value>,
}

impl SqlBuilder {
    pub(crate) fn new(head: &str) -> Self {
        Self {
            sql: head.to_string(),
            args: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    /// One `?` bound to `value`
    pub(crate) fn arg(&mut self, value: Value) -> &mut Self {
        self.sql.push('?');
        self.args.push(value);
        self
    }

    /// A comma-separated run of placeholders
    pub(crate) fn args(&mut self, values: impl IntoIterator<Item = Value>) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.arg(value);
        }
        self
    }

    pub(crate) fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_are_positional() {
        let mut b = SqlBuilder::new("SELECT * FROM t WHERE id IN (");
        b.args([Value::Integer(1), Value::Integer(2)]).push(")");
        let (sql, args) = b.finish();
        assert_eq!(sql, "SELECT * FROM t WHERE id IN (?, ?)");
        assert_eq!(args.len(), 2);
    }
}

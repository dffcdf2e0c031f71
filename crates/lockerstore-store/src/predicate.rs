//! Composable predicates over entity columns and edges
//!
//! A `Predicate<E>` is an untyped expression tree tagged with the entity it
//! filters. Column names are checked against the table descriptor before any
//! SQL is produced; edge predicates compile to `IN (SELECT ...)` subqueries.

use crate::record::IntoValue;
use crate::schema::{quote, EdgeDescriptor, EdgeKind, TableDescriptor, ID};
use crate::sql::SqlBuilder;
use lockerstore_core::Result;
use rusqlite::types::Value;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    fn sql(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Neq => "<>",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Cmp {
        column: String,
        op: CmpOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Null {
        column: String,
        negated: bool,
    },
    Contains {
        column: String,
        needle: String,
        fold: bool,
    },
    Glob {
        column: String,
        pattern: String,
    },
    EqualFold {
        column: String,
        value: String,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    /// `outer IN (SELECT inner FROM target WHERE inner IS NOT NULL AND filter)`,
    /// guarded by `outer IS NOT NULL` when `outer` is a foreign key
    Edge {
        outer: &'static str,
        target: &'static TableDescriptor,
        inner: &'static str,
        filter: Option<Box<Node>>,
    },
}

impl Node {
    /// Reject unknown columns before SQL generation
    pub(crate) fn validate(&self, table: &'static TableDescriptor) -> Result<()> {
        match self {
            Node::Cmp { column, .. }
            | Node::In { column, .. }
            | Node::Null { column, .. }
            | Node::Contains { column, .. }
            | Node::Glob { column, .. }
            | Node::EqualFold { column, .. } => table.validate_column(column).map(|_| ()),
            Node::And(nodes) | Node::Or(nodes) => {
                nodes.iter().try_for_each(|n| n.validate(table))
            }
            Node::Not(node) => node.validate(table),
            Node::Edge { filter, target, .. } => match filter {
                Some(f) => f.validate(*target),
                None => Ok(()),
            },
        }
    }

    pub(crate) fn compile(&self, table: &TableDescriptor, b: &mut SqlBuilder) {
        let col = |name: &str| format!("{}.{}", quote(table.name), quote(name));
        match self {
            Node::Cmp { column, op, value } => {
                b.push(&format!("{} {} ", col(column), op.sql()));
                b.arg(value.clone());
            }
            Node::In {
                column,
                values,
                negated,
            } => {
                if values.is_empty() {
                    // IN () matches nothing, NOT IN () matches everything
                    b.push(if *negated { "1 = 1" } else { "1 = 0" });
                    return;
                }
                b.push(&format!(
                    "{} {}IN (",
                    col(column),
                    if *negated { "NOT " } else { "" }
                ));
                b.args(values.iter().cloned());
                b.push(")");
            }
            Node::Null { column, negated } => {
                b.push(&format!(
                    "{} IS {}NULL",
                    col(column),
                    if *negated { "NOT " } else { "" }
                ));
            }
            Node::Contains {
                column,
                needle,
                fold,
            } => {
                if *fold {
                    b.push(&format!("INSTR(LOWER({}), LOWER(", col(column)));
                    b.arg(Value::Text(needle.clone()));
                    b.push(")) > 0");
                } else {
                    b.push(&format!("INSTR({}, ", col(column)));
                    b.arg(Value::Text(needle.clone()));
                    b.push(") > 0");
                }
            }
            Node::Glob { column, pattern } => {
                b.push(&format!("{} GLOB ", col(column)));
                b.arg(Value::Text(pattern.clone()));
            }
            Node::EqualFold { column, value } => {
                b.push(&format!("LOWER({}) = LOWER(", col(column)));
                b.arg(Value::Text(value.clone()));
                b.push(")");
            }
            Node::And(nodes) => compile_group(nodes, "AND", "1 = 1", table, b),
            Node::Or(nodes) => compile_group(nodes, "OR", "1 = 0", table, b),
            Node::Not(node) => {
                b.push("NOT (");
                node.compile(table, b);
                b.push(")");
            }
            Node::Edge {
                outer,
                target,
                inner,
                filter,
            } => {
                let inner_col = format!("{}.{}", quote(target.name), quote(inner));
                if *outer != ID {
                    // A NULL foreign key must stay false under NOT
                    b.push(&format!("{} IS NOT NULL AND ", col(outer)));
                }
                b.push(&format!(
                    "{} IN (SELECT {} FROM {} WHERE {} IS NOT NULL",
                    col(outer),
                    inner_col,
                    quote(target.name),
                    inner_col
                ));
                if let Some(filter) = filter {
                    b.push(" AND (");
                    filter.compile(target, b);
                    b.push(")");
                }
                b.push(")");
            }
        }
    }
}

/// Conjunction of `nodes`, as used by WHERE clauses
pub(crate) fn compile_all(nodes: &[Node], table: &TableDescriptor, b: &mut SqlBuilder) {
    compile_group(nodes, "AND", "1 = 1", table, b);
}

fn compile_group(
    nodes: &[Node],
    joiner: &str,
    empty: &str,
    table: &TableDescriptor,
    b: &mut SqlBuilder,
) {
    if nodes.is_empty() {
        b.push(empty);
        return;
    }
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            b.push(&format!(" {} ", joiner));
        }
        b.push("(");
        node.compile(table, b);
        b.push(")");
    }
}

/// Escape GLOB metacharacters so the input matches literally
fn glob_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '*' | '?' | '[' => {
                out.push('[');
                out.push(ch);
                out.push(']');
            }
            _ => out.push(ch),
        }
    }
    out
}

/// A filter over entity `E`
pub struct Predicate<E> {
    pub(crate) node: Node,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Predicate<E> {
    fn clone(&self) -> Self {
        Self::from_node(self.node.clone())
    }
}

impl<E> std::fmt::Debug for Predicate<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Predicate").field(&self.node).finish()
    }
}

impl<E> Predicate<E> {
    pub(crate) fn from_node(node: Node) -> Self {
        Self {
            node,
            _entity: PhantomData,
        }
    }

    /// All of `preds`; an empty list matches everything
    pub fn and_all(preds: impl IntoIterator<Item = Predicate<E>>) -> Self {
        Self::from_node(Node::And(preds.into_iter().map(|p| p.node).collect()))
    }

    /// Any of `preds`; an empty list matches nothing
    pub fn or_any(preds: impl IntoIterator<Item = Predicate<E>>) -> Self {
        Self::from_node(Node::Or(preds.into_iter().map(|p| p.node).collect()))
    }

    pub fn and(self, other: Predicate<E>) -> Self {
        Self::and_all([self, other])
    }

    pub fn or(self, other: Predicate<E>) -> Self {
        Self::or_any([self, other])
    }

    /// Equality on a column named at runtime
    ///
    /// The name is validated when the query or mutation runs.
    pub fn column_eq(column: &str, value: impl IntoValue) -> Self {
        Self::from_node(Node::Cmp {
            column: column.to_string(),
            op: CmpOp::Eq,
            value: value.into_value(),
        })
    }

    pub(crate) fn id_in(ids: impl IntoIterator<Item = i64>) -> Self {
        Self::column_in(ID, ids)
    }

    pub(crate) fn column_in(column: &str, ids: impl IntoIterator<Item = i64>) -> Self {
        Self::from_node(Node::In {
            column: column.to_string(),
            values: ids.into_iter().map(Value::Integer).collect(),
            negated: false,
        })
    }

    /// Edge existence, optionally restricted by a filter on the far side
    pub(crate) fn edge<T>(edge: &'static EdgeDescriptor, filter: Vec<Predicate<T>>) -> Self {
        let (outer, inner) = match edge.kind {
            EdgeKind::OneToMany => (ID, edge.column),
            EdgeKind::ManyToOne => (edge.column, ID),
        };
        let filter = if filter.is_empty() {
            None
        } else {
            Some(Box::new(Node::And(filter.into_iter().map(|p| p.node).collect())))
        };
        Self::from_node(Node::Edge {
            outer,
            target: edge.target,
            inner,
            filter,
        })
    }
}

impl<E> std::ops::Not for Predicate<E> {
    type Output = Predicate<E>;

    fn not(self) -> Self::Output {
        Self::from_node(Node::Not(Box::new(self.node)))
    }
}

/// A typed column handle, e.g. `account::DID`
pub struct Field<E, T> {
    name: &'static str,
    _marker: PhantomData<fn() -> (E, T)>,
}

impl<E, T> Clone for Field<E, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E, T> Copy for Field<E, T> {}

impl<E, T> std::fmt::Debug for Field<E, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Field({})", self.name)
    }
}

impl<E, T> Field<E, T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_nil(&self) -> Predicate<E> {
        Predicate::from_node(Node::Null {
            column: self.name.to_string(),
            negated: false,
        })
    }

    pub fn not_nil(&self) -> Predicate<E> {
        Predicate::from_node(Node::Null {
            column: self.name.to_string(),
            negated: true,
        })
    }

    pub fn asc(&self) -> crate::query::Order {
        crate::query::Order::asc(self.name)
    }

    pub fn desc(&self) -> crate::query::Order {
        crate::query::Order::desc(self.name)
    }
}

impl<E, T: IntoValue> Field<E, T> {
    fn cmp(&self, op: CmpOp, value: T) -> Predicate<E> {
        Predicate::from_node(Node::Cmp {
            column: self.name.to_string(),
            op,
            value: value.into_value(),
        })
    }

    fn membership(&self, values: impl IntoIterator<Item = T>, negated: bool) -> Predicate<E> {
        Predicate::from_node(Node::In {
            column: self.name.to_string(),
            values: values.into_iter().map(IntoValue::into_value).collect(),
            negated,
        })
    }

    pub fn eq(&self, value: impl Into<T>) -> Predicate<E> {
        self.cmp(CmpOp::Eq, value.into())
    }

    pub fn neq(&self, value: impl Into<T>) -> Predicate<E> {
        self.cmp(CmpOp::Neq, value.into())
    }

    pub fn gt(&self, value: impl Into<T>) -> Predicate<E> {
        self.cmp(CmpOp::Gt, value.into())
    }

    pub fn gte(&self, value: impl Into<T>) -> Predicate<E> {
        self.cmp(CmpOp::Gte, value.into())
    }

    pub fn lt(&self, value: impl Into<T>) -> Predicate<E> {
        self.cmp(CmpOp::Lt, value.into())
    }

    pub fn lte(&self, value: impl Into<T>) -> Predicate<E> {
        self.cmp(CmpOp::Lte, value.into())
    }

    /// An empty set matches nothing
    pub fn in_<I, V>(&self, values: I) -> Predicate<E>
    where
        I: IntoIterator<Item = V>,
        V: Into<T>,
    {
        self.membership(values.into_iter().map(Into::into), false)
    }

    pub fn not_in<I, V>(&self, values: I) -> Predicate<E>
    where
        I: IntoIterator<Item = V>,
        V: Into<T>,
    {
        self.membership(values.into_iter().map(Into::into), true)
    }
}

impl<E> Field<E, String> {
    pub fn contains(&self, needle: impl Into<String>) -> Predicate<E> {
        Predicate::from_node(Node::Contains {
            column: self.name.to_string(),
            needle: needle.into(),
            fold: false,
        })
    }

    pub fn contains_fold(&self, needle: impl Into<String>) -> Predicate<E> {
        Predicate::from_node(Node::Contains {
            column: self.name.to_string(),
            needle: needle.into(),
            fold: true,
        })
    }

    pub fn has_prefix(&self, prefix: impl AsRef<str>) -> Predicate<E> {
        Predicate::from_node(Node::Glob {
            column: self.name.to_string(),
            pattern: format!("{}*", glob_escape(prefix.as_ref())),
        })
    }

    pub fn has_suffix(&self, suffix: impl AsRef<str>) -> Predicate<E> {
        Predicate::from_node(Node::Glob {
            column: self.name.to_string(),
            pattern: format!("*{}", glob_escape(suffix.as_ref())),
        })
    }

    pub fn equal_fold(&self, value: impl Into<String>) -> Predicate<E> {
        Predicate::from_node(Node::EqualFold {
            column: self.name.to_string(),
            value: value.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ACCOUNTS, IDENTITIES};

    struct Dummy;

    const DID: Field<Dummy, String> = Field::new("did");
    const ID_FIELD: Field<Dummy, i64> = Field::new("id");

    fn render(p: &Predicate<Dummy>, table: &TableDescriptor) -> (String, Vec<Value>) {
        let mut b = SqlBuilder::default();
        p.node.compile(table, &mut b);
        b.finish()
    }

    #[test]
    fn test_eq_is_table_qualified() {
        let (sql, args) = render(&DID.eq("did:a"), &ACCOUNTS);
        assert_eq!(sql, "\"accounts\".\"did\" = ?");
        assert_eq!(args, vec![Value::Text("did:a".into())]);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let (sql, args) = render(&ID_FIELD.in_(Vec::<i64>::new()), &ACCOUNTS);
        assert_eq!(sql, "1 = 0");
        assert!(args.is_empty());
    }

    #[test]
    fn test_prefix_escapes_glob_metacharacters() {
        let (_, args) = render(&DID.has_prefix("did:*x"), &ACCOUNTS);
        assert_eq!(args, vec![Value::Text("did:[*]x*".into())]);
    }

    #[test]
    fn test_not_and_or_nest() {
        let p = !(DID.eq("a").or(DID.eq("b")));
        let (sql, _) = render(&p, &ACCOUNTS);
        assert_eq!(
            sql,
            "NOT ((\"accounts\".\"did\" = ?) OR (\"accounts\".\"did\" = ?))"
        );
    }

    #[test]
    fn test_edge_compiles_to_subquery() {
        let edge = ACCOUNTS.edge("identities").unwrap();
        let p: Predicate<Dummy> = Predicate::edge::<Dummy>(edge, vec![]);
        let (sql, _) = render(&p, &ACCOUNTS);
        assert_eq!(
            sql,
            "\"accounts\".\"id\" IN (SELECT \"identities\".\"account\" FROM \"identities\" WHERE \"identities\".\"account\" IS NOT NULL)"
        );
    }

    #[test]
    fn test_negated_many_to_one_edge_matches_orphans() {
        let edge = IDENTITIES.edge("account").unwrap();
        let p: Predicate<Dummy> = !Predicate::edge::<Dummy>(edge, vec![]);
        let (sql, _) = render(&p, &IDENTITIES);
        assert_eq!(
            sql,
            "NOT (\"identities\".\"account\" IS NOT NULL AND \"identities\".\"account\" IN (SELECT \"accounts\".\"id\" FROM \"accounts\" WHERE \"accounts\".\"id\" IS NOT NULL))"
        );
    }

    #[test]
    fn test_unknown_column_fails_validation() {
        let p: Predicate<Dummy> = Predicate::column_eq("nope", 1i64);
        assert!(p.node.validate(&ACCOUNTS).unwrap_err().is_validation());

        let edge = IDENTITIES.edge("account").unwrap();
        let nested: Predicate<Dummy> =
            Predicate::edge(edge, vec![Predicate::<Dummy>::column_eq("nope", 1i64)]);
        assert!(nested.node.validate(&IDENTITIES).is_err());
    }
}

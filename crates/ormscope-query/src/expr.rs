//! SQL expression tree.
//!
//! Expressions reference real [`Column`] objects rather than names, so the
//! compiler can reach each column's type engine and so compiled statements
//! can report which column produced each result slot.

use crate::schema::Column;
use crate::types::TypeRef;
use ormscope_core::Value;
use std::sync::Arc;

/// A bound parameter.
///
/// Named binds (`:x` in an INSERT) keep their key as the rendered name.
/// Anonymous binds get a per-compilation unique name derived from their key,
/// such as `y_2`.
#[derive(Debug, Clone)]
pub struct BindParam {
    key: String,
    value: Option<Value>,
    type_: Option<TypeRef>,
    unique: bool,
    expanded: bool,
}

impl BindParam {
    /// A named bind. Its value comes from the execution parameters unless
    /// one is attached with [`BindParam::with_value`].
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            type_: None,
            unique: false,
            expanded: false,
        }
    }

    /// An anonymous bind carrying its own value.
    pub fn anonymous(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            type_: None,
            unique: true,
            expanded: false,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_type(mut self, type_: TypeRef) -> Self {
        self.type_ = Some(type_);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn type_engine(&self) -> Option<&TypeRef> {
        self.type_.as_ref()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether the type's bind expression has already been applied.
    pub(crate) fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub(crate) fn expanded(mut self) -> Self {
        self.expanded = true;
        self
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// LIKE
    Like,
    /// Logical AND
    And,
    /// Logical OR
    Or,
    /// String concatenation (||)
    Concat,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Like => "LIKE",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Concat => "||",
        }
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// A SQL expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Reference to a table column
    Column(Arc<Column>),

    /// Bound parameter
    BindParam(BindParam),

    /// Untyped literal, rendered as an anonymous bind
    Literal(Value),

    /// Function call, e.g. `lower(x)`
    Function { name: String, args: Vec<Expr> },

    /// `expr AS name`
    Label { name: String, expr: Box<Expr> },

    /// Binary operation
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// expr IS [NOT] NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// SQL text inserted verbatim
    Raw(String),
}

impl Expr {
    /// Reference a column.
    pub fn col(column: &Arc<Column>) -> Self {
        Expr::Column(Arc::clone(column))
    }

    /// A named bind parameter.
    pub fn bind(key: impl Into<String>) -> Self {
        Expr::BindParam(BindParam::new(key))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// Build a binary expression.
    ///
    /// A literal compared against a column becomes an anonymous bind typed
    /// with the column's type engine, so the column's bind expression wraps
    /// it when compiled.
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        let (left, right) = match (left, right) {
            (Expr::Column(c), Expr::Literal(v)) => {
                let bind = typed_bind(&c, v);
                (Expr::Column(c), bind)
            }
            (Expr::Literal(v), Expr::Column(c)) => {
                let bind = typed_bind(&c, v);
                (bind, Expr::Column(c))
            }
            pair => pair,
        };
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Eq, other.into())
    }

    pub fn ne(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Ne, other.into())
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Lt, other.into())
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Le, other.into())
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Gt, other.into())
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Ge, other.into())
    }

    pub fn like(self, pattern: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Like, pattern.into())
    }

    pub fn concat(self, other: impl Into<Expr>) -> Self {
        Self::binary(self, BinaryOp::Concat, other.into())
    }

    pub fn and(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Or, other)
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// Give this expression a name in a SELECT list.
    pub fn label(self, name: impl Into<String>) -> Self {
        Expr::Label {
            name: name.into(),
            expr: Box::new(self),
        }
    }

    pub fn asc(self) -> OrderBy {
        OrderBy {
            expr: self,
            descending: false,
        }
    }

    pub fn desc(self) -> OrderBy {
        OrderBy {
            expr: self,
            descending: true,
        }
    }

    /// AND together a list of conditions; `None` when the list is empty.
    pub fn all(conditions: impl IntoIterator<Item = Expr>) -> Option<Self> {
        conditions.into_iter().reduce(Expr::and)
    }

    /// The column this expression ultimately refers to, looking through
    /// labels and single-column function calls.
    pub fn underlying_column(&self) -> Option<&Arc<Column>> {
        match self {
            Expr::Column(c) => Some(c),
            Expr::Label { expr, .. } => expr.underlying_column(),
            Expr::Function { args, .. } => {
                let mut cols = args.iter().filter_map(Expr::underlying_column);
                match (cols.next(), cols.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Visit every column referenced by this expression.
    pub(crate) fn for_each_column(&self, f: &mut impl FnMut(&Arc<Column>)) {
        match self {
            Expr::Column(c) => f(c),
            Expr::Function { args, .. } => args.iter().for_each(|a| a.for_each_column(f)),
            Expr::Label { expr, .. } | Expr::Not(expr) | Expr::IsNull { expr, .. } => {
                expr.for_each_column(f);
            }
            Expr::Binary { left, right, .. } => {
                left.for_each_column(f);
                right.for_each_column(f);
            }
            Expr::BindParam(_) | Expr::Literal(_) | Expr::Raw(_) => {}
        }
    }
}

fn typed_bind(column: &Arc<Column>, value: Value) -> Expr {
    Expr::BindParam(
        BindParam::anonymous(column.key(), value).with_type(Arc::clone(column.type_engine())),
    )
}

impl From<Arc<Column>> for Expr {
    fn from(column: Arc<Column>) -> Self {
        Expr::Column(column)
    }
}

impl From<&Arc<Column>> for Expr {
    fn from(column: &Arc<Column>) -> Self {
        Expr::col(column)
    }
}

impl From<BindParam> for Expr {
    fn from(bind: BindParam) -> Self {
        Expr::BindParam(bind)
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal(Value::from(value))
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(Value::Text(value))
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::Literal(Value::Int(value))
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Literal(Value::BigInt(value))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Literal(Value::Double(value))
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal(Value::Bool(value))
    }
}

/// An ORDER BY term.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

impl From<Expr> for OrderBy {
    fn from(expr: Expr) -> Self {
        expr.asc()
    }
}

impl From<&Arc<Column>> for OrderBy {
    fn from(column: &Arc<Column>) -> Self {
        Expr::col(column).asc()
    }
}

/// Expression builders available directly on columns.
///
/// ```ignore
/// select(&table).where_(table.c()["y"].eq("hi"))
/// ```
pub trait ColumnExpr {
    fn expr(&self) -> Expr;

    fn eq(&self, other: impl Into<Expr>) -> Expr {
        self.expr().eq(other)
    }

    fn ne(&self, other: impl Into<Expr>) -> Expr {
        self.expr().ne(other)
    }

    fn lt(&self, other: impl Into<Expr>) -> Expr {
        self.expr().lt(other)
    }

    fn le(&self, other: impl Into<Expr>) -> Expr {
        self.expr().le(other)
    }

    fn gt(&self, other: impl Into<Expr>) -> Expr {
        self.expr().gt(other)
    }

    fn ge(&self, other: impl Into<Expr>) -> Expr {
        self.expr().ge(other)
    }

    fn like(&self, pattern: impl Into<Expr>) -> Expr {
        self.expr().like(pattern)
    }

    fn is_null(&self) -> Expr {
        self.expr().is_null()
    }

    fn is_not_null(&self) -> Expr {
        self.expr().is_not_null()
    }

    fn label(&self, name: impl Into<String>) -> Expr {
        self.expr().label(name)
    }

    fn asc(&self) -> OrderBy {
        self.expr().asc()
    }

    fn desc(&self) -> OrderBy {
        self.expr().desc()
    }
}

impl ColumnExpr for Arc<Column> {
    fn expr(&self) -> Expr {
        Expr::col(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func;
    use crate::schema::{Table, column};
    use crate::types::StringType;

    fn table() -> Table {
        Table::new(
            "t",
            [column("x", StringType::new()), column("y", StringType::new())],
        )
    }

    #[test]
    fn literal_against_column_becomes_typed_anonymous_bind() {
        let t = table();
        match t.c()["y"].eq("hi") {
            Expr::Binary { left, op, right } => {
                assert_eq!(op, BinaryOp::Eq);
                assert!(matches!(*left, Expr::Column(_)));
                let Expr::BindParam(bind) = *right else {
                    panic!("expected bind");
                };
                assert_eq!(bind.key(), "y");
                assert!(bind.is_unique());
                assert!(bind.type_engine().is_some());
                assert_eq!(bind.value(), Some(&Value::from("hi")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reversed_comparison_is_also_typed() {
        let t = table();
        let e = Expr::literal("hi").eq(&t.c()["x"]);
        let Expr::Binary { left, .. } = e else {
            panic!("expected binary");
        };
        assert!(matches!(*left, Expr::BindParam(_)));
    }

    #[test]
    fn underlying_column_sees_through_labels_and_functions() {
        let t = table();
        let y = &t.c()["y"];
        let e = func::lower(y).label("yy");
        assert!(Arc::ptr_eq(e.underlying_column().unwrap(), y));
        assert!(
            func::call("coalesce", [t.c()["x"].expr(), y.expr()])
                .underlying_column()
                .is_none()
        );
    }

    #[test]
    fn all_combines_with_and() {
        let t = table();
        assert!(Expr::all(Vec::new()).is_none());
        let e = Expr::all([t.c()["x"].eq("a"), t.c()["y"].eq("b")]).unwrap();
        assert!(matches!(
            e,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }
}

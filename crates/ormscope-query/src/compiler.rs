//! Statement compiler.
//!
//! Turns statements into SQL text, an ordered list of bind parameters and a
//! result map. Type engines get their say here: bind expressions wrap
//! parameters destined for typed columns, column expressions wrap column
//! references in SELECT lists and RETURNING clauses.

use crate::expr::{BinaryOp, BindParam, Expr, OrderBy};
use crate::params::Params;
use crate::schema::Column;
use crate::types::TypeRef;
use ormscope_core::{CompileErrorKind, Dialect, Error, Result, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A bind parameter as it appears in compiled SQL.
#[derive(Debug, Clone)]
pub struct CompiledBind {
    /// Rendered name, e.g. `y` or `y_2`.
    pub name: String,
    /// Key the bind was declared with.
    pub key: String,
    /// Value attached at construction time, if any.
    pub value: Option<Value>,
    pub type_: Option<TypeRef>,
}

/// One slot of a statement's result.
///
/// `objects` lists everything the slot can be addressed by: the label
/// element (if any), the type's column expression (if any), and the original
/// column last.
#[derive(Debug, Clone)]
pub struct ResultColumn {
    pub name: String,
    pub objects: Vec<Expr>,
    pub type_: Option<TypeRef>,
}

impl ResultColumn {
    /// The original column this slot was produced from.
    pub fn column(&self) -> Option<&Arc<Column>> {
        match self.objects.last() {
            Some(Expr::Column(c)) => Some(c),
            _ => None,
        }
    }

    /// Whether `column` is one of this slot's objects.
    pub fn targets(&self, column: &Arc<Column>) -> bool {
        self.objects
            .iter()
            .any(|o| matches!(o, Expr::Column(c) if Arc::ptr_eq(c, column)))
    }
}

/// What kind of statement was compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Text,
}

/// A compiled statement.
#[derive(Debug, Clone)]
pub struct Compiled {
    sql: String,
    binds: Vec<CompiledBind>,
    result_map: Arc<[ResultColumn]>,
    dialect: Dialect,
    kind: StatementKind,
    returns_rows: bool,
}

impl Compiled {
    pub(crate) fn text(sql: String, returns_rows: bool, dialect: Dialect) -> Self {
        Self {
            sql,
            binds: Vec::new(),
            result_map: Arc::from(Vec::new()),
            dialect,
            kind: StatementKind::Text,
            returns_rows,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind parameters in order of appearance.
    pub fn binds(&self) -> &[CompiledBind] {
        &self.binds
    }

    pub fn bind_names(&self) -> Vec<&str> {
        self.binds.iter().map(|b| b.name.as_str()).collect()
    }

    /// Result slots in position order.
    pub fn result_map(&self) -> &[ResultColumn] {
        &self.result_map
    }

    pub(crate) fn shared_result_map(&self) -> Arc<[ResultColumn]> {
        Arc::clone(&self.result_map)
    }

    /// The result slot with the given name.
    pub fn result_column(&self, name: &str) -> Option<&ResultColumn> {
        self.result_map.iter().find(|r| r.name == name)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Whether executing this statement produces rows.
    pub fn returns_rows(&self) -> bool {
        self.returns_rows
    }

    /// Resolve bind values for one execution, in placeholder order.
    ///
    /// Execution parameters override values attached to the binds; a bind
    /// with neither is a `MissingParameter` error. Each value goes through
    /// its type's bind processing.
    pub fn construct_params(&self, params: Option<&Params>) -> Result<Vec<Value>> {
        if self.kind == StatementKind::Text {
            return Ok(params.map(|p| p.values().cloned().collect()).unwrap_or_default());
        }
        self.binds
            .iter()
            .map(|bind| {
                let value = params
                    .and_then(|p| p.get(&bind.name))
                    .cloned()
                    .or_else(|| bind.value.clone())
                    .ok_or_else(|| {
                        Error::compile(
                            CompileErrorKind::MissingParameter,
                            format!("A value is required for bind parameter '{}'", bind.name),
                        )
                    })?;
                Ok(match &bind.type_ {
                    Some(ty) => ty.process_bind_value(value),
                    None => value,
                })
            })
            .collect()
    }
}

impl fmt::Display for Compiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Render a standalone expression with qualified column names.
pub fn compile_expr(expr: &Expr, dialect: Dialect) -> String {
    SqlCompiler::new(dialect).expr(expr, true)
}

/// How SELECT-list elements are labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Labels {
    /// Plain columns keep their name; transformed columns get `name_N`.
    Anonymous,
    /// Every column is labelled `table_column`.
    Qualified,
}

/// Per-statement compilation state.
pub(crate) struct SqlCompiler {
    dialect: Dialect,
    binds: Vec<CompiledBind>,
    anon_counters: HashMap<String, usize>,
    result_map: Vec<ResultColumn>,
}

impl SqlCompiler {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            binds: Vec::new(),
            anon_counters: HashMap::new(),
            result_map: Vec::new(),
        }
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Next anonymous name for `base`. The counter is shared by labels and
    /// binds, so `y_1` and `y_2` never collide within one statement.
    fn anon_name(&mut self, base: &str) -> String {
        let n = self.anon_counters.entry(base.to_string()).or_insert(0);
        *n += 1;
        format!("{base}_{n}")
    }

    pub(crate) fn ident(&self, name: &str) -> String {
        self.dialect.format_identifier(name)
    }

    fn column_ref(&self, column: &Column, qualify: bool) -> String {
        if qualify {
            format!(
                "{}.{}",
                self.ident(column.table_name()),
                self.ident(column.name())
            )
        } else {
            self.ident(column.name())
        }
    }

    /// Render an expression. Column expressions of types are not applied
    /// here; that only happens for result columns.
    pub(crate) fn expr(&mut self, expr: &Expr, qualify: bool) -> String {
        match expr {
            Expr::Column(c) => self.column_ref(c, qualify),
            Expr::BindParam(bind) => self.bind(bind, qualify),
            Expr::Literal(value) => {
                let bind = BindParam::anonymous("param", value.clone());
                self.bind(&bind, qualify)
            }
            Expr::Function { name, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(a, qualify)).collect();
                format!("{name}({})", args.join(", "))
            }
            Expr::Label { name, expr } => {
                let inner = self.expr(expr, qualify);
                format!("{inner} AS {}", self.ident(name))
            }
            Expr::Binary { left, op, right } => {
                let l = self.operand(left, *op, qualify);
                let r = self.operand(right, *op, qualify);
                format!("{l} {} {r}", op.as_str())
            }
            Expr::Not(inner) => {
                let inner_sql = self.expr(inner, qualify);
                if matches!(**inner, Expr::Binary { .. }) {
                    format!("NOT ({inner_sql})")
                } else {
                    format!("NOT {inner_sql}")
                }
            }
            Expr::IsNull { expr, negated } => {
                let inner = self.expr(expr, qualify);
                if *negated {
                    format!("{inner} IS NOT NULL")
                } else {
                    format!("{inner} IS NULL")
                }
            }
            Expr::Raw(sql) => sql.clone(),
        }
    }

    fn operand(&mut self, expr: &Expr, parent: BinaryOp, qualify: bool) -> String {
        let sql = self.expr(expr, qualify);
        match expr {
            Expr::Binary { op, .. } if op.is_logical() && *op != parent => format!("({sql})"),
            Expr::Binary { op, .. } if !op.is_logical() && !parent.is_logical() => {
                format!("({sql})")
            }
            _ => sql,
        }
    }

    /// Register a bind and render its placeholder, wrapped by the type's
    /// bind expression when there is one.
    pub(crate) fn bind(&mut self, bind: &BindParam, qualify: bool) -> String {
        if !bind.is_expanded() {
            if let Some(ty) = bind.type_engine() {
                let inner = Expr::BindParam(bind.clone().expanded());
                if let Some(wrapped) = ty.bind_expression(inner) {
                    return self.expr(&wrapped, qualify);
                }
            }
        }
        let name = if bind.is_unique() {
            self.anon_name(bind.key())
        } else {
            bind.key().to_string()
        };
        let placeholder = self.dialect.placeholder(self.binds.len() + 1, &name);
        tracing::trace!(bind = %name, placeholder = %placeholder, "Registered bind parameter");
        self.binds.push(CompiledBind {
            name,
            key: bind.key().to_string(),
            value: bind.value().cloned(),
            type_: bind.type_engine().cloned(),
        });
        placeholder
    }

    /// Render one element of a SELECT list or RETURNING clause and record
    /// its result slot.
    pub(crate) fn result_element(&mut self, expr: &Expr, labels: Labels, qualify: bool) -> String {
        match expr {
            Expr::Column(column) => {
                let ty = Arc::clone(column.type_engine());
                let transformed = ty.column_expression(Expr::Column(Arc::clone(column)));
                match (transformed, labels) {
                    (Some(t), labels) => {
                        let label = match labels {
                            Labels::Qualified => column.qualified_label(),
                            Labels::Anonymous => self.anon_name(column.name()),
                        };
                        let sql = format!("{} AS {}", self.expr(&t, qualify), self.ident(&label));
                        self.push_result(&label, t, column, ty);
                        sql
                    }
                    (None, Labels::Qualified) => {
                        let label = column.qualified_label();
                        let sql = format!(
                            "{} AS {}",
                            self.column_ref(column, qualify),
                            self.ident(&label)
                        );
                        self.result_map.push(ResultColumn {
                            objects: vec![
                                Expr::col(column).label(label.clone()),
                                Expr::col(column),
                            ],
                            name: label,
                            type_: Some(ty),
                        });
                        sql
                    }
                    (None, Labels::Anonymous) => {
                        self.result_map.push(ResultColumn {
                            name: column.name().to_string(),
                            objects: vec![Expr::col(column)],
                            type_: Some(ty),
                        });
                        self.column_ref(column, qualify)
                    }
                }
            }
            Expr::Label { name, expr: inner } => {
                if let Expr::Column(column) = &**inner {
                    let ty = Arc::clone(column.type_engine());
                    let t = ty
                        .column_expression(Expr::Column(Arc::clone(column)))
                        .unwrap_or_else(|| Expr::col(column));
                    let sql = format!("{} AS {}", self.expr(&t, qualify), self.ident(name));
                    if matches!(t, Expr::Column(_)) {
                        self.result_map.push(ResultColumn {
                            objects: vec![t.clone().label(name.clone()), t],
                            name: name.clone(),
                            type_: Some(ty),
                        });
                    } else {
                        self.push_result(name, t, column, ty);
                    }
                    sql
                } else {
                    let sql = format!("{} AS {}", self.expr(inner, qualify), self.ident(name));
                    self.result_map.push(ResultColumn {
                        name: name.clone(),
                        objects: vec![expr.clone(), (**inner).clone()],
                        type_: None,
                    });
                    sql
                }
            }
            other => {
                let base = match other {
                    Expr::Function { name, .. } => name.clone(),
                    _ => "anon".to_string(),
                };
                let label = self.anon_name(&base);
                let sql = format!("{} AS {}", self.expr(other, qualify), self.ident(&label));
                self.result_map.push(ResultColumn {
                    objects: vec![other.clone().label(label.clone()), other.clone()],
                    name: label,
                    type_: None,
                });
                sql
            }
        }
    }

    fn push_result(&mut self, label: &str, transformed: Expr, column: &Arc<Column>, ty: TypeRef) {
        self.result_map.push(ResultColumn {
            name: label.to_string(),
            objects: vec![
                transformed.clone().label(label.to_string()),
                transformed,
                Expr::col(column),
            ],
            type_: Some(ty),
        });
    }

    pub(crate) fn order_by(&mut self, terms: &[OrderBy], qualify: bool) -> String {
        let rendered: Vec<String> = terms
            .iter()
            .map(|term| {
                let sql = self.expr(&term.expr, qualify);
                if term.descending {
                    format!("{sql} DESC")
                } else {
                    sql
                }
            })
            .collect();
        rendered.join(", ")
    }

    pub(crate) fn finish(self, sql: String, kind: StatementKind, returns_rows: bool) -> Compiled {
        tracing::debug!(sql = %sql, binds = self.binds.len(), "Compiled statement");
        Compiled {
            sql,
            binds: self.binds,
            result_map: Arc::from(self.result_map),
            dialect: self.dialect,
            kind,
            returns_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ColumnExpr;
    use crate::func;
    use crate::schema::{Table, column};
    use crate::types::{Integer, StringType};

    fn table() -> Table {
        Table::new(
            "t",
            [column("a", Integer), column("b", StringType::new())],
        )
    }

    #[test]
    fn nested_logic_is_parenthesized() {
        let t = table();
        let e = t.c()["a"]
            .eq(1)
            .or(t.c()["a"].eq(2))
            .and(t.c()["b"].is_not_null());
        assert_eq!(
            compile_expr(&e, Dialect::Default),
            "(t.a = :a_1 OR t.a = :a_2) AND t.b IS NOT NULL"
        );
    }

    #[test]
    fn functions_and_not() {
        let t = table();
        let e = func::lower(&t.c()["b"]).like("x%").not();
        assert_eq!(
            compile_expr(&e, Dialect::Default),
            "NOT (lower(t.b) LIKE :param_1)"
        );
    }

    #[test]
    fn positional_placeholders_follow_appearance() {
        let t = table();
        let e = t.c()["a"].eq(1).and(t.c()["b"].eq("x"));
        assert_eq!(compile_expr(&e, Dialect::Sqlite), "t.a = ?1 AND t.b = ?2");
        assert_eq!(compile_expr(&e, Dialect::Postgres), "t.a = $1 AND t.b = $2");
    }

    #[test]
    fn missing_parameter_is_reported() {
        let mut compiler = SqlCompiler::new(Dialect::Sqlite);
        let sql = compiler.bind(&BindParam::new("x"), false);
        let compiled = compiler.finish(sql, StatementKind::Select, true);
        let err = compiled.construct_params(None).unwrap_err();
        assert!(matches!(
            err,
            Error::Compile(ref e) if e.kind == CompileErrorKind::MissingParameter
        ));
        let params = Params::new().with("x", 5);
        assert_eq!(
            compiled.construct_params(Some(&params)).unwrap(),
            vec![Value::Int(5)]
        );
    }
}

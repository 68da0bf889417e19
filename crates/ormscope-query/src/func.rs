//! SQL function constructors: `func::lower(col)`, `func::call("trim", [e])`.

use crate::expr::Expr;

/// Call an arbitrary SQL function.
pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Function {
        name: name.into(),
        args: args.into_iter().collect(),
    }
}

/// `lower(arg)`
pub fn lower(arg: impl Into<Expr>) -> Expr {
    call("lower", [arg.into()])
}

/// `upper(arg)`
pub fn upper(arg: impl Into<Expr>) -> Expr {
    call("upper", [arg.into()])
}

/// `count(arg)`
pub fn count(arg: impl Into<Expr>) -> Expr {
    call("count", [arg.into()])
}

/// `coalesce(a, b, ...)`
pub fn coalesce(args: impl IntoIterator<Item = Expr>) -> Expr {
    call("coalesce", args)
}

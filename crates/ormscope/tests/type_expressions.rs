use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use ormscope::prelude::*;
use ormscope::query::{Decorator, compile_expr};
use ormscope::{Row, SqlType};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// Lower-cases on the way in and on the way out.
#[derive(Debug)]
struct LowerString;

impl TypeEngine for LowerString {
    fn sql_type(&self) -> SqlType {
        SqlType::Text
    }

    fn bind_expression(&self, bind: Expr) -> Option<Expr> {
        Some(func::lower(bind))
    }

    fn column_expression(&self, column: Expr) -> Option<Expr> {
        Some(func::lower(column))
    }
}

/// Lower-cases on the way in, upper-cases on the way out.
#[derive(Debug)]
struct ShoutingString(u32);

impl TypeEngine for ShoutingString {
    fn sql_type(&self) -> SqlType {
        SqlType::VarChar(self.0)
    }

    fn bind_expression(&self, bind: Expr) -> Option<Expr> {
        Some(func::lower(bind))
    }

    fn column_expression(&self, column: Expr) -> Option<Expr> {
        Some(func::upper(column))
    }
}

/// The same coercion as [`ShoutingString`], built as a decorator.
#[derive(Debug)]
struct Shouting;

impl Decorator for Shouting {
    fn bind_expression(&self, bind: Expr) -> Option<Expr> {
        Some(func::lower(bind))
    }

    fn column_expression(&self, column: Expr) -> Option<Expr> {
        Some(func::upper(column))
    }
}

/// Lower-cases only on the way out.
#[derive(Debug)]
struct LowerOnRead(u32);

impl TypeEngine for LowerOnRead {
    fn sql_type(&self) -> SqlType {
        SqlType::VarChar(self.0)
    }

    fn column_expression(&self, column: Expr) -> Option<Expr> {
        Some(func::lower(column))
    }
}

fn compile_fixture() -> Table {
    Table::new(
        "test_table",
        [column("x", StringType::new()), column("y", LowerString)],
    )
}

#[test]
fn select_cols() {
    let table = compile_fixture();
    assert_eq!(
        select([&table]).compile(Dialect::Default).sql(),
        "SELECT test_table.x, lower(test_table.y) AS y_1 FROM test_table"
    );
}

#[test]
fn select_cols_use_labels() {
    let table = compile_fixture();
    assert_eq!(
        select([&table]).apply_labels().compile(Dialect::Default).sql(),
        "SELECT test_table.x AS test_table_x, \
         lower(test_table.y) AS test_table_y FROM test_table"
    );
}

#[test]
fn select_cols_use_labels_result_map_targeting() {
    let table = compile_fixture();
    let compiled = select([&table]).apply_labels().compile(Dialect::Default);

    let y = compiled.result_column("test_table_y").expect("y slot");
    assert!(y.targets(&table.c()["y"]));
    let x = compiled.result_column("test_table_x").expect("x slot");
    assert!(x.targets(&table.c()["x"]));

    assert_eq!(compile_expr(&y.objects[1], Dialect::Default), "lower(test_table.y)");
    assert_eq!(
        compile_expr(y.objects.last().expect("objects"), Dialect::Default),
        "test_table.y"
    );
}

#[test]
fn insert_binds() {
    let table = compile_fixture();
    assert_eq!(
        table.insert().compile(Dialect::Default).unwrap().sql(),
        "INSERT INTO test_table (x, y) VALUES (:x, lower(:y))"
    );
    assert_eq!(
        table
            .insert()
            .values([("y", "hi")])
            .compile(Dialect::Default)
            .unwrap()
            .sql(),
        "INSERT INTO test_table (y) VALUES (lower(:y))"
    );
}

#[test]
fn select_binds() {
    let table = compile_fixture();
    let stmt = select([&table]).where_(table.c()["y"].eq("hi"));
    assert_eq!(
        stmt.compile(Dialect::Default).sql(),
        "SELECT test_table.x, lower(test_table.y) AS y_1 FROM \
         test_table WHERE test_table.y = lower(:y_2)"
    );
}

#[test]
fn update_binds_and_dialect_placeholders() {
    let table = compile_fixture();
    let compiled = table
        .update()
        .value("y", "HI")
        .where_(table.c()["y"].eq("LO"))
        .compile(Dialect::Sqlite)
        .unwrap();
    assert_eq!(
        compiled.sql(),
        "UPDATE test_table SET y=lower(?1) WHERE y = lower(?2)"
    );
    assert_eq!(
        compiled.construct_params(None).unwrap(),
        vec![Value::from("HI"), Value::from("LO")]
    );

    let compiled = select([&table])
        .where_(table.c()["y"].eq("hi"))
        .compile(Dialect::Postgres);
    assert!(compiled.sql().ends_with("WHERE test_table.y = lower($1)"));
}

fn round_trip_tables() -> Vec<(&'static str, Table)> {
    vec![
        (
            "direct type",
            Table::new(
                "test_table",
                [
                    column("x", StringType::with_length(50)),
                    column("y", ShoutingString(50)),
                ],
            ),
        ),
        (
            "type decorator",
            Table::new(
                "test_table",
                [
                    column("x", StringType::with_length(50)),
                    column("y", TypeDecorator::new(Shouting, StringType::with_length(50))),
                ],
            ),
        ),
    ]
}

async fn fresh_db(cx: &Cx, table: &Table) -> SqliteConnection {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    let mut metadata = MetaData::new();
    metadata.add(table.clone());
    unwrap_outcome(metadata.create_all(cx, &conn).await);
    conn
}

fn xy(x: &str, y: &str) -> Params {
    Params::new().with("x", x).with("y", y)
}

#[test]
fn round_trip() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    for (label, table) in round_trip_tables() {
        rt.block_on(async {
            let conn = fresh_db(&cx, &table).await;
            unwrap_outcome(
                execute(
                    &cx,
                    &conn,
                    table.insert(),
                    &[xy("X1", "Y1"), xy("X2", "Y2"), xy("X3", "Y3")],
                )
                .await,
            );

            // Insert coercion alone.
            let raw = unwrap_outcome(
                conn.query(&cx, "select * from test_table order by y", &[])
                    .await,
            );
            let raw: Vec<Vec<Value>> = raw.into_iter().map(Row::into_values).collect();
            assert_eq!(
                raw,
                vec![
                    vec![Value::from("X1"), Value::from("y1")],
                    vec![Value::from("X2"), Value::from("y2")],
                    vec![Value::from("X3"), Value::from("y3")],
                ],
                "{label}"
            );

            // Conversion back to upper.
            let result = unwrap_outcome(
                execute(
                    &cx,
                    &conn,
                    select([&table]).order_by(&table.c()["y"]),
                    &[],
                )
                .await,
            );
            assert_eq!(
                result.all_values(),
                vec![
                    vec![Value::from("X1"), Value::from("Y1")],
                    vec![Value::from("X2"), Value::from("Y2")],
                    vec![Value::from("X3"), Value::from("Y3")],
                ],
                "{label}"
            );
        });
    }
}

#[test]
fn targeting_no_labels() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    for (label, table) in round_trip_tables() {
        rt.block_on(async {
            let conn = fresh_db(&cx, &table).await;
            unwrap_outcome(execute(&cx, &conn, table.insert(), &[xy("X1", "Y1")]).await);

            let result = unwrap_outcome(execute(&cx, &conn, select([&table]), &[]).await);
            let row = result.first().expect("one row");
            assert_eq!(row.column(&table.c()["y"]).unwrap(), &Value::from("Y1"), "{label}");
        });
    }
}

#[test]
fn targeting_apply_labels() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    for (label, table) in round_trip_tables() {
        rt.block_on(async {
            let conn = fresh_db(&cx, &table).await;
            unwrap_outcome(execute(&cx, &conn, table.insert(), &[xy("X1", "Y1")]).await);

            let result = unwrap_outcome(
                execute(&cx, &conn, select([&table]).apply_labels(), &[]).await,
            );
            let row = result.first().expect("one row");
            assert_eq!(row.column(&table.c()["y"]).unwrap(), &Value::from("Y1"), "{label}");
            assert_eq!(row.get_by_name("test_table_y"), Some(&Value::from("Y1")));
        });
    }
}

#[test]
fn targeting_individual_labels() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    for (label, table) in round_trip_tables() {
        rt.block_on(async {
            let conn = fresh_db(&cx, &table).await;
            unwrap_outcome(execute(&cx, &conn, table.insert(), &[xy("X1", "Y1")]).await);

            let stmt = select([
                Expr::col(&table.c()["x"]).label("xbar"),
                Expr::col(&table.c()["y"]).label("ybar"),
            ]);
            let result = unwrap_outcome(execute(&cx, &conn, stmt, &[]).await);
            let row = result.first().expect("one row");
            assert_eq!(row.column(&table.c()["y"]).unwrap(), &Value::from("Y1"), "{label}");
            assert_eq!(row.get_by_name("xbar"), Some(&Value::from("X1")));
            assert_eq!(row.get(1), Some(&Value::from("Y1")));
        });
    }
}

#[test]
fn insert_returning_applies_column_expression() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let table = Table::new(
        "test_table",
        [
            column("x", StringType::with_length(50)),
            column("y", LowerOnRead(50)).server_default("YVALUE"),
        ],
    );

    rt.block_on(async {
        let conn = fresh_db(&cx, &table).await;
        let result = unwrap_outcome(
            execute(
                &cx,
                &conn,
                table.insert().returning([&table.c()["y"]]),
                &[Params::new().with("x", "xvalue")],
            )
            .await,
        );
        assert_eq!(
            result.first().map(|row| row.to_values()),
            Some(vec![Value::from("yvalue")])
        );
    });
}

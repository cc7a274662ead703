use std::sync::Arc;

use unisql::prelude::*;
use unisql::{Driver, TransactionState};

#[derive(unisql::Model, Debug, Clone, PartialEq)]
#[unisql(table = "accounts")]
struct Account {
    id: i64,
    owner: String,
    balance: i64,
}

fn setup() -> Connection {
    let conn = Driver::embedded(&DatabaseConfig::sqlite_memory()).expect("open sqlite");
    conn.exec("CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL CHECK (balance >= 0))")
        .expect("create accounts");
    for (id, owner, balance) in [(1, "ann", 100), (2, "ben", 20)] {
        Account::create(
            &conn,
            &Account {
                id,
                owner: owner.to_string(),
                balance,
            },
        )
        .expect("seed account");
    }
    conn
}

fn transfer(conn: &Connection, from: i64, to: i64, amount: i64) -> Result<()> {
    conn.exec_with_params(
        "UPDATE accounts SET balance = balance - ? WHERE id = ?",
        &[amount.into(), from.into()],
    )?;
    conn.exec_with_params(
        "UPDATE accounts SET balance = balance + ? WHERE id = ?",
        &[amount.into(), to.into()],
    )?;
    Ok(())
}

fn balances(conn: &Connection) -> Vec<i64> {
    Account::all(conn)
        .unwrap()
        .into_iter()
        .map(|a| a.balance)
        .collect()
}

#[test]
fn sqlite_explicit_key_insert_returns_key() {
    let conn = setup();
    let carl = Account {
        id: 7,
        owner: "carl".into(),
        balance: 0,
    };
    assert_eq!(carl.insert(&conn).unwrap(), Value::Int(7));
    assert_eq!(Account::find(&conn, 7).unwrap(), Some(carl));
}

#[test]
fn sqlite_transaction_commits_on_ok() {
    let conn = setup();
    conn.transaction(|tx| transfer(tx, 1, 2, 30)).unwrap();
    assert_eq!(balances(&conn), [70, 50]);
    assert_eq!(conn.transaction_state(), TransactionState::Idle);
}

#[test]
fn sqlite_transaction_rolls_back_on_constraint_failure() {
    let conn = setup();
    let err = conn.transaction(|tx| transfer(tx, 2, 1, 500)).unwrap_err();
    assert!(matches!(err, Error::QueryFailed(_)), "{err:?}");
    assert_eq!(balances(&conn), [100, 20]);
    assert!(!conn.in_transaction());
}

#[test]
fn sqlite_manual_transaction_rollback() {
    let conn = setup();
    conn.begin_transaction().unwrap();
    assert!(matches!(
        conn.begin_transaction(),
        Err(Error::TransactionAlreadyOpen)
    ));
    transfer(&conn, 1, 2, 10).unwrap();
    conn.rollback().unwrap();
    assert_eq!(balances(&conn), [100, 20]);
    assert!(matches!(conn.commit(), Err(Error::NoActiveTransaction)));
}

#[test]
fn sqlite_scoped_connection_drives_model_calls() {
    let db = Database::from_url("sqlite::memory:").unwrap();
    db.exec("CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL)")
        .unwrap();

    let count = db.scope(|| -> Result<u64> {
        let conn = current_connection()?;
        Account::create(
            &conn,
            &Account {
                id: 1,
                owner: "dee".into(),
                balance: 5,
            },
        )?;
        Account::count(&conn)
    });
    assert_eq!(count.unwrap(), 1);
    assert!(matches!(current_connection(), Err(Error::Config(_))));
}

#[test]
fn sqlite_shared_connection_across_threads() {
    let conn = Arc::new(setup());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let conn = Arc::clone(&conn);
            std::thread::spawn(move || {
                with_connection(conn, || -> Result<()> {
                    let conn = current_connection()?;
                    Account::create(
                        &conn,
                        &Account {
                            id: 10 + i,
                            owner: format!("t{i}"),
                            balance: i,
                        },
                    )?;
                    Ok(())
                })
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(Account::count(&conn).unwrap(), 6);
}

#[test]
fn sqlite_builder_sql_runs_unchanged() {
    let conn = setup();
    let (sql, params) = QueryBuilder::table("accounts")
        .select(&["owner"])
        .where_op("balance", Op::Gt, 50)
        .order_by("owner", Direction::Asc)
        .build();
    let rows = conn.query_with_params(&sql, &params).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.first().unwrap().get_string("owner"), Some("ann"));

    let rich = QueryBuilder::table("accounts")
        .select(&["id"])
        .where_op("balance", Op::Ge, 100);
    let (sql, params) = QueryBuilder::table("accounts")
        .where_in_query("id", &rich)
        .count_sql();
    let rows = conn.query_with_params(&sql, &params).unwrap();
    assert_eq!(rows.first().unwrap().get_int("count"), Some(1));
}

#[test]
fn sqlite_closed_connection_rejects_calls() {
    let conn = setup();
    conn.close().unwrap();
    let err = Account::count(&conn).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(conn.last_insert_id(), None);
}

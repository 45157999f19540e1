//! Integration tests for child database creation

use futures::future::try_join_all;

use super::{connect, database_exists, start_pool, table_exists, temp_databases};
use crate::{ConnError, Connection, CreateChildError};

#[tokio::test]
async fn create_child_is_isolated_from_parent_and_removable() {
    //* Given
    let (_temp_db, pool) = start_pool().await;
    let parent = pool.parent().clone();

    //* When
    let child = pool
        .create_child(None)
        .await
        .expect("failed to create child");

    //* Then
    assert_eq!(child.database, "child_0");
    assert_eq!(child.host, parent.host);
    assert_eq!(child.port, parent.port);

    let mut child_conn = connect(&child).await;
    sqlx::query("CREATE TABLE users (id text PRIMARY KEY, name text NOT NULL)")
        .execute(&mut *child_conn)
        .await
        .expect("failed to create table in child");
    sqlx::query("INSERT INTO users (id, name) VALUES ('a', 'User A')")
        .execute(&mut *child_conn)
        .await
        .expect("failed to insert into child");
    let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
        .fetch_one(&mut *child_conn)
        .await
        .expect("failed to count rows in child");
    assert_eq!(rows, 1);
    child_conn.close().await.expect("failed to close child connection");

    let mut parent_conn = connect(&parent).await;
    assert!(
        !table_exists(&mut parent_conn, "users").await,
        "table created in the child must not exist in the parent"
    );
    parent_conn.close().await.expect("failed to close parent connection");

    pool.remove_child(&child)
        .await
        .expect("failed to remove child");

    let result = Connection::connect(&child, child.connect_deadline()).await;
    assert!(
        matches!(&result, Err(err @ ConnError::ConnectionError(_)) if err.is_unknown_database()),
        "connecting to a removed child should fail, got {result:?}"
    );
    assert!(!database_exists(&parent, "child_0").await);
    assert!(temp_databases(&parent).await.is_empty());
}

#[tokio::test]
async fn create_child_accepts_names_unsafe_for_interpolation() {
    //* Given
    let (_temp_db, pool) = start_pool().await;
    let name = "Child \"0\"; DROP DATABASE postgres; --";

    //* When
    let child = pool
        .create_child(Some(name))
        .await
        .expect("failed to create child with unsafe name");

    //* Then
    assert_eq!(child.database, name);
    assert!(database_exists(pool.parent(), name).await);
    assert!(database_exists(pool.parent(), "postgres").await);

    let mut conn = connect(&child).await;
    let current: String = sqlx::query_scalar("SELECT current_database()::text")
        .fetch_one(&mut *conn)
        .await
        .expect("failed to query current database");
    assert_eq!(current, name);
    conn.close().await.expect("failed to close child connection");

    pool.remove_child(&child)
        .await
        .expect("failed to remove child with unsafe name");
    assert!(!database_exists(pool.parent(), name).await);
}

#[tokio::test]
async fn create_child_with_taken_name_fails_and_drops_temp_database() {
    //* Given
    let (_temp_db, pool) = start_pool().await;
    let existing = pool
        .create_child(Some("taken"))
        .await
        .expect("failed to create first child");

    //* When
    let result = pool.create_child(Some("taken")).await;

    //* Then
    let err = result.expect_err("second child with the same name must fail");
    assert!(
        matches!(&err, CreateChildError::Rename { database, .. } if database == "taken"),
        "expected rename error, got {err:?}"
    );
    assert!(err.is_duplicate(), "expected unique violation, got {err:?}");
    assert!(err.cleanup_failure().is_none());
    assert!(
        temp_databases(pool.parent()).await.is_empty(),
        "temporary database must be dropped after a failed rename"
    );
    assert!(database_exists(pool.parent(), "taken").await);

    pool.remove_child(&existing)
        .await
        .expect("failed to remove first child");
}

#[tokio::test]
async fn concurrent_children_are_independent() {
    //* Given
    let (_temp_db, pool) = start_pool().await;
    let names = ["alpha", "beta", "gamma", "delta", "epsilon"];

    //* When
    let children = try_join_all(names.iter().map(|name| pool.create_child(Some(*name))))
        .await
        .expect("concurrent creation failed");

    //* Then
    for child in &children {
        let mut conn = connect(child).await;
        sqlx::query("CREATE TABLE users (id text PRIMARY KEY, name text NOT NULL)")
            .execute(&mut *conn)
            .await
            .expect("failed to create table");
        sqlx::query("INSERT INTO users (id, name) VALUES ($1, $2)")
            .bind(&child.database)
            .bind(child.database.to_uppercase())
            .execute(&mut *conn)
            .await
            .expect("failed to insert row");
        conn.close().await.expect("failed to close connection");
    }

    for child in &children {
        let mut conn = connect(child).await;
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, name FROM users")
            .fetch_all(&mut *conn)
            .await
            .expect("failed to read rows");
        assert_eq!(
            rows,
            vec![(child.database.clone(), child.database.to_uppercase())],
            "each child must only see its own rows"
        );
        conn.close().await.expect("failed to close connection");
    }

    for child in &children {
        pool.remove_child(child)
            .await
            .expect("failed to remove child");
    }
    for name in names {
        assert!(!database_exists(pool.parent(), name).await, "{name} still exists");
    }
    assert!(temp_databases(pool.parent()).await.is_empty());
}

//! Integration tests for the query builder against SQLite.

use loom_orm::db::DataSource;
use loom_orm::models::ConnectionConfig;
use loom_orm::query::{CursorSpec, Op, OrderDirection};
use loom_orm::{Dialect, QueryBuilder, Value};
use serde::Deserialize;
use serde_json::json;
use tempfile::TempDir;

async fn setup_people(dir: &TempDir) -> DataSource {
    let path = dir.path().join("query.db");
    let config = ConnectionConfig::new("query-test", format!("sqlite://{}", path.display())).unwrap();
    let source = DataSource::connect(config).await.unwrap();
    source
        .raw_execute(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER NOT NULL, team TEXT)",
            &[],
        )
        .await
        .unwrap();
    let rows = [
        ("Ana", 20, Some("red")),
        ("Ben", 30, Some("blue")),
        ("Cy", 40, Some("red")),
        ("Dee", 30, None),
    ];
    QueryBuilder::table("people")
        .insert_many(rows.iter().map(|(name, age, team)| {
            vec![
                ("name", Value::from(*name)),
                ("age", Value::from(*age)),
                ("team", Value::from(team.map(String::from))),
            ]
        }))
        .unwrap()
        .execute(&source)
        .await
        .unwrap();
    source
}

async fn ages(source: &DataSource, query: QueryBuilder) -> Vec<i64> {
    query
        .order_by_asc("age")
        .pluck(source, "age")
        .await
        .unwrap()
        .into_iter()
        .filter_map(|v| v.as_i64())
        .collect()
}

#[tokio::test]
async fn test_between_and_not_between() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup_people(&dir).await;

    let inside = QueryBuilder::table("people")
        .filter_between("age", 25, 35)
        .distinct();
    assert_eq!(ages(&source, inside).await, vec![30]);

    let outside = QueryBuilder::table("people")
        .filter_not_between("age", 25, 35)
        .distinct();
    assert_eq!(ages(&source, outside).await, vec![20, 40]);
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_empty_where_in_matches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup_people(&dir).await;

    let none = QueryBuilder::table("people")
        .filter_in("id", Vec::<i64>::new())
        .many(&source)
        .await
        .unwrap();
    assert!(none.is_empty());

    let all = QueryBuilder::table("people")
        .filter_not_in("id", Vec::<i64>::new())
        .count(&source)
        .await
        .unwrap();
    assert_eq!(all, 4);

    let err = QueryBuilder::table("people")
        .filter_in("id", Vec::<i64>::new())
        .to_query(Dialect::Mssql)
        .unwrap_err();
    assert_eq!(err.code(), "EMPTY_WHERE_IN_NOT_SUPPORTED");
    source.disconnect().await.unwrap();
}

#[test]
fn test_to_query_is_deterministic() {
    let query = QueryBuilder::table("people")
        .select(["name", "age"])
        .filter("age", Op::Gte, 18)
        .or_filter_group(|q| q.filter_null("team").filter_like("name", "A%"))
        .order_by("age", OrderDirection::Desc)
        .limit(10)
        .offset(5);
    for dialect in Dialect::ALL {
        let first = query.to_query(dialect).unwrap();
        let second = query.to_query(dialect).unwrap();
        assert_eq!(first, second, "{dialect}");
    }
    let pg = query.to_query(Dialect::Postgres).unwrap();
    assert_eq!(
        pg.sql,
        r#"SELECT "name", "age" FROM "people" WHERE "age" >= $1 OR ("team" IS NULL AND "name" LIKE $2) ORDER BY "age" DESC LIMIT 10 OFFSET 5"#
    );
    assert_eq!(pg.params, vec![Value::Int(18), Value::Text("A%".into())]);
}

#[tokio::test]
async fn test_grouping_and_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup_people(&dir).await;

    #[derive(Debug, Deserialize, PartialEq)]
    struct TeamSize {
        team: String,
        members: i64,
    }

    let sizes: Vec<TeamSize> = QueryBuilder::table("people")
        .select(["team"])
        .annotate("COUNT(*)", "members")
        .filter_not_null("team")
        .group_by(["team"])
        .order_by_asc("team")
        .many_as(&source)
        .await
        .unwrap();
    assert_eq!(
        sizes,
        vec![
            TeamSize {
                team: "blue".into(),
                members: 1
            },
            TeamSize {
                team: "red".into(),
                members: 2
            },
        ]
    );

    assert!(QueryBuilder::table("people")
        .filter_eq("name", "Cy")
        .exists(&source)
        .await
        .unwrap());
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_offset_pagination() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup_people(&dir).await;

    let page = QueryBuilder::table("people")
        .order_by_asc("id")
        .paginate(&source, 2, 3)
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.last_page, 2);
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0]["name"], json!("Dee"));
    assert!(!page.has_more_pages());
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_cursor_pagination_visits_every_row_once() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup_people(&dir).await;

    let spec = CursorSpec::new("age").with_tiebreaker("id");
    let query = QueryBuilder::table("people");
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = query
            .cursor_paginate(&source, &spec, 3, cursor.as_deref())
            .await
            .unwrap();
        seen.extend(page.data.iter().map(|row| row["name"].clone()));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    // Ben and Dee share age 30 and are ordered by id.
    assert_eq!(seen, vec![json!("Ana"), json!("Ben"), json!("Dee"), json!("Cy")]);

    let err = query
        .cursor_paginate(&source, &spec, 3, Some("%%%"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_CURSOR");
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_update_and_delete_report_affected_rows() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup_people(&dir).await;

    let updated = QueryBuilder::table("people")
        .filter_eq("team", "red")
        .update(&source, [("team", "green")])
        .await
        .unwrap();
    assert_eq!(updated.rows_affected, 2);

    let deleted = QueryBuilder::table("people")
        .filter_null("team")
        .delete(&source)
        .await
        .unwrap();
    assert_eq!(deleted.rows_affected, 1);
    assert_eq!(QueryBuilder::table("people").count(&source).await.unwrap(), 3);
    source.disconnect().await.unwrap();
}

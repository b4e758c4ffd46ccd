//! Integration tests for typed entities, CRUD and eager relation loading.

use loom_orm::db::{DataSource, Row};
use loom_orm::model::{ColumnDescriptor, EntitySchema, register};
use loom_orm::models::{ConnectionConfig, ExecResult};
use loom_orm::query::{CursorSpec, Op, OrderDirection, SoftDelete};
use loom_orm::{
    DbResult, Dialect, Executor, Model, ModelManager, ModelQuery, QueryBuilder, Record, Relation,
    Value,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Author {
    id: Option<i64>,
    name: String,
    #[serde(default)]
    secret: Option<String>,
}

impl Model for Author {
    const ENTITY: &'static str = "Author";

    fn define() -> EntitySchema {
        EntitySchema::new(Self::ENTITY, "authors")
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("name"))
            .column(ColumnDescriptor::new("secret").hidden())
            .relation(Relation::has_many::<Post>("posts", "author_id"))
            .relation(Relation::many_to_many::<Tag>(
                "tags",
                "author_tags",
                "author_id",
                "tag_id",
            ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Post {
    id: Option<i64>,
    author_id: i64,
    title: String,
    #[serde(default)]
    deleted_at: Option<String>,
}

impl Model for Post {
    const ENTITY: &'static str = "Post";

    fn define() -> EntitySchema {
        EntitySchema::new(Self::ENTITY, "posts")
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("author_id"))
            .column(ColumnDescriptor::new("title"))
            .column(ColumnDescriptor::new("deleted_at"))
            .soft_delete(SoftDelete::date("deleted_at"))
            .relation(Relation::belongs_to::<Author>("author", "author_id"))
            .relation(Relation::has_many::<Comment>("comments", "post_id"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Comment {
    id: Option<i64>,
    post_id: i64,
    body: String,
}

impl Model for Comment {
    const ENTITY: &'static str = "Comment";

    fn define() -> EntitySchema {
        EntitySchema::new(Self::ENTITY, "comments")
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("post_id"))
            .column(ColumnDescriptor::new("body"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tag {
    id: Option<i64>,
    label: String,
    color: String,
}

impl Model for Tag {
    const ENTITY: &'static str = "Tag";

    fn define() -> EntitySchema {
        EntitySchema::new(Self::ENTITY, "tags")
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("label"))
            .column(ColumnDescriptor::new("color"))
    }
}

/// Entity whose hooks hide archived rows, protect locked rows and
/// normalize the body on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    id: Option<i64>,
    body: String,
    #[serde(default)]
    archived: i64,
    #[serde(default)]
    locked: i64,
}

impl Model for Note {
    const ENTITY: &'static str = "Note";

    fn define() -> EntitySchema {
        EntitySchema::new(Self::ENTITY, "notes")
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("body"))
            .column(ColumnDescriptor::new("archived"))
            .column(ColumnDescriptor::new("locked"))
    }

    fn before_insert(row: &mut Row) -> DbResult<()> {
        if let Some(body) = row.get("body").and_then(|b| b.as_str()) {
            let upper = body.to_uppercase();
            row.insert("body".into(), json!(upper));
        }
        Ok(())
    }

    fn before_update(query: QueryBuilder) -> QueryBuilder {
        query.filter_eq("locked", 0)
    }

    fn before_delete(query: QueryBuilder) -> QueryBuilder {
        query.filter_eq("locked", 0)
    }

    fn before_fetch(query: QueryBuilder) -> QueryBuilder {
        query.filter_eq("archived", 0)
    }

    fn after_fetch(mut records: Vec<Record<Self>>) -> DbResult<Vec<Record<Self>>> {
        for record in &mut records {
            record.annotations.insert("checked".into(), json!(true));
        }
        Ok(records)
    }
}

/// Forwards to a data source and counts the statements it sees.
struct CountingExecutor<'a> {
    inner: &'a DataSource,
    statements: AtomicUsize,
}

impl<'a> CountingExecutor<'a> {
    fn new(inner: &'a DataSource) -> Self {
        Self {
            inner,
            statements: AtomicUsize::new(0),
        }
    }

    fn count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }
}

impl Executor for CountingExecutor<'_> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn fetch_rows(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_rows(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<ExecResult> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(sql, params).await
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE authors (id INTEGER PRIMARY KEY, name TEXT NOT NULL, secret TEXT)",
    "CREATE TABLE posts (id INTEGER PRIMARY KEY, author_id INTEGER NOT NULL, title TEXT NOT NULL, deleted_at TEXT)",
    "CREATE TABLE comments (id INTEGER PRIMARY KEY, post_id INTEGER NOT NULL, body TEXT NOT NULL)",
    "CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT NOT NULL UNIQUE, color TEXT NOT NULL)",
    "CREATE TABLE author_tags (author_id INTEGER NOT NULL, tag_id INTEGER NOT NULL)",
    "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT NOT NULL, archived INTEGER NOT NULL DEFAULT 0, locked INTEGER NOT NULL DEFAULT 0)",
];

const SEED: &[&str] = &[
    "INSERT INTO authors (id, name, secret) VALUES (1, 'Ada', 's1'), (2, 'Brian', 's2'), (3, 'Cleo', NULL)",
    "INSERT INTO posts (id, author_id, title) VALUES (10, 1, 'Engines'), (11, 1, 'Notes'), (12, 2, 'Unix')",
    "INSERT INTO posts (id, author_id, title, deleted_at) VALUES (13, 2, 'Draft', '2024-01-01T00:00:00Z')",
    "INSERT INTO comments (id, post_id, body) VALUES (100, 10, 'first'), (101, 10, 'second'), (102, 12, 'nice')",
    "INSERT INTO tags (id, label, color) VALUES (1, 'math', 'blue'), (2, 'systems', 'red')",
    "INSERT INTO author_tags (author_id, tag_id) VALUES (1, 1), (1, 2), (2, 2)",
];

fn register_models() {
    register::<Author>();
    register::<Post>();
    register::<Comment>();
    register::<Tag>();
    register::<Note>();
}

async fn setup(dir: &TempDir) -> DataSource {
    register_models();
    let path = dir.path().join("model.db");
    let config = ConnectionConfig::new("model-test", format!("sqlite://{}", path.display())).unwrap();
    let source = DataSource::connect(config).await.unwrap();
    for statement in SCHEMA.iter().chain(SEED) {
        source.raw_execute(statement, &[]).await.unwrap();
    }
    source
}

#[tokio::test]
async fn test_has_many_is_loaded_with_one_extra_statement() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;
    let counting = CountingExecutor::new(&source);

    let authors = ModelQuery::<Author>::new()
        .unwrap()
        .order_by("id", OrderDirection::Asc)
        .load("posts")
        .many(&counting)
        .await
        .unwrap();
    assert_eq!(counting.count(), 2);

    let titles: Vec<Vec<String>> = authors
        .iter()
        .map(|a| {
            a.relation_as::<Vec<Post>>("posts")
                .unwrap()
                .into_iter()
                .map(|p| p.title)
                .collect()
        })
        .collect();
    // The soft-deleted draft is not loaded, and Cleo gets an empty list.
    assert_eq!(
        titles,
        vec![
            vec!["Engines".to_string(), "Notes".to_string()],
            vec!["Unix".to_string()],
            vec![],
        ]
    );
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_nested_load_issues_one_statement_per_level() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;
    let counting = CountingExecutor::new(&source);

    let author = ModelQuery::<Author>::new()
        .unwrap()
        .filter_eq("id", 1)
        .load("posts.comments")
        .one(&counting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counting.count(), 3);

    let posts = author.relation("posts").unwrap();
    assert_eq!(posts[0]["comments"].as_array().unwrap().len(), 2);
    assert_eq!(posts[1]["comments"], json!([]));
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_no_parents_means_no_relation_query() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;
    let counting = CountingExecutor::new(&source);

    let authors = ModelQuery::<Author>::new()
        .unwrap()
        .filter_eq("name", "Nobody")
        .load("posts.comments")
        .many(&counting)
        .await
        .unwrap();
    assert!(authors.is_empty());
    assert_eq!(counting.count(), 1);
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_belongs_to_and_many_to_many() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;

    let posts = ModelQuery::<Post>::new()
        .unwrap()
        .order_by("id", OrderDirection::Asc)
        .load("author")
        .many(&source)
        .await
        .unwrap();
    assert_eq!(posts.len(), 3);
    let author = posts[2].relation("author").unwrap();
    assert_eq!(author["name"], json!("Brian"));
    assert!(author.get("secret").is_none());

    let authors = ModelQuery::<Author>::new()
        .unwrap()
        .order_by("id", OrderDirection::Asc)
        .load_with("tags", |q| q.order_by_asc("tags.label"))
        .many(&source)
        .await
        .unwrap();
    let labels = |i: usize| -> Vec<String> {
        authors[i]
            .relation_as::<Vec<Tag>>("tags")
            .unwrap()
            .into_iter()
            .map(|t| t.label)
            .collect()
    };
    assert_eq!(labels(0), vec!["math", "systems"]);
    assert_eq!(labels(1), vec!["systems"]);
    assert!(labels(2).is_empty());
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_refined_limit_applies_per_parent() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;
    let counting = CountingExecutor::new(&source);

    let post_ids = |authors: &[Record<Author>]| -> Vec<Vec<i64>> {
        authors
            .iter()
            .map(|a| {
                a.relation_as::<Vec<Post>>("posts")
                    .unwrap()
                    .into_iter()
                    .filter_map(|p| p.id)
                    .collect()
            })
            .collect()
    };

    let first_posts = ModelQuery::<Author>::new()
        .unwrap()
        .order_by("id", OrderDirection::Asc)
        .load_with("posts", |q| q.order_by_asc("id").limit(1))
        .many(&counting)
        .await
        .unwrap();
    assert_eq!(counting.count(), 2);
    assert_eq!(post_ids(&first_posts), vec![vec![10], vec![12], vec![]]);

    let later_posts = ModelQuery::<Author>::new()
        .unwrap()
        .order_by("id", OrderDirection::Asc)
        .load_with("posts", |q| q.order_by_desc("posts.id").offset(1))
        .many(&source)
        .await
        .unwrap();
    assert_eq!(post_ids(&later_posts), vec![vec![10], vec![], vec![]]);

    let first_tag = ModelQuery::<Author>::new()
        .unwrap()
        .order_by("id", OrderDirection::Asc)
        .load_with("tags", |q| q.order_by_desc("tags.label").limit(1))
        .many(&source)
        .await
        .unwrap();
    let labels: Vec<Vec<String>> = first_tag
        .iter()
        .map(|a| {
            a.relation_as::<Vec<Tag>>("tags")
                .unwrap()
                .into_iter()
                .map(|t| t.label)
                .collect()
        })
        .collect();
    assert_eq!(
        labels,
        vec![vec!["systems".to_string()], vec!["systems".to_string()], vec![]]
    );
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_model_hooks_shape_statements_and_results() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;
    let notes = ModelManager::<Note, _>::new(&source).unwrap();

    let created = notes
        .insert(&Note {
            id: None,
            body: "draft".into(),
            archived: 0,
            locked: 0,
        })
        .await
        .unwrap();
    assert_eq!(created.body, "DRAFT");
    source
        .raw_execute(
            "INSERT INTO notes (id, body, archived, locked) VALUES (2, 'old', 1, 0), (3, 'pinned', 0, 1)",
            &[],
        )
        .await
        .unwrap();

    let visible = ModelQuery::<Note>::new()
        .unwrap()
        .order_by("id", OrderDirection::Asc)
        .many(&source)
        .await
        .unwrap();
    let ids: Vec<Option<i64>> = visible.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![created.id, Some(3)]);
    assert!(visible
        .iter()
        .all(|n| n.annotation("checked") == Some(&json!(true))));
    assert!(notes.find_by_pk(2).await.unwrap().is_none());

    let mut pinned = visible[1].model.clone();
    pinned.body = "changed".into();
    let refreshed = notes.update_record(&pinned).await.unwrap();
    assert_eq!(refreshed.body, "pinned");
    assert_eq!(notes.delete_record(&pinned).await.unwrap(), 0);

    let mut first = visible[0].model.clone();
    first.body = "edited".into();
    assert_eq!(notes.update_record(&first).await.unwrap().body, "edited");
    assert_eq!(notes.delete_record(&first).await.unwrap(), 1);

    let remaining = QueryBuilder::table("notes").count(&source).await.unwrap();
    assert_eq!(remaining, 2);
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_relation_existence_filters() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;

    let names = |records: Vec<loom_orm::Record<Author>>| -> Vec<String> {
        records.into_iter().map(|r| r.into_inner().name).collect()
    };

    let with_posts = ModelQuery::<Author>::new()
        .unwrap()
        .having_related("posts")
        .order_by("id", OrderDirection::Asc)
        .many(&source)
        .await
        .unwrap();
    assert_eq!(names(with_posts), vec!["Ada", "Brian"]);

    let prolific = ModelQuery::<Author>::new()
        .unwrap()
        .having_related_count("posts", Op::Gte, 2)
        .many(&source)
        .await
        .unwrap();
    assert_eq!(names(prolific), vec!["Ada"]);

    let silent = ModelQuery::<Author>::new()
        .unwrap()
        .not_having_related("posts")
        .many(&source)
        .await
        .unwrap();
    assert_eq!(names(silent), vec!["Cleo"]);

    let err = ModelQuery::<Author>::new()
        .unwrap()
        .having_related("followers")
        .many(&source)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RELATION_NOT_FOUND");
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_manager_crud_round() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;
    let authors = ModelManager::<Author, _>::new(&source).unwrap();

    let created = authors
        .insert(&Author {
            id: None,
            name: "Dora".into(),
            secret: Some("hidden".into()),
        })
        .await
        .unwrap();
    let id = created.id.unwrap();
    assert!(created.to_json().unwrap().get("secret").is_none());

    let found = authors.find_by_pk(id).await.unwrap().unwrap();
    assert_eq!(found.name, "Dora");

    let mut renamed = found.into_inner();
    renamed.name = "Dorothy".into();
    let updated = authors.update_record(&renamed).await.unwrap();
    assert_eq!(updated.name, "Dorothy");
    assert_eq!(updated.secret.as_deref(), Some("hidden"));

    assert_eq!(authors.delete_record(&renamed).await.unwrap(), 1);
    assert!(authors.find_by_pk(id).await.unwrap().is_none());

    let err = authors
        .update_record(&Author {
            id: None,
            name: "ghost".into(),
            secret: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MODEL_HAS_NO_PRIMARY_KEY_VALUE");
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_manager_soft_delete_and_upsert() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;

    let posts = ModelManager::<Post, _>::new(&source).unwrap();
    let post = posts.find_by_pk(10).await.unwrap().unwrap().into_inner();
    assert_eq!(posts.soft_delete_record(&post).await.unwrap(), 1);
    assert!(posts.find_by_pk(10).await.unwrap().is_none());
    let trashed = posts
        .find_one(|q| q.with_trashed().filter_eq("id", 10))
        .await
        .unwrap()
        .unwrap();
    assert!(trashed.deleted_at.is_some());
    assert_eq!(posts.query().count(&source).await.unwrap(), 2);

    let tags = ModelManager::<Tag, _>::new(&source).unwrap();
    tags.upsert(
        &[
            Tag {
                id: None,
                label: "math".into(),
                color: "green".into(),
            },
            Tag {
                id: None,
                label: "poetry".into(),
                color: "gold".into(),
            },
        ],
        &["label"],
    )
    .await
    .unwrap();
    let all = tags
        .find(|q| q.order_by("label", OrderDirection::Asc))
        .await
        .unwrap();
    let pairs: Vec<(String, String)> = all
        .into_iter()
        .map(|t| {
            let t = t.into_inner();
            (t.label, t.color)
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("math".to_string(), "green".to_string()),
            ("poetry".to_string(), "gold".to_string()),
            ("systems".to_string(), "red".to_string()),
        ]
    );
    source.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_model_pagination() {
    let dir = tempfile::tempdir().unwrap();
    let source = setup(&dir).await;

    let page = ModelQuery::<Author>::new()
        .unwrap()
        .order_by("id", OrderDirection::Asc)
        .paginate(&source, 1, 2)
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.last_page, 2);
    assert!(page.has_more_pages());
    assert_eq!(page.data[1].name, "Brian");

    let err = ModelQuery::<Author>::new()
        .unwrap()
        .load("posts.author.posts.comments")
        .many(&source)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RELATION_DEPTH_EXCEEDED");
    source.disconnect().await.unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Squad {
    id: String,
    name: String,
}

impl Model for Squad {
    const ENTITY: &'static str = "Squad";

    fn define() -> EntitySchema {
        EntitySchema::new(Self::ENTITY, "loom_squads")
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("name"))
            .relation(Relation::has_many::<Member>("members", "squad_id"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Member {
    id: String,
    squad_id: String,
    name: String,
    joined_at: String,
}

impl Model for Member {
    const ENTITY: &'static str = "Member";

    fn define() -> EntitySchema {
        EntitySchema::new(Self::ENTITY, "loom_members")
            .column(ColumnDescriptor::new("id").primary_key())
            .column(ColumnDescriptor::new("squad_id"))
            .column(ColumnDescriptor::new("name"))
            .column(ColumnDescriptor::new("joined_at"))
    }
}

const RED: &str = "11111111-1111-4111-8111-111111111111";
const BLUE: &str = "22222222-2222-4222-8222-222222222222";

/// Test that requires a running PostgreSQL database.
/// Set TEST_POSTGRES_URL environment variable to run this test.
#[tokio::test]
async fn test_postgres_uuid_keys_and_timestamp_cursor() {
    let url = match std::env::var("TEST_POSTGRES_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TEST_POSTGRES_URL not set");
            return;
        }
    };
    register::<Squad>();
    register::<Member>();
    let source = DataSource::connect(ConnectionConfig::new("test_pg_uuid", &url).unwrap())
        .await
        .unwrap();
    let setup = [
        "DROP TABLE IF EXISTS loom_members".to_string(),
        "DROP TABLE IF EXISTS loom_squads".to_string(),
        "CREATE TABLE loom_squads (id UUID PRIMARY KEY, name TEXT NOT NULL)".to_string(),
        "CREATE TABLE loom_members (id UUID PRIMARY KEY, squad_id UUID NOT NULL, name TEXT NOT NULL, joined_at TIMESTAMPTZ NOT NULL)".to_string(),
        format!("INSERT INTO loom_squads VALUES ('{RED}', 'red'), ('{BLUE}', 'blue')"),
        format!(
            "INSERT INTO loom_members VALUES \
             ('aaaaaaaa-0000-4000-8000-000000000001', '{RED}', 'Ana', '2024-01-01T10:00:00Z'), \
             ('aaaaaaaa-0000-4000-8000-000000000002', '{RED}', 'Ben', '2024-01-02T10:00:00Z'), \
             ('aaaaaaaa-0000-4000-8000-000000000003', '{BLUE}', 'Cy', '2024-01-03T10:00:00Z')"
        ),
    ];
    for statement in &setup {
        source.raw_execute(statement, &[]).await.unwrap();
    }

    let squads = ModelQuery::<Squad>::new()
        .unwrap()
        .order_by("name", OrderDirection::Asc)
        .load("members")
        .many(&source)
        .await
        .unwrap();
    let sizes: Vec<(String, usize)> = squads
        .iter()
        .map(|s| {
            let members = s.relation_as::<Vec<Member>>("members").unwrap();
            (s.name.clone(), members.len())
        })
        .collect();
    assert_eq!(sizes, vec![("blue".to_string(), 1), ("red".to_string(), 2)]);

    let manager = ModelManager::<Squad, _>::new(&source).unwrap();
    let red = manager
        .find_by_pk(uuid::Uuid::parse_str(RED).unwrap())
        .await
        .unwrap()
        .unwrap();
    let mut renamed = red.into_inner();
    renamed.name = "crimson".into();
    assert_eq!(manager.update_record(&renamed).await.unwrap().name, "crimson");

    let spec = CursorSpec::new("joined_at").with_tiebreaker("id");
    let query = QueryBuilder::table("loom_members");
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = query
            .cursor_paginate(&source, &spec, 1, cursor.as_deref())
            .await
            .unwrap();
        seen.extend(page.data.iter().map(|row| row["name"].clone()));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, vec![json!("Ana"), json!("Ben"), json!("Cy")]);

    source.raw_execute("DROP TABLE loom_members", &[]).await.unwrap();
    source.raw_execute("DROP TABLE loom_squads", &[]).await.unwrap();
    source.disconnect().await.unwrap();
}

use unisql::prelude::*;

#[derive(unisql::Model, Debug, Clone, PartialEq)]
struct User {
    id: Option<i64>,
    name: String,
    email: String,
    age: Option<i32>,
}

#[derive(unisql::Model, Debug, Clone, PartialEq)]
#[unisql(table = "blog_posts")]
struct Post {
    #[unisql(primary_key)]
    post_id: Option<i64>,
    #[unisql(column = "author_id")]
    user_id: Option<i64>,
    title: String,
    published: bool,
    #[unisql(skip)]
    cached_words: usize,
}

fn setup() -> Database {
    let db = Database::from_url("sqlite::memory:").expect("open sqlite memory db");
    db.exec(
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            age INTEGER
        )",
    )
    .expect("create users");
    db.exec(
        "CREATE TABLE blog_posts (
            post_id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id INTEGER REFERENCES users(id),
            title TEXT NOT NULL,
            published INTEGER NOT NULL
        )",
    )
    .expect("create blog_posts");
    db
}

fn user(name: &str, email: &str, age: Option<i32>) -> User {
    User {
        id: None,
        name: name.to_string(),
        email: email.to_string(),
        age,
    }
}

fn post(user_id: Option<i64>, title: &str, published: bool) -> Post {
    Post {
        post_id: None,
        user_id,
        title: title.to_string(),
        published,
        cached_words: 0,
    }
}

#[test]
fn sqlite_alice_create_count_find_destroy() {
    let db = setup();

    let alice = User::create(&db, &user("Alice", "a@x.com", None)).unwrap();
    let id = alice.id.expect("generated id");
    assert_eq!(User::count(&db).unwrap(), 1);

    let found = User::find(&db, id).unwrap().expect("alice exists");
    assert_eq!(found.name, "Alice");
    assert_eq!(found, alice);

    assert_eq!(User::destroy(&db, id).unwrap(), 1);
    assert_eq!(User::count(&db).unwrap(), 0);
    assert_eq!(User::find(&db, id).unwrap(), None);
    assert_eq!(User::destroy(&db, id).unwrap(), 0);
}

#[test]
fn sqlite_update_changes_only_named_fields() {
    let db = setup();
    let bob = User::create(&db, &user("Bob", "bob@x.com", Some(30))).unwrap();

    let affected = User::update(&db, bob.id, &[("age", Value::from(31))]).unwrap();
    assert_eq!(affected, 1);

    let reloaded = User::find(&db, bob.id).unwrap().unwrap();
    assert_eq!(
        reloaded,
        User {
            age: Some(31),
            ..bob.clone()
        }
    );

    User::update(&db, bob.id, &[("age", Value::Null)]).unwrap();
    assert_eq!(User::find(&db, bob.id).unwrap().unwrap().age, None);

    let err = User::update(&db, bob.id, &[("nickname", "bobby".into())]).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn sqlite_save_writes_every_field() {
    let db = setup();
    let mut carol = User::create(&db, &user("Carol", "carol@x.com", None)).unwrap();
    carol.name = "Caroline".to_string();
    carol.age = Some(44);
    assert_eq!(carol.save(&db).unwrap(), 1);
    assert_eq!(User::find(&db, carol.id).unwrap().unwrap(), carol);
}

#[test]
fn sqlite_all_first_exists() {
    let db = setup();
    assert_eq!(User::first(&db).unwrap(), None);
    assert!(User::all(&db).unwrap().is_empty());

    for (name, age) in [("Dan", 20), ("Eve", 35), ("Fay", 50)] {
        User::create(&db, &user(name, &format!("{name}@x.com"), Some(age))).unwrap();
    }

    let names: Vec<String> = User::all(&db).unwrap().into_iter().map(|u| u.name).collect();
    assert_eq!(names, ["Dan", "Eve", "Fay"]);
    assert_eq!(User::first(&db).unwrap().unwrap().name, "Dan");
    assert!(User::exists(&db, 2).unwrap());
    assert!(!User::exists(&db, 99).unwrap());
}

#[test]
fn sqlite_model_query_filters_and_pages() {
    let db = setup();
    for (name, age) in [("Gus", 17), ("Hal", 25), ("Ivy", 40), ("Jo", 62)] {
        User::create(&db, &user(name, &format!("{name}@x.com"), Some(age))).unwrap();
    }
    User::create(&db, &user("Kim", "kim@x.com", None)).unwrap();

    let adults = User::query(&db)
        .filter("age", Op::Ge, 18)
        .order_by("age", Direction::Desc)
        .all()
        .unwrap();
    let names: Vec<&str> = adults.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, ["Jo", "Ivy", "Hal"]);

    assert_eq!(User::query(&db).filter_null("age").count().unwrap(), 1);
    assert_eq!(
        User::query(&db)
            .filter_in("name", ["Gus", "Kim", "Nobody"])
            .count()
            .unwrap(),
        2
    );

    let second_page = User::query(&db)
        .order_by("id", Direction::Asc)
        .page(2, 2)
        .all()
        .unwrap();
    assert_eq!(second_page.len(), 2);
    assert_eq!(second_page[0].name, "Ivy");

    let youngest = User::query(&db)
        .filter("name", Op::Like, "%y")
        .order_by("age", Direction::Asc)
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(youngest.name, "Ivy");
}

#[test]
fn sqlite_constraint_violation_propagates() {
    let db = setup();
    User::create(&db, &user("Lee", "dup@x.com", None)).unwrap();
    let err = User::create(&db, &user("Lou", "dup@x.com", None)).unwrap_err();
    assert!(matches!(err, Error::QueryFailed(_)), "{err:?}");
    assert_eq!(User::count(&db).unwrap(), 1);
}

#[test]
fn sqlite_derive_attributes_map_table_columns_and_skip() {
    assert_eq!(<Post as Model>::TABLE_NAME, "blog_posts");
    assert_eq!(<Post as Model>::PRIMARY_KEY, "post_id");
    assert_eq!(
        Post::column_names(),
        vec!["post_id", "author_id", "title", "published"]
    );
    assert_eq!(<User as Model>::TABLE_NAME, "users");
    assert!(Post::primary_key_field().unwrap().auto_increment);

    let db = setup();
    let author = User::create(&db, &user("Mo", "mo@x.com", None)).unwrap();
    let mut draft = post(author.id, "Hello", false);
    draft.cached_words = 9;
    let stored = Post::create(&db, &draft).unwrap();
    assert_eq!(stored.cached_words, 0);
    assert_eq!(stored.user_id, author.id);
    assert!(!stored.published);

    let raw = db
        .query_with_params(
            "SELECT author_id FROM blog_posts WHERE post_id = ?",
            &[stored.post_id.into()],
        )
        .unwrap();
    assert_eq!(raw.first().unwrap().get_int("author_id"), author.id);
}

#[test]
fn sqlite_relations_follow_foreign_keys() {
    let db = setup();
    let ann = User::create(&db, &user("Ann", "ann@x.com", None)).unwrap();
    let ben = User::create(&db, &user("Ben", "ben@x.com", None)).unwrap();

    Post::create(&db, &post(ann.id, "first", true)).unwrap();
    Post::create(&db, &post(ben.id, "other", true)).unwrap();
    let second = Post::create(&db, &post(ann.id, "second", false)).unwrap();
    let orphan = Post::create(&db, &post(None, "orphan", false)).unwrap();

    let titles: Vec<String> = ann
        .has_many::<Post>(&db, "author_id")
        .unwrap()
        .into_iter()
        .map(|p| p.title)
        .collect();
    assert_eq!(titles, ["first", "second"]);

    let parent: Option<User> = second.belongs_to(&db, "author_id").unwrap();
    assert_eq!(parent, Some(ann));
    let none: Option<User> = orphan.belongs_to(&db, "author_id").unwrap();
    assert_eq!(none, None);

    let err = second.belongs_to::<User>(&db, "missing").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn sqlite_file_database_persists_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let url = format!("sqlite://{}", path.display());

    {
        let db = Database::from_url(&url).unwrap();
        db.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT NOT NULL, age INTEGER)")
            .unwrap();
        User::create(&db, &user("Nia", "nia@x.com", Some(28))).unwrap();
        db.close().unwrap();
    }

    let db = Database::from_url(&url).unwrap();
    let all = User::all(&db).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name, "Nia");
    assert_eq!(all[0].age, Some(28));
}

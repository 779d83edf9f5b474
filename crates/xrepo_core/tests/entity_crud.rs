mod common;

use common::{memory_repo, seed_dbs, Db, Person, Tag};
use xrepo_core::{col, Criteria, DbError, Repo, RepoError};

fn seed_people(repo: &Repo) -> Vec<Person> {
    [("ann", 31), ("bob", 42), ("cid", 25), ("dee", 42), ("eve", 19)]
        .into_iter()
        .map(|(name, age)| repo.save_or_update(Person::new(name, age)).unwrap())
        .collect()
}

#[test]
fn assigned_id_entity_inserts_then_updates() {
    let repo = memory_repo();
    seed_dbs(&repo);

    let sys = repo.find_by_id::<Db>("sys").unwrap().unwrap();
    assert_eq!(sys, Db::new("sys", "localhost"));

    repo.save_or_update(Db::new("sys", "10.0.0.1")).unwrap();
    let sys = repo.find_by_id::<Db>("sys").unwrap().unwrap();
    assert_eq!(sys.host.as_deref(), Some("10.0.0.1"));
    assert_eq!(repo.count::<Db>(&Criteria::all()).unwrap(), 3);

    assert_eq!(repo.find_by_id::<Db>("missing").unwrap(), None);
}

#[test]
fn assigned_id_entity_without_id_is_rejected() {
    let repo = memory_repo();
    let err = repo.save_or_update(Db::default()).unwrap_err();
    assert!(matches!(err, RepoError::Argument(_)));
    assert_eq!(repo.count::<Db>(&Criteria::all()).unwrap(), 0);
}

#[test]
fn rowid_entity_receives_generated_ids_and_audit_stamps() {
    let repo = memory_repo();
    let people = seed_people(&repo);

    let ids: Vec<_> = people.iter().map(|person| person.id.unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);

    let ann = &people[0];
    let created = ann.stamps.created_at.unwrap();
    assert_eq!(ann.stamps.updated_at, Some(created));

    let mut older = ann.clone();
    older.age = Some(32);
    let older = repo.save_or_update(older).unwrap();
    assert_eq!(older.id, ann.id);
    assert_eq!(older.stamps.created_at, Some(created));
    assert!(older.stamps.updated_at.unwrap() >= created);

    let loaded = repo.find_by_id::<Person>(ann.id.unwrap()).unwrap().unwrap();
    assert_eq!(loaded, older);
}

#[test]
fn uuid_entity_gets_an_id_before_insert() {
    let repo = memory_repo();
    let tag = repo
        .save_or_update(Tag {
            id: None,
            label: "urgent".to_string(),
        })
        .unwrap();

    let id = tag.id.clone().unwrap();
    assert_eq!(id.len(), 36);
    assert_eq!(repo.find_by_id::<Tag>(id.as_str()).unwrap(), Some(tag));
}

#[test]
fn criteria_queries_filter_order_and_window() {
    let repo = memory_repo();
    seed_people(&repo);

    let bob = repo
        .find::<Person>(&Criteria::new().filter(col("name").eq("bob")))
        .unwrap()
        .unwrap();
    assert_eq!(bob.age, Some(42));

    let by_age = Criteria::new().asc("age").asc("name");
    let window: Vec<_> = repo
        .find_list::<Person>(&by_age, Some(1), Some(3))
        .unwrap()
        .into_iter()
        .map(|person| person.name)
        .collect();
    assert_eq!(window, vec!["cid", "ann", "bob"]);

    let tail = repo.find_list::<Person>(&by_age, Some(3), None).unwrap();
    assert_eq!(tail.len(), 2);

    let forty_two = Criteria::new().filter(col("AGE").eq(42)).desc("name");
    let names: Vec<_> = repo
        .find_list::<Person>(&forty_two, None, None)
        .unwrap()
        .into_iter()
        .map(|person| person.name)
        .collect();
    assert_eq!(names, vec!["dee", "bob"]);

    let either = Criteria::new().filter(col("name").eq("ann").or(col("age").lt(20)));
    assert_eq!(repo.count::<Person>(&either).unwrap(), 2);

    let listed = Criteria::new().filter(col("name").is_in(["ann", "eve", "zed"]));
    assert_eq!(repo.count::<Person>(&listed).unwrap(), 2);

    let none = Criteria::new().filter(col("name").is_in(Vec::<String>::new()));
    assert!(repo.find_list::<Person>(&none, None, None).unwrap().is_empty());

    assert_eq!(repo.find_all::<Person>().unwrap().len(), 5);
}

#[test]
fn distinct_count_matches_distinct_rows() {
    let repo = memory_repo();
    seed_people(&repo);
    let criteria = Criteria::new().filter(col("age").ge(25)).distinct();
    let rows = repo.find_list::<Person>(&criteria, None, None).unwrap();
    assert_eq!(repo.count::<Person>(&criteria).unwrap(), rows.len() as u64);
}

#[test]
fn find_page_reports_consistent_totals() {
    let repo = memory_repo();
    seed_people(&repo);

    let criteria = Criteria::new().asc("id");
    let page = repo.find_page::<Person>(2, 2, &criteria).unwrap();
    assert_eq!(page.page(), 2);
    assert_eq!(page.page_size(), 2);
    assert_eq!(page.total_row(), Some(5));
    assert_eq!(page.total_page(), Some(3));
    let names: Vec<_> = page.list().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["cid", "dee"]);

    let last = repo.find_page::<Person>(3, 2, &criteria).unwrap();
    assert_eq!(last.list().len(), 1);

    let beyond = repo.find_page::<Person>(9, 2, &criteria).unwrap();
    assert!(beyond.is_empty());
    assert_eq!(beyond.total_row(), Some(5));

    let filtered = Criteria::new().filter(col("age").eq(42));
    let page = repo.find_page::<Person>(1, 10, &filtered).unwrap();
    assert_eq!(page.total_row(), Some(page.list().len() as u64));
}

#[test]
fn delete_reports_whether_a_row_was_removed() {
    let repo = memory_repo();
    let people = seed_people(&repo);

    assert!(repo.delete(&people[0]).unwrap());
    assert!(!repo.delete(&people[0]).unwrap());
    assert!(repo.delete_by_id::<Person>(people[1].id.unwrap()).unwrap());
    assert!(!repo.delete_by_id::<Person>(999).unwrap());
    assert_eq!(repo.count::<Person>(&Criteria::all()).unwrap(), 3);

    let err = repo.delete(&Person::new("ghost", 1)).unwrap_err();
    assert!(matches!(err, RepoError::Argument(_)));
}

#[test]
fn invalid_arguments_fail_before_touching_the_database() {
    let repo = memory_repo();
    let before = repo.tx_stats().unwrap();

    assert!(matches!(
        repo.find_list::<Person>(&Criteria::all(), None, Some(0)),
        Err(RepoError::Argument(_))
    ));
    assert!(matches!(
        repo.find_page::<Person>(0, 10, &Criteria::all()),
        Err(RepoError::Argument(_))
    ));
    assert!(matches!(
        repo.find_by_id::<Person>(Option::<i64>::None),
        Err(RepoError::Argument(_))
    ));
    assert!(matches!(
        repo.delete_by_id::<Person>(vec![1, 2]),
        Err(RepoError::Argument(_))
    ));
    assert!(matches!(
        repo.find_list::<Person>(&Criteria::all(), Some(u64::MAX), None),
        Err(RepoError::Argument(_))
    ));
    assert!(matches!(
        repo.find_page::<Person>(u64::MAX, 100, &Criteria::all()),
        Err(RepoError::Argument(_))
    ));

    assert_eq!(repo.tx_stats().unwrap(), before);
}

#[test]
fn unknown_criteria_column_is_an_argument_error() {
    let repo = memory_repo();
    let err = repo
        .count::<Person>(&Criteria::new().filter(col("salary").gt(10)))
        .unwrap_err();
    assert!(matches!(err, RepoError::Argument(_)));
}

#[test]
fn unregistered_entity_is_a_config_error() {
    let mut repo = Repo::in_memory();
    repo.set_attr("schema.sync", "create");
    repo.register::<Db>().unwrap();
    repo.init().unwrap();

    let err = repo.find_all::<Person>().unwrap_err();
    assert!(matches!(err, RepoError::Config(_)));
}

#[test]
fn schema_update_adds_missing_columns() {
    let dir = tempfile::tempdir().unwrap();
    let url = dir.path().join("people.db");
    let url = url.to_str().unwrap();

    {
        let mut legacy = Repo::with_url(url);
        legacy.init().unwrap();
        legacy
            .execute(
                "CREATE TABLE t_person (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                &[],
            )
            .unwrap();
        legacy
            .execute("INSERT INTO t_person (name) VALUES (?)", &xrepo_core::sql_params!["old"])
            .unwrap();
    }

    let mut strict = Repo::with_url(url);
    strict.set_attr("schema.sync", "validate");
    strict.register::<Person>().unwrap();
    let err = strict.init().unwrap_err();
    assert!(matches!(
        err.db_error(),
        Some(DbError::MissingRequiredColumn { .. })
    ));

    let mut repo = Repo::with_url(url);
    repo.set_attr("schema.sync", "update");
    repo.register::<Person>().unwrap();
    repo.init().unwrap();

    let old = repo.find_by_id::<Person>(1).unwrap().unwrap();
    assert_eq!(old.name, "old");
    assert_eq!(old.age, None);
    let saved = repo.save_or_update(Person::new("new", 5)).unwrap();
    assert_eq!(saved.id, Some(2));
}

#[test]
fn schema_validate_reports_missing_tables() {
    let dir = tempfile::tempdir().unwrap();
    let url = dir.path().join("empty.db");

    let mut repo = Repo::with_url(url.to_str().unwrap());
    repo.set_attr("schema.sync", "validate");
    repo.register::<Tag>().unwrap();
    let err = repo.init().unwrap_err();
    assert!(matches!(err.db_error(), Some(DbError::MissingRequiredTable(_))));
    assert!(!repo.is_initialized());
}

#[test]
fn second_page_of_ten_matches_an_independent_count() {
    let repo = memory_repo();
    repo.trans(|s| {
        for n in 0..25 {
            s.save_or_update(Person::new(&format!("p{n:02}"), n % 7))?;
        }
        Ok(())
    })
    .unwrap();

    let criteria = Criteria::new().filter(col("age").ne(3)).asc("id");
    let page = repo.find_page::<Person>(2, 10, &criteria).unwrap();
    let window = repo.find_list::<Person>(&criteria, Some(10), Some(10)).unwrap();

    assert_eq!(page.list(), window.as_slice());
    assert_eq!(page.total_row(), Some(repo.count::<Person>(&criteria).unwrap()));
    assert_eq!(page.total_page(), Some(3));
}

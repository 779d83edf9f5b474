#![allow(dead_code)]

use xrepo_core::{
    AuditStamps, BindingTable, ColumnDef, Entity, IdGeneration, Repo, Shape, Value,
};

/// Row of the `db` catalog table keyed by an assigned text id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Db {
    pub db: Option<String>,
    pub host: Option<String>,
}

impl Db {
    pub fn new(db: &str, host: &str) -> Self {
        Self {
            db: Some(db.to_string()),
            host: Some(host.to_string()),
        }
    }
}

impl Shape for Db {
    fn bind(table: &mut BindingTable<Self>) {
        table
            .field("Db", |row: &mut Self, v: String| row.db = Some(v))
            .field("Host", |row: &mut Self, v: String| row.host = Some(v));
    }
}

impl Entity for Db {
    const TABLE: &'static str = "db";
    const ID_COLUMN: &'static str = "Db";
    const ID_GENERATION: IdGeneration = IdGeneration::Assigned;

    fn columns() -> &'static [ColumnDef] {
        const COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("Db", "TEXT").not_null(),
            ColumnDef::new("Host", "TEXT"),
        ];
        COLUMNS
    }

    fn id(&self) -> Option<Value> {
        self.db.clone().map(Value::Text)
    }

    fn assign_id(&mut self, id: Value) {
        if let Value::Text(id) = id {
            self.db = Some(id);
        }
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("Host", self.host.clone().map_or(Value::Null, Value::Text))]
    }
}

/// Rowid-keyed entity with audit stamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub id: Option<i64>,
    pub name: String,
    pub age: Option<i64>,
    pub stamps: AuditStamps,
}

impl Person {
    pub fn new(name: &str, age: i64) -> Self {
        Self {
            name: name.to_string(),
            age: Some(age),
            ..Self::default()
        }
    }
}

impl Shape for Person {
    fn bind(table: &mut BindingTable<Self>) {
        table
            .field("id", |row: &mut Self, v: i64| row.id = Some(v))
            .field("name", |row: &mut Self, v: String| row.name = v)
            .field("age", |row: &mut Self, v: i64| row.age = Some(v))
            .field("create_time", |row: &mut Self, v: i64| {
                row.stamps.created_at = Some(v)
            })
            .field("update_time", |row: &mut Self, v: i64| {
                row.stamps.updated_at = Some(v)
            });
    }
}

impl Entity for Person {
    const TABLE: &'static str = "t_person";

    fn columns() -> &'static [ColumnDef] {
        const COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("id", "INTEGER"),
            ColumnDef::new("name", "TEXT").not_null(),
            ColumnDef::new("age", "INTEGER"),
            ColumnDef::new("create_time", "INTEGER"),
            ColumnDef::new("update_time", "INTEGER"),
        ];
        COLUMNS
    }

    fn id(&self) -> Option<Value> {
        self.id.map(Value::Integer)
    }

    fn assign_id(&mut self, id: Value) {
        if let Value::Integer(id) = id {
            self.id = Some(id);
        }
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::Text(self.name.clone())),
            ("age", self.age.map_or(Value::Null, Value::Integer)),
            ("create_time", self.stamps.created_at.map_or(Value::Null, Value::Integer)),
            ("update_time", self.stamps.updated_at.map_or(Value::Null, Value::Integer)),
        ]
    }

    fn audit_stamps(&mut self) -> Option<&mut AuditStamps> {
        Some(&mut self.stamps)
    }
}

/// Uuid-keyed entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: Option<String>,
    pub label: String,
}

impl Shape for Tag {
    fn bind(table: &mut BindingTable<Self>) {
        table
            .field("id", |row: &mut Self, v: String| row.id = Some(v))
            .field("label", |row: &mut Self, v: String| row.label = v);
    }
}

impl Entity for Tag {
    const TABLE: &'static str = "tag";
    const ID_GENERATION: IdGeneration = IdGeneration::Uuid;

    fn columns() -> &'static [ColumnDef] {
        const COLUMNS: &[ColumnDef] = &[
            ColumnDef::new("id", "TEXT"),
            ColumnDef::new("label", "TEXT").not_null(),
        ];
        COLUMNS
    }

    fn id(&self) -> Option<Value> {
        self.id.clone().map(Value::Text)
    }

    fn assign_id(&mut self, id: Value) {
        if let Value::Text(id) = id {
            self.id = Some(id);
        }
    }

    fn to_row(&self) -> Vec<(&'static str, Value)> {
        vec![("label", Value::Text(self.label.clone()))]
    }
}

/// Initialized in-memory repo with every test entity and created tables.
pub fn memory_repo() -> Repo {
    let mut repo = Repo::in_memory();
    repo.set_attr("schema.sync", "create");
    repo.register::<Db>()
        .unwrap()
        .register::<Person>()
        .unwrap()
        .register::<Tag>()
        .unwrap();
    repo.init().unwrap();
    repo
}

pub fn seed_dbs(repo: &Repo) {
    for (db, host) in [("sys", "localhost"), ("test", "localhost"), ("prod", "db.internal")] {
        repo.save_or_update(Db::new(db, host)).unwrap();
    }
}

//! Entities shared by the integration suites.
#![allow(dead_code)]

use lifelink::chrono::{DateTime, Utc};
use lifelink::{lifelink_entity, Database, DocumentStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub modified_on: Option<DateTime<Utc>>,
    pub name: String,
}
lifelink_entity!(Author, "authors");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub modified_on: Option<DateTime<Utc>>,
    pub title: String,
    pub year: i64,
}
lifelink_entity!(Book, "books");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub modified_on: Option<DateTime<Utc>>,
    pub name: String,
}
lifelink_entity!(Genre, "genres");

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cover {
    pub id: String,
    pub modified_on: Option<DateTime<Utc>>,
    pub file_name: String,
}
lifelink_entity!(Cover, "covers", file);

pub fn author<S: DocumentStore>(db: &Database<S>, name: &str) -> Author {
    let mut a = Author {
        name: name.into(),
        ..Author::default()
    };
    db.save(&mut a, None).expect("save author");
    a
}

pub fn book<S: DocumentStore>(db: &Database<S>, title: &str, year: i64) -> Book {
    let mut b = Book {
        title: title.into(),
        year,
        ..Book::default()
    };
    db.save(&mut b, None).expect("save book");
    b
}

pub fn genre<S: DocumentStore>(db: &Database<S>, name: &str) -> Genre {
    let mut g = Genre {
        name: name.into(),
        ..Genre::default()
    };
    db.save(&mut g, None).expect("save genre");
    g
}

pub fn titles(books: &[Book]) -> Vec<&str> {
    books.iter().map(|b| b.title.as_str()).collect()
}

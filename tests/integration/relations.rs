//! Relationship wrappers over `MemoryStore`
//!
//! Relationships under test:
//! - Author `Books` -> Book (one-to-many)
//! - Book `Genres` <-> Genre `Books` (many-to-many, owned by Book)

mod common;

use common::{author, book, genre, titles, Author, Book, Genre};
use lifelink::store::JoinField;
use lifelink::{Database, Filter, LinkError, MemoryStore, One, Order, Side};
use serde::Deserialize;

fn db() -> Database<MemoryStore> {
    Database::new(MemoryStore::new())
}

#[test]
fn test_add_is_idempotent() {
    let db = db();
    let a = author(&db, "Le Guin");
    let b = book(&db, "The Dispossessed", 1974);
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();

    books.add(&b).unwrap();
    books.add(&b).unwrap();
    books.add_many(&[b.clone(), b.clone()]).unwrap();

    assert_eq!(books.children_count().unwrap(), 1);
    assert_eq!(books.join_collection().records(None).unwrap().len(), 1);
}

#[test]
fn test_add_then_remove_leaves_nothing() {
    let db = db();
    let a = author(&db, "Le Guin");
    let b = book(&db, "Lathe of Heaven", 1971);
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();

    books.add(&b).unwrap();
    assert_eq!(books.remove(&b).unwrap(), 1);
    assert_eq!(books.children_count().unwrap(), 0);
    // EDGE CASE: removing an edge that is already gone is a no-op
    assert_eq!(books.remove(&b).unwrap(), 0);
    // the child document itself is untouched
    assert!(db.find_by_id::<Book>(&b.id, None).unwrap().is_some());
}

#[test]
fn test_children_in_insertion_order_after_remove() {
    let db = db();
    let a = author(&db, "Banks");
    let (b1, b2, b3) = (book(&db, "B1", 1987), book(&db, "B2", 1988), book(&db, "B3", 1990));
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();
    books.add(&b1).unwrap();
    books.add(&b2).unwrap();
    books.add(&b3).unwrap();

    books.remove(&b2).unwrap();
    let children = books.children().unwrap().all().unwrap();
    assert_eq!(titles(&children), vec!["B1", "B3"]);
    assert_eq!(books.children_ids().unwrap(), vec![b1.id.clone(), b3.id.clone()]);
}

#[test]
fn test_children_query_filters_sorts_and_pages() {
    let db = db();
    let a = author(&db, "Asimov");
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();
    for (title, year) in [("Foundation", 1951), ("I, Robot", 1950), ("The Gods Themselves", 1972)] {
        books.add(&book(&db, title, year)).unwrap();
    }
    // a book by nobody, never linked
    book(&db, "Orphan", 1960);

    let recent = books
        .children()
        .unwrap()
        .filter(Filter::Gt("year".into(), 1950.into()))
        .all()
        .unwrap();
    assert_eq!(titles(&recent), vec!["Foundation", "The Gods Themselves"]);

    let by_year = books.children().unwrap().sort("year", Order::Desc).limit(2).all().unwrap();
    assert_eq!(titles(&by_year), vec!["The Gods Themselves", "Foundation"]);

    let paged = books.children().unwrap().skip(1).limit(1).all().unwrap();
    assert_eq!(titles(&paged), vec!["I, Robot"]);

    assert_eq!(books.children().unwrap().skip(1).limit(1).count().unwrap(), 3);
    assert_eq!(db.find::<Book>().count().unwrap(), 4);
}

#[test]
fn test_children_projection() {
    #[derive(Deserialize)]
    struct TitleOnly {
        id: String,
        title: String,
        year: Option<i64>,
    }
    let db = db();
    let a = author(&db, "Herbert");
    let b = book(&db, "Dune", 1965);
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();
    books.add(&b).unwrap();

    let rows: Vec<TitleOnly> = books.children().unwrap().project(&["title"]).all_as().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, b.id);
    assert_eq!(rows[0].title, "Dune");
    assert!(rows[0].year.is_none());
}

#[test]
fn test_many_to_many_is_symmetric() {
    let db = db();
    let dune = book(&db, "Dune", 1965);
    let sf = genre(&db, "Science Fiction");
    let classic = genre(&db, "Classic");

    let genres = db.many_to_many::<Book, Genre>(&dune, "Genres", "Books").unwrap();
    genres.add_many(&[sf.clone(), classic.clone()]).unwrap();

    let sf_books = db
        .many_to_many_inverse::<Genre, Book>(&sf, "Books", "Genres")
        .unwrap();
    assert_eq!(sf_books.side(), Side::Inverse);
    assert_eq!(genres.join_collection().name(), "[(Genres)Book~Genre(Books)]");
    assert_eq!(sf_books.join_collection().name(), genres.join_collection().name());

    let linked = sf_books.children().unwrap().all().unwrap();
    assert_eq!(titles(&linked), vec!["Dune"]);

    // an edge added from the inverse side is visible from the owner side
    let hyperion = book(&db, "Hyperion", 1989);
    sf_books.add(&hyperion).unwrap();
    let hyperion_genres = db
        .many_to_many::<Book, Genre>(&hyperion, "Genres", "Books")
        .unwrap();
    assert_eq!(hyperion_genres.children_ids().unwrap(), vec![sf.id.clone()]);

    // EDGE CASE: the same pair added from both sides is still one edge
    genres.add(&sf).unwrap();
    sf_books.add(&dune).unwrap();
    assert_eq!(sf_books.children_count().unwrap(), 2);
    assert_eq!(genres.children_count().unwrap(), 2);
}

#[test]
fn test_parents_queries() {
    let db = db();
    let (a1, a2) = (author(&db, "Pratchett"), author(&db, "Gaiman"));
    let omens = book(&db, "Good Omens", 1990);
    let mort = book(&db, "Mort", 1987);
    let coraline = book(&db, "Coraline", 2002);

    let pratchett = db.one_to_many::<Author, Book>(&a1, "Books").unwrap();
    let gaiman = db.one_to_many::<Author, Book>(&a2, "Books").unwrap();
    pratchett.add_many(&[omens.clone(), mort.clone()]).unwrap();
    gaiman.add_many(&[omens.clone(), coraline.clone()]).unwrap();

    let names: Vec<String> = pratchett
        .parents_of_id(&omens.id)
        .unwrap()
        .sort("name", Order::Asc)
        .all()
        .unwrap()
        .into_iter()
        .map(|a| a.name)
        .collect();
    assert_eq!(names, vec!["Gaiman", "Pratchett"]);

    let of_recent = gaiman
        .parents_matching(Filter::Gte("year".into(), 2000.into()))
        .unwrap()
        .all()
        .unwrap();
    assert_eq!(of_recent.len(), 1);
    assert_eq!(of_recent[0].name, "Gaiman");

    // EDGE CASE: a child with no parents yields an empty query
    assert_eq!(pratchett.parents_of_id("nobody").unwrap().count().unwrap(), 0);
    assert_eq!(pratchett.parents_of_ids(Vec::new()).unwrap().all().unwrap().len(), 0);
}

#[test]
fn test_one_reference_round_trip() {
    let db = db();
    let a = author(&db, "Tolkien");
    let reference = db.one(&a).unwrap();
    assert_eq!(reference.id(), a.id);
    assert_eq!(reference.to_entity(&db, None).unwrap(), Some(a.clone()));

    #[derive(Deserialize)]
    struct NameOnly {
        name: String,
    }
    let projected: NameOnly = reference
        .to_entity_projected(&db, &["name"], None)
        .unwrap()
        .unwrap();
    assert_eq!(projected.name, "Tolkien");

    // EDGE CASE: dangling and empty references load nothing
    assert!(One::<Author>::from_id("gone").to_entity(&db, None).unwrap().is_none());
    assert!(One::<Author>::from_id("").to_entity(&db, None).unwrap().is_none());
    assert!(matches!(db.one(&Author::default()), Err(LinkError::Unsaved { .. })));
}

#[test]
fn test_session_scoped_edges_abort() {
    let db = db();
    let a = author(&db, "Vance");
    let b = book(&db, "The Dying Earth", 1950);

    let session = db.begin_session().unwrap();
    let books = db
        .one_to_many::<Author, Book>(&a, "Books")
        .unwrap()
        .in_session(session.clone());
    books.add(&b).unwrap();
    assert_eq!(books.children_count().unwrap(), 1);
    db.abort(session).unwrap();

    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();
    assert_eq!(books.children_count().unwrap(), 0);
}

#[test]
fn test_join_records_keep_pair_columns() {
    let db = db();
    let a = author(&db, "Wolfe");
    let b = book(&db, "Shadow of the Torturer", 1980);
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();
    books.add(&b).unwrap();

    let join = books.join_collection();
    assert_eq!(join.name(), "[Author~Book(Books)]");
    assert_eq!(join.find_by_parent(None, &a.id).unwrap(), vec![b.id.clone()]);
    assert_eq!(join.find_by_child(None, &b.id).unwrap(), vec![a.id.clone()]);
    let records = join.records(None).unwrap();
    assert_eq!((records[0].parent_id.as_str(), records[0].child_id.as_str()), (a.id.as_str(), b.id.as_str()));
    assert_eq!(join.count(None, JoinField::Child, &b.id).unwrap(), 1);
}

#[test]
fn test_concurrent_adds_of_one_pair_keep_one_edge() {
    let db = db();
    let a = author(&db, "Jemisin");
    let b = book(&db, "The Fifth Season", 2015);
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let (books, b) = (books.clone(), b.clone());
            may::go!(move || books.add(&b))
        })
        .collect();
    for handle in handles {
        handle.join().expect("add coroutine panicked").unwrap();
    }

    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 1);
    assert_eq!(books.children_ids().unwrap(), vec![b.id.clone()]);
}

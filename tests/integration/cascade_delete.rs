//! Cascade delete over `MemoryStore`
//!
//! Relationships under test:
//! - Author `Books` -> Book, Author `Genres` -> Genre (one-to-many)
//! - Book `Genres` <-> Genre `Books` (many-to-many)
//! - Cover is a file entity with chunks in `FileChunk`

mod common;

use common::{author, book, genre, Author, Book, Cover, Genre};
use lifelink::entity::{FILE_CHUNK_COLLECTION, FILE_ID_FIELD};
use lifelink::store::{DocumentStore, ID_FIELD};
use lifelink::{
    CancelToken, Database, Filter, JoinCollection, JoinDiscovery, LinkError, MemoryStore, RelationConfig,
    RelationDef,
};
use serde_json::json;
use std::sync::Arc;

fn db() -> Database<MemoryStore> {
    Database::new(MemoryStore::new())
}

fn db_with(config: RelationConfig) -> Database<MemoryStore> {
    Database::with_config(MemoryStore::new(), config).unwrap()
}

#[test]
fn test_delete_removes_edges_and_keeps_children() {
    let db = db();
    let a = author(&db, "Le Guin");
    let (b1, b2) = (book(&db, "Earthsea", 1968), book(&db, "Tehanu", 1990));
    let g = genre(&db, "Fantasy");
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();
    let genres = db.one_to_many::<Author, Genre>(&a, "Genres").unwrap();
    books.add_many(&[b1.clone(), b2.clone()]).unwrap();
    genres.add(&g).unwrap();

    assert_eq!(db.delete(&a, None).unwrap(), 1);

    assert!(db.find_by_id::<Author>(&a.id, None).unwrap().is_none());
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 0);
    assert_eq!(db.store().join_record_count("[Author~Genre(Genres)]"), 0);
    assert_eq!(db.find::<Book>().count().unwrap(), 2);
    assert_eq!(db.find::<Genre>().count().unwrap(), 1);
}

#[test]
fn test_delete_child_removes_incoming_edges() {
    let db = db();
    let a = author(&db, "Herbert");
    let (dune, messiah) = (book(&db, "Dune", 1965), book(&db, "Messiah", 1969));
    let sf = genre(&db, "SF");
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();
    books.add_many(&[dune.clone(), messiah.clone()]).unwrap();
    db.many_to_many::<Book, Genre>(&dune, "Genres", "Books")
        .unwrap()
        .add(&sf)
        .unwrap();

    assert_eq!(db.delete(&dune, None).unwrap(), 1);
    assert_eq!(books.children_ids().unwrap(), vec![messiah.id.clone()]);
    assert_eq!(db.store().join_record_count("[(Genres)Book~Genre(Books)]"), 0);
}

#[test]
fn test_delete_inverse_side_type() {
    let db = db();
    let dune = book(&db, "Dune", 1965);
    let (sf, classic) = (genre(&db, "SF"), genre(&db, "Classic"));
    let genres = db.many_to_many::<Book, Genre>(&dune, "Genres", "Books").unwrap();
    genres.add_many(&[sf.clone(), classic.clone()]).unwrap();

    assert_eq!(db.delete(&sf, None).unwrap(), 1);
    assert_eq!(genres.children_ids().unwrap(), vec![classic.id.clone()]);
}

#[test]
fn test_similar_type_names_untouched() {
    // EDGE CASE: `CoAuthor` collections must not match `Author`
    let db = db();
    let a = author(&db, "Niven");
    let b = book(&db, "Ringworld", 1970);
    let unrelated = JoinCollection::new(Arc::clone(db.store()), "[CoAuthor~Book(Books)]");
    unrelated.upsert(None, &a.id, &b.id).unwrap();

    db.delete(&a, None).unwrap();
    assert_eq!(db.store().join_record_count("[CoAuthor~Book(Books)]"), 1);
}

#[test]
fn test_batches_cover_every_id() {
    let db = db();
    let store = db.store();
    let ids: Vec<String> = (0..100_001).map(|n| format!("a{n}")).collect();
    for id in &ids {
        store.upsert_document(None, "authors", id, json!({"id": id, "name": "x"})).unwrap();
    }
    let a_last = Author {
        id: ids[100_000].clone(),
        ..Author::default()
    };
    let b = book(&db, "Tail", 2000);
    db.one_to_many::<Author, Book>(&a_last, "Books").unwrap().add(&b).unwrap();

    assert_eq!(db.config().cascade_batch_size, 100_000);
    assert_eq!(db.delete_cascading::<Author>(&ids, None, None).unwrap(), 100_001);
    assert_eq!(db.find::<Author>().count().unwrap(), 0);
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 0);
}

#[test]
fn test_small_batches_and_duplicate_ids() {
    let db = db_with(RelationConfig {
        cascade_batch_size: 2,
        fan_out_concurrency: 1,
        ..RelationConfig::default()
    });
    let authors: Vec<Author> = (0..5).map(|n| author(&db, &format!("a{n}"))).collect();
    let b = book(&db, "Shared", 1999);
    for a in &authors {
        db.one_to_many::<Author, Book>(a, "Books").unwrap().add(&b).unwrap();
    }

    let mut ids: Vec<String> = authors.iter().map(|a| a.id.clone()).collect();
    ids.push(ids[0].clone());
    ids.push(String::new());
    assert_eq!(db.delete_cascading::<Author>(&ids, None, None).unwrap(), 5);
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 0);
}

#[test]
fn test_empty_and_unknown_ids() {
    let db = db();
    // EDGE CASE: nothing to delete is not an error
    assert_eq!(db.delete_cascading::<Author>(&[], None, None).unwrap(), 0);
    assert_eq!(
        db.delete_cascading::<Author>(&["missing".to_string()], None, None).unwrap(),
        0
    );
}

#[test]
fn test_partial_failure_reports_error_and_rerun_completes() {
    let db = db();
    let a = author(&db, "Zelazny");
    let b = book(&db, "Amber", 1970);
    let g = genre(&db, "Fantasy");
    db.one_to_many::<Author, Book>(&a, "Books").unwrap().add(&b).unwrap();
    db.one_to_many::<Author, Genre>(&a, "Genres").unwrap().add(&g).unwrap();

    db.store().fail_collection("[Author~Book(Books)]");
    let err = db.delete(&a, None).unwrap_err();
    assert!(matches!(err, LinkError::Store(_)));

    // the other tasks still ran
    assert!(db.find_by_id::<Author>(&a.id, None).unwrap().is_none());
    assert_eq!(db.store().join_record_count("[Author~Genre(Genres)]"), 0);
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 1);

    db.store().clear_failures();
    assert_eq!(db.delete_cascading::<Author>(&[a.id.clone()], None, None).unwrap(), 0);
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 0);
}

#[test]
fn test_sweep_repairs_partial_failure() {
    let db = db();
    let a = author(&db, "Wolfe");
    let b = book(&db, "Peace", 1975);
    db.one_to_many::<Author, Book>(&a, "Books").unwrap().add(&b).unwrap();

    db.store().fail_collection("[Author~Book(Books)]");
    assert!(db.delete(&a, None).is_err());
    db.store().clear_failures();

    let def = RelationDef::one_to_many("Author", "Books", "Book").unwrap();
    let report = db.sweep_orphans::<Author, Book>(&def, None).unwrap();
    assert_eq!((report.scanned, report.removed), (1, 1));
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 0);
}

#[test]
fn test_cancellation_requires_session() {
    let db = db();
    let a = author(&db, "Gibson");
    let token = CancelToken::new();
    let err = db
        .delete_cascading::<Author>(&[a.id.clone()], None, Some(&token))
        .unwrap_err();
    assert!(matches!(err, LinkError::CancellationUnsupported));
    assert!(err.is_misuse());
    assert!(db.find_by_id::<Author>(&a.id, None).unwrap().is_some());
}

#[test]
fn test_cancelled_cascade_rolls_back_with_session() {
    let db = db();
    let a = author(&db, "Stephenson");
    let b = book(&db, "Anathem", 2008);
    db.one_to_many::<Author, Book>(&a, "Books").unwrap().add(&b).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let session = db.begin_session().unwrap();
    let err = db
        .delete_cascading::<Author>(&[a.id.clone()], Some(&session), Some(&token))
        .unwrap_err();
    assert!(matches!(err, LinkError::Cancelled));
    db.abort(session).unwrap();

    assert!(db.find_by_id::<Author>(&a.id, None).unwrap().is_some());
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 1);
}

#[test]
fn test_cascade_in_session_is_atomic() {
    let db = db();
    let a = author(&db, "Bester");
    let b = book(&db, "The Stars My Destination", 1956);
    db.one_to_many::<Author, Book>(&a, "Books").unwrap().add(&b).unwrap();

    let session = db.begin_session().unwrap();
    let token = CancelToken::new();
    assert_eq!(
        db.delete_cascading::<Author>(&[a.id.clone()], Some(&session), Some(&token))
            .unwrap(),
        1
    );
    db.abort(session).unwrap();
    assert!(db.find_by_id::<Author>(&a.id, None).unwrap().is_some());
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 1);

    let deleted = db
        .transaction(|s| db.delete_cascading::<Author>(&[a.id.clone()], Some(s), None))
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 0);
}

#[test]
fn test_file_entity_chunks_deleted() {
    let db = db();
    let mut cover = Cover {
        file_name: "dune.png".into(),
        ..Cover::default()
    };
    db.save(&mut cover, None).unwrap();
    let store = db.store();
    let chunk = |file_id: &str, n: u32| {
        let mut doc = json!({ "n": n });
        doc[FILE_ID_FIELD] = json!(file_id);
        doc
    };
    for n in 0..3 {
        store
            .upsert_document(None, FILE_CHUNK_COLLECTION, &format!("chunk{n}"), chunk(&cover.id, n))
            .unwrap();
    }
    store
        .upsert_document(None, FILE_CHUNK_COLLECTION, "other", chunk("x", 0))
        .unwrap();

    assert_eq!(db.delete(&cover, None).unwrap(), 1);
    let left = store
        .find_documents(None, FILE_CHUNK_COLLECTION, &Filter::All, &Default::default())
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].0, "other");
}

#[test]
fn test_registry_discovery_only_cleans_declared_relations() {
    let db = db_with(RelationConfig {
        discovery: JoinDiscovery::Registry,
        ..RelationConfig::default()
    });
    let a = author(&db, "Clarke");
    let b = book(&db, "Rama", 1973);
    db.one_to_many::<Author, Book>(&a, "Books").unwrap().add(&b).unwrap();
    // written without declaring the relation on this database
    JoinCollection::new(Arc::clone(db.store()), "[Author~Genre(Genres)]")
        .upsert(None, &a.id, "g1")
        .unwrap();

    db.delete(&a, None).unwrap();
    assert_eq!(db.store().join_record_count("[Author~Book(Books)]"), 0);
    assert_eq!(db.store().join_record_count("[Author~Genre(Genres)]"), 1);
}

#[test]
fn test_delete_matching_by_field() {
    let db = db();
    let old = book(&db, "Old", 1900);
    let new = book(&db, "New", 2020);
    let a = author(&db, "Anon");
    let books = db.one_to_many::<Author, Book>(&a, "Books").unwrap();
    books.add_many(&[old.clone(), new.clone()]).unwrap();

    let deleted = db
        .delete_matching::<Book>(Filter::Lt("year".into(), 2000.into()), None, None)
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(books.children_ids().unwrap(), vec![new.id.clone()]);
    assert_eq!(
        db.find::<Book>()
            .filter(Filter::eq(ID_FIELD, old.id.as_str()))
            .count()
            .unwrap(),
        0
    );
}

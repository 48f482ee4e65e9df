//! Writers on other threads, one view pumping on the test thread.

use serde_json::json;
use shelfsync::{
    BorrowListView, Library, ManualClock, MemoryStore, RemoteStore, Session, SyncConfig,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::thread;

const WRITERS: usize = 4;
const BOOKS_PER_WRITER: usize = 25;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

#[test]
fn test_concurrent_borrows_all_reach_the_view() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(1_000);
    let config = SyncConfig::default();
    let library = Arc::new(Library::new(store.clone(), Arc::new(clock.clone()), config.clone()));
    let admin = Session::admin("root");

    let mut updates = BTreeMap::new();
    updates.insert(
        "users/m1".to_string(),
        json!({"displayName": "Ann", "approved": true, "updatedAt": 1}),
    );
    store.update(updates).unwrap();
    let series = library.add_series(&admin, "Dune", None).unwrap();
    let books: Vec<String> = (0..WRITERS * BOOKS_PER_WRITER)
        .map(|_| library.add_book(&admin, &series, None, None).unwrap())
        .collect();

    let mut view = BorrowListView::open(store.clone(), Arc::new(clock.clone()), &config).unwrap();
    assert!(view.rows().is_empty());
    clock.advance(10);

    let handles: Vec<_> = books
        .chunks(BOOKS_PER_WRITER)
        .map(|chunk| {
            let library = library.clone();
            let admin = admin.clone();
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                chunk
                    .iter()
                    .map(|book| library.borrow_book(&admin, book, "m1").unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut borrowed = HashSet::new();
    for handle in handles {
        borrowed.extend(handle.join().unwrap());
    }
    assert_eq!(borrowed.len(), WRITERS * BOOKS_PER_WRITER);

    view.refresh().unwrap();
    let rows = view.rows();
    let seen: HashSet<String> = rows.iter().map(|r| r.borrow.id.clone()).collect();
    assert_eq!(seen, borrowed);
    assert_eq!(rows.len(), borrowed.len());
    assert!(rows.iter().all(|r| r.member_name.as_deref() == Some("Ann")));

    view.teardown();
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn test_concurrent_adds_keep_counter_exact() {
    init_tracing();

    const THREADS: usize = 8;
    const PER_THREAD: usize = 200;

    let store = Arc::new(MemoryStore::new());
    let config = SyncConfig::default();
    let library = Arc::new(Library::new(
        store.clone(),
        Arc::new(ManualClock::new(1_000)),
        config.clone(),
    ));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let library = library.clone();
            thread::spawn(move || {
                let admin = Session::admin(format!("admin-{}", t));
                for i in 0..PER_THREAD {
                    library
                        .add_series(&admin, &format!("Series {}-{}", t, i), None)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let series = store.fetch(&config.series_path).unwrap().unwrap();
    let stored = series.as_object().map_or(0, |m| m.len());
    assert_eq!(stored, THREADS * PER_THREAD);
    assert_eq!(
        store.fetch(&config.counter_for(&config.series_path)).unwrap(),
        Some(json!(THREADS * PER_THREAD))
    );
}

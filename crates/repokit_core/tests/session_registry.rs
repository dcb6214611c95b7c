mod common;

use common::{file_registry, memory_registry, Customer};
use repokit_core::{
    ErrorKind, Filter, PageRequest, RepoError, Repository, SessionRepository, UnitOfWork,
};
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn repeated_lookups_in_one_scope_share_a_session() {
    let registry = memory_registry();
    let scope = registry.begin_scope();

    let first = registry.current_session(&scope).unwrap();
    let second = registry.current_session(&scope).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other = registry.current_session(&registry.begin_scope()).unwrap();
    assert!(!Arc::ptr_eq(&first, &other));
    assert_ne!(first.lock().id(), other.lock().id());
    assert_eq!(registry.len(), 2);
}

#[test]
fn repositories_for_one_scope_work_through_one_session() {
    let registry = memory_registry();
    let scope = registry.begin_scope();

    let writer = SessionRepository::<Customer>::try_new(&registry, scope).unwrap();
    let reader = SessionRepository::<Customer>::try_new(&registry, scope).unwrap();
    assert_eq!(registry.len(), 1);

    let added = writer
        .add_entity(Customer::new("ada", Some("london"), 10))
        .unwrap();
    let loaded = reader
        .load_entities(Filter::eq("id", added.id.unwrap()))
        .first()
        .unwrap();
    assert_eq!(loaded, Some(added));
}

#[test]
fn concurrent_scopes_get_distinct_sessions_and_all_writes_land() {
    let dir = tempfile::tempdir().unwrap();
    let registry = file_registry(&dir.path().join("registry.db"));

    let session_ids: Vec<_> = std::thread::scope(|threads| {
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let registry = &registry;
                threads.spawn(move || {
                    let scope = registry.begin_scope();
                    let repo = SessionRepository::<Customer>::try_new(registry, scope).unwrap();
                    for n in 0..5 {
                        repo.add_entity(Customer::new(&format!("w{worker}-{n}"), None, n))
                            .unwrap();
                    }
                    let first = registry.current_session(&scope).unwrap().lock().id();
                    let again = registry.current_session(&scope).unwrap().lock().id();
                    assert_eq!(first, again);
                    first
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    let distinct: HashSet<_> = session_ids.iter().collect();
    assert_eq!(distinct.len(), 4);
    assert_eq!(registry.len(), 4);

    let scope = registry.begin_scope();
    let repo = SessionRepository::<Customer>::try_new(&registry, scope).unwrap();
    assert_eq!(repo.count(Filter::All).unwrap(), 20);
}

#[test]
fn concurrent_scopes_on_a_memory_store_wait_instead_of_failing() {
    let registry = memory_registry();

    std::thread::scope(|threads| {
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let registry = &registry;
                threads.spawn(move || {
                    let repo =
                        SessionRepository::<Customer>::try_new(registry, registry.begin_scope())
                            .unwrap();
                    for n in 0..50 {
                        repo.add_entity(Customer::new(&format!("m{worker}-{n}"), None, n))
                            .unwrap();
                        let page = repo.load_page_entities(&PageRequest::new(1, 5)).unwrap();
                        assert!(page.total >= page.items.len() as u64);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
    });

    let repo = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).unwrap();
    assert_eq!(repo.count(Filter::All).unwrap(), 200);
}

#[test]
fn busy_session_is_reported_instead_of_blocking() {
    let registry = memory_registry();
    let scope = registry.begin_scope();
    let repo = SessionRepository::<Customer>::try_new(&registry, scope).unwrap();

    let handle = registry.current_session(&scope).unwrap();
    let guard = handle.lock();
    let err = repo
        .add_entity(Customer::new("blocked", None, 1))
        .unwrap_err();
    assert!(matches!(err, RepoError::SessionInUse(id) if id == scope.id()));
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    drop(guard);

    assert!(repo.add_entity(Customer::new("free", None, 1)).is_ok());
}

#[test]
fn ending_a_scope_makes_the_next_call_open_a_fresh_session() {
    let registry = memory_registry();
    let scope = registry.begin_scope();
    let repo = SessionRepository::<Customer>::try_new(&registry, scope).unwrap();
    let before = registry.current_session(&scope).unwrap().lock().id();

    assert!(registry.end_scope(&scope));
    assert!(registry.is_empty());

    repo.add_entity(Customer::new("after", None, 0)).unwrap();
    let after = registry.current_session(&scope).unwrap().lock().id();
    assert_ne!(before, after);
    assert_eq!(repo.count(Filter::All).unwrap(), 1);
}

#[test]
fn thread_bound_scope_reuses_its_session_until_ended() {
    let registry = memory_registry();
    let scope = UnitOfWork::current_thread();

    let first = registry.current_session(&scope).unwrap();
    let second = registry.current_session(&UnitOfWork::current_thread()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    assert!(registry.end_scope(&scope));
    assert!(!registry.contains(&scope));
}

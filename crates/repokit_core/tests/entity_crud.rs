mod common;

use common::{memory_registry, raw_customer, Customer, CUSTOMERS_SCHEMA};
use repokit_core::{
    EntityState, ErrorKind, Filter, RepoError, Repository, SessionError, SessionRegistry,
    SessionRepository, StateTransition, Store,
};

#[test]
fn add_assigns_store_key_and_persists_row() {
    let registry = memory_registry();
    let repo = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).unwrap();

    let first = repo
        .add_entity(Customer::new("ada", Some("london"), 10))
        .unwrap();
    let second = repo.add_entity(Customer::new("bob", None, 0)).unwrap();

    let first_id = first.id.unwrap();
    assert!(second.id.unwrap() > first_id);
    assert_eq!(raw_customer(&registry, first_id), Some(first));
}

#[test]
fn add_with_explicit_key_keeps_that_key() {
    let registry = memory_registry();
    let repo = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).unwrap();

    let mut customer = Customer::new("fixed", None, 3);
    customer.id = Some(42);
    let added = repo.add_entity(customer.clone()).unwrap();

    assert_eq!(added, customer);
    assert_eq!(raw_customer(&registry, 42), Some(customer));
}

#[test]
fn update_overwrites_every_mapped_column() {
    let registry = memory_registry();
    let repo = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).unwrap();
    let added = repo
        .add_entity(Customer::new("ada", Some("london"), 10))
        .unwrap();

    let replacement = Customer {
        id: added.id,
        name: "ada lovelace".to_string(),
        city: None,
        credit: 0,
    };
    assert!(repo.update_entity(&replacement).unwrap());
    assert_eq!(raw_customer(&registry, added.id.unwrap()), Some(replacement));
}

#[test]
fn operations_matching_no_row_report_false() {
    let registry = memory_registry();
    let repo = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).unwrap();

    let mut ghost = Customer::new("ghost", None, 0);
    ghost.id = Some(999);
    assert!(!repo.update_entity(&ghost).unwrap());
    assert!(!repo.delete_entity(&ghost).unwrap());
    assert_eq!(repo.count(Filter::All).unwrap(), 0);
}

#[test]
fn delete_removes_row_once() {
    let registry = memory_registry();
    let repo = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).unwrap();
    let added = repo.add_entity(Customer::new("gone", None, 1)).unwrap();

    assert!(repo.delete_entity(&added).unwrap());
    assert_eq!(raw_customer(&registry, added.id.unwrap()), None);
    assert!(!repo.delete_entity(&added).unwrap());
}

#[test]
fn keyless_update_or_delete_is_a_contract_violation() {
    let registry = memory_registry();
    let repo = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).unwrap();
    let keyless = Customer::new("nobody", None, 0);

    let err = repo.update_entity(&keyless).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Session(SessionError::MissingKey { table: "customers" })
    ));
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    assert_eq!(
        repo.delete_entity(&keyless).unwrap_err().kind(),
        ErrorKind::ContractViolation
    );
}

#[test]
fn failed_commit_persists_nothing_and_keeps_marks_until_rejected() {
    let registry = memory_registry();
    let scope = registry.begin_scope();
    let repo = SessionRepository::<Customer>::try_new(&registry, scope).unwrap();

    let err = repo
        .add_entity(Customer::new("negative", None, -1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Commit);
    assert_eq!(repo.count(Filter::All).unwrap(), 0);

    let handle = registry.current_session(&scope).unwrap();
    assert_eq!(handle.lock().pending_count(), 1);

    // The stale mark rides along with the next commit and fails it again.
    assert_eq!(
        repo.add_entity(Customer::new("valid", None, 1))
            .unwrap_err()
            .kind(),
        ErrorKind::Commit
    );

    assert_eq!(handle.lock().reject_changes(), 2);
    assert_eq!(handle.lock().pending_count(), 0);
    repo.add_entity(Customer::new("valid", None, 1)).unwrap();
    assert_eq!(repo.count(Filter::All).unwrap(), 1);
}

#[test]
fn session_commit_applies_all_marks_atomically() {
    let registry = memory_registry();
    let scope = registry.begin_scope();
    let handle = registry.current_session(&scope).unwrap();
    let mut session = handle.lock();

    let good = session
        .track(&Customer::new("good", None, 5), StateTransition::Added)
        .unwrap();
    let bad = session
        .track(&Customer::new("bad", None, -5), StateTransition::Added)
        .unwrap();
    assert_eq!(session.state_of(good), EntityState::Added);

    let err = session.commit().unwrap_err();
    assert!(matches!(err, SessionError::Commit { pending: 2, .. }));
    assert_eq!(session.state_of(good), EntityState::Added);
    assert_eq!(session.state_of(bad), EntityState::Added);
    assert_eq!(raw_customer(&registry, 1), None);

    session.reject_changes();
    assert_eq!(session.state_of(good), EntityState::Detached);

    let retry = session
        .track(&Customer::new("good", None, 5), StateTransition::Added)
        .unwrap();
    let outcome = session.commit().unwrap();
    assert_eq!(outcome.affected, 1);
    assert_eq!(outcome.affected_by(retry), 1);
    let key = outcome.assigned_key(retry).unwrap();
    assert_eq!(session.state_of(retry), EntityState::Unchanged);
    assert_eq!(raw_customer(&registry, key).unwrap().name, "good");
}

#[test]
fn reattaching_the_same_key_reuses_the_tracked_entry() {
    let registry = memory_registry();
    let scope = registry.begin_scope();
    let handle = registry.current_session(&scope).unwrap();
    let mut session = handle.lock();

    let entry = session
        .track(&Customer::new("once", None, 1), StateTransition::Added)
        .unwrap();
    let key = session.commit().unwrap().assigned_key(entry).unwrap();
    let mut stored = Customer::new("once", None, 1);
    stored.id = Some(key);

    assert_eq!(session.attach(&stored).unwrap(), entry);
    assert_eq!(session.tracked_count(), 1);
    assert_eq!(session.state_of(entry), EntityState::Unchanged);
}

#[test]
fn repository_writes_leave_the_session_empty() {
    let registry = memory_registry();
    let scope = registry.begin_scope();
    let repo = SessionRepository::<Customer>::try_new(&registry, scope).unwrap();

    let mut last = None;
    for n in 0..20 {
        last = Some(repo.add_entity(Customer::new("grow", None, n)).unwrap());
    }
    let mut last = last.unwrap();
    last.credit = 99;
    assert!(repo.update_entity(&last).unwrap());
    assert!(repo.delete_entity(&last).unwrap());

    let handle = registry.current_session(&scope).unwrap();
    assert_eq!(handle.lock().tracked_count(), 0);
    assert_eq!(repo.count(Filter::All).unwrap(), 19);
}

#[test]
fn clear_and_detach_drop_only_settled_entries() {
    let registry = memory_registry();
    let scope = registry.begin_scope();
    let handle = registry.current_session(&scope).unwrap();
    let mut session = handle.lock();

    let settled = session
        .track(&Customer::new("settled", None, 1), StateTransition::Added)
        .unwrap();
    session.commit().unwrap();
    let pending = session
        .track(&Customer::new("pending", None, 2), StateTransition::Added)
        .unwrap();

    assert!(!session.detach(pending));
    assert_eq!(session.clear(), 1);
    assert_eq!(session.state_of(settled), EntityState::Detached);
    assert_eq!(session.state_of(pending), EntityState::Added);
    assert!(!session.detach(settled));
    assert_eq!(session.tracked_count(), 1);
}

#[test]
fn undecodable_rows_surface_as_invalid_data() {
    let registry = memory_registry();
    let repo = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).unwrap();
    registry
        .store()
        .connect()
        .unwrap()
        .execute(
            "INSERT INTO customers (name, city, credit) VALUES ('broken', NULL, 'abc');",
            [],
        )
        .unwrap();

    let err = repo.load_entities(Filter::All).to_vec().unwrap_err();
    assert!(matches!(err, RepoError::InvalidData(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn try_new_checks_table_and_columns() {
    let registry = SessionRegistry::new(Store::open_in_memory().unwrap());
    let err = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope())
        .err()
        .unwrap();
    assert!(matches!(err, RepoError::MissingRequiredTable("customers")));

    let registry = SessionRegistry::new(Store::open_in_memory().unwrap());
    registry
        .store()
        .apply_schema("CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, city TEXT);")
        .unwrap();
    let err = SessionRepository::<Customer>::try_new(&registry, registry.begin_scope())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        RepoError::MissingRequiredColumn {
            table: "customers",
            column: "credit"
        }
    ));
    assert_eq!(err.kind(), ErrorKind::ContractViolation);

    let registry = SessionRegistry::new(Store::open_in_memory().unwrap());
    registry.store().apply_schema(CUSTOMERS_SCHEMA).unwrap();
    assert!(SessionRepository::<Customer>::try_new(&registry, registry.begin_scope()).is_ok());
}

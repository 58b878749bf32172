//! End-to-end synchronization properties.

use std::sync::Arc;

use kvsync_engine::{
    BackendAdapter, BindingConfig, Consumer, Registry, StorageService, StoredProperty, SyncConfig,
    UnitSpec,
};
use kvsync_storage::{ExternalSource, LocalStorage};
use kvsync_test_utils::fixtures::{
    external_session, recording_backend, session_backend, test_config,
};
use kvsync_test_utils::generators::{arb_json_value, arb_key, arb_scalar, arb_sequence};
use kvsync_test_utils::{assertions, init_tracing, RecordingBackend};
use proptest::prelude::*;
use serde_json::{json, Value};

fn as_adapter(backend: &Arc<RecordingBackend>) -> Arc<dyn BackendAdapter> {
    Arc::clone(backend) as Arc<dyn BackendAdapter>
}

// ============================================================================
// WORKED EXAMPLE
// ============================================================================

#[test]
fn count_example_end_to_end() {
    init_tracing();
    let registry = Registry::init(test_config());

    let local = recording_backend("localStorage");
    let external = external_session("sessionStorage");
    let session: Arc<dyn BackendAdapter> = Arc::clone(&external) as Arc<dyn BackendAdapter>;
    let session_recorder = Arc::new(RecordingBackend::new(Arc::clone(&session)));

    let widget = Consumer::new("Widget");
    let count = StoredProperty::bind(
        &registry,
        &widget,
        as_adapter(&local),
        "count",
        BindingConfig::default(),
    );
    StoredProperty::bind(
        &registry,
        &widget,
        as_adapter(&session_recorder),
        "count",
        BindingConfig::default(),
    );

    // Absent + default 0: stored 0.
    assert_eq!(count.set(json!(0)).value(), &json!(0));
    assert_eq!(local.get("count", &BindingConfig::default()), Some(json!(0)));
    assert_eq!(session.get("count", &BindingConfig::default()), Some(json!(0)));

    // Another execution context writes 5 into the session store.
    session_recorder.reset();
    local.reset();
    external.store().external_write("test_count", Some("5".to_string()));
    assert_eq!(external.poll_external(), 1);

    assert_eq!(count.get().value(), &json!(5));
    assert_eq!(local.set_values("count"), vec![json!(5)]);
    assert_eq!(session_recorder.set_count("count"), 0);

    // Consumer writes 6: every backend holds it, each written exactly once.
    local.reset();
    session_recorder.reset();
    count.set(json!(6));
    assert_eq!(local.get("count", &BindingConfig::default()), Some(json!(6)));
    assert_eq!(session.get("count", &BindingConfig::default()), Some(json!(6)));
    assert_eq!(local.set_values("count"), vec![json!(6)]);
    assert_eq!(session_recorder.set_count("count"), 1);
}

// ============================================================================
// CONVERGENCE AND FIRST-WRITE RECONCILIATION
// ============================================================================

#[test]
fn consumers_sharing_a_key_converge() {
    let registry = Registry::init(test_config());
    let backend = session_backend("sessionStorage");
    let first = Consumer::new("First");
    let second = Consumer::new("Second");

    let a = StoredProperty::bind(
        &registry,
        &first,
        Arc::clone(&backend),
        "theme",
        BindingConfig::default(),
    );
    let b = StoredProperty::bind(
        &registry,
        &second,
        Arc::clone(&backend),
        "theme",
        BindingConfig::default(),
    );
    a.set(json!("light"));
    b.set(json!("ignored default"));
    b.set(json!("dark"));

    assert_eq!(a.get().value(), &json!("dark"));
    assert_eq!(b.get().value(), &json!("dark"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn writes_through_one_backend_reach_the_others() {
    let registry = Registry::init(test_config());
    let local = session_backend("localStorage");
    let session = session_backend("sessionStorage");
    let widget = Consumer::new("Widget");

    let prop = StoredProperty::bind(
        &registry,
        &widget,
        Arc::clone(&local),
        "user",
        BindingConfig::default(),
    );
    StoredProperty::bind(
        &registry,
        &widget,
        Arc::clone(&session),
        "user",
        BindingConfig::default(),
    );

    let storage = StorageService::new(&registry, Arc::clone(&session));
    storage.set("user", json!({"name": "ada"}));

    assert_eq!(local.get("user", &BindingConfig::default()), Some(json!({"name": "ada"})));
    assert_eq!(prop.get().value(), &json!({"name": "ada"}));
}

#[test]
fn update_through_service_respects_scalar_guard() {
    let registry = Registry::init(test_config());
    let storage = StorageService::new(&registry, session_backend("sessionStorage"));
    storage.set("count", json!(1));
    assertions::assert_invalid_update_target(&storage.update("count", json!({"a": 1})));
}

// ============================================================================
// CYCLE PREVENTION AND IDEMPOTENCE
// ============================================================================

#[test]
fn propagation_never_writes_back_to_origin() {
    let registry = Registry::init(test_config());
    let a = recording_backend("a");
    let b = recording_backend("b");
    let unit = registry.get_or_create(
        UnitSpec::new("k")
            .with_backend(as_adapter(&a), BindingConfig::default())
            .with_backend(as_adapter(&b), BindingConfig::default()),
    );

    // A write landing in `a` directly, bypassing the recorder.
    a.inner().set("k", json!("v"), &BindingConfig::default());

    assert_eq!(a.set_count("k"), 0);
    assert_eq!(b.set_values("k"), vec![json!("v")]);
    assert_eq!(unit.read(), Some(json!("v")));

    b.reset();
    assert_eq!(unit.propagate(&json!("v"), Some("a")), 0);
    assert_eq!(b.total_sets(), 0);
}

#[test]
fn lifetime_cookie_binding_survives_sync() {
    let registry = Registry::init(SyncConfig::new());
    let jar = Arc::new(kvsync_storage::CookieJar::new("example.com"));
    let cookies: Arc<dyn BackendAdapter> = Arc::new(
        kvsync_storage::CookiesStorage::cookies(Arc::clone(&jar), registry.config()).unwrap(),
    );
    let widget = Consumer::new("Widget");

    let token = StoredProperty::bind(
        &registry,
        &widget,
        cookies,
        "token",
        BindingConfig::new().with_expires(kvsync_engine::Expiry::Lifetime),
    );
    token.set(json!("abc"));
    assert!(jar.document_cookie().contains("kvsync_token=\"abc\""));
}

// ============================================================================
// DURABLE STORE
// ============================================================================

#[test]
fn durable_store_change_from_another_process_reaches_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let registry = Registry::init(test_config());

    let local = Arc::new(LocalStorage::local(&path, registry.config()).unwrap());
    let session = session_backend("sessionStorage");
    let widget = Consumer::new("Widget");
    let theme = StoredProperty::bind(
        &registry,
        &widget,
        Arc::clone(&local) as Arc<dyn BackendAdapter>,
        "theme",
        BindingConfig::default(),
    );
    StoredProperty::bind(
        &registry,
        &widget,
        Arc::clone(&session),
        "theme",
        BindingConfig::default(),
    );
    theme.set(json!("light"));

    // A second process sharing the file.
    let other = LocalStorage::local(&path, &test_config()).unwrap();
    assert_eq!(other.get("theme", &BindingConfig::default()), Some(json!("light")));
    other.set("theme", json!("dark"), &BindingConfig::default());

    assert_eq!(local.poll_external(), 1);
    assert_eq!(session.get("theme", &BindingConfig::default()), Some(json!("dark")));
    assert_eq!(theme.get().value(), &json!("dark"));
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn last_consumer_detach_disposes_unit_and_untracks_key() {
    let registry = Registry::init(test_config());
    let local = session_backend("localStorage");
    let session = session_backend("sessionStorage");
    let first = Consumer::new("First");
    let second = Consumer::new("Second");

    StoredProperty::bind(&registry, &first, Arc::clone(&local), "k", BindingConfig::default());
    StoredProperty::bind(&registry, &second, Arc::clone(&session), "k", BindingConfig::default());
    assert_eq!(local.tracked_keys(), vec!["k".to_string()]);
    assert_eq!(session.tracked_keys(), vec!["k".to_string()]);

    first.destroy();
    assert!(registry.get("k").is_some());

    second.destroy();
    assert!(registry.get("k").is_none());
    assert!(local.tracked_keys().is_empty());
    assert!(session.tracked_keys().is_empty());
}

#[test]
fn tracked_push_matches_native_push() {
    let registry = Registry::init(test_config());
    let backend = session_backend("sessionStorage");
    let widget = Consumer::new("Widget");
    let list = StoredProperty::bind(
        &registry,
        &widget,
        Arc::clone(&backend),
        "list",
        BindingConfig::default(),
    );

    let mut wrapped = list.set(json!([1, 2]));
    let tracked = wrapped.as_tracked_mut().unwrap();

    let mut native = vec![json!(1), json!(2)];
    native.push(json!(3));
    assert_eq!(tracked.push(json!(3)).unwrap(), native.len());
    assert_eq!(backend.get("list", &BindingConfig::default()), Some(Value::Array(native)));
}

#[test]
fn tracked_operation_on_scalar_is_rejected() {
    let registry = Registry::init(test_config().with_mutate_objects(true));
    let backend = session_backend("sessionStorage");
    let unit = registry.get_or_create(
        UnitSpec::new("obj").with_backend(Arc::clone(&backend), BindingConfig::default()),
    );
    let mut wrapped = unit.assign(json!({"a": 1}), &BindingConfig::default(), None);
    let tracked = wrapped.as_tracked_mut().unwrap();
    assertions::assert_not_a_sequence(&tracked.pop());
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_first_write_never_overwrites_stored(
        key in arb_key(),
        stored in arb_json_value(),
        default in arb_json_value(),
    ) {
        let registry = Registry::init(test_config());
        let backend = session_backend("sessionStorage");
        backend.set(&key, stored.clone(), &BindingConfig::default());

        let widget = Consumer::new("Widget");
        let prop = StoredProperty::bind(
            &registry,
            &widget,
            Arc::clone(&backend),
            &key,
            BindingConfig::default(),
        );
        let result = prop.set(default).into_value();

        prop_assert!(kvsync_core::deep_equal(&result, &stored));
        prop_assert!(kvsync_core::deep_equal_opt(
            backend.get(&key, &BindingConfig::default()).as_ref(),
            Some(&stored)
        ));
    }

    #[test]
    fn prop_later_writes_always_win(
        key in arb_key(),
        first in arb_scalar(),
        second in arb_json_value(),
    ) {
        let registry = Registry::init(test_config());
        let backend = session_backend("sessionStorage");
        let widget = Consumer::new("Widget");
        let prop = StoredProperty::bind(
            &registry,
            &widget,
            Arc::clone(&backend),
            &key,
            BindingConfig::default(),
        );

        prop.set(first);
        prop.set(second.clone());
        prop_assert_eq!(backend.get(&key, &BindingConfig::default()), Some(second));
    }

    #[test]
    fn prop_repeated_value_writes_nothing(key in arb_key(), value in arb_json_value()) {
        let registry = Registry::init(test_config());
        let a = recording_backend("a");
        let b = recording_backend("b");
        let unit = registry.get_or_create(
            UnitSpec::new(key.clone())
                .with_backend(as_adapter(&a), BindingConfig::default())
                .with_backend(as_adapter(&b), BindingConfig::default()),
        );

        unit.propagate(&value, None);
        a.reset();
        b.reset();

        prop_assert_eq!(unit.propagate(&value, None), 0);
        prop_assert_eq!(a.total_sets() + b.total_sets(), 0);
    }

    #[test]
    fn prop_push_round_trip(items in arb_sequence(), item in arb_scalar()) {
        let registry = Registry::init(test_config());
        let backend = session_backend("sessionStorage");
        let unit = registry.get_or_create(
            UnitSpec::new("list").with_backend(Arc::clone(&backend), BindingConfig::default()),
        );

        let mut wrapped = unit.assign(Value::Array(items.clone()), &BindingConfig::default(), None);
        let tracked = wrapped.as_tracked_mut().unwrap();

        let mut native = items;
        native.push(item.clone());
        prop_assert_eq!(tracked.push(item).unwrap(), native.len());
        prop_assert_eq!(
            backend.get("list", &BindingConfig::default()),
            Some(Value::Array(native))
        );
    }
}

use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("changecache".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    NOTIFICATIONS_TOTAL.with_label_values(&[OUTCOME_DELIVERED]).inc();
    let metrics = &registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"changecache_notifications_total"),
        "Missing changecache_notifications_total"
    );
}

#[test]
fn test_counter_increment() {
    let before = NOTIFICATIONS_TOTAL.with_label_values(&["test-only"]).get();

    NOTIFICATIONS_TOTAL.with_label_values(&["test-only"]).inc();
    NOTIFICATIONS_TOTAL.with_label_values(&["test-only"]).inc();

    let value = NOTIFICATIONS_TOTAL.with_label_values(&["test-only"]).get();
    assert_eq!(value - before, 2, "Counter should increment correctly");
}

#[test]
fn test_gather_metrics_renders_text_format() {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));
    CACHE_INVALIDATIONS.inc();

    let body = gather_metrics();
    assert!(body.contains("cache_invalidations"));
}

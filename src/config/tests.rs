use serial_test::serial;

use super::*;

#[test]
fn defaults_resolve_without_any_sources() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.store.cache_root, PathBuf::from("static-cache"));
    assert_eq!(settings.store.state_dir, PathBuf::from(".restatic"));
    assert_eq!(settings.store.backend, StateBackend::File);
    assert_eq!(settings.store.ttl, Duration::ZERO);
    assert!(settings.builder.enabled);
    assert_eq!(settings.builder.bypass_param, "restatic");
    assert!(settings.builder.user_agent.starts_with("restatic/"));
    assert!(settings.builder.optimize.is_none());
    assert_eq!(settings.queue.max_batch_size.get(), 10);
    assert_eq!(settings.queue.max_retries, 3);
    assert_eq!(
        settings.queue.backoff,
        vec![
            Duration::from_secs(30),
            Duration::from_secs(120),
            Duration::from_secs(300)
        ]
    );
    assert_eq!(settings.webhook.mode, WebhookMode::Debounced);
    assert!(settings.webhook.url.is_none());
    assert_eq!(settings.log.capacity.get(), 100);
}

#[test]
fn queue_settings_convert_into_policy() {
    let mut raw = RawSettings::default();
    raw.queue.max_batch_size = Some(4);
    raw.queue.max_retries = Some(1);
    raw.queue.backoff_seconds = Some(vec![5]);

    let settings = Settings::from_raw(raw).expect("valid settings");
    let policy = settings.queue.policy();

    assert_eq!(policy.max_batch_size, 4);
    assert_eq!(policy.max_retries, 1);
    assert_eq!(policy.backoff, vec![Duration::from_secs(5)]);
    assert_eq!(policy.enqueue_delay, Duration::from_secs(2));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.store.cache_root = Some(PathBuf::from("/srv/from-file"));

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        log_json: Some(true),
        cache_root: Some(PathBuf::from("/srv/from-cli")),
        state_dir: None,
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
    assert_eq!(settings.store.cache_root, PathBuf::from("/srv/from-cli"));
    assert_eq!(settings.store.state_dir, PathBuf::from(".restatic"));
}

#[test]
fn rejects_zero_batch_size() {
    let mut raw = RawSettings::default();
    raw.queue.max_batch_size = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero batch size must fail");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "queue.max_batch_size",
            ..
        }
    ));
}

#[test]
fn rejects_empty_backoff_schedule() {
    let mut raw = RawSettings::default();
    raw.queue.backoff_seconds = Some(Vec::new());

    let err = Settings::from_raw(raw).expect_err("empty backoff must fail");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "queue.backoff_seconds",
            ..
        }
    ));
}

#[test]
fn rejects_unknown_backend_and_bad_bypass_param() {
    let mut raw = RawSettings::default();
    raw.store.backend = Some("redis".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.builder.bypass_param = Some("a b".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn optimize_is_opt_in_with_per_stage_toggles() {
    let mut raw = RawSettings::default();
    raw.builder.optimize = Some(true);
    raw.builder.resource_hints = Some(false);
    let settings = Settings::from_raw(raw).expect("valid settings");

    let options = settings.builder.options();
    assert_eq!(
        options.optimize,
        Some(OptimizeOptions {
            minify_html: true,
            resource_hints: false,
        })
    );
}

#[test]
fn webhook_mode_parsing() {
    let mut raw = RawSettings::default();
    raw.webhook.url = Some("https://hooks.example.com/site".to_string());
    raw.webhook.mode = Some("immediate".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.webhook.notify_mode(), NotifyMode::Immediate);

    let mut raw = RawSettings::default();
    raw.webhook.debounce_seconds = Some(0);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.webhook.notify_mode(),
        NotifyMode::Debounced(Duration::from_secs(1))
    );

    let mut raw = RawSettings::default();
    raw.webhook.mode = Some("sometimes".to_string());
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.webhook.url = Some("ftp://hooks.example.com".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn site_settings_merge_category_priorities() {
    let mut raw = RawSettings::default();
    raw.site.home_url = Some("https://example.com/".to_string());
    raw.site.category_priorities = BTreeMap::from([
        ("Post".to_string(), 3),
        ("event".to_string(), 7),
    ]);
    raw.site.default_priority = Some(12);
    raw.site.targets = vec![RawTarget {
        id: "42".to_string(),
        category: "Product".to_string(),
        url: "https://example.com/shop/widget/".to_string(),
    }];

    let settings = Settings::from_raw(raw).expect("valid settings");
    let priorities = &settings.site.priorities;

    assert_eq!(priorities.for_category(&TargetCategory::new("product")), 1);
    assert_eq!(priorities.for_category(&TargetCategory::new("post")), 3);
    assert_eq!(priorities.for_category(&TargetCategory::new("event")), 7);
    assert_eq!(priorities.for_category(&TargetCategory::new("unknown")), 12);
    assert_eq!(settings.site.targets[0].category.as_str(), "product");
    assert_eq!(settings.site.label(), "https://example.com/");
}

#[test]
fn parse_enqueue_arguments() {
    let args = CliArgs::parse_from([
        "restatic",
        "enqueue",
        "--id",
        "42",
        "--category",
        "product",
        "--priority",
        "-3",
        "https://example.com/shop/widget/",
    ]);

    match args.command.expect("enqueue command") {
        Command::Enqueue(enqueue) => {
            assert_eq!(enqueue.target_id, "42");
            assert_eq!(enqueue.category, "product");
            assert_eq!(enqueue.priority, Some(-3));
            assert_eq!(enqueue.url.path(), "/shop/widget/");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_global_overrides_after_subcommand() {
    let args = CliArgs::parse_from([
        "restatic",
        "status",
        "--state-dir",
        "/tmp/restatic-state",
        "--log-json",
        "yes",
    ]);

    assert!(matches!(args.command, Some(Command::Status)));
    assert_eq!(
        args.overrides.state_dir,
        Some(PathBuf::from("/tmp/restatic-state"))
    );
    assert_eq!(args.overrides.log_json, Some(true));
}

#[test]
fn parse_log_defaults_limit() {
    let args = CliArgs::parse_from(["restatic", "log"]);
    match args.command.expect("log command") {
        Command::Log(log) => assert_eq!(log.limit, 20),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
#[serial]
fn environment_overrides_nested_keys() {
    // SAFETY: serialized with every other test that touches the process environment.
    unsafe {
        std::env::set_var("RESTATIC_QUEUE__MAX_BATCH_SIZE", "3");
        std::env::set_var("RESTATIC_WEBHOOK__MODE", "off");
    }

    let args = CliArgs::parse_from(["restatic", "status"]);
    let result = load(&args);

    unsafe {
        std::env::remove_var("RESTATIC_QUEUE__MAX_BATCH_SIZE");
        std::env::remove_var("RESTATIC_WEBHOOK__MODE");
    }

    let settings = result.expect("settings load");
    assert_eq!(settings.queue.max_batch_size.get(), 3);
    assert_eq!(settings.webhook.mode, WebhookMode::Off);
}

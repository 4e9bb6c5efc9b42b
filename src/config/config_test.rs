use serial_test::serial;
use temp_env::with_vars;

use super::*;
use crate::Error;

fn cleanup_all_env_vars() {
    for (key, _) in std::env::vars() {
        if key.starts_with("DCLUSTER__") || key == "CONFIG_PATH" {
            std::env::remove_var(&key);
        }
    }
}

#[test]
#[serial]
fn default_config_should_initialize_with_hardcoded_values() {
    let settings = Settings::default();

    assert!(!settings.cluster.node_id.as_str().is_empty());
    assert!(settings.cluster.seeds.is_empty());
    assert_eq!(settings.policy.open_connection_timeout_in_ms, 5_000);
    assert_eq!(settings.policy.handshake_timeout_in_ms, 5_000);
    assert_eq!(settings.network.max_inflight_handshakes, 1024);
    assert!(settings.network.tcp_nodelay);
}

#[test]
#[serial]
fn default_config_passes_validation() {
    assert!(Settings::default().validate().is_ok());
}

#[test]
#[serial]
fn new_should_merge_environment_overrides() {
    cleanup_all_env_vars();
    with_vars(
        vec![
            ("DCLUSTER__POLICY__OPEN_CONNECTION_TIMEOUT_IN_MS", Some("10000")),
            ("DCLUSTER__CLUSTER__NODE_ID", Some("silo-7")),
        ],
        || {
            let settings = Settings::new().unwrap();

            assert_eq!(settings.policy.open_connection_timeout_in_ms, 10_000);
            assert_eq!(settings.cluster.node_id.as_str(), "silo-7");
        },
    );
}

#[test]
#[serial]
fn new_should_parse_seed_list_from_environment() {
    cleanup_all_env_vars();
    with_vars(
        vec![(
            "DCLUSTER__CLUSTER__SEEDS",
            Some("127.0.0.1:7001,n2.cluster.local:7002"),
        )],
        || {
            let settings = Settings::new().unwrap();

            assert_eq!(
                settings.cluster.seeds,
                vec!["127.0.0.1:7001".to_string(), "n2.cluster.local:7002".to_string()]
            );
            assert!(settings.validate().is_ok());
        },
    );
}

#[test]
#[serial]
fn with_override_config_should_merge_file_settings() {
    cleanup_all_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("node.toml");

    std::fs::write(
        &config_path,
        r#"
        [cluster]
        node_id = "primary"
        listen_address = "127.0.0.1:11111"

        [policy]
        open_connection_timeout_in_ms = 10000
        response_timeout_in_ms = 10000
        "#,
    )
    .unwrap();

    let empty_vars: Vec<(&str, Option<&str>)> = vec![];
    with_vars(empty_vars, || {
        let base = Settings::new().expect("success");
        let result = base.with_override_config(config_path.to_str().unwrap());

        assert!(result.is_ok());
        let settings = result.unwrap();

        assert_eq!(settings.cluster.node_id.as_str(), "primary");
        assert_eq!(settings.cluster.listen_address.port(), 11111);
        assert_eq!(settings.policy.open_connection_timeout_in_ms, 10_000);
        assert_eq!(settings.policy.response_timeout_in_ms, 10_000);
        // untouched values keep their defaults
        assert_eq!(settings.policy.max_missed_probes, 3);
    });
}

#[test]
#[serial]
fn config_path_env_should_be_loaded_by_new() {
    cleanup_all_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("cluster.toml");
    std::fs::write(
        &config_path,
        r#"
        [network]
        max_inflight_handshakes = 16
        "#,
    )
    .unwrap();

    with_vars(
        vec![("CONFIG_PATH", Some(config_path.to_str().unwrap()))],
        || {
            let settings = Settings::new().unwrap();
            assert_eq!(settings.network.max_inflight_handshakes, 16);
        },
    );
}

#[test]
fn validation_should_fail_with_duplicate_seeds() {
    let mut settings = Settings::default();
    let seed = "n1.cluster.local:7001".to_string();
    settings.cluster.seeds = vec![seed.clone(), seed];

    let result = settings.validate();
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn validation_should_fail_when_node_is_its_own_seed() {
    let mut settings = Settings::default();
    settings.cluster.listen_address = "127.0.0.1:7001".parse().unwrap();
    settings.cluster.seeds = vec!["127.0.0.1:7001".to_string()];

    assert!(settings.validate().is_err());
}

#[test]
fn validation_should_fail_with_malformed_seeds() {
    for seed in ["n1.cluster.local", "n1.cluster.local:0", ":7001", "n1:port"] {
        let mut settings = Settings::default();
        settings.cluster.seeds = vec![seed.to_string()];

        assert!(
            matches!(settings.validate(), Err(Error::Config(_))),
            "expected rejection for {seed}"
        );
    }
}

#[test]
fn validation_should_require_advertise_address_for_wildcard_bind() {
    let mut settings = Settings::default();
    settings.cluster.listen_address = "0.0.0.0:7001".parse().unwrap();
    assert!(matches!(settings.clone().validate(), Err(Error::Config(_))));

    settings.cluster.advertise_address = Some("10.0.0.5:7001".parse().unwrap());
    assert!(settings.clone().validate().is_ok());

    settings.cluster.advertise_address = Some("[::]:7001".parse().unwrap());
    assert!(settings.validate().is_err());
}

#[test]
fn validation_should_fail_when_advertised_address_is_a_seed() {
    let mut settings = Settings::default();
    settings.cluster.listen_address = "0.0.0.0:7001".parse().unwrap();
    settings.cluster.advertise_address = Some("10.0.0.5:7001".parse().unwrap());
    settings.cluster.seeds = vec!["10.0.0.5:7001".to_string()];

    assert!(settings.validate().is_err());
}

#[test]
#[serial]
fn advertise_address_should_load_from_file() {
    cleanup_all_env_vars();
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("node.toml");
    std::fs::write(
        &config_path,
        r#"
        [cluster]
        listen_address = "0.0.0.0:7001"
        advertise_address = "10.0.0.5:7001"
        seeds = ["n1.cluster.local:7001"]
        "#,
    )
    .unwrap();

    let settings = Settings::default()
        .with_override_config(config_path.to_str().unwrap())
        .unwrap();
    assert_eq!(
        settings.cluster.advertise_address,
        Some("10.0.0.5:7001".parse().unwrap())
    );
    assert_eq!(settings.cluster.seeds, vec!["n1.cluster.local:7001".to_string()]);
}

#[test]
fn validation_should_fail_with_tiny_frame_size() {
    let mut settings = Settings::default();
    settings.network.max_frame_size = 100;

    assert!(settings.validate().is_err());
}

#[test]
fn validation_should_fail_with_zero_handshake_slots() {
    let mut settings = Settings::default();
    settings.network.max_inflight_handshakes = 0;

    assert!(settings.validate().is_err());
}

#[test]
fn validation_should_fail_with_inverted_backoff() {
    let mut settings = Settings::default();
    settings.retry.gateway.base_delay_ms = 10_000;
    settings.retry.gateway.max_delay_ms = 100;

    assert!(settings.validate().is_err());
}

#[test]
fn backoff_delay_is_capped_by_max_delay() {
    let policy = BackoffPolicy {
        max_retries: 5,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
    };

    let first = policy.delay_for(0);
    assert!(first <= std::time::Duration::from_millis(100));
    assert!(first >= std::time::Duration::from_millis(90));

    let late = policy.delay_for(10);
    assert!(late <= std::time::Duration::from_millis(1_000));
    assert!(late >= std::time::Duration::from_millis(900));
}

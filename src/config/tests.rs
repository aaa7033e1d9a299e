use serial_test::serial;

use super::load_config;
use super::settings::Settings;
use crate::broker::OverflowPolicy;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.http_port, 3000);
    assert_eq!(settings.server.ws_port, 3001);
    assert_eq!(settings.server.api_key, None);
    assert_eq!(settings.broker.queue_capacity, 100);
    assert_eq!(settings.broker.overflow_policy, OverflowPolicy::Disconnect);
    assert_eq!(settings.broker.replay_capacity, 100);
    assert_eq!(settings.broker.heartbeat_secs, 30);
    assert_eq!(settings.server.ws_addr(), "127.0.0.1:3001");
}

#[test]
#[serial]
fn test_environment_overrides() {
    temp_env::with_vars(
        [
            ("RELAYPUB_SERVER__WS_PORT", Some("9001")),
            ("RELAYPUB_SERVER__API_KEY", Some("secret")),
            ("RELAYPUB_BROKER__OVERFLOW_POLICY", Some("drop-oldest")),
            ("RELAYPUB_BROKER__QUEUE_CAPACITY", Some("7")),
        ],
        || {
            let settings = load_config().unwrap();
            assert_eq!(settings.server.ws_port, 9001);
            assert_eq!(settings.server.api_key.as_deref(), Some("secret"));
            assert_eq!(settings.broker.overflow_policy, OverflowPolicy::DropOldest);
            assert_eq!(settings.broker.queue_capacity, 7);
            // Untouched keys keep their defaults.
            assert_eq!(settings.server.host, "127.0.0.1");
        },
    );
}

#[test]
#[serial]
fn test_zero_capacity_is_rejected() {
    temp_env::with_var("RELAYPUB_BROKER__QUEUE_CAPACITY", Some("0"), || {
        assert!(load_config().is_err());
    });
}

use std::time::Duration;

use sonora_engine::{ConfigError, MixaheadConfig, Simulation, SimulationConfig};

#[test]
fn defaults_are_valid() {
    let config = SimulationConfig::default();
    config.validate().unwrap();
    assert_eq!(config.sample_rate, 44_100);
    assert_eq!(config.block_size, 1024);
    assert_eq!(config.threads, 1);
}

#[test]
fn block_size_must_be_a_multiple_of_four() {
    assert!(SimulationConfig::new(48_000, 0).validate().is_err());
    assert!(SimulationConfig::new(48_000, 130).validate().is_err());
    assert!(SimulationConfig::new(48_000, 128).validate().is_ok());
    assert!(Simulation::new(SimulationConfig::new(48_000, 6)).is_err());
}

#[test]
fn block_duration_follows_rate_and_size() {
    let config = SimulationConfig::new(48_000, 480);
    assert_eq!(config.block_duration(), Duration::from_millis(10));
}

#[test]
fn available_parallelism_uses_at_least_one_thread() {
    let config = SimulationConfig::default().with_available_parallelism();
    assert!(config.threads >= 1);
    config.validate().unwrap();
}

#[test]
fn partial_json_falls_back_to_defaults() {
    let config = SimulationConfig::from_json(r#"{ "sample_rate": 48000, "threads": 4 }"#).unwrap();
    assert_eq!(config.sample_rate, 48_000);
    assert_eq!(config.threads, 4);
    assert_eq!(config.block_size, SimulationConfig::default().block_size);
}

#[test]
fn invalid_json_is_reported() {
    assert!(matches!(
        SimulationConfig::from_json("{ not json"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        SimulationConfig::from_json(r#"{ "threads": 0 }"#),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn mixahead_config_round_trips_through_json() {
    let config = MixaheadConfig::default()
        .with_blocks(6)
        .with_latency_bounds(0.005, 0.01, 0.05);
    let text = serde_json::to_string(&config).unwrap();
    let parsed: MixaheadConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, config);
}

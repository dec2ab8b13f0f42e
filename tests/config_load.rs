// tests/config_load.rs
use std::{env, fs};

use energy_monitor::config::{
    EnergyConfig, ENV_CONFIG_PATH, ENV_DATA_DIR, ENV_LISTEN_ADDR, ENV_PROVIDER_ADDR, ENV_PV_ADDR,
};
use energy_monitor::meter::{Channel, ShellyModel};

const FULL_TOML: &str = r#"
listen_addr = "127.0.0.1:9000"
data_dir = "/var/lib/energy"
aggregate_interval_secs = 2
rollup_interval_secs = 30
horizon_minutes = 70

[provider_meter]
addr = "10.0.0.2"
model = "shelly3em"

[pv_meter]
addr = "10.0.0.3"
model = "shellypmmini"
poll_interval_secs = 5
channels = ["a", "b"]
"#;

fn clear_env() {
    for key in [ENV_CONFIG_PATH, ENV_LISTEN_ADDR, ENV_DATA_DIR, ENV_PROVIDER_ADDR, ENV_PV_ADDR] {
        env::remove_var(key);
    }
}

#[test]
fn parses_every_field() {
    let cfg = EnergyConfig::from_toml_str(FULL_TOML).unwrap();
    assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
    assert_eq!(cfg.data_dir.to_str(), Some("/var/lib/energy"));
    assert_eq!(cfg.aggregate_interval().as_secs(), 2);
    assert_eq!(cfg.rollup_interval().as_secs(), 30);
    assert_eq!(cfg.horizon_minutes, 70);
    assert_eq!(cfg.channel_horizon_minutes, 20);
    assert_eq!(cfg.provider_meter.model, ShellyModel::Shelly3em);
    assert_eq!(cfg.pv_meter.model, ShellyModel::ShellyPmMini);
    assert_eq!(cfg.pv_meter.poll_interval().as_secs(), 5);
    assert_eq!(cfg.pv_meter.channels, vec![Channel::A, Channel::B]);
    assert!(cfg.metrics);
}

#[test]
fn unknown_model_is_rejected() {
    let err = EnergyConfig::from_toml_str(
        r#"
[provider_meter]
addr = "x"
model = "shelly_plug"
"#,
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("shelly_plug"));
}

#[serial_test::serial]
#[test]
fn env_path_and_overrides() {
    clear_env();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("energy.toml");
    fs::write(&path, FULL_TOML).unwrap();

    env::set_var(ENV_CONFIG_PATH, path.display().to_string());
    env::set_var(ENV_PV_ADDR, " http://10.0.0.99 ");
    env::set_var(ENV_DATA_DIR, "");

    let cfg = EnergyConfig::load_default().unwrap();
    assert_eq!(cfg.pv_meter.addr, "http://10.0.0.99");
    assert_eq!(cfg.provider_meter.addr, "10.0.0.2");
    // empty override is ignored
    assert_eq!(cfg.data_dir.to_str(), Some("/var/lib/energy"));

    clear_env();
}

#[serial_test::serial]
#[test]
fn env_path_must_exist() {
    clear_env();
    env::set_var(ENV_CONFIG_PATH, "/definitely/not/here/energy.toml");
    let err = EnergyConfig::load_default().unwrap_err();
    assert!(err.to_string().contains(ENV_CONFIG_PATH));
    clear_env();
}

#[serial_test::serial]
#[test]
fn defaults_plus_env_addresses() {
    clear_env();
    // isolate CWD so the repo's config/energy.toml is not picked up
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    assert!(EnergyConfig::load_default().is_err());

    env::set_var(ENV_PROVIDER_ADDR, "10.1.1.1");
    env::set_var(ENV_PV_ADDR, "10.1.1.2");
    env::set_var(ENV_LISTEN_ADDR, "127.0.0.1:0");
    let cfg = EnergyConfig::load_default().unwrap();
    assert_eq!(cfg.listen_addr, "127.0.0.1:0");
    assert_eq!(cfg.provider_meter.model, ShellyModel::Shelly3em);
    assert_eq!(cfg.pv_meter.model, ShellyModel::Shelly1pro);
    assert_eq!(cfg.rollup_interval_secs, 60);

    clear_env();
    env::set_current_dir(&old).unwrap();
}

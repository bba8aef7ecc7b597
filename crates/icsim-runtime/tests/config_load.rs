use std::path::PathBuf;
use std::time::Duration;

use icsim_runtime::protocol::RegisterProtocol;
use icsim_runtime::{Direction, RuntimeError, StoreKind, TagValue, TestbedConfig};

fn testbeds_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../testbeds")
}

const BASE: &str = r#"
[store]
type = "memory"

[[controllers]]
id = 1
name = "PLC1"
address = "127.0.0.1:5502"

[tags.belt]
id = 1
owner = 1
direction = "output"
"#;

fn invalid(text: &str) -> String {
    match TestbedConfig::from_toml_str(text) {
        Err(RuntimeError::InvalidConfig(message)) => message.to_string(),
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn shipped_conveyor_testbed_loads() {
    let config = TestbedConfig::load(testbeds_dir().join("conveyor.toml")).expect("load");
    assert_eq!(config.store.kind, StoreKind::Sqlite);
    let process = config.process.as_ref().expect("process");
    assert_eq!(process.period, Duration::from_millis(100));

    let plc = config.controller(1).expect("PLC1");
    assert_eq!(plc.name, "PLC1");
    assert_eq!(plc.protocol, RegisterProtocol::ModbusTcp);
    assert!(plc.record_snapshots);
    assert_eq!(config.addresses().get(&1), Some(&plc.address));
    assert!(config.panel("HMI1").is_ok());

    let names: Vec<&str> = config.tags.iter().map(|tag| tag.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "part_present",
            "part_distance_to_sensor_value",
            "conveyor_belt_engine_status",
            "conveyor_belt_engine_mode",
        ]
    );
    let distance = config.tags.get("part_distance_to_sensor_value").expect("tag");
    assert_eq!(distance.direction, Direction::Input);
    assert_eq!(distance.default, TagValue::from(5.0));
    assert!(distance.fault_factor > 0.0);
}

#[test]
fn unknown_store_type_is_rejected() {
    let text = BASE.replace("type = \"memory\"", "type = \"redis\"");
    assert!(TestbedConfig::from_toml_str(&text).is_err());
}

#[test]
fn bad_direction_is_rejected() {
    let text = BASE.replace("direction = \"output\"", "direction = \"sideways\"");
    assert!(TestbedConfig::from_toml_str(&text).is_err());
}

#[test]
fn duplicate_tag_ids_are_config_errors() {
    let text = format!("{BASE}\n[tags.mode]\nid = 1\nowner = 1\ndirection = \"output\"\n");
    let message = invalid(&text);
    assert!(message.contains("duplicate tag id 1"), "{message}");
}

#[test]
fn duplicate_controller_ids_are_config_errors() {
    let text = BASE.replace(
        "[tags.belt]",
        "[[controllers]]\nid = 1\nname = \"PLC2\"\naddress = \"127.0.0.1:5503\"\n\n[tags.belt]",
    );
    let message = invalid(&text);
    assert!(message.contains("duplicate controller id 1"), "{message}");
}

#[test]
fn unknown_fields_are_rejected() {
    let text = BASE.replace("id = 1\nname", "id = 1\ncolour = \"red\"\nname");
    invalid(&text);
}

#[test]
fn malformed_address_is_rejected() {
    let text = BASE.replace("127.0.0.1:5502", "not an address");
    assert!(TestbedConfig::from_toml_str(&text).is_err());
}

#[test]
fn missing_file_names_the_path() {
    let message = match TestbedConfig::load(testbeds_dir().join("missing.toml")) {
        Err(RuntimeError::InvalidConfig(message)) => message.to_string(),
        other => panic!("expected InvalidConfig, got {other:?}"),
    };
    assert!(message.contains("missing.toml"), "{message}");
}

#[test]
fn tag_ids_beyond_the_register_space_are_rejected() {
    let text = BASE.replace("id = 1\nowner = 1", "id = 40000\nowner = 1");
    let message = invalid(&text);
    assert!(message.contains("id 40000"), "{message}");

    let text = BASE.replace("id = 1\nowner = 1", &format!("id = {}\nowner = 1", icsim_runtime::MAX_TAG_ID));
    let config = TestbedConfig::from_toml_str(&text).expect("highest addressable id loads");
    assert_eq!(config.tags.get("belt").expect("belt").id, 32_767);
}

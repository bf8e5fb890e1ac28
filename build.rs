// sensornet - Build Script
//
// Resolves the capability flags of this build before compilation and
// generates $OUT_DIR/capabilities.rs. A conflicting flag combination fails
// the build with the resolver's diagnostic.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

#[allow(dead_code)]
#[path = "src/features/resolve.rs"]
mod resolve;

use resolve::*;

const SETTINGS: &[&str] = &[
    "SENSORNET_PORT",
    "SENSORNET_CONTROLLER_IP",
    "SENSORNET_CONTROLLER_URL",
    "SENSORNET_NODE_ID",
    "SENSORNET_MQTT_PUBLISH_PREFIX",
    "SENSORNET_MQTT_SUBSCRIBE_PREFIX",
    "SENSORNET_MQTT_CLIENT_ID",
    "SENSORNET_BAUD_RATE",
    "SENSORNET_SERIAL_OUTPUT_SIZE",
];

const REQUESTABLE: &[Feature] = &[
    Feature::Repeater,
    Feature::RamRoutingTable,
    Feature::NodeWhitelisting,
    Feature::OtaFirmware,
    Feature::InclusionMode,
    Feature::InclusionButton,
    Feature::UseUdp,
    Feature::PassiveNode,
    Feature::Debug,
    Feature::CoreOnly,
    Feature::DisabledSerial,
];

fn main() {
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    // ESP-IDF environment setup (MUST be first!)
    if target_os == "espidf" {
        embuild::espidf::sysenv::output();
    }

    println!("cargo:rerun-if-changed=src/features/resolve.rs");
    for setting in SETTINGS {
        println!("cargo:rerun-if-env-changed={}", setting);
    }

    // Get git version info
    let version = env!("CARGO_PKG_VERSION");
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=VERSION_STRING=sensornet v{}-g{}", version, git_hash);

    let setting = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
    let port = setting("SENSORNET_PORT");
    let controller_ip = setting("SENSORNET_CONTROLLER_IP");
    let controller_url = setting("SENSORNET_CONTROLLER_URL");
    let node_id = setting("SENSORNET_NODE_ID");
    let publish_prefix = setting("SENSORNET_MQTT_PUBLISH_PREFIX");
    let subscribe_prefix = setting("SENSORNET_MQTT_SUBSCRIBE_PREFIX");
    let client_id = setting("SENSORNET_MQTT_CLIENT_ID");
    let baud_rate = setting("SENSORNET_BAUD_RATE");
    let output_size = setting("SENSORNET_SERIAL_OUTPUT_SIZE");

    let result = raw_flags(
        port.as_deref(),
        controller_ip.as_deref(),
        controller_url.as_deref(),
        node_id.as_deref(),
        publish_prefix.as_deref(),
        subscribe_prefix.as_deref(),
        client_id.as_deref(),
        baud_rate.as_deref(),
    )
    .and_then(|raw| resolve(&raw))
    .and_then(|set| {
        let size = output_size
            .as_deref()
            .map(parse_serial_output_size)
            .transpose()?
            .unwrap_or(DEFAULT_SERIAL_OUTPUT_SIZE);
        Ok((set, size))
    });

    let (set, output_size) = match result {
        Ok(resolved) => resolved,
        Err(e) => panic!("sensornet feature resolution failed: {}", e),
    };

    if set.architecture == Architecture::Esp32S3 && target_os != "espidf" {
        panic!(
            "sensornet feature resolution failed: `esp32s3` needs an ESP-IDF target, building for `{}`",
            target_os
        );
    }

    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set by cargo"));
    fs::write(out.join("capabilities.rs"), render(&set, output_size))
        .expect("Failed to write capabilities.rs");
}

fn has_feature(flag: &str) -> bool {
    let var = format!("CARGO_FEATURE_{}", flag.to_uppercase().replace('-', "_"));
    env::var_os(var).is_some()
}

fn picks<T: Choice>() -> Picks<T> {
    T::ALL
        .iter()
        .copied()
        .filter(|choice| has_feature(choice.flag()))
        .fold(Picks::none(), Picks::with)
}

#[allow(clippy::too_many_arguments)]
fn raw_flags<'a>(
    port: Option<&'a str>,
    controller_ip: Option<&'a str>,
    controller_url: Option<&'a str>,
    node_id: Option<&'a str>,
    publish_prefix: Option<&'a str>,
    subscribe_prefix: Option<&'a str>,
    client_id: Option<&'a str>,
    baud_rate: Option<&'a str>,
) -> Result<RawFlags<'a>, ResolveError> {
    let mut raw = RawFlags {
        architectures: picks(),
        radios: picks(),
        gateways: picks(),
        signing: picks(),
        ..RawFlags::default()
    };

    for feature in REQUESTABLE {
        if has_feature(feature.name()) {
            raw.requested.insert(*feature);
        }
    }

    raw.port = port.map(parse_port).transpose()?;
    raw.controller_ip = controller_ip.map(parse_ipv4).transpose()?;
    raw.controller_url = controller_url;
    raw.node_id = node_id.map(parse_node_id).transpose()?;
    raw.mqtt_publish_prefix = publish_prefix;
    raw.mqtt_subscribe_prefix = subscribe_prefix;
    raw.mqtt_client_id = client_id;
    raw.baud_rate = baud_rate.map(parse_baud_rate).transpose()?;

    Ok(raw)
}

fn option<T>(value: Option<T>, render: impl FnOnce(T) -> String) -> String {
    value.map_or_else(|| "None".to_string(), |v| format!("Some({})", render(v)))
}

fn render(set: &CapabilitySet<'_>, output_size: usize) -> String {
    let mut code = String::new();
    let _ = writeln!(code, "// @generated by build.rs. Do not edit.");
    let _ = writeln!(code);
    let _ = writeln!(code, "/// Resolved capability set of this build.");
    let _ = writeln!(code, "pub const BUILD: CapabilitySet<'static> = CapabilitySet {{");
    let _ = writeln!(code, "    architecture: Architecture::{:?},", set.architecture);
    let _ = writeln!(code, "    role: NodeRole::{:?},", set.role);
    let _ = writeln!(code, "    radio: {},", option(set.radio, |r| format!("Radio::{:?}", r)));
    let _ = writeln!(
        code,
        "    gateway: {},",
        option(set.gateway, |g| format!("GatewayTransport::{:?}", g))
    );
    let _ = writeln!(
        code,
        "    signing: {},",
        option(set.signing, |s| format!("SigningBackend::{:?}", s))
    );
    let _ = writeln!(code, "    features: FeatureSet::from_bits({:#x}),", set.features.bits());
    let _ = writeln!(code, "    port: {:?},", set.port);
    let _ = writeln!(
        code,
        "    controller: {},",
        option(set.controller, |c| format!("ControllerAddress::{:?}", c))
    );
    let _ = writeln!(code, "    node_id: {:?},", set.node_id);
    let _ = writeln!(
        code,
        "    mqtt: {},",
        option(set.mqtt, |m| format!(
            "MqttSettings {{ publish_prefix: {:?}, subscribe_prefix: {:?}, client_id: {:?} }}",
            m.publish_prefix, m.subscribe_prefix, m.client_id
        ))
    );
    let _ = writeln!(code, "    baud_rate: {},", set.baud_rate);
    let _ = writeln!(code, "}};");
    let _ = writeln!(code);
    let _ = writeln!(code, "/// Console baud rate.");
    let _ = writeln!(code, "pub const BAUD_RATE: u32 = {};", set.baud_rate);
    let _ = writeln!(code);
    let _ = writeln!(code, "/// Size of the debug sink buffer in bytes.");
    let _ = writeln!(code, "pub const SERIAL_OUTPUT_SIZE: usize = {};", output_size);
    code
}

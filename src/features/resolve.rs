//! Capability flags and the feature composition resolver.
//!
//! This file is compiled twice: `build.rs` includes it to resolve the flags
//! of the current build, and the library exposes it so the same rules can be
//! inspected and tested on the host. It must only depend on `core`.
//!
//! # Resolution order
//!
//! ```text
//! RawFlags ──▶ single-choice checks ──▶ derived features
//!          ──▶ RULES (topological order) ──▶ consistency checks ──▶ CapabilitySet
//! ```

use core::fmt;
use core::marker::PhantomData;

/// Console baud rate used when the build does not override it.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Debug sink buffer size used when the build does not override it.
pub const DEFAULT_SERIAL_OUTPUT_SIZE: usize = 120;

/// Smallest debug sink buffer the build accepts.
pub const MIN_SERIAL_OUTPUT_SIZE: usize = 16;

/// Node id reserved for automatic assignment by the controller.
pub const AUTO_NODE_ID: u8 = 255;

// ========================================
// Single-choice flags
// ========================================

/// A flag family where at most one member may be selected per build.
pub trait Choice: Copy + PartialEq + 'static {
    /// Every member, in a fixed order.
    const ALL: &'static [Self];

    /// Name of the Cargo feature that selects this member.
    fn flag(self) -> &'static str;
}

/// Target architecture. Each one maps to exactly one HAL backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Stm32F1,
    Esp32S3,
}

impl Architecture {
    /// Path of the HAL backend compiled for this architecture.
    pub const fn backend(self) -> &'static str {
        match self {
            Architecture::Stm32F1 => "hal::stm32f1::Stm32F1Hal",
            Architecture::Esp32S3 => "hal::esp32s3::Esp32S3Hal",
        }
    }

    /// Whether the target has enough RAM to mirror the routing table.
    pub const fn has_ram_routing_table(self) -> bool {
        match self {
            Architecture::Stm32F1 => false,
            Architecture::Esp32S3 => true,
        }
    }
}

impl Choice for Architecture {
    const ALL: &'static [Self] = &[Architecture::Stm32F1, Architecture::Esp32S3];

    fn flag(self) -> &'static str {
        match self {
            Architecture::Stm32F1 => "stm32f1",
            Architecture::Esp32S3 => "esp32s3",
        }
    }
}

/// Forward-link driver of the sensor network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Radio {
    Nrf24,
    Rfm69,
    Rfm95,
    Rs485,
}

impl Choice for Radio {
    const ALL: &'static [Self] = &[Radio::Nrf24, Radio::Rfm69, Radio::Rfm95, Radio::Rs485];

    fn flag(self) -> &'static str {
        match self {
            Radio::Nrf24 => "radio-nrf24",
            Radio::Rfm69 => "radio-rfm69",
            Radio::Rfm95 => "radio-rfm95",
            Radio::Rs485 => "rs485",
        }
    }
}

/// Link between a gateway and its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayTransport {
    Serial,
    W5100,
    Enc28j60,
    MqttClient,
}

impl GatewayTransport {
    /// IP transports need a listen or connect port.
    pub const fn is_ip(self) -> bool {
        !matches!(self, GatewayTransport::Serial)
    }
}

impl Choice for GatewayTransport {
    const ALL: &'static [Self] = &[
        GatewayTransport::Serial,
        GatewayTransport::W5100,
        GatewayTransport::Enc28j60,
        GatewayTransport::MqttClient,
    ];

    fn flag(self) -> &'static str {
        match self {
            GatewayTransport::Serial => "gateway-serial",
            GatewayTransport::W5100 => "gateway-w5100",
            GatewayTransport::Enc28j60 => "gateway-enc28j60",
            GatewayTransport::MqttClient => "gateway-mqtt-client",
        }
    }
}

/// Message signing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningBackend {
    /// ATSHA204 secure element.
    Atsha204,
    /// Software HMAC-SHA256 emulation of the ATSHA204.
    Soft,
}

impl Choice for SigningBackend {
    const ALL: &'static [Self] = &[SigningBackend::Atsha204, SigningBackend::Soft];

    fn flag(self) -> &'static str {
        match self {
            SigningBackend::Atsha204 => "signing-atsha204",
            SigningBackend::Soft => "signing-soft",
        }
    }
}

/// Set of selected members of one [`Choice`] family.
pub struct Picks<T: Choice> {
    bits: u8,
    _kind: PhantomData<T>,
}

impl<T: Choice> Picks<T> {
    /// Nothing selected.
    pub const fn none() -> Self {
        Self {
            bits: 0,
            _kind: PhantomData,
        }
    }

    /// Add `choice` to the selection.
    pub fn with(mut self, choice: T) -> Self {
        self.insert(choice);
        self
    }

    /// Add `choice` to the selection in place.
    pub fn insert(&mut self, choice: T) {
        if let Some(index) = T::ALL.iter().position(|c| *c == choice) {
            self.bits |= 1 << index;
        }
    }

    /// Number of selected members.
    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Selected members in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        T::ALL
            .iter()
            .enumerate()
            .filter(move |(index, _)| self.bits & (1 << index) != 0)
            .map(|(_, choice)| *choice)
    }

    /// The selected member, if any. Two or more is a conflict.
    pub fn single(&self, kind: &'static str) -> Result<Option<T>, ResolveError> {
        let mut picked = self.iter();
        match (picked.next(), picked.next()) {
            (None, _) => Ok(None),
            (Some(only), None) => Ok(Some(only)),
            (Some(first), Some(second)) => Err(ResolveError::MultipleChoices {
                kind,
                first: first.flag(),
                second: second.flag(),
            }),
        }
    }
}

impl<T: Choice> Clone for Picks<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Choice> Copy for Picks<T> {}

impl<T: Choice> Default for Picks<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: Choice> fmt::Debug for Picks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(Choice::flag)).finish()
    }
}

// ========================================
// Feature bits
// ========================================

/// Optional subsystem or behaviour switched on or off at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Feature {
    Gateway = 0,
    SensorNetwork = 1,
    Repeater = 2,
    TransportSanityCheck = 3,
    RamRoutingTable = 4,
    Signing = 5,
    NodeWhitelisting = 6,
    OtaFirmware = 7,
    InclusionMode = 8,
    InclusionButton = 9,
    GatewayClientMode = 10,
    UseUdp = 11,
    PassiveNode = 12,
    Registration = 13,
    Debug = 14,
    CoreOnly = 15,
    DisabledSerial = 16,
}

impl Feature {
    /// Number of features.
    pub const COUNT: usize = 17;

    /// Every feature, indexed by discriminant.
    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::Gateway,
        Feature::SensorNetwork,
        Feature::Repeater,
        Feature::TransportSanityCheck,
        Feature::RamRoutingTable,
        Feature::Signing,
        Feature::NodeWhitelisting,
        Feature::OtaFirmware,
        Feature::InclusionMode,
        Feature::InclusionButton,
        Feature::GatewayClientMode,
        Feature::UseUdp,
        Feature::PassiveNode,
        Feature::Registration,
        Feature::Debug,
        Feature::CoreOnly,
        Feature::DisabledSerial,
    ];

    #[inline]
    pub const fn bit(self) -> u32 {
        1 << self as u32
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }

    /// Kebab-case name, matching the Cargo feature where one exists.
    pub const fn name(self) -> &'static str {
        match self {
            Feature::Gateway => "gateway",
            Feature::SensorNetwork => "sensor-network",
            Feature::Repeater => "repeater",
            Feature::TransportSanityCheck => "transport-sanity-check",
            Feature::RamRoutingTable => "ram-routing-table",
            Feature::Signing => "signing",
            Feature::NodeWhitelisting => "signing-node-whitelisting",
            Feature::OtaFirmware => "ota-firmware",
            Feature::InclusionMode => "inclusion-mode",
            Feature::InclusionButton => "inclusion-button",
            Feature::GatewayClientMode => "gateway-client-mode",
            Feature::UseUdp => "use-udp",
            Feature::PassiveNode => "passive-node",
            Feature::Registration => "registration",
            Feature::Debug => "debug",
            Feature::CoreOnly => "core-only",
            Feature::DisabledSerial => "disabled-serial",
        }
    }
}

/// Bit set of [`Feature`]s.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureSet(u32);

impl FeatureSet {
    pub const EMPTY: FeatureSet = FeatureSet(0);

    const MASK: u32 = (1 << Feature::COUNT) - 1;

    /// Build from raw bits. Unknown bits are dropped.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::MASK)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    pub const fn with(self, feature: Feature) -> Self {
        Self(self.0 | feature.bit())
    }

    pub fn insert(&mut self, feature: Feature) {
        self.0 |= feature.bit();
    }

    pub fn remove(&mut self, feature: Feature) {
        self.0 &= !feature.bit();
    }

    pub fn set(&mut self, feature: Feature, on: bool) {
        if on {
            self.insert(feature);
        } else {
            self.remove(feature);
        }
    }

    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Feature::name)).finish()
    }
}

// ========================================
// Dependency table
// ========================================

/// One edge family of the feature dependency table.
///
/// Every rule produces exactly one feature (its [`target`](Rule::target)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// `then` is switched on when every feature in `when` is on.
    Implies {
        when: &'static [Feature],
        then: Feature,
    },
    /// `feature` is switched off unless `on` is on.
    Requires { feature: Feature, on: Feature },
    /// `feature` is switched off when `by` is on.
    Suppresses { by: Feature, feature: Feature },
}

impl Rule {
    /// Feature written by this rule.
    pub const fn target(self) -> Feature {
        match self {
            Rule::Implies { then, .. } => then,
            Rule::Requires { feature, .. } => feature,
            Rule::Suppresses { feature, .. } => feature,
        }
    }

    /// Enabling rules run before disabling rules of the same target.
    const fn enables(self) -> bool {
        matches!(self, Rule::Implies { .. })
    }

    fn for_each_input(self, mut f: impl FnMut(Feature)) {
        match self {
            Rule::Implies { when, .. } => when.iter().copied().for_each(f),
            Rule::Requires { on, .. } => f(on),
            Rule::Suppresses { by, .. } => f(by),
        }
    }

    fn apply(self, set: &mut FeatureSet) {
        match self {
            Rule::Implies { when, then } => {
                if when.iter().all(|f| set.contains(*f)) {
                    set.insert(then);
                }
            }
            Rule::Requires { feature, on } => {
                if !set.contains(on) {
                    set.remove(feature);
                }
            }
            Rule::Suppresses { by, feature } => {
                if set.contains(by) {
                    set.remove(feature);
                }
            }
        }
    }
}

/// The build's dependency table.
pub const RULES: &[Rule] = &[
    // A gateway with a radio forwards for the nodes behind it.
    Rule::Implies {
        when: &[Feature::Gateway, Feature::SensorNetwork],
        then: Feature::Repeater,
    },
    Rule::Implies {
        when: &[Feature::Repeater],
        then: Feature::TransportSanityCheck,
    },
    // Dependents of the radio.
    Rule::Requires {
        feature: Feature::Repeater,
        on: Feature::SensorNetwork,
    },
    Rule::Requires {
        feature: Feature::OtaFirmware,
        on: Feature::SensorNetwork,
    },
    Rule::Requires {
        feature: Feature::Signing,
        on: Feature::SensorNetwork,
    },
    Rule::Requires {
        feature: Feature::NodeWhitelisting,
        on: Feature::SensorNetwork,
    },
    Rule::Requires {
        feature: Feature::NodeWhitelisting,
        on: Feature::Signing,
    },
    Rule::Requires {
        feature: Feature::TransportSanityCheck,
        on: Feature::SensorNetwork,
    },
    Rule::Requires {
        feature: Feature::RamRoutingTable,
        on: Feature::Repeater,
    },
    // Dependents of the gateway.
    Rule::Requires {
        feature: Feature::InclusionMode,
        on: Feature::Gateway,
    },
    Rule::Requires {
        feature: Feature::InclusionButton,
        on: Feature::Gateway,
    },
    Rule::Requires {
        feature: Feature::UseUdp,
        on: Feature::Gateway,
    },
    // Passive nodes never receive, so they cannot sign, update or register.
    Rule::Suppresses {
        by: Feature::PassiveNode,
        feature: Feature::Signing,
    },
    Rule::Suppresses {
        by: Feature::PassiveNode,
        feature: Feature::OtaFirmware,
    },
    Rule::Suppresses {
        by: Feature::PassiveNode,
        feature: Feature::Registration,
    },
];

/// Topological order of all features over the edges of `rules`.
///
/// Fails with [`ResolveError::CyclicRules`] if the table has a cycle.
pub fn rule_order(rules: &[Rule]) -> Result<[Feature; Feature::COUNT], ResolveError> {
    let mut in_degree = [0usize; Feature::COUNT];
    for rule in rules {
        let target = rule.target().index();
        rule.for_each_input(|_| in_degree[target] += 1);
    }

    let mut order = [Feature::Gateway; Feature::COUNT];
    let mut placed = [false; Feature::COUNT];
    let mut len = 0;

    // Kahn's algorithm; COUNT is small enough for the quadratic scan.
    while len < Feature::COUNT {
        let ready = Feature::ALL
            .iter()
            .copied()
            .find(|f| !placed[f.index()] && in_degree[f.index()] == 0);

        let Some(feature) = ready else {
            let stuck = Feature::ALL
                .iter()
                .copied()
                .find(|f| !placed[f.index()])
                .unwrap_or(Feature::Gateway);
            return Err(ResolveError::CyclicRules {
                feature: stuck.name(),
            });
        };

        placed[feature.index()] = true;
        order[len] = feature;
        len += 1;

        for rule in rules {
            let target = rule.target().index();
            rule.for_each_input(|input| {
                if input == feature {
                    in_degree[target] -= 1;
                }
            });
        }
    }

    Ok(order)
}

/// Apply `rules` to `features` in dependency order.
pub fn apply_rules(rules: &[Rule], mut features: FeatureSet) -> Result<FeatureSet, ResolveError> {
    for feature in rule_order(rules)? {
        let targeting = || rules.iter().copied().filter(move |r| r.target() == feature);

        for rule in targeting().filter(|r| r.enables()) {
            rule.apply(&mut features);
        }
        for rule in targeting().filter(|r| !r.enables()) {
            rule.apply(&mut features);
        }
    }
    Ok(features)
}

// ========================================
// Input and output
// ========================================

/// Where an IP gateway finds its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerAddress<'a> {
    Ip([u8; 4]),
    Url(&'a str),
}

impl fmt::Display for ControllerAddress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerAddress::Ip([a, b, c, d]) => write!(f, "{}.{}.{}.{}", a, b, c, d),
            ControllerAddress::Url(url) => f.write_str(url),
        }
    }
}

/// Settings of the MQTT client gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttSettings<'a> {
    pub publish_prefix: &'a str,
    pub subscribe_prefix: &'a str,
    pub client_id: &'a str,
}

/// Role of the node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Gateway,
    Repeater,
    Sensor,
}

impl NodeRole {
    /// Short tag reported to the controller.
    pub const fn node_type(self) -> &'static str {
        match self {
            NodeRole::Gateway => "GW",
            NodeRole::Repeater => "REPEATER",
            NodeRole::Sensor => "NODE",
        }
    }
}

/// Flags as the user selected them, before any rule runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFlags<'a> {
    pub architectures: Picks<Architecture>,
    pub radios: Picks<Radio>,
    pub gateways: Picks<GatewayTransport>,
    pub signing: Picks<SigningBackend>,
    pub requested: FeatureSet,
    pub port: Option<u16>,
    pub controller_ip: Option<[u8; 4]>,
    pub controller_url: Option<&'a str>,
    pub node_id: Option<u8>,
    pub mqtt_publish_prefix: Option<&'a str>,
    pub mqtt_subscribe_prefix: Option<&'a str>,
    pub mqtt_client_id: Option<&'a str>,
    pub baud_rate: Option<u32>,
}

impl<'a> RawFlags<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arch(mut self, arch: Architecture) -> Self {
        self.architectures.insert(arch);
        self
    }

    pub fn radio(mut self, radio: Radio) -> Self {
        self.radios.insert(radio);
        self
    }

    pub fn gateway(mut self, transport: GatewayTransport) -> Self {
        self.gateways.insert(transport);
        self
    }

    pub fn signing(mut self, backend: SigningBackend) -> Self {
        self.signing.insert(backend);
        self
    }

    pub fn request(mut self, feature: Feature) -> Self {
        self.requested.insert(feature);
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn controller_ip(mut self, ip: [u8; 4]) -> Self {
        self.controller_ip = Some(ip);
        self
    }

    pub fn controller_url(mut self, url: &'a str) -> Self {
        self.controller_url = Some(url);
        self
    }

    pub fn node_id(mut self, id: u8) -> Self {
        self.node_id = Some(id);
        self
    }

    pub fn mqtt(mut self, publish_prefix: &'a str, subscribe_prefix: &'a str, client_id: &'a str) -> Self {
        self.mqtt_publish_prefix = Some(publish_prefix);
        self.mqtt_subscribe_prefix = Some(subscribe_prefix);
        self.mqtt_client_id = Some(client_id);
        self
    }
}

/// Optional source module that participates in the firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    /// Core transport state machine shared by all radios.
    Transport,
    RadioDriver(Radio),
    GatewayTransport(GatewayTransport),
    /// Controller-facing text protocol.
    GatewayProtocol,
    Signing(SigningBackend),
    /// Firmware update over the air, with its SPI flash driver.
    OtaFirmware,
    InclusionMode,
}

/// Fully resolved, immutable flag set of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet<'a> {
    pub architecture: Architecture,
    pub role: NodeRole,
    pub radio: Option<Radio>,
    pub gateway: Option<GatewayTransport>,
    pub signing: Option<SigningBackend>,
    pub features: FeatureSet,
    pub port: Option<u16>,
    pub controller: Option<ControllerAddress<'a>>,
    pub node_id: Option<u8>,
    pub mqtt: Option<MqttSettings<'a>>,
    pub baud_rate: u32,
}

impl CapabilitySet<'_> {
    #[inline]
    pub const fn has(&self, feature: Feature) -> bool {
        self.features.contains(feature)
    }

    pub const fn is_gateway(&self) -> bool {
        self.has(Feature::Gateway)
    }

    pub const fn is_repeater(&self) -> bool {
        self.has(Feature::Repeater)
    }

    pub const fn debug_enabled(&self) -> bool {
        self.has(Feature::Debug)
    }

    pub const fn node_type(&self) -> &'static str {
        self.role.node_type()
    }

    /// HAL backend selected for this build.
    pub const fn backend(&self) -> &'static str {
        self.architecture.backend()
    }

    /// Optional modules compiled into the image.
    pub fn modules(&self) -> impl Iterator<Item = Module> {
        let signing = if self.has(Feature::Signing) {
            self.signing.map(Module::Signing)
        } else {
            None
        };

        [
            self.radio.map(|_| Module::Transport),
            self.radio.map(Module::RadioDriver),
            self.gateway.map(Module::GatewayTransport),
            self.gateway.map(|_| Module::GatewayProtocol),
            signing,
            self.has(Feature::OtaFirmware).then_some(Module::OtaFirmware),
            self.has(Feature::InclusionMode).then_some(Module::InclusionMode),
        ]
        .into_iter()
        .flatten()
    }
}

// ========================================
// Resolution
// ========================================

/// Why a flag combination cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    NoArchitecture,
    MultipleChoices {
        kind: &'static str,
        first: &'static str,
        second: &'static str,
    },
    NoGatewayTransport,
    MissingPort { transport: &'static str },
    ConflictingControllerAddress,
    UdpWithoutController,
    UdpUnsupported { transport: &'static str },
    MqttWithoutController,
    MissingMqttSetting { setting: &'static str },
    PassiveRelay,
    PassiveWithoutNodeId,
    InvalidNodeId,
    NowhereToSend,
    InvalidSetting {
        setting: &'static str,
        expected: &'static str,
    },
    CyclicRules { feature: &'static str },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoArchitecture => {
                f.write_str("no architecture selected, enable exactly one of `stm32f1`, `esp32s3`")
            }
            Self::MultipleChoices { kind, first, second } => write!(
                f,
                "only one {} can be selected, got `{}` and `{}`",
                kind, first, second
            ),
            Self::NoGatewayTransport => {
                f.write_str("gateway requested but no gateway transport selected")
            }
            Self::MissingPort { transport } => write!(
                f,
                "`{}` needs a listen/connect port, set SENSORNET_PORT",
                transport
            ),
            Self::ConflictingControllerAddress => f.write_str(
                "set either SENSORNET_CONTROLLER_IP or SENSORNET_CONTROLLER_URL, not both",
            ),
            Self::UdpWithoutController => {
                f.write_str("`use-udp` needs a controller address to send to")
            }
            Self::UdpUnsupported { transport } => {
                write!(f, "`use-udp` is not available on `{}`", transport)
            }
            Self::MqttWithoutController => {
                f.write_str("`gateway-mqtt-client` needs a controller (broker) address")
            }
            Self::MissingMqttSetting { setting } => {
                write!(f, "`gateway-mqtt-client` needs {}", setting)
            }
            Self::PassiveRelay => {
                f.write_str("`passive-node` cannot be combined with a gateway or repeater")
            }
            Self::PassiveWithoutNodeId => {
                f.write_str("`passive-node` needs a static SENSORNET_NODE_ID")
            }
            Self::InvalidNodeId => write!(
                f,
                "node id {} is reserved for automatic assignment",
                AUTO_NODE_ID
            ),
            Self::NowhereToSend => f.write_str(
                "no radio and no gateway transport selected, messages have nowhere to go",
            ),
            Self::InvalidSetting { setting, expected } => {
                write!(f, "{} must be {}", setting, expected)
            }
            Self::CyclicRules { feature } => {
                write!(f, "feature rules form a cycle through `{}`", feature)
            }
        }
    }
}

/// Resolve `raw` against the build's [`RULES`].
pub fn resolve<'a>(raw: &RawFlags<'a>) -> Result<CapabilitySet<'a>, ResolveError> {
    resolve_with(RULES, raw)
}

/// Resolve `raw` against an explicit rule table.
pub fn resolve_with<'a>(
    rules: &[Rule],
    raw: &RawFlags<'a>,
) -> Result<CapabilitySet<'a>, ResolveError> {
    let architecture = raw
        .architectures
        .single("architecture")?
        .ok_or(ResolveError::NoArchitecture)?;
    let radio = raw.radios.single("radio")?;
    let gateway = raw.gateways.single("gateway transport")?;
    let signing = raw.signing.single("signing backend")?;

    let controller = match (raw.controller_ip, raw.controller_url) {
        (Some(_), Some(_)) => return Err(ResolveError::ConflictingControllerAddress),
        (Some(ip), None) => Some(ControllerAddress::Ip(ip)),
        (None, Some(url)) => Some(ControllerAddress::Url(url)),
        (None, None) => None,
    };

    let mut features = raw.requested;
    if features.contains(Feature::Gateway) && gateway.is_none() {
        return Err(ResolveError::NoGatewayTransport);
    }
    features.set(Feature::Gateway, gateway.is_some());
    features.set(Feature::SensorNetwork, radio.is_some());
    features.set(Feature::GatewayClientMode, controller.is_some());
    features.set(Feature::Signing, signing.is_some());
    features.insert(Feature::Registration);

    let mut features = apply_rules(rules, features)?;

    if let Some(transport) = gateway {
        if transport.is_ip() && raw.port.is_none() {
            return Err(ResolveError::MissingPort {
                transport: transport.flag(),
            });
        }
    }

    if features.contains(Feature::UseUdp) {
        if !features.contains(Feature::GatewayClientMode) {
            return Err(ResolveError::UdpWithoutController);
        }
        if gateway == Some(GatewayTransport::Enc28j60) {
            return Err(ResolveError::UdpUnsupported {
                transport: GatewayTransport::Enc28j60.flag(),
            });
        }
    }

    let mqtt = if gateway == Some(GatewayTransport::MqttClient) {
        if controller.is_none() {
            return Err(ResolveError::MqttWithoutController);
        }
        Some(MqttSettings {
            publish_prefix: raw.mqtt_publish_prefix.ok_or(ResolveError::MissingMqttSetting {
                setting: "SENSORNET_MQTT_PUBLISH_PREFIX",
            })?,
            subscribe_prefix: raw.mqtt_subscribe_prefix.ok_or(
                ResolveError::MissingMqttSetting {
                    setting: "SENSORNET_MQTT_SUBSCRIBE_PREFIX",
                },
            )?,
            client_id: raw.mqtt_client_id.ok_or(ResolveError::MissingMqttSetting {
                setting: "SENSORNET_MQTT_CLIENT_ID",
            })?,
        })
    } else {
        None
    };

    if raw.node_id == Some(AUTO_NODE_ID) {
        return Err(ResolveError::InvalidNodeId);
    }

    if features.contains(Feature::PassiveNode) {
        if features.contains(Feature::Gateway) || features.contains(Feature::Repeater) {
            return Err(ResolveError::PassiveRelay);
        }
        if raw.node_id.is_none() {
            return Err(ResolveError::PassiveWithoutNodeId);
        }
    }

    if !features.contains(Feature::Gateway)
        && !features.contains(Feature::SensorNetwork)
        && !features.contains(Feature::CoreOnly)
    {
        return Err(ResolveError::NowhereToSend);
    }

    if !architecture.has_ram_routing_table() {
        features.remove(Feature::RamRoutingTable);
    }

    // Role follows the repeater flag after the rules ran, so a repeater
    // request that was forced off (no radio) builds a plain sensor.
    let role = if features.contains(Feature::Gateway) {
        NodeRole::Gateway
    } else if features.contains(Feature::Repeater) {
        NodeRole::Repeater
    } else {
        NodeRole::Sensor
    };

    Ok(CapabilitySet {
        architecture,
        role,
        radio,
        gateway,
        signing,
        features,
        port: raw.port,
        controller,
        node_id: raw.node_id,
        mqtt,
        baud_rate: raw.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
    })
}

// ========================================
// Setting parsers
// ========================================

/// Parse a listen/connect port (1..=65535).
pub fn parse_port(value: &str) -> Result<u16, ResolveError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ResolveError::InvalidSetting {
            setting: "SENSORNET_PORT",
            expected: "a port number between 1 and 65535",
        }),
    }
}

/// Parse a dotted-quad IPv4 address.
pub fn parse_ipv4(value: &str) -> Result<[u8; 4], ResolveError> {
    const INVALID: ResolveError = ResolveError::InvalidSetting {
        setting: "SENSORNET_CONTROLLER_IP",
        expected: "a dotted-quad IPv4 address",
    };

    let mut octets = [0u8; 4];
    let mut parts = value.trim().split('.');
    for octet in octets.iter_mut() {
        *octet = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or(INVALID)?;
    }
    if parts.next().is_some() {
        return Err(INVALID);
    }
    Ok(octets)
}

/// Parse a static node id (0..=254).
pub fn parse_node_id(value: &str) -> Result<u8, ResolveError> {
    match value.trim().parse::<u8>() {
        Ok(id) if id != AUTO_NODE_ID => Ok(id),
        _ => Err(ResolveError::InvalidSetting {
            setting: "SENSORNET_NODE_ID",
            expected: "a node id between 0 and 254",
        }),
    }
}

/// Parse a console baud rate.
pub fn parse_baud_rate(value: &str) -> Result<u32, ResolveError> {
    match value.trim().parse::<u32>() {
        Ok(baud) if baud != 0 => Ok(baud),
        _ => Err(ResolveError::InvalidSetting {
            setting: "SENSORNET_BAUD_RATE",
            expected: "a non-zero baud rate",
        }),
    }
}

/// Parse the debug sink buffer size.
pub fn parse_serial_output_size(value: &str) -> Result<usize, ResolveError> {
    match value.trim().parse::<usize>() {
        Ok(size) if size >= MIN_SERIAL_OUTPUT_SIZE => Ok(size),
        _ => Err(ResolveError::InvalidSetting {
            setting: "SENSORNET_SERIAL_OUTPUT_SIZE",
            expected: "a buffer size of at least 16 bytes",
        }),
    }
}

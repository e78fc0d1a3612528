//! bridge-plugin-api: Shared types for the bridge plugin system
//!
//! This crate defines the values that cross the boundary between the host
//! and its plugins. Everything here is plain data: identifiers, item records
//! and the well-known names of events and commands.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// Arguments passed to commands and event handlers
pub type Args = Vec<Value>;

/// Events emitted by the host for item lifecycle
pub mod events {
    pub const ITEM_PLAY: &str = "item.play";
    pub const ITEM_STOP: &str = "item.stop";
    pub const ITEM_CHANGE: &str = "item.change";
}

/// Commands implemented by host subsystems
pub mod commands {
    pub const PLAY_ITEM: &str = "items.playItem";
    pub const STOP_ITEM: &str = "items.stopItem";
    pub const APPLY_ISSUE: &str = "items.applyIssue";
    pub const REMOVE_ISSUE: &str = "items.removeIssue";
    pub const GET_ITEM: &str = "items.getItem";

    pub const EVENTS_EMIT: &str = "events.emit";
    pub const EVENTS_OFF: &str = "events.off";
    pub const EVENTS_TRIGGER_COMMAND: &str = "events.triggerCommand";
}

/// Type tags of the built-in item types
pub mod types {
    pub const GROUP: &str = "bridge.types.group";
    pub const REFERENCE: &str = "bridge.types.reference";
}

// ============================================================================
// Handler identifiers
// ============================================================================

/// Opaque identifier of an event subscription.
///
/// A plain value: two ids are equal when their string forms are equal, so an
/// id can be handed to an out-of-process plugin and come back intact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(String);

impl HandlerId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for HandlerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HandlerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a command produces its result, declared at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// The result is available as soon as the handler returns
    Immediate,
    /// The handler resolves later; callers receive a single eventual outcome
    Deferred,
}

/// Plugin manifest with API version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// API version the plugin was built against
    pub api_version: u32,

    /// Unique plugin name
    pub name: String,

    /// Plugin version (semver)
    #[serde(default)]
    pub version: Option<String>,
}

impl PluginManifest {
    /// Create a manifest for the current API version
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: API_VERSION,
            name: name.into(),
            version: None,
        }
    }

    /// Add version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

// ============================================================================
// Items
// ============================================================================

/// A playable item as held by the item storage.
///
/// Only the fields the dispatch core needs are typed; the type-specific
/// payload stays as raw JSON in `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: String,

    /// Type tag, e.g. `bridge.types.group`
    #[serde(rename = "type", default)]
    pub item_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Children in play order, ids or full records
    #[serde(default, deserialize_with = "null_as_empty")]
    pub children: Vec<Value>,

    #[serde(default)]
    pub data: Value,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Item {
    /// Create an item of the given type
    pub fn new(id: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            item_type: item_type.into(),
            ..Default::default()
        }
    }

    /// Parse an item from an event or command argument
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    /// Set parent
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add a child id
    pub fn child(mut self, id: impl Into<String>) -> Self {
        self.children.push(Value::String(id.into()));
        self
    }

    /// Set a field in the data payload
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.data.is_object() {
            self.data = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.data {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Get a field from the data payload
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Play mode of a group item
    pub fn play_mode(&self) -> GroupPlayMode {
        GroupPlayMode::from_value(self.data_field("playMode"))
    }

    /// Target of a reference item, if one is set
    pub fn target_id(&self) -> Option<&str> {
        self.data_field("targetId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Action taken on the target when a reference is played
    pub fn play_action(&self) -> ReferenceAction {
        ReferenceAction::from_value(self.data_field("playAction"), ReferenceAction::Play)
    }

    /// Action taken on the target when a reference is stopped
    pub fn stop_action(&self) -> ReferenceAction {
        ReferenceAction::from_value(self.data_field("stopAction"), ReferenceAction::Stop)
    }
}

/// How a group triggers its children when played
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupPlayMode {
    /// Play every child in order
    #[default]
    All,
    /// Play only the first child
    First,
}

impl GroupPlayMode {
    /// Decode a stored play mode, falling back to `All`
    pub fn from_value(value: Option<&Value>) -> Self {
        match value.and_then(enum_code) {
            Some(EnumCode::Int(1)) => Self::First,
            Some(EnumCode::Name(name)) if name == "first" => Self::First,
            _ => Self::All,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::All => 0,
            Self::First => 1,
        }
    }
}

/// What a reference does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceAction {
    None,
    Play,
    Stop,
}

impl ReferenceAction {
    /// Decode a stored action; unrecognized or missing values yield `default`
    pub fn from_value(value: Option<&Value>, default: Self) -> Self {
        match value.and_then(enum_code) {
            Some(EnumCode::Int(0)) => Self::None,
            Some(EnumCode::Int(1)) => Self::Play,
            Some(EnumCode::Int(2)) => Self::Stop,
            Some(EnumCode::Name(name)) => match name.as_str() {
                "none" => Self::None,
                "play" => Self::Play,
                "stop" => Self::Stop,
                _ => default,
            },
            _ => default,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Play => 1,
            Self::Stop => 2,
        }
    }
}

enum EnumCode {
    Int(i64),
    Name(String),
}

/// Read an enumeration value stored either as a number, a numeric string
/// (leading integer, like `parseInt`) or a lowercase name.
fn enum_code(value: &Value) -> Option<EnumCode> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .map(EnumCode::Int),
        Value::String(s) => {
            let s = s.trim_start();
            let (sign, digits) = match s.strip_prefix('-') {
                Some(rest) => (-1, rest),
                None => (1, s.strip_prefix('+').unwrap_or(s)),
            };
            let end = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            match digits[..end].parse::<i64>() {
                Ok(n) => Some(EnumCode::Int(sign * n)),
                Err(_) => Some(EnumCode::Name(s.to_ascii_lowercase())),
            }
        }
        _ => None,
    }
}

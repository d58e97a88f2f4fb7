//! The plug-in contract for experiment modules, the ordered settings they
//! declare, and the registry modules are looked up in by name.
//!
//! A module knows how to turn its settings into one outbound parameter frame
//! and how to turn its inbound telemetry frame into named data points. It
//! carries no state of its own; the interactor owns the buffers.

use crate::frame_codec::{EncodeError, Frame, PayloadError};
use crate::test_module::TestModule;

use log::warn;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// A map that remembers insertion order. Settings are shown to the user and
/// packed into frames in declaration order, so a hash map won't do.
///
/// In RON it is written as a list of `(name, value)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        OrderedMap {
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `key`.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces `key`. A replaced entry keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Removes `key`, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let at = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(at).1)
    }

    /// Keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Values in key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V> IntoIterator for OrderedMap<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A single setting. Whole numbers and reals are kept apart so that
/// integer fields are not silently rounded through a float.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    /// Integer setting.
    Int(i64),
    /// Real setting.
    Float(f64),
}

impl SettingValue {
    /// The value as a float.
    pub fn as_f64(self) -> f64 {
        match self {
            SettingValue::Int(v) => v as f64,
            SettingValue::Float(v) => v,
        }
    }

    /// The value as an integer, truncating reals toward zero.
    pub fn as_i64(self) -> i64 {
        match self {
            SettingValue::Int(v) => v,
            SettingValue::Float(v) => v as i64,
        }
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SettingValue::Int(v) => write!(f, "{}", v),
            SettingValue::Float(v) => write!(f, "{:?}", v),
        }
    }
}

/// Settings of one module, in declaration order.
pub type Settings = OrderedMap<SettingValue>;

/// What a module extracted from one telemetry frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedFrame {
    /// Sample time in seconds.
    pub time: f64,
    /// Value per data point name.
    pub points: BTreeMap<String, f64>,
}

/// An experiment module: a named codec between the user's settings and the
/// bench's frames.
pub trait ExperimentModule: Send + Sync {
    /// Unique name, used in experiment definitions.
    fn name(&self) -> &str;

    /// Names of the signals this module produces.
    fn data_points(&self) -> Vec<String>;

    /// Id of the telemetry frame this module decodes.
    fn frame_id(&self) -> u8;

    /// Declared settings with their defaults.
    fn public_settings(&self) -> Settings;

    /// Builds the parameter frame for `settings`. Missing settings fall back
    /// to their defaults.
    fn encode_parameters(&self, settings: &Settings) -> Result<Frame, EncodeError>;

    /// Turns a telemetry payload into data points.
    fn decode_frame(&self, payload: &[u8]) -> Result<DecodedFrame, PayloadError>;

    /// `settings` reordered to match [`ExperimentModule::public_settings`],
    /// with defaults filled in and unknown names dropped.
    fn normalize_settings(&self, settings: &Settings) -> Settings {
        let declared = self.public_settings();
        for unknown in settings.keys().filter(|key| !declared.contains_key(key)) {
            warn!("{}: ignoring unknown setting {:?}", self.name(), unknown);
        }

        declared
            .into_iter()
            .map(|(key, default)| {
                let value = settings.get(&key).copied().unwrap_or(default);
                (key, value)
            })
            .collect()
    }
}

/// The modules available to experiment definitions.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn ExperimentModule>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ModuleRegistry {
    /// A registry with no modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every module shipped with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TestModule));
        registry
    }

    /// Adds `module`, replacing (and returning) one of the same name.
    pub fn register(
        &mut self,
        module: Arc<dyn ExperimentModule>,
    ) -> Option<Arc<dyn ExperimentModule>> {
        match self.modules.iter_mut().find(|m| m.name() == module.name()) {
            Some(slot) => Some(std::mem::replace(slot, module)),
            None => {
                self.modules.push(module);
                None
            }
        }
    }

    /// Finds a module by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ExperimentModule>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Persisted key/value settings.
//!
//! Keys map onto dotted paths inside a TOML document (`display.width`, ...).
//! Each key carries a typed default: reading a key that is missing writes the
//! default back, and writing a value of a different type than the default is
//! rejected.

use std::fs;
use std::mem::discriminant;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration directory could be determined for this user")]
    NoConfigDir,

    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("serializing config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("attempt to set {found} value for key {key} with {expected} default value")]
    TypeMismatch {
        key: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unsupported value for key {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Fullscreen,
    Width,
    Height,
    OutOfDatePolicy,
}

impl Key {
    pub const ALL: [Key; 4] = [
        Key::Fullscreen,
        Key::Width,
        Key::Height,
        Key::OutOfDatePolicy,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Key::Fullscreen => "display.fullscreen",
            Key::Width => "display.width",
            Key::Height => "display.height",
            Key::OutOfDatePolicy => "render.on_out_of_date",
        }
    }

    pub fn default_value(self) -> Value {
        match self {
            Key::Fullscreen => Value::Bool(false),
            Key::Width => Value::Int(800),
            Key::Height => Value::Int(600),
            Key::OutOfDatePolicy => Value::Str("fatal".into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_int().and_then(|i| u32::try_from(i).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Decodes the value into any serde type, e.g. a `snake_case` enum stored
    /// as a string.
    pub fn parse<T: DeserializeOwned>(&self, key: Key) -> Result<T, ConfigError> {
        toml::Value::from(self.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid {
                key: key.path(),
                reason: e.to_string(),
            })
    }

    fn from_toml(value: &toml::Value) -> Option<Value> {
        match value {
            toml::Value::Boolean(b) => Some(Value::Bool(*b)),
            toml::Value::Integer(i) => Some(Value::Int(*i)),
            toml::Value::Float(f) => Some(Value::Float(*f)),
            toml::Value::String(s) => Some(Value::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<Value> for toml::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => toml::Value::Boolean(b),
            Value::Int(i) => toml::Value::Integer(i),
            Value::Float(f) => toml::Value::Float(f),
            Value::Str(s) => toml::Value::String(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

/// Get/set over named values with survive-restart persistence.
pub trait ConfigStore {
    /// Reads a key; a missing key is defaulted (and persisted).
    fn get(&mut self, key: Key) -> Result<Value, ConfigError>;

    /// Writes a key and persists the store.
    fn set(&mut self, key: Key, value: Value) -> Result<(), ConfigError>;
}

pub struct TomlConfig {
    path: Option<PathBuf>,
    doc: toml::Table,
}

impl TomlConfig {
    pub const APP_NAME: &'static str = "HotAir";
    pub const FILE_NAME: &'static str = "config.toml";

    /// `$XDG_CONFIG_HOME/hotair/config.toml` on Linux. A `HotAir/` directory
    /// left by older builds is not read.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("", "", Self::APP_NAME).ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join(Self::FILE_NAME))
    }

    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(Self::default_path()?)
    }

    /// Loads `path`, creating it from defaults when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        debug!("loading config file: {}", path.display());

        if !path.exists() {
            warn!("config file does not exist: {}", path.display());
            info!("writing default config file: {}", path.display());

            let cfg = TomlConfig {
                path: Some(path),
                doc: Self::defaults(),
            };
            cfg.write_out()?;
            return Ok(cfg);
        }

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            action: "reading",
            path: path.clone(),
            source,
        })?;
        let doc = toml::from_str::<toml::Table>(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        Ok(TomlConfig {
            path: Some(path),
            doc,
        })
    }

    /// Same semantics as a file-backed store, nothing is written to disk.
    pub fn in_memory() -> Self {
        TomlConfig {
            path: None,
            doc: Self::defaults(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn defaults() -> toml::Table {
        let mut doc = toml::Table::new();
        for key in Key::ALL {
            insert_path(&mut doc, key.path(), key.default_value().into());
        }
        doc
    }

    fn lookup(&self, key: Key) -> Option<&toml::Value> {
        let mut segments = key.path().split('.');
        let first = segments.next()?;
        segments.try_fold(self.doc.get(first)?, |node, seg| node.as_table()?.get(seg))
    }

    fn write_out(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                action: "creating",
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let text = toml::to_string_pretty(&self.doc)?;
        fs::write(path, text).map_err(|source| ConfigError::Io {
            action: "writing",
            path: path.clone(),
            source,
        })
    }
}

impl ConfigStore for TomlConfig {
    fn get(&mut self, key: Key) -> Result<Value, ConfigError> {
        let default = key.default_value();

        match self.lookup(key).and_then(Value::from_toml) {
            Some(v) if discriminant(&v) == discriminant(&default) => Ok(v),
            Some(v) => {
                warn!(
                    "key {} holds a {} value, expected {}. defaulting",
                    key.path(),
                    v.type_name(),
                    default.type_name()
                );
                self.set(key, default.clone())?;
                Ok(default)
            }
            None => {
                warn!("key {} not found in config. defaulting", key.path());
                self.set(key, default.clone())?;
                Ok(default)
            }
        }
    }

    fn set(&mut self, key: Key, value: Value) -> Result<(), ConfigError> {
        let default = key.default_value();
        if discriminant(&value) != discriminant(&default) {
            return Err(ConfigError::TypeMismatch {
                key: key.path(),
                expected: default.type_name(),
                found: value.type_name(),
            });
        }

        insert_path(&mut self.doc, key.path(), value.into());
        self.write_out()
    }
}

/// Inserts at a dotted path, replacing any non-table node met on the way.
fn insert_path(doc: &mut toml::Table, path: &str, value: toml::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    let mut table = doc;
    for seg in segments {
        let node = table
            .entry(seg)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if !node.is_table() {
            *node = toml::Value::Table(toml::Table::new());
        }
        table = match node {
            toml::Value::Table(next) => next,
            _ => return,
        };
    }
    table.insert(leaf.to_owned(), value);
}

//! Configuration files
//!
//! Each named configuration lives in `<config_dir>/<name>.toml` and describes
//! one mouse plus its button rules. The optional `manager.toml` fixes the
//! order of the configuration ring used by next/previous switch buttons;
//! without it the ring is the sorted list of configuration files.

use crate::event::{
    ButtonKind, ButtonRule, CommandSpec, EventTable, MAX_MODS, RuleOutput, SwitchSpec,
    WheelDirection,
};
use crate::keynames;
use crate::side_effect::ConfigNames;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const SYSTEM_CONFIG_DIR: &str = "/etc/btnmap";
const MANAGER_FILE: &str = "manager.toml";

/// Problems found while turning a configuration file into rules
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device vendor_id/product_id must be non-zero")]
    MissingDeviceId,
    #[error("configuration has no buttons")]
    NoButtons,
    #[error("button {0}: rawcode missing or zero")]
    MissingRawcode(String),
    #[error("button {0}: expected exactly one of keycode, command or switch")]
    ActionCount(String),
    #[error("button {button}: unknown key name '{key}'")]
    UnknownKey { button: String, key: String },
    #[error("button {0}: more than {max} modifiers", max = MAX_MODS)]
    TooManyMods(String),
    #[error("button {0}: empty command")]
    EmptyCommand(String),
    #[error("button {0}: switch target name is empty")]
    EmptySwitchTarget(String),
    #[error("button {button}: unknown switch '{word}' (expected next, prev or a 'to' table)")]
    UnknownSwitch { button: String, word: String },
}

/// Key given by name (`"KEY_A"`) or by code (`30`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum KeySpec {
    Code(u16),
    Name(String),
}

/// The `switch` entry of a button
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SwitchConfig {
    /// `"next"` or `"prev"`
    Step(String),
    /// `{ to = "name" }`
    To { to: String },
}

/// Identity of the physical device this configuration is for
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Grab the source handles so the raw events do not reach the desktop
    #[serde(default)]
    pub grab: bool,
}

/// One `[[button]]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ButtonConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rawcode: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub kind: KindConfig,
    #[serde(default)]
    pub delay_ms: u32,
    #[serde(default)]
    pub keycode: Option<KeySpec>,
    #[serde(default)]
    pub mods: Vec<KeySpec>,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub switch: Option<SwitchConfig>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindConfig {
    #[default]
    Normal,
    Immediate,
    Release,
}

impl From<KindConfig> for ButtonKind {
    fn from(kind: KindConfig) -> Self {
        match kind {
            KindConfig::Normal => ButtonKind::Normal,
            KindConfig::Immediate => ButtonKind::Immediate,
            KindConfig::Release => ButtonKind::Release,
        }
    }
}

/// A parsed configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default, rename = "button")]
    pub buttons: Vec<ButtonConfig>,
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// Validate and compile the buttons into an event table
    pub fn event_table(&self) -> Result<EventTable, ConfigError> {
        if self.device.vendor_id == 0 || self.device.product_id == 0 {
            return Err(ConfigError::MissingDeviceId);
        }
        if self.buttons.is_empty() {
            return Err(ConfigError::NoButtons);
        }

        let rules = self
            .buttons
            .iter()
            .enumerate()
            .map(|(i, b)| b.to_rule(i))
            .collect::<Result<Vec<_>, _>>()?;
        let table = EventTable::new(rules);

        for rawcode in table.duplicate_rawcodes() {
            warn!(
                "rawcode {:#010x} configured more than once; only the first button is used",
                rawcode
            );
        }
        Ok(table)
    }
}

impl ButtonConfig {
    fn label(&self, index: usize) -> String {
        if self.name.is_empty() {
            format!("#{}", index + 1)
        } else {
            format!("'{}'", self.name)
        }
    }

    fn to_rule(&self, index: usize) -> Result<ButtonRule, ConfigError> {
        let label = self.label(index);
        if self.rawcode == 0 {
            return Err(ConfigError::MissingRawcode(label));
        }

        let actions = [self.keycode.is_some(), self.command.is_some(), self.switch.is_some()];
        if actions.iter().filter(|&&set| set).count() != 1 {
            return Err(ConfigError::ActionCount(label));
        }

        let output = if let Some(key) = &self.keycode {
            key_output(key, &label)?
        } else if let Some(argv) = &self.command {
            if argv.first().is_none_or(|p| p.trim().is_empty()) {
                return Err(ConfigError::EmptyCommand(label));
            }
            RuleOutput::Command(CommandSpec { argv: argv.clone(), uid: self.uid })
        } else if let Some(switch) = &self.switch {
            RuleOutput::ConfigSwitch(switch_spec(switch, &label)?)
        } else {
            return Err(ConfigError::ActionCount(label));
        };

        if self.mods.len() > MAX_MODS {
            return Err(ConfigError::TooManyMods(label));
        }
        let mods = self
            .mods
            .iter()
            .map(|m| resolve_key(m, &label))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rule = ButtonRule::new(self.rawcode, output)
            .with_name(self.name.clone())
            .with_kind(self.kind.into())
            .with_delay(self.delay_ms)
            .with_modifiers(&mods);
        rule.enabled = self.enabled;
        Ok(rule)
    }
}

fn resolve_key(key: &KeySpec, label: &str) -> Result<u16, ConfigError> {
    match key {
        KeySpec::Code(code) => Ok(*code),
        KeySpec::Name(name) => keynames::key_code(name).ok_or_else(|| ConfigError::UnknownKey {
            button: label.to_string(),
            key: name.clone(),
        }),
    }
}

fn key_output(key: &KeySpec, label: &str) -> Result<RuleOutput, ConfigError> {
    if let KeySpec::Name(name) = key {
        if name.eq_ignore_ascii_case("REL_WHEELFORWARD") {
            return Ok(RuleOutput::WheelPulse(WheelDirection::Forward));
        }
        if name.eq_ignore_ascii_case("REL_WHEELBACK") {
            return Ok(RuleOutput::WheelPulse(WheelDirection::Back));
        }
    }
    resolve_key(key, label).map(RuleOutput::Key)
}

fn switch_spec(switch: &SwitchConfig, label: &str) -> Result<SwitchSpec, ConfigError> {
    match switch {
        SwitchConfig::Step(step) if step.eq_ignore_ascii_case("next") => Ok(SwitchSpec::Next),
        SwitchConfig::Step(step) if step.eq_ignore_ascii_case("prev") => Ok(SwitchSpec::Prev),
        SwitchConfig::Step(word) => Err(ConfigError::UnknownSwitch {
            button: label.to_string(),
            word: word.clone(),
        }),
        SwitchConfig::To { to } if to.trim().is_empty() => {
            Err(ConfigError::EmptySwitchTarget(label.to_string()))
        }
        SwitchConfig::To { to } => Ok(SwitchSpec::To(to.clone())),
    }
}

/// Contents of `manager.toml`
#[derive(Debug, Clone, Default, Deserialize)]
struct ManagerFile {
    #[serde(default)]
    order: Vec<String>,
}

/// A configuration ready to run
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub names: ConfigNames,
    pub config: Config,
    pub table: EventTable,
}

/// The set of named configurations in a directory
pub struct ConfigStore {
    dir: PathBuf,
    ring: Vec<String>,
}

impl ConfigStore {
    /// Open the given directory, or the default one when `None`
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(d) => d.to_path_buf(),
            None => Self::default_directory()?,
        };
        let ring = Self::read_ring(&dir)?;
        if ring.is_empty() {
            anyhow::bail!("No configurations found in {:?}", dir);
        }
        info!("Configurations in {:?}: {:?}", dir, ring);
        Ok(Self { dir, ring })
    }

    /// `/etc/btnmap` when present, else the user's config dir
    fn default_directory() -> Result<PathBuf> {
        let system = PathBuf::from(SYSTEM_CONFIG_DIR);
        if system.is_dir() {
            return Ok(system);
        }
        let config_dir = dirs::config_dir().context("Failed to find config directory")?;
        Ok(config_dir.join("btnmap"))
    }

    fn read_ring(dir: &Path) -> Result<Vec<String>> {
        let manager = dir.join(MANAGER_FILE);
        if manager.exists() {
            let content = fs::read_to_string(&manager)
                .with_context(|| format!("Failed to read {:?}", manager))?;
            let parsed: ManagerFile =
                toml::from_str(&content).context("Failed to parse manager file")?;
            return Ok(parsed.order);
        }

        let mut names = Vec::new();
        let entries =
            fs::read_dir(dir).with_context(|| format!("Failed to read config dir {:?}", dir))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml")
                && path.file_name().is_some_and(|f| f != MANAGER_FILE)
            {
                if let Some(stem) = path.file_stem() {
                    names.push(stem.to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn ring(&self) -> &[String] {
        &self.ring
    }

    /// Resolve a requested name to a ring member; unknown or missing names
    /// fall back to the first configuration.
    pub fn resolve_name(&self, requested: Option<&str>) -> &str {
        let first = self.ring[0].as_str();
        let Some(name) = requested else {
            return first;
        };
        match self.ring.iter().find(|n| *n == name) {
            Some(found) => found,
            None => {
                warn!("Configuration '{}' does not exist, using '{}'", name, first);
                first
            }
        }
    }

    /// Neighbours of `name` in the ring, wrapping at both ends
    pub fn names_for(&self, name: &str) -> ConfigNames {
        let len = self.ring.len();
        match self.ring.iter().position(|n| n == name) {
            Some(i) => ConfigNames {
                current: name.to_string(),
                next: Some(self.ring[(i + 1) % len].clone()),
                prev: Some(self.ring[(i + len - 1) % len].clone()),
                ring: self.ring.clone(),
            },
            None => ConfigNames {
                current: name.to_string(),
                next: None,
                prev: None,
                ring: self.ring.clone(),
            },
        }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.toml", name))
    }

    /// Read, parse and validate one configuration. Any failure is fatal for
    /// startup; an empty table is never substituted.
    pub fn load(&self, name: &str) -> Result<LoadedConfig> {
        let path = self.path_of(name);
        info!("Opening config file: {:?}", path);
        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let config = Config::from_toml(&content).with_context(|| format!("In {:?}", path))?;
        let table = config
            .event_table()
            .with_context(|| format!("Invalid configuration {:?}", path))?;
        info!("Loaded '{}' with {} button(s)", name, table.len());

        Ok(LoadedConfig { names: self.names_for(name), config, table })
    }
}

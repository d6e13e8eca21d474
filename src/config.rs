use clap::{ArgAction, Parser, Subcommand, ValueHint};
use dirs_next::home_dir;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

use crate::bitmap::DEFAULT_THRESHOLD;
use crate::bus::{Chunking, PortSettings};
use crate::mapping::{DisplayMapping, SliderMapping};
use crate::modules::mux::DEFAULT_CHIP;

pub const DEFAULT_STARTUP_DELAY_MS: u64 = 50;
pub const DEFAULT_REFRESH_SECS: u64 = 15;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Top-level configuration. Every field is optional in the file; the
/// accessors below supply the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// slot -> "auto" | file on the card | empty for off
    pub display_mapping: Option<DisplayMapping>,
    /// slot -> session name(s), shared with deej
    pub slider_mapping: Option<SliderMapping>,
    /// sessions treated as currently playing
    pub live_sessions: Option<Vec<String>>,
    pub startup_delay: Option<u64>,   // ms, controller boot
    pub command_delay: Option<u64>,   // ms, settle after each command
    #[serde(rename = "BlackWhite_Threshold")]
    pub black_white_threshold: Option<i64>,
    pub serial: Option<SerialConfig>,
    pub transfer: Option<TransferConfig>,
    pub mux_chip: Option<String>,
    pub icon_dir: Option<PathBuf>,
    pub refresh_interval_secs: Option<u64>,
    pub acknowledge_control: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SerialConfig {
    pub port: Option<String>,       // e.g. "/dev/ttyACM0"
    pub baud_rate: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TransferConfig {
    pub chunk_size: Option<usize>,  // 0 = single write
    pub chunk_delay_ms: Option<u64>,
}

impl Config {
    pub fn display_mapping(&self) -> DisplayMapping {
        self.display_mapping.clone().unwrap_or_default()
    }

    pub fn slider_mapping(&self) -> SliderMapping {
        self.slider_mapping.clone().unwrap_or_default()
    }

    pub fn live_sessions(&self) -> &[String] {
        self.live_sessions.as_deref().unwrap_or_default()
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay.unwrap_or(DEFAULT_STARTUP_DELAY_MS))
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay.unwrap_or(0))
    }

    /// 1..=255, anything else means the default
    pub fn threshold(&self) -> u8 {
        match self.black_white_threshold {
            Some(t) if (1..=255).contains(&t) => t as u8,
            _ => DEFAULT_THRESHOLD,
        }
    }

    pub fn port_settings(&self) -> PortSettings {
        let mut settings = PortSettings::default();
        if let Some(serial) = self.serial.as_ref() {
            if let Some(port) = serial.port.as_ref() { settings.path = port.clone(); }
            if let Some(baud) = serial.baud_rate      { settings.baud_rate = baud; }
        }
        settings
    }

    pub fn chunking(&self) -> Chunking {
        let mut chunking = Chunking::default();
        if let Some(transfer) = self.transfer.as_ref() {
            if let Some(size) = transfer.chunk_size       { chunking.size = size; }
            if let Some(ms) = transfer.chunk_delay_ms     { chunking.delay = Duration::from_millis(ms); }
        }
        chunking
    }

    pub fn mux_chip(&self) -> &str {
        self.mux_chip.as_deref().unwrap_or(DEFAULT_CHIP)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.unwrap_or(DEFAULT_REFRESH_SECS))
    }

    pub fn acknowledge_control(&self) -> bool {
        self.acknowledge_control.unwrap_or(false)
    }
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone)]
#[command(name = "deejdsp", version, about = "deej displays and SD card over the serial link")]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    /// debug logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub verbose: bool,
    /// serial device, e.g. /dev/ttyACM0
    #[arg(long)]
    pub port: Option<String>,
    #[arg(long)]
    pub baud: Option<u32>,
    /// black/white threshold 1-255
    #[arg(long)]
    pub threshold: Option<i64>,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum Command {
    /// Keep displays in step with the mapping (default)
    Run,
    /// List files on the SD card
    List,
    /// Upload a local file to the SD card
    Send {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// name on the card, defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a file from the SD card
    Delete { name: String },
    /// Turn every mapped display off
    Off,
    /// Forget what the displays show and apply the mapping again
    Reload,
    /// Convert an image to the display format locally
    Convert {
        #[arg(value_hint = ValueHint::FilePath)]
        image: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        out: PathBuf,
    },
}

/// Read YAML, merge, apply CLI overrides, validate. Called again on reload.
pub fn load(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        debug!("using config {}", p.display());
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&mut cfg)?;

    Ok(cfg)
}

/// Pretty YAML of effective config (nice for debugging)
pub fn dump(cfg: &Config) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(cfg)?)
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/deejdsp/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/deejdsp/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/deejdsp.yaml");
        if p.exists() { return Some(p) }
    }
    // beside deej
    for candidate in &["deejdsp.yaml", "config.yaml", "config/deejdsp.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

pub fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    parse_yaml(&s)
}

pub fn parse_yaml(s: &str) -> Result<Config, ConfigError> {
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = serde_yaml::from_str(s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    if src.display_mapping.is_some()       { dst.display_mapping = src.display_mapping; }
    if src.slider_mapping.is_some()        { dst.slider_mapping = src.slider_mapping; }
    if src.live_sessions.is_some()         { dst.live_sessions = src.live_sessions; }
    if src.startup_delay.is_some()         { dst.startup_delay = src.startup_delay; }
    if src.command_delay.is_some()         { dst.command_delay = src.command_delay; }
    if src.black_white_threshold.is_some() { dst.black_white_threshold = src.black_white_threshold; }
    if src.mux_chip.is_some()              { dst.mux_chip = src.mux_chip; }
    if src.icon_dir.is_some()              { dst.icon_dir = src.icon_dir; }
    if src.refresh_interval_secs.is_some() { dst.refresh_interval_secs = src.refresh_interval_secs; }
    if src.acknowledge_control.is_some()   { dst.acknowledge_control = src.acknowledge_control; }
    match (&mut dst.serial, src.serial) {
        (None, Some(s)) => dst.serial = Some(s),
        (Some(d), Some(s)) => merge_serial(d, s),
        _ => {}
    }
    match (&mut dst.transfer, src.transfer) {
        (None, Some(t)) => dst.transfer = Some(t),
        (Some(d), Some(t)) => merge_transfer(d, t),
        _ => {}
    }
}

fn merge_serial(dst: &mut SerialConfig, src: SerialConfig) {
    if src.port.is_some()       { dst.port = src.port; }
    if src.baud_rate.is_some()  { dst.baud_rate = src.baud_rate; }
}

fn merge_transfer(dst: &mut TransferConfig, src: TransferConfig) {
    if src.chunk_size.is_some()      { dst.chunk_size = src.chunk_size; }
    if src.chunk_delay_ms.is_some()  { dst.chunk_delay_ms = src.chunk_delay_ms; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.threshold.is_some() { cfg.black_white_threshold = cli.threshold; }
    if cli.port.is_some() || cli.baud.is_some() {
        let serial = cfg.serial.get_or_insert_with(SerialConfig::default);
        if cli.port.is_some() { serial.port = cli.port.clone(); }
        if cli.baud.is_some() { serial.baud_rate = cli.baud; }
    }
}

/// File level problems are errors; out of range values fall back to
/// their defaults with a warning.
fn validate(cfg: &mut Config) -> Result<(), ConfigError> {
    if let Some(t) = cfg.black_white_threshold {
        if !(1..=255).contains(&t) {
            warn!("BlackWhite_Threshold {} out of range 1-255, using {}", t, DEFAULT_THRESHOLD);
            cfg.black_white_threshold = Some(DEFAULT_THRESHOLD as i64);
        }
    }
    if let Some(serial) = cfg.serial.as_ref() {
        if serial.port.as_ref().is_some_and(|p| p.trim().is_empty()) {
            return Err(ConfigError::Validation("serial port must not be empty".into()));
        }
        if serial.baud_rate == Some(0) {
            return Err(ConfigError::Validation("serial baud_rate must be > 0".into()));
        }
    }
    if let Some(chip) = cfg.mux_chip.as_ref() {
        if chip.is_empty() || chip.contains(['.', '\n', ' ']) {
            return Err(ConfigError::Validation(format!("bad mux_chip {:?}", chip)));
        }
    }
    if cfg.refresh_interval_secs == Some(0) {
        warn!("refresh_interval_secs 0, using {}", DEFAULT_REFRESH_SECS);
        cfg.refresh_interval_secs = None;
    }
    Ok(())
}

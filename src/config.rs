//! Tracker configuration.
//!
//! Recognized knobs, with their environment variables for [`Config::from_env`]:
//! - `name` / `PROV_NAME`: workflow name, also the output file stem (default: `dask-workflow`)
//! - `destination` / `PROV_DESTINATION`: output directory (default: `./output`; empty string keeps the document in memory)
//! - `format` / `PROV_FORMAT`: `json` or `provn` (default: `json`)
//! - `rich_types` / `PROV_RICH_TYPES`: element-wise container types (default: false)
//! - `keep_stacktrace` / `PROV_KEEP_STACKTRACE`: keep tracebacks of failed tasks (default: false)

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_NAME: &str = "dask-workflow";
pub const DEFAULT_DESTINATION: &str = "./output";

/// Exchange encoding of the produced document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// PROV-JSON
    #[default]
    Json,
    /// PROV-N text notation
    ProvN,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::ProvN => "provn",
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "prov-json" => Ok(Format::Json),
            "provn" | "prov-n" => Ok(Format::ProvN),
            other => Err(Error::Config(format!("unknown format '{other}'"))),
        }
    }
}

/// Settings shared by the adapter and the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    /// `None` returns the document as a string instead of writing it.
    pub destination: Option<PathBuf>,
    pub format: Format,
    pub rich_types: bool,
    pub keep_stacktrace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            destination: Some(PathBuf::from(DEFAULT_DESTINATION)),
            format: Format::Json,
            rich_types: false,
            keep_stacktrace: false,
        }
    }
}

impl Config {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_destination(mut self, destination: Option<impl Into<PathBuf>>) -> Self {
        self.destination = destination.map(Into::into);
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_rich_types(mut self, rich: bool) -> Self {
        self.rich_types = rich;
        self
    }

    pub fn with_keep_stacktrace(mut self, keep: bool) -> Self {
        self.keep_stacktrace = keep;
        self
    }

    /// Defaults overridden by `PROV_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Config::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();
        if let Some(name) = lookup("PROV_NAME") {
            config.name = name;
        }
        if let Some(dest) = lookup("PROV_DESTINATION") {
            config.destination = if dest.trim().is_empty() { None } else { Some(PathBuf::from(dest)) };
        }
        if let Some(format) = lookup("PROV_FORMAT") {
            config.format = format.parse()?;
        }
        if let Some(rich) = lookup("PROV_RICH_TYPES") {
            config.rich_types = parse_bool("PROV_RICH_TYPES", &rich)?;
        }
        if let Some(keep) = lookup("PROV_KEEP_STACKTRACE") {
            config.keep_stacktrace = parse_bool("PROV_KEEP_STACKTRACE", &keep)?;
        }
        Ok(config)
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{var}: expected a boolean, got '{other}'"))),
    }
}

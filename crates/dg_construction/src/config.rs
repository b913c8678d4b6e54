//! Settings for graph construction.
//!
//! Read from a `Dg.toml` next to the analyzed module if one exists, e.g.
//!
//! ```toml
//! entry = "start"
//! alloc_functions = ["malloc", "xmalloc"]
//! gather_callsites = "pthread_create"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Name of the config file [`DgConfig::from_dir`] looks for.
pub const CONFIG_FILE_NAME: &str = "Dg.toml";

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct DgConfig {
    /// Function construction starts from if no other is named.
    entry: String,
    /// Functions whose result is a fresh heap object.
    alloc_functions: Vec<String>,
    /// Add control dependences from predicate blocks to their scope.
    control_scopes: bool,
    /// Make phi nodes control dependent on their incoming blocks.
    phi_control: bool,
    /// Make looping predicate blocks control dependent on themselves.
    self_loops: bool,
    /// Collect all call sites of the function with this name.
    gather_callsites: Option<String>,
}

impl Default for DgConfig {
    fn default() -> Self {
        Self {
            entry: "main".to_owned(),
            alloc_functions: ["malloc", "calloc", "realloc"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            control_scopes: true,
            phi_control: true,
            self_loops: true,
            gather_callsites: None,
        }
    }
}

impl DgConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reads the config at `path`, or the defaults if there is no such file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_toml_str(&std::fs::read_to_string(path)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_file(dir.as_ref().join(CONFIG_FILE_NAME))
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn is_alloc_function(&self, name: &str) -> bool {
        self.alloc_functions.iter().any(|f| f == name)
    }

    pub fn control_scopes(&self) -> bool {
        self.control_scopes
    }

    pub fn phi_control(&self) -> bool {
        self.phi_control
    }

    pub fn self_loops(&self) -> bool {
        self.self_loops
    }

    pub fn gather_callsites(&self) -> Option<&str> {
        self.gather_callsites.as_deref()
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_gather_callsites(mut self, name: Option<impl Into<String>>) -> Self {
        self.gather_callsites = name.map(Into::into);
        self
    }

    pub fn with_control_scopes(mut self, enabled: bool) -> Self {
        self.control_scopes = enabled;
        self
    }

    pub fn with_phi_control(mut self, enabled: bool) -> Self {
        self.phi_control = enabled;
        self
    }

    pub fn with_self_loops(mut self, enabled: bool) -> Self {
        self.self_loops = enabled;
        self
    }
}

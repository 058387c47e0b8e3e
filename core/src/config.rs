//! Common load/save/validate behaviour for configuration structs.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Error returned from saving or loading a [`Config`] object.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration is structurally fine but fails domain validation.
    #[error("configuration is invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
    /// Reading or writing the underlying file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Serializing or deserializing the config object failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A trait implemented by configuration records that can be loaded from, and
/// saved to, a YAML file, and self-validated before use.
///
/// This intentionally does not provide a fluent builder: the spec this crate
/// implements flattens configuration into plain records with enumerated
/// recognised options, leaving any builder convenience to the surrounding
/// application.
pub trait Config: serde::Serialize {
    /// Validate the configuration, returning every problem found rather than
    /// failing on the first one.
    fn validate(&self) -> Result<(), Vec<String>>;

    /// Serialize and write this configuration to `path`, after validating it.
    fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Err(errors) = self.validate() {
            return Err(ConfigError::Invalid(errors));
        }
        let yaml = serde_yaml::to_string(self)?;
        let mut file = File::create(path)?;
        file.write_all(yaml.as_bytes())?;
        Ok(())
    }

    /// Load a configuration object of type `A` from `path`.
    fn load<A>(path: &Path) -> Result<A, ConfigError>
    where
        for<'de> A: Config + serde::Deserialize<'de>,
    {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

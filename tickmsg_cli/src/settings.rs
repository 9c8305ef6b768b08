use crate::error::CliError;
use libtickmsg::{EndpointSettings, SessionSettings};
use log::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The contents of the settings file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CliSettings {
    pub session: SessionSettings,
    pub endpoint: EndpointSettings,
}

impl CliSettings {
    pub fn try_load<P: AsRef<Path>>(path: P) -> Result<Self, CliError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let settings = serde_yml::from_reader(reader)?;
        Ok(settings)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CliError> {
        // Create directory path if required
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_yml::to_writer(writer, self)?;
        Ok(())
    }
}

pub fn default_settings_path() -> PathBuf {
    let mut home = std::env::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".tickmsg");
    home.push("config.yml");
    home
}

/// Load the settings at `path`, falling back to the defaults if there is no such file.
pub fn load_or_default(path: &Path) -> Result<CliSettings, CliError> {
    match CliSettings::try_load(path) {
        Ok(settings) => Ok(settings),
        Err(CliError::IoError(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("No configuration file found at {}. Using defaults.", path.display());
            Ok(CliSettings::default())
        }
        Err(err) => Err(err),
    }
}

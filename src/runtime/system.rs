//! System definition (the compose file)
//!
//! Only the service names are read; they let the driver reject a typo in a
//! step before any container is touched.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};

#[derive(Deserialize, Debug)]
struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, serde_yaml::Value>,
}

/// Services declared by a compose file
#[derive(Debug, Clone)]
pub struct SystemDefinition {
    path: PathBuf,
    services: BTreeSet<String>,
}

impl SystemDefinition {
    /// Read the compose file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let file: ComposeFile =
            serde_yaml::from_str(content).map_err(|e| Error::config_parse(path, e))?;
        if file.services.is_empty() {
            return Err(Error::config_parse(path, "no services defined"));
        }
        Ok(Self {
            path: path.to_path_buf(),
            services: file.services.into_keys().collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    /// Fail on the first name that is not a declared service
    pub fn check_services<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        match names.iter().find(|n| !self.contains(n.as_ref())) {
            Some(name) => Err(Error::UnknownService {
                name: name.as_ref().to_string(),
                system: self.path.display().to_string(),
            }),
            None => Ok(()),
        }
    }
}

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const VERSION_PLACEHOLDER: &str = "{VERSION}";

/// How to fetch, execute and search one library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryDescriptor {
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub versions: Option<Vec<String>>,
    #[serde(default)]
    pub default_version: Option<String>,
    #[serde(default)]
    pub look_in: Vec<String>,
    #[serde(default)]
    pub mutate_names: Vec<(String, String)>,
    #[serde(default)]
    pub nullify: Vec<String>,
    #[serde(default)]
    pub get_real_version: Option<String>,
    #[serde(default)]
    pub requires: BTreeMap<String, String>,
    #[serde(default)]
    pub documentation: Vec<(String, String)>,
}

impl LibraryDescriptor {
    pub fn source_url(&self, version: &str) -> String {
        self.url.replace(VERSION_PLACEHOLDER, version)
    }

    pub fn companion_url(&self, version: &str) -> Option<&str> {
        self.requires.get(version).map(String::as_str)
    }

    pub fn allows_version(&self, version: &str) -> bool {
        match &self.versions {
            Some(versions) => versions.iter().any(|v| v == version),
            None => true,
        }
    }

    /// `a.b=null;c=null;` for the configured built-ins.
    pub fn nullify_prelude(&self) -> String {
        let mut out = String::new();
        for target in self.nullify.iter().filter(|t| !t.trim().is_empty()) {
            out.push_str(target);
            out.push_str("=null;");
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RegistryEntry {
    Alias(String),
    Library(Box<LibraryDescriptor>),
}

/// Static table of known libraries keyed by lowercase id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, RegistryEntry>,
}

/// A registry hit, with the id the descriptor is actually stored under.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    pub id: &'a str,
    pub descriptor: &'a LibraryDescriptor,
    pub aliased: bool,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read registry {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json")
            .to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml(&raw),
            _ => Self::from_json(&raw),
        }
        .with_context(|| format!("parse registry {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let entries: BTreeMap<String, RegistryEntry> = serde_json::from_str(raw)?;
        Self::from_entries(entries)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let entries: BTreeMap<String, RegistryEntry> = serde_yaml_ng::from_str(raw)?;
        Self::from_entries(entries)
    }

    fn from_entries(entries: BTreeMap<String, RegistryEntry>) -> Result<Self> {
        let mut out = BTreeMap::new();
        for (id, entry) in entries {
            let key = id.to_ascii_lowercase();
            if out.insert(key, entry).is_some() {
                bail!("duplicate library id `{id}` (ids are case-insensitive)");
            }
        }
        Ok(Self { entries: out })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Look up a library, following one level of aliasing.
    pub fn get(&self, id: &str) -> Option<Lookup<'_>> {
        let (key, entry) = self.entries.get_key_value(&id.to_ascii_lowercase())?;
        match entry {
            RegistryEntry::Library(descriptor) => Some(Lookup {
                id: key,
                descriptor,
                aliased: false,
            }),
            RegistryEntry::Alias(target) => {
                let (key, entry) = self.entries.get_key_value(&target.to_ascii_lowercase())?;
                match entry {
                    RegistryEntry::Library(descriptor) => Some(Lookup {
                        id: key,
                        descriptor,
                        aliased: true,
                    }),
                    RegistryEntry::Alias(_) => None,
                }
            }
        }
    }
}

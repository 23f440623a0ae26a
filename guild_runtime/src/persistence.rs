//! Persistence gateway — the two guild documents at rest.
//!
//! Guild and claim documents are stored independently as pretty JSON.
//! A missing document loads as `None`; a corrupt one is an error and the
//! caller decides what to do (the server starts empty).

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use guild_engine::snapshot::{ClaimDocument, GuildDocument};

use crate::config::ServerConfig;
use crate::error::PersistenceError;

pub trait PersistenceGateway: Send {
    fn load_guilds(&self) -> Result<Option<GuildDocument>, PersistenceError>;
    fn save_guilds(&mut self, doc: &GuildDocument) -> Result<(), PersistenceError>;
    fn load_claims(&self) -> Result<Option<ClaimDocument>, PersistenceError>;
    fn save_claims(&mut self, doc: &ClaimDocument) -> Result<(), PersistenceError>;
}

// ── JSON files ─────────────────────────────────────────────────

/// Two JSON files on disk, written whole on every save.
#[derive(Debug, Clone)]
pub struct JsonFileGateway {
    guilds_path: PathBuf,
    claims_path: PathBuf,
}

impl JsonFileGateway {
    pub fn new(guilds_path: impl Into<PathBuf>, claims_path: impl Into<PathBuf>) -> Self {
        Self {
            guilds_path: guilds_path.into(),
            claims_path: claims_path.into(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.guilds_path(), config.claims_path())
    }

    pub fn guilds_path(&self) -> &Path {
        &self.guilds_path
    }

    pub fn claims_path(&self) -> &Path {
        &self.claims_path
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(path)(err)),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

fn write_document<T: Serialize>(path: &Path, doc: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let content = serde_json::to_string_pretty(doc)?;

    let mut file = File::create(path).map_err(io_error(path))?;
    file.write_all(content.as_bytes()).map_err(io_error(path))?;
    file.sync_all().map_err(io_error(path))?;
    Ok(())
}

impl PersistenceGateway for JsonFileGateway {
    fn load_guilds(&self) -> Result<Option<GuildDocument>, PersistenceError> {
        read_document(&self.guilds_path)
    }

    fn save_guilds(&mut self, doc: &GuildDocument) -> Result<(), PersistenceError> {
        write_document(&self.guilds_path, doc)
    }

    fn load_claims(&self) -> Result<Option<ClaimDocument>, PersistenceError> {
        read_document(&self.claims_path)
    }

    fn save_claims(&mut self, doc: &ClaimDocument) -> Result<(), PersistenceError> {
        write_document(&self.claims_path, doc)
    }
}

// ── In memory ──────────────────────────────────────────────────

/// Keeps the serialized JSON in memory, so loads still go through the
/// same parse path as files.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    guilds: Mutex<Option<String>>,
    claims: Mutex<Option<String>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw document text, e.g. a corrupt document in tests.
    pub fn with_raw(guilds: Option<&str>, claims: Option<&str>) -> Self {
        Self {
            guilds: Mutex::new(guilds.map(str::to_string)),
            claims: Mutex::new(claims.map(str::to_string)),
        }
    }

    pub fn raw_guilds(&self) -> Option<String> {
        lock(&self.guilds).clone()
    }

    pub fn raw_claims(&self) -> Option<String> {
        lock(&self.claims).clone()
    }
}

fn lock(slot: &Mutex<Option<String>>) -> std::sync::MutexGuard<'_, Option<String>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn parse_slot<T: DeserializeOwned>(slot: &Mutex<Option<String>>) -> Result<Option<T>, PersistenceError> {
    match lock(slot).as_deref() {
        Some(content) => Ok(Some(serde_json::from_str(content)?)),
        None => Ok(None),
    }
}

impl PersistenceGateway for MemoryGateway {
    fn load_guilds(&self) -> Result<Option<GuildDocument>, PersistenceError> {
        parse_slot(&self.guilds)
    }

    fn save_guilds(&mut self, doc: &GuildDocument) -> Result<(), PersistenceError> {
        *lock(&self.guilds) = Some(serde_json::to_string_pretty(doc)?);
        Ok(())
    }

    fn load_claims(&self) -> Result<Option<ClaimDocument>, PersistenceError> {
        parse_slot(&self.claims)
    }

    fn save_claims(&mut self, doc: &ClaimDocument) -> Result<(), PersistenceError> {
        *lock(&self.claims) = Some(serde_json::to_string_pretty(doc)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guild_engine::snapshot::ClaimRecord;

    #[test]
    fn missing_documents_load_as_none() {
        let gateway = JsonFileGateway::new(
            "/nonexistent/guilds_test/guilds.json",
            "/nonexistent/guilds_test/guildclaims.json",
        );
        assert!(gateway.load_guilds().unwrap().is_none());
        assert!(gateway.load_claims().unwrap().is_none());
    }

    #[test]
    fn memory_gateway_round_trips() {
        let mut gateway = MemoryGateway::new();
        let claims = ClaimDocument {
            claims: vec![ClaimRecord { guild_id: 2, x: -1, z: 5, border_flags: 0b1111 }],
        };
        gateway.save_claims(&claims).unwrap();
        gateway.save_guilds(&GuildDocument::default()).unwrap();
        assert_eq!(gateway.load_claims().unwrap(), Some(claims));
        assert_eq!(gateway.load_guilds().unwrap(), Some(GuildDocument::default()));
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let gateway = MemoryGateway::with_raw(Some("{not json"), None);
        assert!(matches!(gateway.load_guilds(), Err(PersistenceError::Json(_))));
        assert!(gateway.load_claims().unwrap().is_none());
    }
}

//! Process-wide settings store with all-or-nothing updates.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::{definition, Settings, SettingsPatch, DEFINITIONS};
use crate::error::{Error, Result, SettingIssue};
use crate::util::retry_io;

/// Holds the live settings snapshot.
///
/// Readers get an `Arc` to an immutable snapshot, so a run keeps a consistent
/// view even if an update is committed mid-run. Writers are serialized by
/// `update_lock`; the snapshot itself is swapped in one step.
pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
    update_lock: Mutex<()>,
    path: Option<PathBuf>,
}

impl SettingsStore {
    /// Store holding the built-in defaults, without persistence.
    pub fn in_memory() -> Self {
        Self::from_settings(Settings::defaults(), None)
    }

    /// Open a persisted store, seeding from defaults, the process environment
    /// and finally `path` if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`SettingsStore::open`] with an injectable environment lookup.
    pub fn open_with_env<F>(path: impl Into<PathBuf>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.into();
        let mut settings = Settings::defaults();

        for def in DEFINITIONS {
            let Some(raw) = env(def.key) else { continue };
            match def.kind.parse_text(&raw) {
                Ok(value) => settings.set(def.key, value),
                Err(reason) => warn!(key = def.key, %reason, "Ignoring invalid setting from environment"),
            }
        }

        if path.exists() {
            let loaded = Self::read_persisted(&path)?;
            for (key, raw) in loaded {
                let Some(def) = definition(&key) else {
                    warn!(key = %key, "Ignoring unknown persisted setting");
                    continue;
                };
                match def.kind.coerce(&raw) {
                    Ok(value) => settings.set(def.key, value),
                    Err(reason) => warn!(key = %key, %reason, "Ignoring invalid persisted setting"),
                }
            }
            info!(path = %path.display(), "Loaded persisted settings");
        } else {
            debug!(path = %path.display(), "No persisted settings yet, using defaults");
        }

        Ok(Self::from_settings(settings, Some(path)))
    }

    fn from_settings(settings: Settings, path: Option<PathBuf>) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
            update_lock: Mutex::new(()),
            path,
        }
    }

    /// Current full snapshot.
    pub fn get(&self) -> Arc<Settings> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Validate `candidate` against the key/kind table and commit it.
    ///
    /// `candidate` may hold any subset of the known keys; keys it omits keep
    /// their current value. Any unknown key or out-of-domain value rejects the
    /// whole update and leaves the store untouched. When the store is
    /// persisted, the file is written before the in-memory swap so a failed
    /// write also changes nothing.
    pub fn replace(&self, candidate: SettingsPatch) -> Result<Arc<Settings>> {
        if candidate.is_empty() {
            return Err(Error::invalid_argument("no settings provided"));
        }

        let _guard = self.update_lock.lock().map_err(|_| Error::LockPoisoned)?;
        let mut next = (*self.get()).clone();
        let mut issues = Vec::new();

        for (key, raw) in &candidate {
            match definition(key) {
                None => issues.push(SettingIssue::new(key, "unrecognized setting")),
                Some(def) => match def.kind.coerce(raw) {
                    Ok(value) => next.set(def.key, value),
                    Err(reason) => issues.push(SettingIssue::new(key, reason)),
                },
            }
        }

        if !issues.is_empty() {
            warn!(rejected = issues.len(), "Rejected settings update");
            return Err(Error::ValidationFailed(issues));
        }

        if let Some(path) = &self.path {
            Self::persist(path, &next)?;
        }

        let next = Arc::new(next);
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *current = Arc::clone(&next);
        }

        info!(
            keys = %candidate.keys().cloned().collect::<Vec<_>>().join(", "),
            "Settings updated"
        );
        Ok(next)
    }

    /// Path of the persisted settings file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read_persisted(path: &Path) -> Result<SettingsPatch> {
        let content = retry_io("read settings", || std::fs::read_to_string(path))?;
        Ok(toml::from_str(&content)?)
    }

    fn persist(path: &Path, settings: &Settings) -> Result<()> {
        let content = toml::to_string(settings)?;
        let tmp = path.with_extension("toml.tmp");
        retry_io("write settings", || {
            std::fs::write(&tmp, &content)?;
            std::fs::rename(&tmp, path)
        })
    }
}

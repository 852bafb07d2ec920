//! Session identity generation and scoped storage.
//!
//! An identity is created once per storage scope and then reused for
//! every connection target. [`MemoryIdentityStore`] lives as long as the
//! process (the analogue of a browser tab); [`FileIdentityStore`] lets a
//! user keep the same identity across restarts.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::constants::IDENTITY_PREFIX;
use crate::error::IdentityError;

/// Opaque participant identifier, safe to embed in a URL path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    /// Validate an existing identity string.
    ///
    /// Accepts ASCII alphanumerics plus `_`, `-` and `.`.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if valid {
            Ok(Self(value))
        } else {
            Err(IdentityError::Invalid(value))
        }
    }

    /// Generate a fresh identity (`user_` followed by 8 hex characters).
    #[must_use]
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{IDENTITY_PREFIX}{}", &simple[..8]))
    }

    /// Load the identity from `store`, generating and saving one if absent.
    pub fn load_or_create(store: &dyn IdentityStore) -> Result<Self, IdentityError> {
        if let Some(existing) = store.load()? {
            return Self::new(existing);
        }
        let identity = Self::generate();
        store.save(identity.as_str())?;
        log::info!("[Identity] Created session identity {}", identity);
        Ok(identity)
    }

    /// Borrow the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage scope for a session identity.
pub trait IdentityStore: Send + Sync + fmt::Debug {
    /// Previously stored identity, if any.
    fn load(&self) -> Result<Option<String>, IdentityError>;
    /// Persist `identity` for later loads.
    fn save(&self, identity: &str) -> Result<(), IdentityError>;
}

/// Process-scoped identity storage.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    slot: Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<String>, IdentityError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, identity: &str) -> Result<(), IdentityError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.to_string());
        Ok(())
    }
}

/// Identity stored as a single line in a file.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    /// Store the identity at `path`. Parent directories are created on save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<String>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let trimmed = content.trim();
                Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, identity: &str) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, format!("{identity}\n"))?;
        Ok(())
    }
}

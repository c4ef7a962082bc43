// Copyright (c) 2019-2023 Crater Dog Technologies

//! Persisted key material

use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use log::debug;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use armord_proto::KEY_SIZE;

use crate::Error;

/// Key material held by the host between sessions
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyMaterial {
    /// Device public key, once generated
    #[serde(with = "hex_key")]
    pub public_key: Option<[u8; KEY_SIZE]>,

    /// Mobile device key binding the HSM key pair
    #[serde(with = "hex_key")]
    pub device_key: Option<[u8; KEY_SIZE]>,

    /// Device key prior to rotation, used for exactly one signature
    #[serde(with = "hex_key", skip_serializing_if = "Option::is_none")]
    pub previous_device_key: Option<[u8; KEY_SIZE]>,

    /// Certificate version
    pub version: u32,
}

impl KeyMaterial {
    /// Generate a fresh random device key
    pub fn random_device_key() -> [u8; KEY_SIZE] {
        let mut k = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut k);
        k
    }

    /// Check whether any key material is present
    pub fn is_empty(&self) -> bool {
        self.public_key.is_none() && self.device_key.is_none()
    }
}

/// Debug output omits device keys
impl Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &self.public_key.map(hex::encode))
            .field("device_key", &self.device_key.map(|_| "[redacted]"))
            .field(
                "previous_device_key",
                &self.previous_device_key.map(|_| "[redacted]"),
            )
            .field("version", &self.version)
            .finish()
    }
}

mod hex_key {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::KEY_SIZE;

    pub fn serialize<S: Serializer>(v: &Option<[u8; KEY_SIZE]>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(k) => s.serialize_some(&hex::encode(k)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; KEY_SIZE]>, D::Error> {
        let v = Option::<String>::deserialize(d)?;

        v.map(|s| {
            let mut k = [0u8; KEY_SIZE];
            hex::decode_to_slice(&s, &mut k).map_err(D::Error::custom)?;
            Ok(k)
        })
        .transpose()
    }
}

/// Persisted key-store collaborator
pub trait KeyStore: Send + Sync {
    /// Load key material, empty material when nothing has been stored
    fn load(&self) -> Result<KeyMaterial, Error>;

    /// Persist key material, replacing any stored value
    fn save(&self, keys: &KeyMaterial) -> Result<(), Error>;
}

impl<T: KeyStore + ?Sized> KeyStore for Box<T> {
    fn load(&self) -> Result<KeyMaterial, Error> {
        T::load(self)
    }

    fn save(&self, keys: &KeyMaterial) -> Result<(), Error> {
        T::save(self, keys)
    }
}

/// In-memory [KeyStore], clones share storage
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    inner: Arc<Mutex<KeyMaterial>>,
}

impl MemoryKeyStore {
    /// Create a key store holding the provided material
    pub fn new(keys: KeyMaterial) -> Self {
        Self {
            inner: Arc::new(Mutex::new(keys)),
        }
    }

    /// Fetch a copy of the stored material
    pub fn get(&self) -> KeyMaterial {
        self.inner.lock().map(|k| k.clone()).unwrap_or_default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<KeyMaterial, Error> {
        let k = self
            .inner
            .lock()
            .map_err(|_| Error::KeyStore("lock poisoned".to_string()))?;
        Ok(k.clone())
    }

    fn save(&self, keys: &KeyMaterial) -> Result<(), Error> {
        let mut k = self
            .inner
            .lock()
            .map_err(|_| Error::KeyStore("lock poisoned".to_string()))?;
        *k = keys.clone();
        Ok(())
    }
}

/// JSON file backed [KeyStore]
#[derive(Clone, Debug)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    /// Create a key store at the provided path
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<KeyMaterial, Error> {
        if !self.path.exists() {
            debug!("No key file at {}", self.path.display());
            return Ok(KeyMaterial::default());
        }

        let s = fs::read_to_string(&self.path)?;
        serde_json::from_str(&s).map_err(|e| Error::KeyStore(e.to_string()))
    }

    fn save(&self, keys: &KeyMaterial) -> Result<(), Error> {
        if let Some(p) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(p)?;
        }

        let s = serde_json::to_string_pretty(keys).map_err(|e| Error::KeyStore(e.to_string()))?;
        fs::write(&self.path, s)?;

        debug!("Saved keys to {}", self.path.display());

        Ok(())
    }
}

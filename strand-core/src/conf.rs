//! Configuration store backed by an engine configuration object.
//!
//! One type serves both client-level and topic-level configuration. Values
//! cross the boundary as strings; richer types are rendered by the caller.

use std::fmt;
use std::sync::Arc;

use crate::engine::{ConfKind, ConfRes, ERRSTR_SIZE, Engine, ErrBuf, RawHandle};
use crate::error::{Result, StrandError};
use crate::handle::{NativeHandle, ResourceKind};

/// Keys with this suffix bind function pointers and carry no data.
pub const CALLBACK_SUFFIX: &str = "_cb";

pub struct ConfigStore {
    handle: NativeHandle,
    kind: ConfKind,
}

impl ConfigStore {
    /// Create an engine configuration object populated with defaults.
    ///
    /// # Errors
    /// `CreationFailed` if the engine cannot allocate one.
    pub fn new(engine: Arc<dyn Engine>, kind: ConfKind) -> Result<Self> {
        let handle = NativeHandle::create_conf(engine, kind)?;
        Ok(Self { handle, kind })
    }

    /// Wrap a raw configuration handle, typically one produced by
    /// [`NativeHandle::duplicate`].
    ///
    /// # Errors
    /// `CreationFailed` if `raw` is null.
    pub fn from_raw(engine: Arc<dyn Engine>, kind: ConfKind, raw: RawHandle) -> Result<Self> {
        let handle = NativeHandle::from_raw(engine, ResourceKind::Conf(kind), raw)?;
        Ok(Self { handle, kind })
    }

    #[must_use]
    pub fn kind(&self) -> ConfKind {
        self.kind
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.handle.engine()
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.handle.is_invalid()
    }

    /// Set a property.
    ///
    /// # Errors
    /// `InvalidProperty` / `UnknownProperty` carrying the engine's
    /// diagnostic, `UnexpectedEngine` for unmodelled result codes,
    /// `InvalidHandle` after release.
    pub fn set(&self, name: &str, value: &str) -> Result<()> {
        let raw = self.handle.raw()?;
        let mut errstr = ErrBuf::with_capacity(ERRSTR_SIZE);
        match self.engine().conf_set(self.kind, raw, name, value, &mut errstr) {
            ConfRes::Ok => Ok(()),
            ConfRes::Invalid => Err(StrandError::InvalidProperty {
                name: name.to_string(),
                reason: errstr.as_str().to_string(),
            }),
            ConfRes::Unknown => Err(StrandError::UnknownProperty {
                name: name.to_string(),
                reason: errstr.as_str().to_string(),
            }),
            ConfRes::Other(code) => Err(StrandError::UnexpectedEngine {
                code,
                context: format!("setting configuration property \"{name}\""),
            }),
        }
    }

    /// Read a property.
    ///
    /// # Errors
    /// `UnknownProperty` naming the key, `UnexpectedEngine` for any other
    /// failure, `InvalidHandle` after release.
    pub fn get(&self, name: &str) -> Result<String> {
        let raw = self.handle.raw()?;
        let engine = self.engine();

        let mut dest_size = 0usize;
        let mut res = engine.conf_get(self.kind, raw, name, None, &mut dest_size);
        let mut dest = Vec::new();
        if res == ConfRes::Ok {
            dest = vec![0u8; dest_size];
            res = engine.conf_get(
                self.kind,
                raw,
                name,
                Some(dest.as_mut_slice()),
                &mut dest_size,
            );
        }

        match res {
            ConfRes::Ok => {
                let end = dest.iter().position(|&b| b == 0).unwrap_or(dest.len());
                Ok(String::from_utf8_lossy(&dest[..end]).into_owned())
            },
            ConfRes::Unknown => Err(StrandError::UnknownProperty {
                name: name.to_string(),
                reason: format!("No such configuration property: {name}"),
            }),
            other => Err(StrandError::UnexpectedEngine {
                code: other.code(),
                context: format!("getting configuration property \"{name}\""),
            }),
        }
    }

    /// Snapshot every property, excluding callback bindings.
    ///
    /// # Errors
    /// `EmptyDump` if the engine returns no array, `MalformedDump` for an
    /// odd entry count or unreadable entry, `InvalidHandle` after release.
    pub fn dump(&self) -> Result<ConfigDump> {
        let raw = self.handle.raw()?;
        let mut cnt = 0usize;
        let arr = self.engine().conf_dump(self.kind, raw, &mut cnt);
        if arr.is_null() {
            return Err(StrandError::EmptyDump(self.kind));
        }

        let guard = DumpGuard {
            engine: self.engine().as_ref(),
            arr,
            cnt,
        };
        guard.decode()
    }

    /// Independent copy backed by a new engine object.
    ///
    /// # Errors
    /// `CreationFailed` if the engine cannot copy, `InvalidHandle` after release.
    pub fn duplicate(&self) -> Result<Self> {
        let raw = self.handle.duplicate()?;
        Self::from_raw(self.engine().clone(), self.kind, raw)
    }

    /// Install `topic` as the default topic configuration. The engine takes
    /// ownership of its object; `topic` is consumed.
    ///
    /// # Errors
    /// `WrongKind` unless `self` is a client configuration and `topic` a
    /// topic configuration.
    pub fn set_default_topic_config(&self, topic: ConfigStore) -> Result<()> {
        if self.kind != ConfKind::Global {
            return Err(StrandError::WrongKind(self.kind));
        }
        if topic.kind != ConfKind::Topic {
            return Err(StrandError::WrongKind(topic.kind));
        }
        let raw = self.handle.raw()?;
        let tconf = topic.into_raw()?;
        self.engine().conf_set_default_topic_conf(raw, tconf);
        Ok(())
    }

    /// Transfer ownership of the engine object out of this store.
    ///
    /// # Errors
    /// `InvalidHandle` if already released.
    pub fn into_raw(self) -> Result<RawHandle> {
        self.handle.into_raw()
    }

    /// Free the engine object now rather than on drop.
    pub fn release(&self) -> bool {
        self.handle.release()
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Property snapshot in the order the engine listed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDump {
    entries: Vec<(String, String)>,
}

impl ConfigDump {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl IntoIterator for ConfigDump {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Frees a dump array on every exit path.
struct DumpGuard<'a> {
    engine: &'a dyn Engine,
    arr: RawHandle,
    cnt: usize,
}

impl DumpGuard<'_> {
    fn decode(&self) -> Result<ConfigDump> {
        if self.cnt % 2 != 0 {
            return Err(StrandError::MalformedDump(self.cnt));
        }

        let mut entries = Vec::with_capacity(self.cnt / 2);
        for i in 0..self.cnt / 2 {
            let key = self
                .engine
                .conf_dump_entry(self.arr, 2 * i)
                .ok_or(StrandError::MalformedDump(self.cnt))?;
            let value = self
                .engine
                .conf_dump_entry(self.arr, 2 * i + 1)
                .ok_or(StrandError::MalformedDump(self.cnt))?;
            if !key.ends_with(CALLBACK_SUFFIX) {
                entries.push((key, value));
            }
        }
        Ok(ConfigDump { entries })
    }
}

impl Drop for DumpGuard<'_> {
    fn drop(&mut self) {
        self.engine.conf_dump_free(self.arr, self.cnt);
    }
}

//! Exactly-once ownership of engine resources.
//!
//! A [`NativeHandle`] owns one [`RawHandle`]. Release swaps the raw value to
//! the null sentinel before calling the engine's destructor, so a second
//! release (explicit or from `Drop`) finds nothing to free.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::engine::{ConfKind, Engine, RawHandle};
use crate::error::{Result, StrandError};

/// What the handle points at, which selects the destructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Conf(ConfKind),
    Consumer,
}

impl ResourceKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Conf(ConfKind::Global) => "client configuration",
            Self::Conf(ConfKind::Topic) => "topic configuration",
            Self::Consumer => "consumer",
        }
    }
}

pub struct NativeHandle {
    raw: AtomicUsize,
    kind: ResourceKind,
    engine: Arc<dyn Engine>,
}

impl NativeHandle {
    /// Request a new configuration object from the engine.
    ///
    /// # Errors
    /// `CreationFailed` when the engine returns the null sentinel.
    pub fn create_conf(engine: Arc<dyn Engine>, kind: ConfKind) -> Result<Self> {
        let raw = engine.conf_new(kind);
        Self::from_raw(engine, ResourceKind::Conf(kind), raw)
    }

    /// Take ownership of a raw handle obtained from the engine.
    ///
    /// # Errors
    /// `CreationFailed` when `raw` is null.
    pub fn from_raw(engine: Arc<dyn Engine>, kind: ResourceKind, raw: RawHandle) -> Result<Self> {
        if raw.is_null() {
            return Err(StrandError::CreationFailed(kind.name().to_string()));
        }
        tracing::debug!(handle = %raw, kind = kind.name(), "native handle acquired");
        Ok(Self {
            raw: AtomicUsize::new(raw.as_usize()),
            kind,
            engine,
        })
    }

    /// Current raw value for passing to the engine.
    ///
    /// # Errors
    /// `InvalidHandle` once the handle has been released or transferred.
    pub fn raw(&self) -> Result<RawHandle> {
        let raw = RawHandle::from_usize(self.raw.load(Ordering::Acquire));
        if raw.is_null() {
            return Err(StrandError::InvalidHandle(self.kind.name()));
        }
        Ok(raw)
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.raw.load(Ordering::Acquire) == 0
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Ask the engine for an independent copy of a configuration object.
    /// The caller must wrap the result in its own handle.
    ///
    /// # Errors
    /// `InvalidHandle` if released or if this is a consumer handle.
    pub fn duplicate(&self) -> Result<RawHandle> {
        let raw = self.raw()?;
        match self.kind {
            ResourceKind::Conf(kind) => Ok(self.engine.conf_dup(kind, raw)),
            ResourceKind::Consumer => Err(StrandError::InvalidHandle("duplicable configuration")),
        }
    }

    /// Free the resource. Returns `true` if this call performed the release.
    pub fn release(&self) -> bool {
        let raw = RawHandle::from_usize(self.raw.swap(0, Ordering::AcqRel));
        if raw.is_null() {
            return false;
        }
        match self.kind {
            ResourceKind::Conf(kind) => self.engine.conf_destroy(kind, raw),
            ResourceKind::Consumer => self.engine.consumer_destroy(raw),
        }
        tracing::debug!(handle = %raw, kind = self.kind.name(), "native handle released");
        true
    }

    /// Give up ownership without freeing; the engine or another owner now
    /// holds the resource.
    ///
    /// # Errors
    /// `InvalidHandle` if already released.
    pub fn into_raw(self) -> Result<RawHandle> {
        let raw = RawHandle::from_usize(self.raw.swap(0, Ordering::AcqRel));
        if raw.is_null() {
            return Err(StrandError::InvalidHandle(self.kind.name()));
        }
        Ok(raw)
    }
}

impl Drop for NativeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("raw", &RawHandle::from_usize(self.raw.load(Ordering::Relaxed)))
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

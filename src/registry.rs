//! Registry of content sources and their mutable state.
//!
//! The registry is the sole owner of [`SourceDescriptor`] state
//! (enabled flag, credentials). All reads hand out cloned snapshots, so
//! a reader can never observe a half-updated descriptor; writes go
//! through a single `RwLock` writer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::source::{AuthCredential, Capability, ContentSource, SourceDescriptor};

struct Registration {
    descriptor: SourceDescriptor,
    source: Arc<dyn ContentSource>,
}

/// Thread-safe registry of content sources.
///
/// Constructed explicitly and shared via `Arc` (no process-global
/// singleton); the dispatcher holds one and reads snapshots from it.
#[derive(Default)]
pub struct SourceRegistry {
    inner: RwLock<HashMap<String, Registration>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Registration>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Registration>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a source under `descriptor.id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSource`] if the descriptor fails
    /// validation, or [`Error::DuplicateSource`] if the id is taken.
    pub fn register(
        &self,
        descriptor: SourceDescriptor,
        source: Arc<dyn ContentSource>,
    ) -> Result<()> {
        descriptor.validate()?;
        let mut map = self.write();
        if map.contains_key(&descriptor.id) {
            return Err(Error::DuplicateSource(descriptor.id));
        }
        tracing::debug!(source = %descriptor.id, "source registered");
        map.insert(descriptor.id.clone(), Registration { descriptor, source });
        Ok(())
    }

    /// Removes a source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSource`] if `id` is not registered.
    pub fn unregister(&self, id: &str) -> Result<()> {
        let mut map = self.write();
        if map.remove(id).is_none() {
            return Err(Error::UnknownSource(id.to_string()));
        }
        tracing::debug!(source = id, "source unregistered");
        Ok(())
    }

    /// Enables or disables a source without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSource`] if `id` is not registered.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut map = self.write();
        let registration = map
            .get_mut(id)
            .ok_or_else(|| Error::UnknownSource(id.to_string()))?;
        registration.descriptor.enabled = enabled;
        Ok(())
    }

    /// Replaces (or clears) a source's opaque credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSource`] if `id` is not registered.
    pub fn update_auth(&self, id: &str, auth: Option<AuthCredential>) -> Result<()> {
        let mut map = self.write();
        let registration = map
            .get_mut(id)
            .ok_or_else(|| Error::UnknownSource(id.to_string()))?;
        registration.descriptor.auth = auth;
        Ok(())
    }

    /// Returns a snapshot of one descriptor, or `None` if unregistered.
    pub fn get(&self, id: &str) -> Option<SourceDescriptor> {
        self.read().get(id).map(|r| r.descriptor.clone())
    }

    /// Returns descriptor snapshots, optionally filtered by capability,
    /// sorted by ascending priority (ties broken by id).
    pub fn list(&self, capability: Option<Capability>) -> Vec<SourceDescriptor> {
        let map = self.read();
        let mut descriptors: Vec<SourceDescriptor> = map
            .values()
            .map(|r| r.descriptor.clone())
            .filter(|d| capability.is_none_or(|c| d.has_capability(c)))
            .collect();
        descriptors.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        descriptors
    }

    /// Resolves the target set for an operation: the explicit `ids` (or
    /// every registered source when `None`) intersected with enabled
    /// sources declaring `capability`, in ascending priority order.
    ///
    /// An empty result is not an error here; the dispatcher decides
    /// whether that is fatal for the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSource`] if an explicit id is not
    /// registered at all.
    pub fn resolve(
        &self,
        ids: Option<&[String]>,
        capability: Capability,
    ) -> Result<Vec<(SourceDescriptor, Arc<dyn ContentSource>)>> {
        let map = self.read();
        let mut targets: Vec<(SourceDescriptor, Arc<dyn ContentSource>)> = Vec::new();

        match ids {
            Some(ids) => {
                let mut seen: Vec<&str> = Vec::new();
                for id in ids {
                    let registration = map
                        .get(id.as_str())
                        .ok_or_else(|| Error::UnknownSource(id.clone()))?;
                    if seen.contains(&id.as_str()) {
                        continue;
                    }
                    seen.push(id);
                    if registration.descriptor.enabled
                        && registration.descriptor.has_capability(capability)
                    {
                        targets
                            .push((registration.descriptor.clone(), registration.source.clone()));
                    }
                }
            }
            None => {
                for registration in map.values() {
                    if registration.descriptor.enabled
                        && registration.descriptor.has_capability(capability)
                    {
                        targets
                            .push((registration.descriptor.clone(), registration.source.clone()));
                    }
                }
            }
        }

        targets.sort_by(|a, b| {
            a.0.priority
                .cmp(&b.0.priority)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        Ok(targets)
    }

    /// Number of registered sources (enabled or not).
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

//! Device registry.
//!
//! Owns the links of every attached device, keyed by device id.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::info;

use crate::core::{IrqSink, MAX_DEVICES};
use crate::link::{Command, CommandOutput, Link, LinkConfig, LinkError};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Every device slot is taken.
    #[error("registry full ({0} devices)")]
    Full(usize),

    /// No device with this id.
    #[error("unknown device {0}")]
    UnknownDevice(u32),

    /// The link rejected the command.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Attached devices.
#[derive(Debug)]
pub struct Registry {
    links: RwLock<BTreeMap<u32, Link>>,
    capacity: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry with room for [`MAX_DEVICES`] devices.
    pub fn new() -> Self {
        Self::with_capacity(MAX_DEVICES)
    }

    /// Registry with room for `capacity` devices.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            links: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<u32, Link>> {
        self.links.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<u32, Link>> {
        self.links.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a device and return its id, the lowest one free.
    pub fn attach(&self, config: LinkConfig) -> Result<u32, RegistryError> {
        self.attach_with(config, None)
    }

    /// Attach a device whose inbound interrupts go to `irq`.
    pub fn attach_with(
        &self,
        config: LinkConfig,
        irq: Option<Arc<dyn IrqSink>>,
    ) -> Result<u32, RegistryError> {
        let mut links = self.write();
        if links.len() >= self.capacity {
            return Err(RegistryError::Full(self.capacity));
        }

        let id = (0u32..)
            .find(|id| !links.contains_key(id))
            .ok_or(RegistryError::Full(self.capacity))?;
        let link = match irq {
            Some(sink) => Link::with_irq_sink(id, config, sink),
            None => Link::new(id, config),
        };
        links.insert(id, link);
        info!(device = id, "attached");
        Ok(id)
    }

    /// Detach device `id`: disconnect it and release its BARs.
    pub async fn detach(&self, id: u32) -> Result<(), RegistryError> {
        let link = self.write().remove(&id);
        let link = link.ok_or(RegistryError::UnknownDevice(id))?;
        link.close().await;
        info!(device = id, "detached");
        Ok(())
    }

    /// Detach every device.
    pub async fn detach_all(&self) {
        let links: Vec<Link> = std::mem::take(&mut *self.write()).into_values().collect();
        for link in links {
            link.close().await;
            info!(device = link.device_id(), "detached");
        }
    }

    /// Link of device `id`.
    pub fn get(&self, id: u32) -> Option<Link> {
        self.read().get(&id).cloned()
    }

    /// Ids of attached devices, ascending.
    pub fn ids(&self) -> Vec<u32> {
        self.read().keys().copied().collect()
    }

    /// Number of attached devices.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no device is attached.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Run `command` on device `id`.
    pub async fn control(&self, id: u32, command: Command) -> Result<CommandOutput, RegistryError> {
        let link = self.get(id).ok_or(RegistryError::UnknownDevice(id))?;
        Ok(link.execute(command).await?)
    }
}

//! Virtual interface lifecycle.
//!
//! The manager is the only writer of the registry. Every structural change
//! runs under one control lock, which also owns the name index. The datapath
//! never takes this lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::control::{Command, ControlCommand, ControlReply};
use crate::device::{Device, MacAddr, PhysicalInterface, VirtualInterface};
use crate::error::{Result, VnicError};
use crate::host::Host;
use crate::registry::Registry;
use crate::status::{InterfaceStats, StatusRow};
use crate::tag::TagScheme;

/// Linux `IFNAMSIZ`, including the terminating NUL.
pub const IFNAMSIZ: usize = 16;

/// Build the interface name for `port` under `prefix`.
pub fn interface_name(prefix: &str, port: u16) -> Result<String> {
    if prefix.is_empty() {
        return Err(VnicError::InvalidName("empty name prefix".to_string()));
    }
    let name = format!("{prefix}{port}");
    if name.len() >= IFNAMSIZ {
        return Err(VnicError::InvalidName(format!(
            "{name} is longer than {} bytes",
            IFNAMSIZ - 1
        )));
    }
    if name.contains('/') || name.chars().any(char::is_whitespace) {
        return Err(VnicError::InvalidName(name));
    }
    Ok(name)
}

#[derive(Default)]
struct ControlState {
    by_name: HashMap<String, Arc<VirtualInterface>>,
}

pub struct Manager<H: Host> {
    registry: Arc<Registry>,
    host: Arc<H>,
    scheme: TagScheme,
    control: Mutex<ControlState>,
}

impl<H: Host> Manager<H> {
    pub fn new(registry: Arc<Registry>, host: Arc<H>, scheme: TagScheme) -> Self {
        Self {
            registry,
            host,
            scheme,
            control: Mutex::new(ControlState::default()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn scheme(&self) -> TagScheme {
        self.scheme
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the virtual interface `{prefix}{port}` on `physical_name`.
    ///
    /// If the port already has an interface, that interface is removed from
    /// the host first; when the host refuses, nothing changes. Any later
    /// failure leaves nothing of the new interface registered.
    pub fn create_virtual_interface(
        &self,
        physical_name: &str,
        prefix: &str,
        port: u16,
    ) -> Result<Arc<VirtualInterface>> {
        let max = self.scheme.max_ports();
        if port >= max {
            return Err(VnicError::PortOutOfRange { port, max });
        }

        let physical = self
            .host
            .resolve(physical_name)
            .ok_or_else(|| VnicError::NotFound(format!("physical interface {physical_name}")))?;
        let name = interface_name(prefix, port)?;

        let mut control = self.lock();
        if control.by_name.contains_key(&name) {
            return Err(VnicError::AlreadyRegistered(name));
        }

        let occupant = self
            .registry
            .find_group(physical.index, self.scheme)
            .and_then(|group| group.get(port));
        if let Some(old) = &occupant {
            warn!(
                name = %old.name(),
                physical = %physical.name,
                port,
                "Port already bound, replacing interface"
            );
            self.unregister(old)?;
        }

        let index = match self.host.register(&name, physical.mac) {
            Ok(index) => index,
            Err(e) => {
                if let Some(old) = &occupant {
                    self.unbind(&mut control, old);
                }
                return Err(e.into());
            }
        };
        let vif = Arc::new(VirtualInterface::new(
            name.clone(),
            index,
            &physical,
            port,
            self.scheme,
        ));

        match self.host.add_report_entry(&name) {
            Ok(handle) => vif.set_report_handle(handle),
            Err(e) => warn!(name = %name, error = %e, "Failed to add report entry"),
        }

        if let Err(e) = self.attach(&physical, port, &vif) {
            self.release(&vif);
            if let Some(old) = &occupant {
                self.unbind(&mut control, old);
            }
            return Err(e);
        }

        if let Some(old) = &occupant {
            control.by_name.remove(old.name());
        }
        control.by_name.insert(name.clone(), vif.clone());
        info!(
            name = %name,
            index = %index,
            physical = %physical.name,
            port,
            "Created virtual interface"
        );
        Ok(vif)
    }

    /// Publish `vif` in the registry, enrolling the physical interface with
    /// the host when its group is new.
    fn attach(
        &self,
        physical: &PhysicalInterface,
        port: u16,
        vif: &Arc<VirtualInterface>,
    ) -> Result<Option<Arc<VirtualInterface>>> {
        let first = self.registry.find_group(physical.index, self.scheme).is_none();
        if first {
            self.host
                .enroll(physical, self.scheme)
                .map_err(|e| VnicError::Internal(format!("enroll {}: {e}", physical.name)))?;
            debug!(physical = %physical.name, scheme = self.scheme.name(), "Enrolled physical interface");
        }

        let placed = self
            .registry
            .find_or_create_group(physical.index, self.scheme)
            .and_then(|group| self.registry.insert(&group, port, vif.clone()));

        if placed.is_err() && first {
            if let Some(group) = self.registry.find_group(physical.index, self.scheme) {
                self.registry.evict_if_empty(&group);
            }
            self.host.withdraw(physical.index);
        }
        placed
    }

    /// Drop the reporting entry and the host registration of `vif`. On
    /// failure the reporting entry is restored.
    fn unregister(&self, vif: &VirtualInterface) -> Result<()> {
        if let Some(handle) = vif.take_report_handle() {
            self.host.remove_report_entry(handle);
        }
        if let Err(e) = self.host.unregister(vif.index()) {
            match self.host.add_report_entry(vif.name()) {
                Ok(handle) => vif.set_report_handle(handle),
                Err(e) => warn!(name = %vif.name(), error = %e, "Failed to restore report entry"),
            }
            return Err(VnicError::Internal(format!("unregister {}: {e}", vif.name())));
        }
        Ok(())
    }

    /// Forget an interface the host no longer knows: clear its slot, evict
    /// the group if that emptied it, and drop the name.
    fn unbind(&self, control: &mut ControlState, vif: &VirtualInterface) {
        if let Some(group) = self.registry.find_group(vif.physical(), vif.scheme()) {
            self.registry.remove(&group, vif.port());
            if self.registry.evict_if_empty(&group) {
                self.host.withdraw(group.physical());
            }
        }
        control.by_name.remove(vif.name());
        warn!(name = %vif.name(), "Port left empty after failed replacement");
    }

    /// Remove a virtual interface from the host side (reporting entry and
    /// stack registration). Failures are logged.
    fn release(&self, vif: &VirtualInterface) {
        if let Some(handle) = vif.take_report_handle() {
            self.host.remove_report_entry(handle);
        }
        if let Err(e) = self.host.unregister(vif.index()) {
            error!(name = %vif.name(), error = %e, "Failed to unregister interface");
        }
    }

    /// Delete the virtual interface `{prefix}{port}`.
    pub fn delete_virtual_interface(&self, prefix: &str, port: u16) -> Result<()> {
        let name = interface_name(prefix, port)?;

        let mut control = self.lock();
        let vif = control
            .by_name
            .get(&name)
            .cloned()
            .ok_or_else(|| VnicError::NotFound(name.clone()))?;

        let group = self.registry.find_group(vif.physical(), vif.scheme());
        if let Some(group) = &group {
            self.registry.remove(group, vif.port());
        }

        if let Err(e) = self.unregister(&vif) {
            if let Some(group) = &group
                && let Err(restore) = self.registry.insert(group, vif.port(), vif.clone())
            {
                error!(name = %name, error = %restore, "Failed to restore port binding");
            }
            return Err(e);
        }

        if let Some(group) = group
            && self.registry.evict_if_empty(&group)
        {
            self.host.withdraw(group.physical());
            debug!(physical = %vif.physical_name(), "Evicted empty group");
        }

        control.by_name.remove(&name);
        info!(name = %name, port, "Deleted virtual interface");
        Ok(())
    }

    fn find(control: &ControlState, name: &str) -> Result<Arc<VirtualInterface>> {
        control
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| VnicError::NotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<VirtualInterface>> {
        self.lock().by_name.get(name).cloned()
    }

    /// Bring a virtual interface up. Requires the physical link to be up.
    pub fn open(&self, name: &str) -> Result<()> {
        let control = self.lock();
        let vif = Self::find(&control, name)?;
        if !self.host.is_up(vif.physical()) {
            return Err(VnicError::NetworkDown(vif.physical_name().to_string()));
        }
        self.host.set_link_state(vif.index(), true)?;
        vif.set_up(true);
        info!(name = %name, "Interface up");
        Ok(())
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        let control = self.lock();
        let vif = Self::find(&control, name)?;
        self.host.set_link_state(vif.index(), false)?;
        vif.set_up(false);
        info!(name = %name, "Interface down");
        Ok(())
    }

    /// Change the hardware address of a virtual interface that is down.
    pub fn set_mac_address(&self, name: &str, mac: MacAddr) -> Result<()> {
        let control = self.lock();
        let vif = Self::find(&control, name)?;
        if vif.is_up() {
            return Err(VnicError::Busy(name.to_string()));
        }
        self.host.set_mac_address(vif.index(), mac)?;
        vif.set_mac(mac)?;
        info!(name = %name, mac = %mac, "Changed hardware address");
        Ok(())
    }

    /// Run one control command.
    pub fn execute(&self, command: &ControlCommand) -> ControlReply {
        let result = match command.cmd {
            Command::Add => self
                .create_virtual_interface(
                    &command.physical_interface_name,
                    &command.virtual_interface_name_prefix,
                    command.port,
                )
                .map(|_| ()),
            Command::Delete => {
                self.delete_virtual_interface(&command.virtual_interface_name_prefix, command.port)
            }
        };

        if let Err(e) = &result {
            warn!(cmd = ?command.cmd, port = command.port, error = %e, "Command failed");
        }
        ControlReply::from(result)
    }

    /// One row per live virtual interface, ordered by physical interface
    /// and port.
    pub fn status(&self) -> Vec<StatusRow> {
        self.registry
            .snapshot()
            .iter()
            .map(|vif| StatusRow::from(vif.as_ref()))
            .collect()
    }

    pub fn stats(&self) -> Vec<InterfaceStats> {
        self.registry
            .snapshot()
            .iter()
            .map(|vif| InterfaceStats::from(vif.as_ref()))
            .collect()
    }

    /// Look up a device by name: virtual interfaces first, then the host's
    /// physical interfaces.
    pub fn device(&self, name: &str) -> Option<Device> {
        if let Some(vif) = self.get(name) {
            return Some(Device::Virtual(vif));
        }
        self.host.resolve(name).map(Device::Physical)
    }

    /// Remove every virtual interface. Returns how many were removed.
    pub fn shutdown(&self) -> usize {
        let mut control = self.lock();
        let drained = self.registry.drain();

        let mut physicals = Vec::new();
        for vif in &drained {
            self.release(vif);
            if !physicals.contains(&vif.physical()) {
                physicals.push(vif.physical());
            }
        }
        for physical in physicals {
            self.host.withdraw(physical);
        }

        control.by_name.clear();
        info!(count = drained.len(), "Removed all virtual interfaces");
        drained.len()
    }
}

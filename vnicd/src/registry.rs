//! Port registry
//!
//! Maps a physical interface to its Groups (one per tagging scheme) and,
//! inside a Group, a switch port to the virtual interface bound to it.
//!
//! Every level is published through an [`ArcSwap`]: readers load a snapshot
//! without locking and always see either the old or the new version of a
//! table. Writers clone, edit and store. Writers are expected to be
//! serialized by the caller; only [`Registry::find_or_create_group`] is safe
//! against concurrent writers on its own. Superseded tables are freed when
//! the last reader drops its snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::device::{IfIndex, VirtualInterface};
use crate::error::{Result, VnicError};
use crate::tag::TagScheme;

type PortTable = Vec<Option<Arc<VirtualInterface>>>;

/// Virtualization context for one (physical interface, scheme) pair.
#[derive(Debug)]
pub struct Group {
    physical: IfIndex,
    scheme: TagScheme,
    ports: ArcSwap<PortTable>,
}

impl Group {
    fn new(physical: IfIndex, scheme: TagScheme) -> Self {
        Group {
            physical,
            scheme,
            ports: ArcSwap::new(Arc::new(vec![None; scheme.max_ports() as usize])),
        }
    }

    pub fn physical(&self) -> IfIndex {
        self.physical
    }

    pub fn scheme(&self) -> TagScheme {
        self.scheme
    }

    pub fn capacity(&self) -> u16 {
        self.scheme.max_ports()
    }

    pub fn get(&self, port: u16) -> Option<Arc<VirtualInterface>> {
        self.ports.load().get(port as usize)?.clone()
    }

    /// Number of occupied ports.
    pub fn occupied(&self) -> usize {
        self.ports.load().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Occupants in port order.
    pub fn members(&self) -> Vec<Arc<VirtualInterface>> {
        self.ports.load().iter().flatten().cloned().collect()
    }

    /// Publish a copy of the port table with `port` set to `value`.
    fn swap_slot(
        &self,
        port: u16,
        value: Option<Arc<VirtualInterface>>,
    ) -> Option<Arc<VirtualInterface>> {
        let mut table = (**self.ports.load()).clone();
        let previous = std::mem::replace(&mut table[port as usize], value);
        self.ports.store(Arc::new(table));
        previous
    }
}

/// Groups of one physical interface.
#[derive(Debug, Default)]
struct Bucket {
    groups: Vec<Arc<Group>>,
}

impl Bucket {
    fn find(&self, scheme: TagScheme) -> Option<&Arc<Group>> {
        self.groups.iter().find(|g| g.scheme == scheme)
    }
}

/// Registry of all groups and virtual interfaces.
pub struct Registry {
    buckets: ArcSwap<HashMap<IfIndex, Arc<Bucket>>>,
    /// Virtual interfaces by their own index (transmit path, stats)
    by_index: ArcSwap<HashMap<IfIndex, Arc<VirtualInterface>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            buckets: ArcSwap::new(Arc::new(HashMap::new())),
            by_index: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Return the Group for `(physical, scheme)`, creating and publishing it
    /// if it does not exist yet.
    ///
    /// Repeated calls return the same `Arc`. Fails with `ResourceExhausted`
    /// when the tables cannot grow.
    pub fn find_or_create_group(
        &self,
        physical: IfIndex,
        scheme: TagScheme,
    ) -> Result<Arc<Group>> {
        loop {
            let current = self.buckets.load_full();
            if let Some(group) = current.get(&physical).and_then(|b| b.find(scheme)) {
                return Ok(group.clone());
            }

            let exhausted =
                |_| VnicError::ResourceExhausted(format!("cannot add group for {physical}"));

            let group = Arc::new(Group::new(physical, scheme));
            let mut groups = Vec::new();
            let existing = current.get(&physical).map(|b| b.groups.as_slice());
            groups
                .try_reserve(existing.map_or(0, <[_]>::len) + 1)
                .map_err(exhausted)?;
            groups.extend(existing.into_iter().flatten().cloned());
            groups.push(group.clone());

            let mut next = HashMap::new();
            next.try_reserve(current.len() + 1).map_err(exhausted)?;
            next.extend(current.iter().map(|(k, v)| (*k, v.clone())));
            next.insert(physical, Arc::new(Bucket { groups }));

            let previous = self.buckets.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&previous, &current) {
                return Ok(group);
            }
            // Another writer published first; retry against its table.
        }
    }

    pub fn find_group(&self, physical: IfIndex, scheme: TagScheme) -> Option<Arc<Group>> {
        self.buckets.load().get(&physical)?.find(scheme).cloned()
    }

    /// Find the virtual interface bound to `port` on `physical`.
    ///
    /// Lock-free; called once per received frame.
    #[inline]
    pub fn lookup(&self, physical: IfIndex, port: u16) -> Option<Arc<VirtualInterface>> {
        let buckets = self.buckets.load();
        let bucket = buckets.get(&physical)?;
        bucket.groups.iter().find_map(|group| group.get(port))
    }

    /// Find a virtual interface by its own index.
    pub fn get(&self, index: IfIndex) -> Option<Arc<VirtualInterface>> {
        self.by_index.load().get(&index).cloned()
    }

    /// Bind `iface` to `port`, returning the displaced occupant, if any.
    pub fn insert(
        &self,
        group: &Group,
        port: u16,
        iface: Arc<VirtualInterface>,
    ) -> Result<Option<Arc<VirtualInterface>>> {
        if port >= group.capacity() {
            return Err(VnicError::PortOutOfRange {
                port,
                max: group.capacity(),
            });
        }

        let mut by_index = (**self.by_index.load()).clone();
        by_index.try_reserve(1).map_err(|_| {
            VnicError::ResourceExhausted(format!("cannot index {}", iface.name()))
        })?;

        let displaced = group.swap_slot(port, Some(iface.clone()));
        if let Some(old) = &displaced {
            by_index.remove(&old.index());
        }
        by_index.insert(iface.index(), iface);
        self.by_index.store(Arc::new(by_index));

        Ok(displaced)
    }

    /// Clear `port`, returning the interface that was bound to it.
    pub fn remove(&self, group: &Group, port: u16) -> Option<Arc<VirtualInterface>> {
        if port >= group.capacity() {
            return None;
        }
        group.get(port)?;

        let removed = group.swap_slot(port, None)?;
        let mut by_index = (**self.by_index.load()).clone();
        by_index.remove(&removed.index());
        self.by_index.store(Arc::new(by_index));
        Some(removed)
    }

    /// Unpublish `group` if it has no occupied ports. Drops the physical
    /// interface's bucket along with its last group.
    pub fn evict_if_empty(&self, group: &Arc<Group>) -> bool {
        if !group.is_empty() {
            return false;
        }

        let current = self.buckets.load();
        let Some(bucket) = current.get(&group.physical) else {
            return false;
        };
        if !bucket.groups.iter().any(|g| Arc::ptr_eq(g, group)) {
            return false;
        }

        let mut next = (**current).clone();
        let groups: Vec<_> = bucket
            .groups
            .iter()
            .filter(|g| !Arc::ptr_eq(g, group))
            .cloned()
            .collect();
        if groups.is_empty() {
            next.remove(&group.physical);
        } else {
            next.insert(group.physical, Arc::new(Bucket { groups }));
        }
        drop(current);
        self.buckets.store(Arc::new(next));
        true
    }

    /// All live virtual interfaces ordered by (physical interface, port).
    pub fn snapshot(&self) -> Vec<Arc<VirtualInterface>> {
        collect_ordered(&self.buckets.load())
    }

    /// Unpublish everything and return what was registered, in
    /// [`Registry::snapshot`] order.
    pub fn drain(&self) -> Vec<Arc<VirtualInterface>> {
        let buckets = self.buckets.swap(Arc::new(HashMap::new()));
        self.by_index.store(Arc::new(HashMap::new()));
        collect_ordered(&buckets)
    }

    /// Number of live virtual interfaces.
    pub fn len(&self) -> usize {
        self.by_index.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn group_count(&self) -> usize {
        self.buckets.load().values().map(|b| b.groups.len()).sum()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_ordered(buckets: &HashMap<IfIndex, Arc<Bucket>>) -> Vec<Arc<VirtualInterface>> {
    let mut keys: Vec<_> = buckets.keys().copied().collect();
    keys.sort();

    let mut out = Vec::new();
    for key in keys {
        let mut members: Vec<_> = buckets[&key]
            .groups
            .iter()
            .flat_map(|g| g.members())
            .collect();
        members.sort_by_key(|v| v.port());
        out.extend(members);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MacAddr, PhysicalInterface};

    fn phys(index: u32, name: &str) -> PhysicalInterface {
        PhysicalInterface {
            index: IfIndex(index),
            name: name.to_string(),
            mac: MacAddr([0x02, 0, 0, 0, 0, index as u8]),
        }
    }

    fn vif(physical: &PhysicalInterface, port: u16, index: u32) -> Arc<VirtualInterface> {
        Arc::new(VirtualInterface::new(
            format!("veth{port}"),
            IfIndex(index),
            physical,
            port,
            TagScheme::Broadcom,
        ))
    }

    #[test]
    fn test_find_or_create_group_is_idempotent() {
        let registry = Registry::new();
        let a = registry
            .find_or_create_group(IfIndex(2), TagScheme::Broadcom)
            .unwrap();
        let b = registry
            .find_or_create_group(IfIndex(2), TagScheme::Broadcom)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.group_count(), 1);

        let found = registry.find_group(IfIndex(2), TagScheme::Broadcom).unwrap();
        assert!(Arc::ptr_eq(&a, &found));
        assert!(registry.find_group(IfIndex(3), TagScheme::Broadcom).is_none());
    }

    #[test]
    fn test_lookup_after_insert_and_remove() {
        let registry = Registry::new();
        let eth0 = phys(2, "eth0");
        let group = registry
            .find_or_create_group(eth0.index, TagScheme::Broadcom)
            .unwrap();

        let v = vif(&eth0, 2, 100);
        assert!(registry.insert(&group, 2, v.clone()).unwrap().is_none());

        let found = registry.lookup(IfIndex(2), 2).unwrap();
        assert!(Arc::ptr_eq(&found, &v));
        assert!(registry.lookup(IfIndex(2), 3).is_none());
        assert!(registry.lookup(IfIndex(9), 2).is_none());
        assert!(Arc::ptr_eq(&registry.get(IfIndex(100)).unwrap(), &v));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&group, 2).unwrap();
        assert!(Arc::ptr_eq(&removed, &v));
        assert!(registry.lookup(IfIndex(2), 2).is_none());
        assert!(registry.get(IfIndex(100)).is_none());
        assert!(registry.is_empty());
        assert!(registry.remove(&group, 2).is_none());
    }

    #[test]
    fn test_insert_rejects_port_out_of_range() {
        let registry = Registry::new();
        let eth0 = phys(2, "eth0");
        let group = registry
            .find_or_create_group(eth0.index, TagScheme::Broadcom)
            .unwrap();

        let err = registry.insert(&group, 32, vif(&eth0, 32, 100)).unwrap_err();
        assert!(matches!(err, VnicError::PortOutOfRange { port: 32, max: 32 }));
        assert!(registry.is_empty());
        assert!(registry.lookup(IfIndex(2), 31).is_none());
    }

    #[test]
    fn test_insert_returns_displaced_occupant() {
        let registry = Registry::new();
        let eth0 = phys(2, "eth0");
        let group = registry
            .find_or_create_group(eth0.index, TagScheme::Broadcom)
            .unwrap();

        let first = vif(&eth0, 4, 100);
        let second = vif(&eth0, 4, 101);
        registry.insert(&group, 4, first.clone()).unwrap();
        let displaced = registry.insert(&group, 4, second.clone()).unwrap().unwrap();

        assert!(Arc::ptr_eq(&displaced, &first));
        assert!(Arc::ptr_eq(&registry.lookup(IfIndex(2), 4).unwrap(), &second));
        assert!(registry.get(IfIndex(100)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_evict_if_empty() {
        let registry = Registry::new();
        let eth0 = phys(2, "eth0");
        let group = registry
            .find_or_create_group(eth0.index, TagScheme::Broadcom)
            .unwrap();
        registry.insert(&group, 1, vif(&eth0, 1, 100)).unwrap();

        assert!(!registry.evict_if_empty(&group));
        registry.remove(&group, 1);
        assert!(registry.evict_if_empty(&group));
        assert_eq!(registry.group_count(), 0);

        // Already unpublished
        assert!(!registry.evict_if_empty(&group));

        let fresh = registry
            .find_or_create_group(eth0.index, TagScheme::Broadcom)
            .unwrap();
        assert!(!Arc::ptr_eq(&fresh, &group));
    }

    #[test]
    fn test_snapshot_ordering_and_drain() {
        let registry = Registry::new();
        let eth0 = phys(2, "eth0");
        let eth1 = phys(1, "eth1");
        let g0 = registry
            .find_or_create_group(eth0.index, TagScheme::Broadcom)
            .unwrap();
        let g1 = registry
            .find_or_create_group(eth1.index, TagScheme::Broadcom)
            .unwrap();

        registry.insert(&g0, 5, vif(&eth0, 5, 100)).unwrap();
        registry.insert(&g0, 0, vif(&eth0, 0, 101)).unwrap();
        registry.insert(&g1, 3, vif(&eth1, 3, 102)).unwrap();

        let order: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|v| (v.physical().0, v.port()))
            .collect();
        assert_eq!(order, vec![(1, 3), (2, 0), (2, 5)]);

        let drained = registry.drain();
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty());
        assert_eq!(registry.group_count(), 0);
        assert!(registry.lookup(IfIndex(2), 5).is_none());
    }

    #[test]
    fn test_reader_keeps_old_snapshot_alive() {
        let registry = Registry::new();
        let eth0 = phys(2, "eth0");
        let group = registry
            .find_or_create_group(eth0.index, TagScheme::Broadcom)
            .unwrap();
        registry.insert(&group, 2, vif(&eth0, 2, 100)).unwrap();

        let held = registry.lookup(IfIndex(2), 2).unwrap();
        registry.remove(&group, 2);
        registry.evict_if_empty(&group);

        // The in-flight handle is still valid after the writer is done
        assert_eq!(held.name(), "veth2");
        assert_eq!(Arc::strong_count(&held), 1);
    }
}

//! Identity -> local handle map.
//!
//! Both sides of the bridge keep one of these per entity family. Only live
//! entries are stored, so memory follows the live count rather than every
//! identity ever handed out, and iteration is in identity order.

use std::collections::BTreeMap;

use meshi_physx_protocol::Identity;

use crate::error::{BridgeError, Result};

#[derive(Debug)]
pub struct EntityRegistry<H> {
    entries: BTreeMap<Identity, H>,
    next: u32,
}

impl<H> Default for EntityRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> EntityRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next: 1,
        }
    }

    /// Hand out the next identity without binding anything to it.
    pub fn allocate(&mut self) -> Result<Identity> {
        let identity = Identity::new(self.next).ok_or(BridgeError::IdentitiesExhausted)?;
        self.next = self
            .next
            .checked_add(1)
            .ok_or(BridgeError::IdentitiesExhausted)?;
        Ok(identity)
    }

    pub fn register(&mut self, handle: H) -> Result<Identity> {
        let identity = self.allocate()?;
        self.bind(identity, handle);
        Ok(identity)
    }

    /// Bind an identity chosen elsewhere. Returns the handle it replaced.
    pub fn bind(&mut self, identity: Identity, handle: H) -> Option<H> {
        self.entries.insert(identity, handle)
    }

    pub fn resolve(&self, identity: Identity) -> Result<&H> {
        self.entries
            .get(&identity)
            .ok_or(BridgeError::NotFound(identity))
    }

    pub fn resolve_mut(&mut self, identity: Identity) -> Result<&mut H> {
        self.entries
            .get_mut(&identity)
            .ok_or(BridgeError::NotFound(identity))
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.entries.contains_key(&identity)
    }

    pub fn unregister(&mut self, identity: Identity) -> Option<H> {
        self.entries.remove(&identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Identity, &H)> {
        self.entries.iter().map(|(id, h)| (*id, h))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Identity, &mut H)> {
        self.entries.iter_mut().map(|(id, h)| (*id, h))
    }

    /// Identities whose handle matches `pred`.
    pub fn find_all(&self, mut pred: impl FnMut(&H) -> bool) -> Vec<Identity> {
        self.iter()
            .filter(|(_, h)| pred(h))
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_start_at_one_and_never_repeat() {
        let mut registry = EntityRegistry::new();
        let a = registry.register("a").unwrap();
        let b = registry.register("b").unwrap();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);

        assert_eq!(registry.unregister(a), Some("a"));
        let c = registry.register("c").unwrap();
        assert_ne!(c, a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn removed_identities_resolve_to_not_found() {
        let mut registry = EntityRegistry::new();
        let a = registry.register(10u32).unwrap();
        assert_eq!(*registry.resolve(a).unwrap(), 10);
        registry.unregister(a);
        assert!(matches!(registry.resolve(a), Err(BridgeError::NotFound(id)) if id == a));
        assert_eq!(registry.unregister(a), None);
        assert!(registry.is_empty());

        let never = Identity::new(500).unwrap();
        assert!(!registry.contains(never));
    }

    #[test]
    fn externally_chosen_identities_bind_in_order() {
        let mut registry = EntityRegistry::new();
        let ids: Vec<_> = [7, 3, 5].iter().map(|&n| Identity::new(n).unwrap()).collect();
        for id in &ids {
            assert!(registry.bind(*id, id.get() * 10).is_none());
        }
        let seen: Vec<u32> = registry.iter().map(|(id, _)| id.get()).collect();
        assert_eq!(seen, vec![3, 5, 7]);
        assert_eq!(registry.find_all(|h| *h > 40).len(), 2);
        for (_, h) in registry.iter_mut() {
            *h += 1;
        }
        assert_eq!(*registry.resolve(ids[0]).unwrap(), 71);
    }

    #[test]
    fn churn_keeps_storage_at_the_live_count() {
        let mut registry = EntityRegistry::new();
        let mut last = None;
        for n in 0..10_000u32 {
            let id = registry.register(n).unwrap();
            if let Some(previous) = last.replace(id) {
                registry.unregister(previous);
            }
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entries.len(), 1);
        assert_eq!(last.map(Identity::get), Some(10_000));
        assert_eq!(*registry.resolve(last.unwrap()).unwrap(), 9_999);
    }
}

//! Handler registry.
//!
//! Maps exact event types to the handlers registered for them. Reads take a
//! shared lock and copy the bucket out, so a snapshot is never observed half
//! written and can be iterated after the lock is released. Writes take the
//! exclusive lock; a listener's whole handler batch is inserted under one
//! write so a concurrent snapshot sees either none or all of it.

use crate::handler::{HandlerDescriptor, ListenerId};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Buckets = HashMap<TypeId, Vec<Arc<HandlerDescriptor>>>;

/// Concurrency-safe store of handler descriptors keyed by event type.
///
/// Buckets keep registration order. Dispatch re-sorts each snapshot by
/// priority with a stable sort, so registration order breaks ties.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    buckets: RwLock<Buckets>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one descriptor under its event type.
    pub fn register(&self, descriptor: HandlerDescriptor) {
        self.write()
            .entry(descriptor.event_type())
            .or_default()
            .push(Arc::new(descriptor));
    }

    /// Adds a batch of descriptors atomically with respect to snapshots.
    ///
    /// Returns the number of descriptors added.
    pub fn register_all<I>(&self, descriptors: I) -> usize
    where
        I: IntoIterator<Item = HandlerDescriptor>,
    {
        let descriptors: Vec<_> = descriptors.into_iter().map(Arc::new).collect();
        let added = descriptors.len();
        if added == 0 {
            return 0;
        }

        let mut buckets = self.write();
        for descriptor in descriptors {
            buckets
                .entry(descriptor.event_type())
                .or_default()
                .push(descriptor);
        }
        added
    }

    /// Removes every descriptor owned by `owner`, across all event types.
    ///
    /// Returns the number of descriptors removed; zero when the owner had none.
    pub fn unregister(&self, owner: ListenerId) -> usize {
        let mut buckets = self.write();
        let mut removed = 0;

        buckets.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|handler| handler.owner() != owner);
            removed += before - handlers.len();
            !handlers.is_empty()
        });

        removed
    }

    /// Returns a point-in-time copy of the handlers for `event_type`.
    pub fn snapshot(&self, event_type: TypeId) -> Vec<Arc<HandlerDescriptor>> {
        self.read()
            .get(&event_type)
            .map(|handlers| handlers.to_vec())
            .unwrap_or_default()
    }

    /// Returns the number of handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: TypeId) -> usize {
        self.read().get(&event_type).map_or(0, Vec::len)
    }

    /// Returns the number of handlers across all event types.
    pub fn total_handler_count(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    /// Returns the number of event types with at least one handler.
    pub fn event_type_count(&self) -> usize {
        self.read().len()
    }

    /// Returns whether `owner` has any registered handler.
    pub fn is_registered(&self, owner: ListenerId) -> bool {
        self.read()
            .values()
            .flatten()
            .any(|handler| handler.owner() == owner)
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.write().clear();
    }

    // No user code runs while either guard is held, so a poisoned lock still
    // guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, Buckets> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Buckets> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::priority::PostOrder;
    use std::thread;

    #[derive(Debug)]
    struct Ping;

    impl Event for Ping {}

    #[derive(Debug)]
    struct Pong;

    impl Event for Pong {}

    fn ping_handler(owner: ListenerId, priority: PostOrder) -> HandlerDescriptor {
        HandlerDescriptor::new(owner, priority, |_: &Ping| {})
    }

    fn pong_handler(owner: ListenerId) -> HandlerDescriptor {
        HandlerDescriptor::new(owner, PostOrder::Normal, |_: &Pong| {})
    }

    #[test]
    fn test_empty_snapshot() {
        let registry = HandlerRegistry::new();
        assert!(registry.snapshot(TypeId::of::<Ping>()).is_empty());
        assert_eq!(registry.total_handler_count(), 0);
    }

    #[test]
    fn test_register_keys_by_exact_type() {
        let registry = HandlerRegistry::new();
        let owner = ListenerId::anonymous();

        registry.register(ping_handler(owner, PostOrder::Normal));
        registry.register(pong_handler(owner));

        assert_eq!(registry.handler_count(TypeId::of::<Ping>()), 1);
        assert_eq!(registry.handler_count(TypeId::of::<Pong>()), 1);
        assert_eq!(registry.event_type_count(), 2);
    }

    #[test]
    fn test_duplicates_are_allowed() {
        let registry = HandlerRegistry::new();
        let owner = ListenerId::anonymous();

        registry.register(ping_handler(owner, PostOrder::Normal));
        registry.register(ping_handler(owner, PostOrder::Normal));

        assert_eq!(registry.handler_count(TypeId::of::<Ping>()), 2);
    }

    #[test]
    fn test_snapshot_keeps_registration_order() {
        let registry = HandlerRegistry::new();
        let owners: Vec<_> = (0..4).map(|_| ListenerId::anonymous()).collect();

        for owner in &owners {
            registry.register(ping_handler(*owner, PostOrder::Normal));
        }

        let snapshot: Vec<_> = registry
            .snapshot(TypeId::of::<Ping>())
            .iter()
            .map(|handler| handler.owner())
            .collect();
        assert_eq!(snapshot, owners);
    }

    #[test]
    fn test_unregister_removes_all_types_and_priorities() {
        let registry = HandlerRegistry::new();
        let owner = ListenerId::anonymous();
        let other = ListenerId::anonymous();

        registry.register_all(vec![
            ping_handler(owner, PostOrder::First),
            ping_handler(owner, PostOrder::Last),
            pong_handler(owner),
            ping_handler(other, PostOrder::Normal),
        ]);

        assert!(registry.is_registered(owner));
        assert_eq!(registry.unregister(owner), 3);
        assert!(!registry.is_registered(owner));
        assert!(registry.is_registered(other));

        assert_eq!(registry.handler_count(TypeId::of::<Ping>()), 1);
        assert_eq!(registry.handler_count(TypeId::of::<Pong>()), 0);
        // Empty buckets are dropped.
        assert_eq!(registry.event_type_count(), 1);
    }

    #[test]
    fn test_unregister_unknown_owner_is_noop() {
        let registry = HandlerRegistry::new();
        registry.register(ping_handler(ListenerId::anonymous(), PostOrder::Normal));

        assert_eq!(registry.unregister(ListenerId::anonymous()), 0);
        assert_eq!(registry.total_handler_count(), 1);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_writes() {
        let registry = HandlerRegistry::new();
        let owner = ListenerId::anonymous();
        registry.register(ping_handler(owner, PostOrder::Normal));

        let snapshot = registry.snapshot(TypeId::of::<Ping>());
        registry.unregister(owner);

        assert_eq!(snapshot.len(), 1);
        assert!(registry.snapshot(TypeId::of::<Ping>()).is_empty());
    }

    #[test]
    fn test_clear() {
        let registry = HandlerRegistry::new();
        registry.register(ping_handler(ListenerId::anonymous(), PostOrder::Normal));
        registry.register(pong_handler(ListenerId::anonymous()));

        registry.clear();
        assert_eq!(registry.total_handler_count(), 0);
        assert_eq!(registry.event_type_count(), 0);
    }

    #[test]
    fn test_concurrent_register_unregister_matches_serial_outcome() {
        let registry = Arc::new(HandlerRegistry::new());
        let keepers: Vec<_> = (0..8).map(|_| ListenerId::anonymous()).collect();

        let workers: Vec<_> = keepers
            .iter()
            .copied()
            .map(|keeper| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let transient = ListenerId::anonymous();
                        registry.register_all(vec![
                            ping_handler(transient, PostOrder::Early),
                            pong_handler(transient),
                        ]);
                        let seen = registry.snapshot(TypeId::of::<Ping>());
                        assert!(seen.iter().all(|h| h.event_type() == TypeId::of::<Ping>()));
                        assert_eq!(registry.unregister(transient), 2);
                    }
                    registry.register(ping_handler(keeper, PostOrder::Normal));
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.handler_count(TypeId::of::<Ping>()), keepers.len());
        assert_eq!(registry.handler_count(TypeId::of::<Pong>()), 0);
        for keeper in keepers {
            assert!(registry.is_registered(keeper));
        }
    }
}

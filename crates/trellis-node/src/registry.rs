//! Typed service registry -- explicit dependency injection for local
//! service lookups.
//!
//! Components that want to be reachable through `get_service` register
//! themselves here at assembly time; there is no hidden global registry
//! and no string-keyed lookup for local services.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a local service implementation under its concrete type.
    /// Re-registering a type replaces the previous instance.
    pub fn register<S: Any + Send + Sync>(&self, service: Arc<S>) {
        let mut services = self.services.write().expect("registry lock poisoned");
        services.insert(TypeId::of::<S>(), service);
    }

    /// Look up a local service by type.
    pub fn get<S: Any + Send + Sync>(&self) -> Option<Arc<S>> {
        let services = self.services.read().expect("registry lock poisoned");
        services
            .get(&TypeId::of::<S>())
            .cloned()
            .and_then(|service| service.downcast::<S>().ok())
    }

    pub fn len(&self) -> usize {
        self.services.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter {
        prefix: &'static str,
    }

    impl Greeter {
        fn greet(&self, name: &str) -> String {
            format!("{} {name}", self.prefix)
        }
    }

    struct Unregistered;

    #[test]
    fn test_register_and_get() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Greeter { prefix: "hello" }));

        let greeter = registry.get::<Greeter>().unwrap();
        assert_eq!(greeter.greet("world"), "hello world");
        assert!(registry.get::<Unregistered>().is_none());
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Greeter { prefix: "hi" }));
        registry.register(Arc::new(Greeter { prefix: "hey" }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get::<Greeter>().unwrap().greet("x"), "hey x");
    }
}

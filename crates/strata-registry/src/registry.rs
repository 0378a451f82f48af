use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use tracing::debug;

use crate::descriptor::TypeDescriptor;

type RegistryMap = HashMap<String, Arc<TypeDescriptor>>;

fn registry() -> &'static RwLock<RegistryMap> {
    static REGISTRY: OnceLock<RwLock<RegistryMap>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a type descriptor under its discriminator.
///
/// Re-registering replaces the previous descriptor; records decoded after
/// the call see the new schema.
pub fn register(descriptor: TypeDescriptor) {
    let name = descriptor.type_name().to_owned();
    debug!(type_name = %name, props = descriptor.specs().len(), "registering type descriptor");
    registry()
        .write()
        .expect("lock poisoned")
        .insert(name, Arc::new(descriptor));
}

/// Resolve a discriminator to its descriptor.
///
/// Unknown discriminators are not an error: they resolve to a generic
/// descriptor (no typed properties) which is cached so repeated decodes of
/// the same unknown type build it only once. Under concurrent first access
/// the first writer wins and later builders adopt its descriptor.
pub fn resolve(type_name: &str) -> Arc<TypeDescriptor> {
    if let Some(desc) = registry().read().expect("lock poisoned").get(type_name) {
        return Arc::clone(desc);
    }

    let built = Arc::new(TypeDescriptor::generic(type_name));
    let mut map = registry().write().expect("lock poisoned");
    Arc::clone(map.entry(type_name.to_owned()).or_insert(built))
}

/// Returns `true` if a descriptor (registered or cached fallback) exists.
pub fn is_registered(type_name: &str) -> bool {
    registry()
        .read()
        .expect("lock poisoned")
        .contains_key(type_name)
}

/// Drop one cached descriptor. Hot-reload hatch.
pub fn invalidate(type_name: &str) {
    registry().write().expect("lock poisoned").remove(type_name);
}

/// Drop every cached descriptor. Hot-reload hatch.
pub fn clear() {
    registry().write().expect("lock poisoned").clear();
}

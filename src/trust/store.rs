use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use tokio::sync::RwLock;

use crate::trust::role::Role;

/// An immutable set of configured roles.
///
/// Built once per configuration load; in-flight evaluations hold the
/// snapshot they started with and are never affected by a reload.
pub struct RoleSet {
    roles: HashMap<String, Arc<Role>>,
}

impl RoleSet {
    pub fn new(roles: Vec<Role>) -> anyhow::Result<Self> {
        let mut map = HashMap::new();
        for role in roles {
            let name = role.name.clone();
            if map.insert(name.clone(), Arc::new(role)).is_some() {
                bail!("duplicate role name '{}'", name);
            }
        }
        Ok(Self { roles: map })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Role>> {
        self.roles.get(name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Role>> {
        self.roles.values()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Holds the current role snapshot and swaps it atomically on reload.
pub struct RoleStore {
    inner: RwLock<Arc<RoleSet>>,
}

impl RoleStore {
    pub fn new(set: RoleSet) -> Self {
        Self {
            inner: RwLock::new(Arc::new(set)),
        }
    }

    /// The current snapshot. Callers keep the returned `Arc` for the whole
    /// request so one evaluation never sees two different policy versions.
    pub async fn snapshot(&self) -> Arc<RoleSet> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, set: RoleSet) {
        *self.inner.write().await = Arc::new(set);
    }
}

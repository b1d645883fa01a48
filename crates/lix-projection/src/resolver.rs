use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use lix_store::EntityDirectory;
use lix_types::{EntityAddress, EntityId, ReferencedEntity};
use tracing::trace;

use crate::error::{ProjectionError, ProjectionResult};

/// Memoized reverse index over the resolver's forward map.
struct ReverseIndex<K> {
    /// Forward-map size when the index was last built.
    built_from: usize,
    map: HashMap<K, Arc<ReferencedEntity>>,
}

impl<K> Default for ReverseIndex<K> {
    fn default() -> Self {
        Self {
            built_from: 0,
            map: HashMap::new(),
        }
    }
}

/// Invocation-scoped map from ledger addresses to resolved entities.
///
/// The forward map (address to entity) is filled by [`resolve`](Self::resolve),
/// which consults the entity directory at most once per unknown address.
/// Reverse lookups by database id and by global address are derived caches:
/// built by scanning the forward map on first use and rebuilt on a miss if
/// the forward map has grown since. Entities are never mutated once stored.
#[derive(Default)]
pub struct EntityResolver {
    by_address: HashMap<EntityAddress, Arc<ReferencedEntity>>,
    order: Vec<Arc<ReferencedEntity>>,
    by_database_id: RwLock<ReverseIndex<EntityId>>,
    by_global_address: RwLock<ReverseIndex<EntityAddress>>,
}

impl EntityResolver {
    /// An empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `address`, asking the directory only if it is not yet known.
    pub async fn resolve<D>(
        &mut self,
        directory: &mut D,
        address: &EntityAddress,
        state_version: i64,
    ) -> ProjectionResult<Arc<ReferencedEntity>>
    where
        D: EntityDirectory + ?Sized,
    {
        if let Some(entity) = self.by_address.get(address) {
            return Ok(Arc::clone(entity));
        }
        let entity = directory
            .resolve_entity(address, state_version)
            .await
            .map_err(ProjectionError::store("resolve"))?;
        trace!(%address, database_id = %entity.database_id, "entity resolved");
        Ok(self.insert(entity))
    }

    /// Record an entity resolved elsewhere. A known address keeps its
    /// existing entry.
    pub fn insert(&mut self, entity: ReferencedEntity) -> Arc<ReferencedEntity> {
        if let Some(existing) = self.by_address.get(&entity.address) {
            return Arc::clone(existing);
        }
        let entity = Arc::new(entity);
        self.by_address
            .insert(entity.address.clone(), Arc::clone(&entity));
        self.order.push(Arc::clone(&entity));
        entity
    }

    /// Entity previously resolved for `address`.
    ///
    /// Fails with [`ProjectionError::NotFound`] if the address was never
    /// resolved in this invocation.
    pub fn get(&self, address: &EntityAddress) -> ProjectionResult<Arc<ReferencedEntity>> {
        self.by_address
            .get(address)
            .cloned()
            .ok_or_else(|| not_found("address", address))
    }

    /// Entity with database id `id`. The reverse index is rebuilt on a miss.
    pub fn get_by_database_id(&self, id: EntityId) -> ProjectionResult<Arc<ReferencedEntity>> {
        self.lookup(&self.by_database_id, &id, |e| Some(e.database_id))
            .ok_or_else(|| not_found("database id", id))
    }

    /// Look up a global entity by its own address.
    pub fn get_by_global_address(&self, address: &EntityAddress) -> ProjectionResult<Arc<ReferencedEntity>> {
        self.lookup(&self.by_global_address, address, |e| {
            e.is_global().then(|| e.address.clone())
        })
        .ok_or_else(|| not_found("global address", address))
    }

    /// Entities first seen at `state_version`, in resolution order.
    pub fn entities_at_version(&self, state_version: i64) -> Vec<Arc<ReferencedEntity>> {
        self.order
            .iter()
            .filter(|e| e.state_version == state_version)
            .cloned()
            .collect()
    }

    /// Every resolved entity, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReferencedEntity>> {
        self.order.iter()
    }

    /// Number of distinct entities resolved.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn lookup<K: Clone + Eq + Hash>(
        &self,
        index: &RwLock<ReverseIndex<K>>,
        key: &K,
        key_of: impl Fn(&ReferencedEntity) -> Option<K>,
    ) -> Option<Arc<ReferencedEntity>> {
        if let Some(hit) = index.read().expect("lock poisoned").map.get(key) {
            return Some(Arc::clone(hit));
        }
        let mut index = index.write().expect("lock poisoned");
        if index.built_from != self.order.len() {
            index.map = self
                .order
                .iter()
                .filter_map(|e| key_of(e.as_ref()).map(|k| (k, Arc::clone(e))))
                .collect();
            index.built_from = self.order.len();
        }
        index.map.get(key).cloned()
    }
}

fn not_found(kind: &'static str, key: impl ToString) -> ProjectionError {
    ProjectionError::NotFound {
        kind,
        key: key.to_string(),
    }
}

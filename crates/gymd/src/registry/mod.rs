//! Process-wide registry of live simulation instances.
//!
//! The registry maps instance identifiers to slots. A slot is a per-instance
//! mutex around an optional handle: map mutation happens under one coarse
//! lock, while per-instance work only holds the slot lock, so calls against
//! different instances never contend beyond the brief map lookup.
//!
//! Removal first detaches the slot from the map and then empties it. Any
//! caller that looked the slot up before removal observes the empty slot as
//! [`RegistryError::UnknownInstance`].

mod errors;
mod ids;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::simulation::{Simulation, SimulationEngine};

pub use self::errors::RegistryError;
pub use self::ids::{INSTANCE_ID_LEN, IdGenerator, InstanceId, UuidGenerator};

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Upper bound on identifier regeneration after collisions.
pub const MAX_ID_ATTEMPTS: usize = 16;

type Slot = Arc<Mutex<Option<Box<dyn Simulation>>>>;

/// Borrowed access to one registered instance.
#[derive(Clone)]
pub struct InstanceHandle {
    id: InstanceId,
    slot: Slot,
}

impl InstanceHandle {
    /// Identifier the instance is registered under.
    #[must_use]
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Runs `f` against the live simulation while holding the slot lock.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] when the instance was
    /// removed after this handle was obtained.
    pub fn with<F, R>(&self, f: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&mut dyn Simulation) -> R,
    {
        let mut guard = self.slot.lock().map_err(|_| RegistryError::Poisoned)?;
        let simulation = guard
            .as_deref_mut()
            .ok_or_else(|| RegistryError::unknown(&self.id))?;
        Ok(f(simulation))
    }
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Registry shared by every connection.
pub struct Registry {
    engine: Arc<dyn SimulationEngine>,
    ids: Box<dyn IdGenerator>,
    slots: Mutex<HashMap<InstanceId, Slot>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("instances", &self.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Creates a registry drawing instances from `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn SimulationEngine>) -> Self {
        Self::with_id_generator(engine, UuidGenerator)
    }

    /// Creates a registry with a custom identifier source.
    #[must_use]
    pub fn with_id_generator(
        engine: Arc<dyn SimulationEngine>,
        ids: impl IdGenerator + 'static,
    ) -> Self {
        Self {
            engine,
            ids: Box::new(ids),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn lock_slots(&self) -> Result<MutexGuard<'_, HashMap<InstanceId, Slot>>, RegistryError> {
        self.slots.lock().map_err(|_| RegistryError::Poisoned)
    }

    /// Instantiates `name` and registers it under a fresh identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidEnvironment`] when the engine rejects
    /// the name, [`RegistryError::IdentifierExhausted`] when no unique
    /// identifier could be allocated, and [`RegistryError::Poisoned`] when the
    /// slot map lock is poisoned. The new simulation is closed on failure.
    pub fn create(&self, name: &str) -> Result<InstanceId, RegistryError> {
        let mut simulation =
            self.engine
                .make(name)
                .map_err(|source| RegistryError::InvalidEnvironment {
                    name: name.to_owned(),
                    source,
                })?;

        {
            let mut slots = match self.lock_slots() {
                Ok(slots) => slots,
                Err(error) => {
                    simulation.close();
                    warn!(
                        target: REGISTRY_TARGET,
                        simulation = name,
                        "registry poisoned, instance discarded"
                    );
                    return Err(error);
                }
            };
            for _ in 0..MAX_ID_ATTEMPTS {
                let id = self.ids.next_id();
                if slots.contains_key(&id) {
                    debug!(target: REGISTRY_TARGET, %id, "instance id collision, regenerating");
                    continue;
                }
                slots.insert(id.clone(), Arc::new(Mutex::new(Some(simulation))));
                debug!(target: REGISTRY_TARGET, %id, simulation = name, "instance created");
                return Ok(id);
            }
        }

        simulation.close();
        warn!(target: REGISTRY_TARGET, simulation = name, "instance id space exhausted");
        Err(RegistryError::IdentifierExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    /// Resolves `id` to a handle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] when nothing is registered
    /// under `id`.
    pub fn lookup(&self, id: &InstanceId) -> Result<InstanceHandle, RegistryError> {
        let slot = self
            .lock_slots()?
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::unknown(id))?;
        Ok(InstanceHandle {
            id: id.clone(),
            slot,
        })
    }

    /// Runs `f` against the instance registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] when `id` is absent or was
    /// removed concurrently.
    pub fn with_instance<F, R>(&self, id: &InstanceId, f: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&mut dyn Simulation) -> R,
    {
        self.lookup(id)?.with(f)
    }

    /// Detaches the instance from the registry and hands it to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] when `id` is absent.
    pub fn remove(&self, id: &InstanceId) -> Result<Box<dyn Simulation>, RegistryError> {
        let slot = self
            .lock_slots()?
            .remove(id)
            .ok_or_else(|| RegistryError::unknown(id))?;
        let mut guard = slot.lock().map_err(|_| RegistryError::Poisoned)?;
        guard.take().ok_or_else(|| RegistryError::unknown(id))
    }

    /// Removes and closes the instance.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] when `id` is absent.
    pub fn close(&self, id: &InstanceId) -> Result<(), RegistryError> {
        let mut simulation = self.remove(id)?;
        simulation.close();
        debug!(target: REGISTRY_TARGET, %id, "instance closed");
        Ok(())
    }

    /// Replaces the instance with `f(instance)` under the slot lock, keeping
    /// its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownInstance`] when `id` is absent.
    pub fn rebind<F>(&self, id: &InstanceId, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(Box<dyn Simulation>) -> Box<dyn Simulation>,
    {
        let handle = self.lookup(id)?;
        let mut guard = handle.slot.lock().map_err(|_| RegistryError::Poisoned)?;
        let simulation = guard.take().ok_or_else(|| RegistryError::unknown(id))?;
        *guard = Some(f(simulation));
        Ok(())
    }

    /// Closes every registered instance, returning how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(InstanceId, Slot)> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let mut closed = 0;
        for (id, slot) in drained {
            let taken = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(mut simulation) = taken {
                simulation.close();
                closed += 1;
                debug!(target: REGISTRY_TARGET, %id, "instance closed during shutdown");
            }
        }
        closed
    }

    /// Closes each listed instance, skipping identifiers already gone.
    pub fn close_many<'a, I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a InstanceId>,
    {
        let mut closed = 0;
        for id in ids {
            match self.close(id) {
                Ok(()) => closed += 1,
                Err(RegistryError::UnknownInstance { .. }) => {}
                Err(error) => {
                    warn!(target: REGISTRY_TARGET, %id, %error, "failed to close instance");
                }
            }
        }
        closed
    }

    /// Reports whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.contains_key(id))
            .unwrap_or(false)
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    /// Reports whether no instances are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Component registry.
//!
//! Components are registered explicitly with the capabilities they implement.
//! Lookups return enabled implementors in registration order. Enabled state is
//! tracked by component name, separately from registration, so that
//! `enable`/`disable` issued before a component is registered still apply.

use crate::core::api::{InfoProvider, SetupParticipant};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SetupParticipant,
    InfoProvider,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::SetupParticipant => f.write_str("setup_participant"),
            Capability::InfoProvider => f.write_str("info_provider"),
        }
    }
}

/// A component as handed to [`CapabilityRegistry::register`].
#[derive(Clone)]
pub struct Registration {
    name: String,
    required: bool,
    setup: Option<Arc<dyn SetupParticipant>>,
    info: Option<Arc<dyn InfoProvider>>,
}

impl Registration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            setup: None,
            info: None,
        }
    }

    /// Required components are enabled the first time they are seen.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn setup_participant(mut self, participant: Arc<dyn SetupParticipant>) -> Self {
        self.setup = Some(participant);
        self
    }

    pub fn info_provider(mut self, provider: Arc<dyn InfoProvider>) -> Self {
        self.info = Some(provider);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.setup.is_some() {
            caps.push(Capability::SetupParticipant);
        }
        if self.info.is_some() {
            caps.push(Capability::InfoProvider);
        }
        caps
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Public view of a registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub required: bool,
    pub enabled: bool,
}

/// An enabled implementor of one capability.
#[derive(Clone)]
pub enum Implementor {
    SetupParticipant(Arc<dyn SetupParticipant>),
    InfoProvider(Arc<dyn InfoProvider>),
}

#[derive(Clone, Default)]
struct RegistryState {
    order: Vec<Registration>,
    index: FxHashMap<String, usize>,
    enabled: FxHashMap<String, bool>,
}

impl RegistryState {
    fn is_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(false)
    }
}

/// Saved registry state, see [`CapabilityRegistry::snapshot`].
#[derive(Clone)]
pub struct RegistrySnapshot(RegistryState);

#[derive(Default)]
pub struct CapabilityRegistry {
    state: RwLock<RegistryState>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a component, or replaces the instances of an already registered
    /// one while keeping its position and enabled state.
    pub fn register(&self, registration: Registration) {
        let mut state = self.write();
        let name = registration.name.clone();
        if let Some(&idx) = state.index.get(&name) {
            state.order[idx] = registration;
            return;
        }
        if !state.enabled.contains_key(&name) {
            state.enabled.insert(name.clone(), registration.required);
        }
        let idx = state.order.len();
        state.order.push(registration);
        state.index.insert(name, idx);
    }

    pub fn enable(&self, name: &str) {
        self.write().enabled.insert(name.to_string(), true);
    }

    pub fn disable(&self, name: &str) {
        self.write().enabled.insert(name.to_string(), false);
    }

    /// `None` when `name` was never registered with this registry.
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        let state = self.read();
        state
            .index
            .contains_key(name)
            .then(|| state.is_enabled(name))
    }

    pub fn descriptor(&self, name: &str) -> Option<ComponentDescriptor> {
        let state = self.read();
        let idx = *state.index.get(name)?;
        Some(describe(&state, &state.order[idx]))
    }

    /// All registered components in registration order.
    pub fn descriptors(&self) -> Vec<ComponentDescriptor> {
        let state = self.read();
        state.order.iter().map(|reg| describe(&state, reg)).collect()
    }

    /// Enabled implementors of `capability`, in registration order, paired
    /// with their component name.
    pub fn implementors_of(&self, capability: Capability) -> Vec<(String, Implementor)> {
        let state = self.read();
        state
            .order
            .iter()
            .filter(|reg| state.is_enabled(&reg.name))
            .filter_map(|reg| {
                let implementor = match capability {
                    Capability::SetupParticipant => {
                        reg.setup.clone().map(Implementor::SetupParticipant)
                    }
                    Capability::InfoProvider => reg.info.clone().map(Implementor::InfoProvider),
                };
                implementor.map(|imp| (reg.name.clone(), imp))
            })
            .collect()
    }

    pub fn setup_participants(&self) -> Vec<(String, Arc<dyn SetupParticipant>)> {
        self.implementors_of(Capability::SetupParticipant)
            .into_iter()
            .filter_map(|(name, imp)| match imp {
                Implementor::SetupParticipant(p) => Some((name, p)),
                Implementor::InfoProvider(_) => None,
            })
            .collect()
    }

    pub fn info_providers(&self) -> Vec<(String, Arc<dyn InfoProvider>)> {
        self.implementors_of(Capability::InfoProvider)
            .into_iter()
            .filter_map(|(name, imp)| match imp {
                Implementor::InfoProvider(p) => Some((name, p)),
                Implementor::SetupParticipant(_) => None,
            })
            .collect()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot(self.read().clone())
    }

    pub fn restore(&self, snapshot: RegistrySnapshot) {
        *self.write() = snapshot.0;
    }

    /// Empties the registry and returns what it held.
    pub fn clear(&self) -> RegistrySnapshot {
        RegistrySnapshot(std::mem::take(&mut *self.write()))
    }
}

fn describe(state: &RegistryState, reg: &Registration) -> ComponentDescriptor {
    ComponentDescriptor {
        name: reg.name.clone(),
        capabilities: reg.capabilities(),
        required: reg.required,
        enabled: state.is_enabled(&reg.name),
    }
}

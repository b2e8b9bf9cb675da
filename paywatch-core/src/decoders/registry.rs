use super::LogDecoder;
use alloy::primitives::Address;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("contract {0:#x} is registered twice")]
    DuplicateAddress(Address),
}

/// Contract address to decoder table for one network.
///
/// Built once before the poller starts and never mutated afterwards.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Address, Arc<dyn LogDecoder>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn get(&self, address: &Address) -> Option<&dyn LogDecoder> {
        self.handlers.get(address).map(|d| d.as_ref())
    }

    /// Registered addresses in ascending order, for the log filter.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.handlers.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for address in self.addresses() {
            if let Some(decoder) = self.handlers.get(&address) {
                map.entry(&address, &decoder.name());
            }
        }
        map.finish()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<Address, Arc<dyn LogDecoder>>,
}

impl HandlerRegistryBuilder {
    pub fn register(
        mut self,
        address: Address,
        decoder: impl LogDecoder + 'static,
    ) -> Result<Self, RegistryError> {
        if self.handlers.contains_key(&address) {
            return Err(RegistryError::DuplicateAddress(address));
        }
        self.handlers.insert(address, Arc::new(decoder));
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

//! Tool Registry
//!
//! Name to descriptor lookup for the tools a turn may call. The registry is
//! built before a turn starts and shared read-only (`Arc`) by running loops.

use std::collections::HashMap;

use chatloop_core::ToolDescriptor;

use crate::error::{ToolError, ToolResult};

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
    /// Insertion order for deterministic iteration
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor);
        }
        registry
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, descriptor: ToolDescriptor) {
        if !self.tools.contains_key(&descriptor.name) {
            self.order.push(descriptor.name.clone());
        }
        self.tools.insert(descriptor.name.clone(), descriptor);
    }

    pub fn unregister(&mut self, name: &str) -> Option<ToolDescriptor> {
        self.order.retain(|n| n != name);
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn resolve(&self, name: &str) -> ToolResult<&ToolDescriptor> {
        self.tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Distinct server ids, in the order their first tool was registered.
    pub fn active_servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = Vec::new();
        for descriptor in self.order.iter().filter_map(|n| self.tools.get(n)) {
            if let Some(server) = &descriptor.server_id {
                if !servers.contains(server) {
                    servers.push(server.clone());
                }
            }
        }
        servers
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

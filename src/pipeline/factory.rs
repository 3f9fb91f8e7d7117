//! Node factory: construct nodes from a kind name and a configuration string.
//!
//! The factory is an explicit value owned by whoever assembles the graph.
//! Each registered kind carries its default slot counts and a constructor
//! that turns the parsed [`NodeConfig`] into a [`Process`] implementation.
//! The engine keys (`mode`, `queue`, `policy`, ...) are applied on top by
//! [`EngineOptions::from_config`].

use super::config::{EngineOptions, NodeConfig};
use super::events::EventSender;
use super::node::{Node, NodeBuilder};
use crate::element::Process;
use crate::elements::mux::{FramedFileBackend, MuxerConfig, MuxingNode};
use crate::elements::{AppSource, Identity, NullSink};
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Type alias for node constructor functions.
pub type NodeConstructor = Box<dyn Fn(&NodeConfig) -> Result<Box<dyn Process>> + Send + Sync>;

struct Registration {
    inputs: usize,
    outputs: usize,
    constructor: NodeConstructor,
}

/// Registry of node constructors.
///
/// # Example
///
/// ```rust
/// use mediagraph::pipeline::{NodeFactory, SchedulingModel};
///
/// let factory = NodeFactory::with_builtins();
/// let node = factory
///     .create("scaler", "identity", "mode=async queue=5 policy=drop-front", None)
///     .unwrap();
///
/// assert_eq!(node.model(), SchedulingModel::AsyncCommon);
/// assert_eq!(node.input_slots()[0].capacity, 5);
/// ```
pub struct NodeFactory {
    kinds: HashMap<String, Registration>,
}

impl NodeFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Create a factory with the built-in kinds registered.
    ///
    /// | kind | inputs | outputs |
    /// |------|--------|---------|
    /// | `identity` | 1 | 1 |
    /// | `null_sink` | 1 | 0 |
    /// | `app_source` | 0 | 1 |
    /// | `muxer` | 2 | 0 |
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register("identity", 1, 1, create_identity);
        factory.register("null_sink", 1, 0, create_null_sink);
        factory.register("app_source", 0, 1, create_app_source);
        factory.register("muxer", 2, 0, create_muxer);
        factory
    }

    /// Register a constructor with default slot counts.
    ///
    /// Registering an existing kind replaces it.
    pub fn register<F>(&mut self, kind: &str, inputs: usize, outputs: usize, constructor: F)
    where
        F: Fn(&NodeConfig) -> Result<Box<dyn Process>> + Send + Sync + 'static,
    {
        let previous = self.kinds.insert(
            kind.to_string(),
            Registration {
                inputs,
                outputs,
                constructor: Box::new(constructor),
            },
        );
        if previous.is_some() {
            tracing::debug!(kind = kind, "node kind re-registered");
        }
    }

    /// Build a node of `kind` named `name`.
    ///
    /// # Errors
    ///
    /// Unknown kinds, malformed configuration strings, invalid engine keys
    /// and constructor failures are configuration errors.
    pub fn create(
        &self,
        name: &str,
        kind: &str,
        config: &str,
        events: Option<EventSender>,
    ) -> Result<Node> {
        let registration = self
            .kinds
            .get(kind)
            .ok_or_else(|| Error::Config(format!("unknown node kind '{kind}'")))?;

        let config = NodeConfig::parse(config)?;
        let options =
            EngineOptions::from_config(&config, registration.inputs, registration.outputs)
                .map_err(|err| match err {
                    Error::InvalidSlot {
                        direction,
                        index,
                        count,
                        ..
                    } => Error::InvalidSlot {
                        node: name.to_string(),
                        direction,
                        index,
                        count,
                    },
                    other => other,
                })?;
        let process = (registration.constructor)(&config)?;

        tracing::debug!(
            node = name,
            kind = kind,
            model = %options.model,
            inputs = options.inputs,
            outputs = options.outputs,
            "node created"
        );

        let mut builder = NodeBuilder::boxed(name, process).options(&options);
        if let Some(events) = events {
            builder = builder.events(events);
        }
        Ok(builder.build())
    }

    /// Check if a kind is registered.
    pub fn is_registered(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// List all registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kinds.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for NodeFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for NodeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

// Built-in constructors

fn create_identity(_config: &NodeConfig) -> Result<Box<dyn Process>> {
    Ok(Box::new(Identity::new()))
}

fn create_null_sink(_config: &NodeConfig) -> Result<Box<dyn Process>> {
    Ok(Box::new(NullSink::new()))
}

fn create_app_source(_config: &NodeConfig) -> Result<Box<dyn Process>> {
    let (source, _handle) = AppSource::new();
    Ok(Box::new(source))
}

fn create_muxer(config: &NodeConfig) -> Result<Box<dyn Process>> {
    let (muxer, _handle) = MuxingNode::new(MuxerConfig::from_config(config)?, FramedFileBackend::new());
    Ok(Box::new(muxer))
}

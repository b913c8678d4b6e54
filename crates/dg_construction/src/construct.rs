use std::rc::Rc;

use dg_ir::{FunctionId, Module};
use indexmap::IndexSet;
use log::{info, warn};
use thiserror::Error;

use crate::{
    builder::Builder,
    config::DgConfig,
    export::DepGraph,
    graph::{DependenceGraph, GraphId, NodeId},
    oracle::{ControlScopes, PointsToOracle, PostDominatorScopes},
    registry::GraphRegistry,
    verify::VerifyError,
};

/// Reasons a root construction can fail without the input being malformed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("no entry function named `{0}`")]
    NoEntryFunction(String),
    #[error("`{0}` is only a declaration")]
    Declaration(String),
}

/// A memoizing constructor of dependence graphs for one module.
///
/// Each function is built at most once. Graphs of callees are shared by
/// every call site that links to them.
pub struct DgConstructor<'m> {
    module: &'m Module,
    config: DgConfig,
    points_to: Option<Rc<dyn PointsToOracle + 'm>>,
    control_scopes: Rc<dyn ControlScopes + 'm>,
    registry: GraphRegistry,
}

impl<'m> DgConstructor<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            config: DgConfig::default(),
            points_to: None,
            control_scopes: Rc::new(PostDominatorScopes::new()),
            registry: GraphRegistry::new(),
        }
    }

    pub fn with_config(&mut self, config: DgConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Resolve calls through function pointers with this oracle. Without one
    /// such calls stay unlinked.
    pub fn with_points_to(&mut self, oracle: impl PointsToOracle + 'm) -> &mut Self {
        self.points_to.replace(Rc::new(oracle));
        self
    }

    /// Replaces the default [`PostDominatorScopes`].
    pub fn with_control_scopes(&mut self, scopes: impl ControlScopes + 'm) -> &mut Self {
        self.control_scopes = Rc::new(scopes);
        self
    }

    pub fn module(&self) -> &'m Module {
        self.module
    }

    pub fn config(&self) -> &DgConfig {
        &self.config
    }

    pub fn registry(&self) -> &GraphRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut GraphRegistry {
        &mut self.registry
    }

    fn builder(&mut self) -> Builder<'_, 'm> {
        Builder {
            module: self.module,
            config: &self.config,
            points_to: self.points_to.as_deref(),
            control_scopes: &*self.control_scopes,
            registry: &mut self.registry,
        }
    }

    /// Builds the graph of `entry` (or the configured entry function) and,
    /// transitively, of everything it calls.
    ///
    /// The returned graph holds one reference for the caller, to be given
    /// back with [`GraphRegistry::release`]. Asking for the same root again
    /// returns the same graph with another reference.
    pub fn construct_root(&mut self, entry: Option<&str>) -> Result<GraphId, ConstructionError> {
        let name = entry.unwrap_or(self.config.entry()).to_owned();
        let Some(function) = self.module.function_by_name(&name) else {
            warn!("Entry function {name} not found in {}", self.module.name);
            return Err(ConstructionError::NoEntryFunction(name));
        };
        self.registry.add_globals(self.module);
        if let Some(g) = self.registry.lookup(function) {
            self.registry.retain(g);
            return Ok(g);
        }

        info!("Constructing dependence graph from {name}");
        let mut builder = self.builder();
        let g = builder.registry.create(function);
        if !builder.build(g) {
            self.registry.destroy(g);
            return Err(ConstructionError::Declaration(name));
        }
        info!(
            "Constructed {} graphs with {} nodes from {name}",
            self.registry.len(),
            self.registry.node_count()
        );
        Ok(g)
    }

    /// The graph of `function`, building it on first request. The graph is
    /// kept alive only by call nodes linking to it.
    ///
    /// # Panics
    ///
    /// If `function` is only a declaration.
    pub fn get_or_build(&mut self, function: FunctionId) -> GraphId {
        self.registry.add_globals(self.module);
        self.builder().get_or_build(function)
    }

    pub fn graph(&self, id: GraphId) -> &DependenceGraph {
        self.registry.graph(id)
    }

    pub fn graph_for(&self, function: FunctionId) -> Option<&DependenceGraph> {
        self.registry
            .lookup(function)
            .map(|g| self.registry.graph(g))
    }

    /// Call nodes calling one of `names`, see [`GraphRegistry::call_sites`].
    pub fn call_sites(&self, names: &[&str]) -> IndexSet<NodeId> {
        self.registry.call_sites(self.module, names)
    }

    pub fn gathered_call_sites(&self) -> &IndexSet<NodeId> {
        self.registry.gathered_call_sites()
    }

    pub fn verify(&self) -> Result<(), VerifyError> {
        self.registry.verify(self.module)
    }

    pub fn to_petgraph(&self) -> DepGraph {
        self.registry.to_petgraph(self.module)
    }
}

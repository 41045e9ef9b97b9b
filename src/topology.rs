//! System topology: named stages wired by upstream/downstream edges.
//!
//! Stage names live in an arena; edges refer to them by index, so cycles
//! such as `commands -> orders -> commands` need no shared ownership.

/// An edge `downstream` reads `upstream`'s notification log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub upstream: usize,
    pub downstream: usize,
}

/// Error returned when building a [`Topology`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    /// A pipe named a stage that was never registered.
    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    /// A pipe with fewer than two stages has no edges.
    #[error("a pipe needs at least two stages")]
    EmptyPipe,

    /// The same stage name was registered twice.
    #[error("stage '{0}' registered twice")]
    DuplicateStage(String),
}

/// A directed, possibly cyclic graph of stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    nodes: Vec<String>,
    edges: Vec<Edge>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage name, returning its index.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::DuplicateStage`] if the name is taken.
    pub fn add_stage(&mut self, name: impl Into<String>) -> Result<usize, TopologyError> {
        let name = name.into();
        if self.index_of(&name).is_some() {
            return Err(TopologyError::DuplicateStage(name));
        }
        self.nodes.push(name);
        Ok(self.nodes.len() - 1)
    }

    /// Add an edge between each consecutive pair of `stages`.
    ///
    /// `pipe(&["commands", "orders", "commands"])` makes `orders` read
    /// `commands` and `commands` read `orders`. Edges already present are
    /// not duplicated. Nothing is added if any name is unknown.
    ///
    /// # Errors
    ///
    /// - [`TopologyError::EmptyPipe`] for fewer than two stages.
    /// - [`TopologyError::UnknownStage`] for an unregistered name.
    pub fn pipe(&mut self, stages: &[&str]) -> Result<(), TopologyError> {
        if stages.len() < 2 {
            return Err(TopologyError::EmptyPipe);
        }
        let indices = stages
            .iter()
            .map(|name| {
                self.index_of(name)
                    .ok_or_else(|| TopologyError::UnknownStage((*name).to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for pair in indices.windows(2) {
            let edge = Edge {
                upstream: pair[0],
                downstream: pair[1],
            };
            if !self.edges.contains(&edge) {
                self.edges.push(edge);
            }
        }
        Ok(())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == name)
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.nodes.get(index).map(String::as_str)
    }

    /// Stage names in registration order.
    pub fn stages(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Names of the stages `name` reads from, in edge order.
    pub fn upstreams_of(&self, name: &str) -> Vec<&str> {
        let Some(index) = self.index_of(name) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter(|e| e.downstream == index)
            .filter_map(|e| self.name(e.upstream))
            .collect()
    }

    /// Names of the stages that read from `name`, in edge order.
    pub fn downstreams_of(&self, name: &str) -> Vec<&str> {
        let Some(index) = self.index_of(name) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter(|e| e.upstream == index)
            .filter_map(|e| self.name(e.downstream))
            .collect()
    }
}

//! Generic state graph: named nodes, static and conditional edges, compiled
//! into a runnable application.
//!
//! ```text
//! StateGraph ─► compile() ─► CompiledGraph::invoke(state)
//!                              │
//!                              └─► node ─► edge ─► node ─► ... ─► END
//! ```
//!
//! Nodes own the state for the duration of their step and hand it back.
//! Conditional edges route on the state the node just returned. The engine
//! keeps no loop guard of its own; callers bound iteration through their
//! state.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Sentinel target that terminates a run.
pub const END: &str = "__end__";

/// Where to go after a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Next {
    Node(String),
    End,
}

impl Next {
    pub fn to(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == END {
            Self::End
        } else {
            Self::Node(name)
        }
    }
}

/// A state transition.
#[async_trait::async_trait]
pub trait Node<S>: Send + Sync {
    async fn run(&self, state: S) -> Result<S>;
}

/// Adapter turning an async closure into a [`Node`].
pub struct FnNode<F>(F);

/// Wrap an async closure `S -> Result<S>` as a node.
pub fn node_fn<S, F, Fut>(f: F) -> FnNode<F>
where
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S>> + Send,
{
    FnNode(f)
}

#[async_trait::async_trait]
impl<S, F, Fut> Node<S> for FnNode<F>
where
    S: Send + 'static,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S>> + Send,
{
    async fn run(&self, state: S) -> Result<S> {
        (self.0)(state).await
    }
}

type Router<S> = Arc<dyn Fn(&S) -> Next + Send + Sync>;

enum Edge<S> {
    Direct(String),
    Conditional(Router<S>),
}

impl<S> Clone for Edge<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(to) => Self::Direct(to.clone()),
            Self::Conditional(router) => Self::Conditional(router.clone()),
        }
    }
}

/// Graph under construction.
pub struct StateGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: Option<String>,
}

impl<S: Send + 'static> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + 'static> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: None,
        }
    }

    /// Register a node. Re-registering a name replaces the node.
    pub fn add_node(&mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> &mut Self {
        self.nodes.insert(name.into(), Arc::new(node));
        self
    }

    /// Unconditional edge `from -> to`. `to` may be [`END`].
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Conditional edge: `router` picks the successor from the updated state.
    pub fn add_conditional_edges<R>(&mut self, from: impl Into<String>, router: R) -> &mut Self
    where
        R: Fn(&S) -> Next + Send + Sync + 'static,
    {
        self.edges.insert(from.into(), Edge::Conditional(Arc::new(router)));
        self
    }

    pub fn set_entry_point(&mut self, name: impl Into<String>) -> &mut Self {
        self.entry = Some(name.into());
        self
    }

    /// Validate and freeze the graph.
    pub fn compile(&self) -> Result<CompiledGraph<S>> {
        let entry = self
            .entry
            .clone()
            .ok_or_else(|| Error::Graph("no entry point set".into()))?;
        if !self.nodes.contains_key(&entry) {
            return Err(Error::UnknownNode(entry));
        }
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(Error::Graph(format!("edge from unknown node '{}'", from)));
            }
            if let Edge::Direct(to) = edge {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(Error::Graph(format!("edge '{}' -> unknown node '{}'", from, to)));
                }
            }
        }
        for name in self.nodes.keys() {
            if !self.edges.contains_key(name) {
                return Err(Error::Graph(format!("node '{}' has no outgoing edge", name)));
            }
        }
        Ok(CompiledGraph {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            entry,
        })
    }
}

/// Runnable graph. Cheap to clone; nodes are shared.
pub struct CompiledGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: String,
}

impl<S> Clone for CompiledGraph<S> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            entry: self.entry.clone(),
        }
    }
}

impl<S: Send + 'static> CompiledGraph<S> {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Run from the entry node until a route yields END.
    pub async fn invoke(&self, state: S) -> Result<S> {
        self.invoke_from(self.entry.clone(), state).await
    }

    /// Run starting at `start` instead of the entry node. Used to re-enter a
    /// loop after a suspension.
    pub async fn invoke_from(&self, start: impl Into<String>, state: S) -> Result<S> {
        let mut current = start.into();
        let mut state = state;
        loop {
            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| Error::UnknownNode(current.clone()))?
                .clone();
            debug!(node = %current, "graph node start");
            state = node.run(state).await?;

            let next = match self.edges.get(&current) {
                Some(Edge::Direct(to)) => Next::to(to.clone()),
                Some(Edge::Conditional(router)) => router(&state),
                None => Next::End,
            };
            match next {
                Next::End => {
                    debug!(node = %current, "graph reached END");
                    return Ok(state);
                }
                Next::Node(name) => current = name,
            }
        }
    }
}

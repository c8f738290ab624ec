//! Agentigraph Core - wire types, error taxonomy, and the generic graph engine

pub mod error;
pub mod graph;
pub mod types;

pub use error::{Error, Result};
pub use graph::{node_fn, CompiledGraph, Next, Node, StateGraph, END};
pub use types::*;

//! Composite nodes: branching, fan-out, and chaining built on top of the
//! plain [`crate::node::Node`] contract rather than baked into the
//! scheduler. Ported from `flow_node.py`'s `ConditionalNode`,
//! `ParallelNode`, and `SequenceNode`.

mod conditional;
mod parallel;
mod sequence;

pub use conditional::ConditionalNode;
pub use parallel::ParallelNode;
pub use sequence::SequenceNode;

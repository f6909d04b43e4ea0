//! Binary scene tables: node records, mesh records and attribute layouts.
//!
//! Everything here is a pure accessor over caller-supplied bytes; nothing is
//! decoded until the merge planner asks for it.

pub mod builder;
pub mod bytes;
pub mod layout;
pub mod reader;
pub mod types;

pub use builder::{BuiltScene, MeshSpec, NodeSpec, SceneBuilder};
pub use bytes::ByteView;
pub use layout::{Attribute, AttributeLayout, AttributeSemantic, ComponentType, Primitive};
pub use reader::SceneReader;
pub use types::{IndexWidth, MeshData, NodeData, NodeFlags};

//! Resource node model.
//!
//! This module describes declared infrastructure objects, the typed
//! references between them and the per-type replacement triggers.

mod node;
mod registry;
mod value;

pub use node::{validate_id, DeclarationContext, ResourceNode};
pub use registry::ResourceTypeRegistry;
pub use value::{OutputRef, Properties, PropertyValue, ResolvedProperties, ID_OUTPUT};

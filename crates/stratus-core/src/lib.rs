pub mod edge;
pub mod error;
pub mod graph;
pub mod id;
pub mod path;
pub mod resource;
pub mod value;

// Re-export commonly used types
pub use edge::{EdgeData, EdgeProps, EnvironmentVariable};
pub use error::{GraphError, PropertyError};
pub use graph::{DependencyLayer, ResourceGraph};
pub use id::{ResourceId, PROVIDER_ABSTRACT};
pub use path::{PathSegment, PropertyPath};
pub use resource::Resource;
pub use value::{IaCValue, PropertyRef, Value};

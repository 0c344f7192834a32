pub mod dynamic;
pub mod edge_template;
pub mod error;
pub mod kb;
pub mod property;
pub mod query;
pub mod rules;
pub mod template;

// Re-export commonly used types
pub use dynamic::{DynamicContext, DynamicData};
pub use edge_template::{EdgeTemplate, Unique};
pub use error::KbError;
pub use kb::{KnowledgeBase, KB_DIR_ENV};
pub use property::{Property, PropertyType};
pub use query::Layer;
pub use rules::{
    ConfigurationRule, Direction, IfMissing, OperationalRule, OperationalStep, PropertyRule,
    ResourceSelector, SelectionOperator,
};
pub use template::{Classification, PathSatisfaction, ResourceTemplate};

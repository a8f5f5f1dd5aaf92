pub mod constructor;
pub mod mapping;
pub mod ner;
pub mod quota;
pub mod text_source;

pub use constructor::{ConstructionStats, KnowledgeConstructor};
pub use mapping::{LabelAliasTable, RelationMappingTable};
pub use ner::RuleBasedNer;
pub use quota::{EndpointQuotas, TokenBucket};
pub use text_source::InMemoryTextSource;

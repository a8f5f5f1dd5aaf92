pub mod agent;
pub mod intent;
pub mod rank;
pub mod synth;
pub mod tools;
pub mod types;

pub use agent::{ConversationTurn, RetrievalAgent};
pub use types::{AnswerResult, QueryPlan, ToolArgs, ToolName, ToolStatus, ToolUsage};

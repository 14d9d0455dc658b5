pub mod generation;
pub mod llm;
pub mod script;
pub mod setup;
pub mod workflow;

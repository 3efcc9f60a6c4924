pub mod gemini;
pub mod instruction;
pub mod orchestrator;
pub mod service;

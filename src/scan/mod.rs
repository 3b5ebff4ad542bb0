pub mod orchestrator;
pub mod timer;

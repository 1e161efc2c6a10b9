pub mod cache;
pub mod correction;
pub mod explain;
pub mod orchestrator;
pub mod validator;

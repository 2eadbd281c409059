// Library interface for hivesite modules
// This allows tests and the binary to import modules

pub mod chat;
pub mod ingestion;
pub mod llm;
pub mod models;
pub mod scheduler;
pub mod server;
pub mod storage;

pub mod archive;
pub mod changes;
pub mod config;
pub mod encrypt;
pub mod engine;
pub mod result_error;

pub mod config;
pub mod git;
pub mod lock_service;
pub mod lock_store;
pub mod mutex;
pub mod process;

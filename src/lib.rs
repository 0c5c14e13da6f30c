pub mod commands;
pub mod config;
pub mod export;
pub mod parse;
pub mod print;
pub mod project;
pub mod records;
pub mod stats;

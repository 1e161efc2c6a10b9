//! Natural-language questions answered with validated, self-correcting SQL.

pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod util;
pub mod web;

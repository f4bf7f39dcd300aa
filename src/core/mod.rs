//! Core module - Contains the fundamental data structures and utilities
//!
//! This module provides:
//! - File tree model (FileNode) and its indexed arena (FileTree)
//! - Error type shared by the library
//! - Settings, exclusion and replacement rules
//! - Notifications and their renderers
//! - File reading strategies
//! - Token estimation for LLM context budgeting

pub mod error;
pub mod events;
pub mod file_reader;
pub mod model;
pub mod paths;
pub mod render;
pub mod replace;
pub mod settings;
pub mod tokenizer;
pub mod tree;

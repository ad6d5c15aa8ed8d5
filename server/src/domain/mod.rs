//! Domain model

pub mod file_tree;
pub mod lifecycle;
pub mod package;
pub mod repository;
pub mod types;

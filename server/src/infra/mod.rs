//! Infrastructure layer

pub mod docker;
pub mod docker_sandbox;
#[cfg(test)]
pub mod fake;
pub mod github;
pub mod host;
pub mod local;

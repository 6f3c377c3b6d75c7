//! CLI command implementations.

pub mod inspect;
pub mod track;
pub mod verify;

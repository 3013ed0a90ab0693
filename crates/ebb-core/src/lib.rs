//! # ebb-core
//! Foundation types and collaborator traits for the Ebb protocol.

pub mod access;
pub mod constants;
pub mod custody;
pub mod error;
pub mod traits;
pub mod types;

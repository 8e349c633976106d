//! Data types for the chronology library.

pub mod citation;
pub mod config;
pub mod entry;
pub mod exhibit;
pub mod result;
pub mod schema;

//! Domain layer - pure types and business rules, no I/O.

pub mod foundation;
pub mod settlement;
pub mod subscription;

//! Domain Layer
//!
//! Entities, value objects, pure decision services and the ports the
//! application layer drives. Nothing here performs I/O.

pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;

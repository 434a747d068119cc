//! HTTP handlers (spec §6). Each module owns one resource family; routes
//! are assembled in `main`.

pub mod admin;
pub mod feedback;
pub mod observability;
pub mod recommend;
pub mod session;

//! Persistence seams and their SQLite implementation.

pub mod error;
pub mod repository;
pub mod sqlite;

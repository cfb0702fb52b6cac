//! Stevedore CLI library.

pub mod commands;

//! HTTP handlers for generated entity routes.

pub mod entity;

pub mod api;
pub mod catalog;
pub mod models;
pub mod validation;

pub mod auth;
pub mod catalog;
pub mod core;
pub mod counselor;
pub mod enrollment;
pub mod grades;
pub mod logs;
pub mod people;
pub mod reports;
pub mod setup;

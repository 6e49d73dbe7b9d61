pub mod access;
pub mod attendance;
pub mod auth;
pub mod calendar;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod students;
pub mod webhook;

pub mod classes;
pub mod core;
pub mod exceptions;
pub mod sessions;
pub mod setup;
pub mod timetable;

pub mod catalog;
pub mod core;
pub mod entries;
pub mod reference;
pub mod setup;
pub mod streams;
pub mod timetable;

pub mod classes;
pub mod core;
pub mod exams;
pub mod results;
pub mod roster;
pub mod schools;
pub mod setup;
pub mod subjects;
pub mod time;
pub mod timetable;

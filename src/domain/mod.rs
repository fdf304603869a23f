pub mod calendar;
pub mod conflicts;
pub mod layout;
pub mod models;
pub mod time;

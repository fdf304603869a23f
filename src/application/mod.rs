pub mod bootstrap;
pub mod commands;
pub mod interaction;
pub mod schedule_view;

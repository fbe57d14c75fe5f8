pub mod action;
pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod manager;
pub mod state;
pub mod task;

pub mod coordinator;
pub mod dispatcher;
pub mod input;
pub mod safety;
pub mod text_input;

pub mod line_protocol;
pub mod models;
pub mod publish;

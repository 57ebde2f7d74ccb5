pub mod models;
pub mod transcribe;

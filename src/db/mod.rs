// Database module
// Persistent key/value storage backing the narration cache

pub mod connection;
pub mod migrations;
pub mod store;

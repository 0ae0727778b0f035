//! Connection state shared by the facades and the dispatch thread.

pub mod connection;

pub use connection::{ConnectionState, StateCell};

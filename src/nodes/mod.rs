//! Concrete capture sources, the capture store and the built-in catalogs
//!
//! - **demo**: synthetic pattern generator with every limit kind
//! - **session_file**: replays a stored session container
//! - **store**: packed samples kept for a session save
//! - **outputs**: built-in output formats
//! - **decoders**: built-in protocol decoders

pub mod decoders;
pub mod demo;
pub mod outputs;
pub mod session_file;
pub mod store;

pub use demo::{DemoPattern, DemoSource};
pub use session_file::{SessionFileSource, SessionHeader};
pub use store::CaptureStore;

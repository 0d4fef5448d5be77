pub mod message;
pub mod preview;
pub mod recover;
pub mod server;

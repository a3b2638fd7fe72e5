pub mod backend;
pub mod poller;
pub mod progress;

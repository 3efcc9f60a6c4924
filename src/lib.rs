pub mod api;
pub mod config;
pub mod imaging;
pub mod pipeline;
pub mod session;

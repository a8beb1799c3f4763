pub mod api;
pub mod collab;
pub mod config;
pub mod error;
pub mod extract;
pub mod mode;
pub mod observability;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod state;
pub mod stream;
pub mod transport;

mod util;

pub mod health;
pub mod terminal;

pub use health::version_handler;
pub use terminal::{connect_handler, control_handler};

pub mod logging;

pub use logging::{preview, truncate_text};

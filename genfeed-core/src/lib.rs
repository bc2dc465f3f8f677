pub mod config;
pub mod dedup;
pub mod inbox;
pub mod reconciler;
pub mod signals;
pub mod status;
pub mod types;

pub use dedup::*;
pub use inbox::*;
pub use reconciler::*;
pub use signals::*;
pub use status::*;
pub use types::*;

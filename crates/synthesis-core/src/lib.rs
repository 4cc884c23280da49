pub mod classifier;
pub mod error;
pub mod potential;
pub mod ranker;
pub mod traits;
pub mod types;

pub use classifier::*;
pub use error::*;
pub use potential::*;
pub use ranker::*;
pub use traits::*;
pub use types::*;

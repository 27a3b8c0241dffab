//! Data models

pub mod finding;
pub mod rule;
pub mod anchor;
pub mod record;
pub mod alert;

pub use finding::*;
pub use rule::*;
pub use anchor::*;
pub use record::*;
pub use alert::*;

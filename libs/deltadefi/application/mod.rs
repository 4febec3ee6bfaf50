//! Application layer: long-running tasks and their wiring.

pub mod quoter;
pub mod supervisor;

pub use quoter::Quoter;
pub use supervisor::Supervisor;

//! REST API handlers organized by domain.

pub mod applications;
pub mod certificates;
pub mod health;
pub mod repairs;

pub use applications::*;
pub use certificates::*;
pub use health::*;
pub use repairs::*;

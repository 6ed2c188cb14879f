pub mod calendar;
pub mod conflict;
pub mod lifecycle;

pub use calendar::*;
pub use conflict::*;
pub use lifecycle::*;

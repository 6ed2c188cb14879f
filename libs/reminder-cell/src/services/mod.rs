pub mod channels;
pub mod dispatcher;
pub mod planner;
pub mod rules;
pub mod scheduler;

pub use channels::*;
pub use dispatcher::*;
pub use planner::*;
pub use rules::*;
pub use scheduler::*;

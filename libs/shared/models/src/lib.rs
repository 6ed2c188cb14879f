pub mod clinic;
pub mod reminder;
pub mod notification;

pub use clinic::*;
pub use reminder::*;
pub use notification::*;

pub mod change_set;
pub mod command;
pub mod output;
pub mod service;

pub use change_set::*;
pub use command::*;
pub use output::*;
pub use service::*;

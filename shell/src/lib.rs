//! Run external tools the way a user would type them in a shell, and log the
//! shell-equivalent line so a failing step can be reproduced by hand.

mod command;
mod error;

pub use command::ShellCommand;
pub use command::ShellOutput;
pub use error::ShellError;

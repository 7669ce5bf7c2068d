pub mod exit;
pub mod repo;

pub use exit::exit_on_error;

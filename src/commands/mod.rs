//! Command implementations, one module per subcommand

pub mod deploy;
pub mod render;
pub mod validate;

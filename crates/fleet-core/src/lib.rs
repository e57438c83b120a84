pub mod config;
pub mod descriptor;
pub mod env;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod paths;
pub mod process;
pub mod registry;
pub mod scaffold;
pub mod template;

pub use error::{FleetError, Result};

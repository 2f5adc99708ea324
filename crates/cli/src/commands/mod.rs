pub mod container;
pub mod fixups;
pub mod profile;

pub use container::*;
pub use fixups::*;
pub use profile::*;

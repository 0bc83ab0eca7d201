pub mod categories;
pub mod events;
pub mod runs;

pub use categories::{Category, CategoryTable};

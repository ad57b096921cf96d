// components/mod.rs - Components the store itself understands

mod hierarchy;
mod name;
mod unique;

pub use hierarchy::{Children, Parent};
pub use name::EntityName;
pub use unique::UniqueEntity;

// storage/mod.rs - Column storage for archetype rows

mod column;

pub use column::Column;
pub(crate) use column::ErasedColumn;

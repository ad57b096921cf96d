// column.rs - Typed component column behind an erased interface
//
// Archetypes hold one `Column<T>` per component type. Structural moves only
// see `dyn ErasedColumn`; typed access downcasts back to `Column<T>`.

use std::any::Any;

/// Dense storage for one component type.
pub struct Column<T> {
    values: Vec<T>,
}

impl<T> Column<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        self.values.push(value);
    }

    #[inline]
    pub fn get(&self, row: usize) -> Option<&T> {
        self.values.get(row)
    }

    #[inline]
    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        self.values.get_mut(row)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Operations the store performs on a column without knowing its type.
///
/// All row arguments must be in bounds; callers hold that invariant through
/// the entity index.
pub(crate) trait ErasedColumn: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn len(&self) -> usize;
    fn reserve(&mut self, additional: usize);

    /// Remove `row`, filling the gap with the last value, and drop it.
    fn swap_remove_drop(&mut self, row: usize);

    /// Remove `row` like `swap_remove_drop` and hand the value back.
    fn swap_remove_boxed(&mut self, row: usize) -> Box<dyn Any + Send>;

    /// Remove `row` and append the value to `dst`, which must hold the same type.
    fn swap_remove_into(&mut self, row: usize, dst: &mut dyn ErasedColumn);

    /// Append a boxed value. Gives the box back if it holds another type.
    fn push_boxed(&mut self, value: Box<dyn Any + Send>) -> Result<(), Box<dyn Any + Send>>;

    /// Overwrite `row` with a boxed value. Gives the box back if it holds another type.
    fn replace_boxed(&mut self, row: usize, value: Box<dyn Any + Send>) -> Result<(), Box<dyn Any + Send>>;

    fn value_any(&self, row: usize) -> &dyn Any;
    fn value_any_mut(&mut self, row: usize) -> &mut dyn Any;

    fn encode(&self, row: usize) -> Result<serde_json::Value, serde_json::Error>;
}

impl<T> ErasedColumn for Column<T>
where
    T: serde::Serialize + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn reserve(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    fn swap_remove_drop(&mut self, row: usize) {
        self.values.swap_remove(row);
    }

    fn swap_remove_boxed(&mut self, row: usize) -> Box<dyn Any + Send> {
        Box::new(self.values.swap_remove(row))
    }

    fn swap_remove_into(&mut self, row: usize, dst: &mut dyn ErasedColumn) {
        let value = self.values.swap_remove(row);
        dst.as_any_mut()
            .downcast_mut::<Column<T>>()
            .expect("columns for one marker share a type")
            .values
            .push(value);
    }

    fn push_boxed(&mut self, value: Box<dyn Any + Send>) -> Result<(), Box<dyn Any + Send>> {
        let value = value.downcast::<T>()?;
        self.values.push(*value);
        Ok(())
    }

    fn replace_boxed(&mut self, row: usize, value: Box<dyn Any + Send>) -> Result<(), Box<dyn Any + Send>> {
        let value = value.downcast::<T>()?;
        self.values[row] = *value;
        Ok(())
    }

    fn value_any(&self, row: usize) -> &dyn Any {
        &self.values[row]
    }

    fn value_any_mut(&mut self, row: usize) -> &mut dyn Any {
        &mut self.values[row]
    }

    fn encode(&self, row: usize) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.values[row])
    }
}

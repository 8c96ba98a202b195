//! Arena-based storage with typed handles.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Index of a value stored in an [`Arena`] or [`UniqueArena`].
///
/// The type parameter only tags which arena the index belongs to; a handle
/// is valid for the module that produced it.
pub struct Handle<T> {
    index: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            marker: PhantomData,
        }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

/// Handles are `u32`; a module never gets near that many items of one kind.
fn next_index(len: usize) -> u32 {
    u32::try_from(len).unwrap_or_else(|_| panic!("more than u32::MAX arena items"))
}

fn enumerate<T>(data: &[T]) -> impl Iterator<Item = (Handle<T>, &T)> {
    data.iter()
        .enumerate()
        .map(|(i, v)| (Handle::new(i as u32), v))
}

/// Append-only storage.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The handle the next [`append`](Self::append) will return.
    pub fn next_handle(&self) -> Handle<T> {
        Handle::new(next_index(self.data.len()))
    }

    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = self.next_handle();
        self.data.push(value);
        handle
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    pub fn try_get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.data.get_mut(handle.index())
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        handle.index() < self.data.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        enumerate(&self.data)
    }

    /// Every handle, in insertion order.
    pub fn handles(&self) -> impl Iterator<Item = Handle<T>> + use<T> {
        (0..next_index(self.data.len())).map(Handle::new)
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }
}

/// Interning storage: equal values share one handle.
#[derive(Clone, Debug)]
pub struct UniqueArena<T> {
    data: Vec<T>,
    lookup: HashMap<T, u32>,
}

impl<T: Hash + Eq> Default for UniqueArena<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            lookup: HashMap::new(),
        }
    }
}

impl<T: Hash + Eq + Clone> UniqueArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.insert_full(value).0
    }

    /// Interns `value`; the flag is `true` when it was not present before.
    pub fn insert_full(&mut self, value: T) -> (Handle<T>, bool) {
        if let Some(&index) = self.lookup.get(&value) {
            return (Handle::new(index), false);
        }
        let index = next_index(self.data.len());
        self.lookup.insert(value.clone(), index);
        self.data.push(value);
        (Handle::new(index), true)
    }

    pub fn get(&self, value: &T) -> Option<Handle<T>> {
        self.lookup.get(value).map(|&index| Handle::new(index))
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }

    /// Only for fields outside the value's `Hash`/`Eq` identity, such as
    /// the members of a declared struct.
    pub(crate) fn get_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        enumerate(&self.data)
    }
}

impl<T> Index<Handle<T>> for UniqueArena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

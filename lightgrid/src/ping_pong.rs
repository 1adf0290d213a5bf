//! Two slot arena for buffers that alternate between being read and written.

use std::ops::{Index, IndexMut};

/// Role of one of the two slots of a [`PingPong`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    #[default]
    Front,
    Back,
}

impl Slot {
    pub const ARRAY: [Self; 2] = [Self::Front, Self::Back];

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Self::Front => 0,
            Self::Back => 1,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PingPong<T> {
    slots: [T; 2],
}

impl<T> PingPong<T> {
    pub fn new(front: T, back: T) -> Self {
        Self { slots: [front, back] }
    }

    pub fn from_fn(mut func: impl FnMut(Slot) -> T) -> Self {
        Self::new(func(Slot::Front), func(Slot::Back))
    }

    /// Borrows `source` immutably and the other slot mutably.
    pub fn split(&mut self, source: Slot) -> (&T, &mut T) {
        let [front, back] = &mut self.slots;
        match source {
            Slot::Front => (front, back),
            Slot::Back => (back, front),
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}

impl<T> Index<Slot> for PingPong<T> {
    type Output = T;

    fn index(&self, slot: Slot) -> &T {
        &self.slots[slot.index()]
    }
}

impl<T> IndexMut<Slot> for PingPong<T> {
    fn index_mut(&mut self, slot: Slot) -> &mut T {
        &mut self.slots[slot.index()]
    }
}

//! Generational Arena
//!
//! Slot map backing the scope tree, the detector tree and each detector's
//! watcher list. Handles carry a generation, so a handle to a removed slot
//! never aliases whatever reuses it.

/// Generational index for safe references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenIndex {
    pub index: u32,
    pub generation: u32,
}

/// Generational arena (slot map)
#[derive(Debug)]
pub struct GenArena<T> {
    slots: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    len: usize,
}

impl<T> GenArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Insert item
    pub fn insert(&mut self, value: T) -> GenIndex {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            self.slots[index as usize] = Some(value);
            GenIndex { index, generation: self.generations[index as usize] }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(value));
            self.generations.push(0);
            GenIndex { index, generation: 0 }
        }
    }

    fn is_live(&self, idx: GenIndex) -> bool {
        self.generations.get(idx.index as usize) == Some(&idx.generation)
    }

    /// Get item
    pub fn get(&self, idx: GenIndex) -> Option<&T> {
        if !self.is_live(idx) {
            return None;
        }
        self.slots.get(idx.index as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: GenIndex) -> Option<&mut T> {
        if !self.is_live(idx) {
            return None;
        }
        self.slots.get_mut(idx.index as usize).and_then(Option::as_mut)
    }

    pub fn contains(&self, idx: GenIndex) -> bool {
        self.get(idx).is_some()
    }

    /// Remove item, bumping the slot generation
    pub fn remove(&mut self, idx: GenIndex) -> Option<T> {
        if !self.is_live(idx) {
            return None;
        }
        let value = self.slots.get_mut(idx.index as usize)?.take()?;
        self.generations[idx.index as usize] += 1;
        self.free_list.push(idx.index);
        self.len -= 1;
        Some(value)
    }

    /// Live entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (GenIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref().map(|value| {
                (GenIndex { index: i as u32, generation: self.generations[i] }, value)
            })
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for GenArena<T> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_arena() {
        let mut arena = GenArena::new();
        let idx = arena.insert(42);

        assert_eq!(arena.get(idx), Some(&42));
        assert_eq!(arena.remove(idx), Some(42));
        assert_eq!(arena.get(idx), None);
        assert_eq!(arena.remove(idx), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut arena = GenArena::new();
        let old = arena.insert("old");
        arena.remove(old);
        let new = arena.insert("new");

        assert_eq!(old.index, new.index);
        assert_ne!(old.generation, new.generation);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&"new"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_iter_skips_removed() {
        let mut arena = GenArena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        let c = arena.insert(3);
        arena.remove(b);
        if let Some(value) = arena.get_mut(c) {
            *value = 30;
        }

        let live: Vec<_> = arena.iter().collect();
        assert_eq!(live, vec![(a, &1), (c, &30)]);
    }
}

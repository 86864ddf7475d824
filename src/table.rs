use crate::memory::grow_capacity;
use crate::objects::object_string::ObjectString;
use crate::value::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
enum Entry {
    Empty,
    Tombstone,
    Live { key: *mut ObjectString, value: Value },
}

/// Open-addressing hash map keyed by interned-string identity. Linear
/// probing with tombstones; probe order is preserved across deletions.
pub struct Table {
    len: usize,
    tombstones: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            len: 0,
            tombstones: 0,
            entries: vec![],
        }
    }

    /// Live entries only; tombstones are bookkeeping, not contents.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_slot(entries: &[Entry], key: *mut ObjectString) -> usize {
        let capacity = entries.len();
        let mut index = unsafe { (*key).hash as usize } % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            match entries[index] {
                Entry::Empty => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Entry::Live { key: entry_key, .. } => {
                    if entry_key == key {
                        return index;
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    pub fn get(&self, key: *mut ObjectString) -> Option<Value> {
        if self.len == 0 {
            return None;
        }
        match self.entries[Self::find_slot(&self.entries, key)] {
            Entry::Live { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Inserts or overwrites; returns true when the key was not present.
    pub fn insert(&mut self, key: *mut ObjectString, value: Value) -> bool {
        if (self.len + self.tombstones + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            self.resize(grow_capacity!(self.entries.len()));
        }
        let index = Self::find_slot(&self.entries, key);
        let is_new = match self.entries[index] {
            Entry::Live { .. } => false,
            Entry::Tombstone => {
                self.tombstones -= 1;
                self.len += 1;
                true
            }
            Entry::Empty => {
                self.len += 1;
                true
            }
        };
        self.entries[index] = Entry::Live { key, value };
        is_new
    }

    pub fn remove(&mut self, key: *mut ObjectString) -> bool {
        if self.len == 0 {
            return false;
        }
        let index = Self::find_slot(&self.entries, key);
        match self.entries[index] {
            Entry::Live { .. } => {
                self.entries[index] = Entry::Tombstone;
                self.len -= 1;
                self.tombstones += 1;
                true
            }
            _ => false,
        }
    }

    fn resize(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Entry::Empty; capacity]);
        self.len = 0;
        self.tombstones = 0;
        for entry in old {
            if let Entry::Live { key, value } = entry {
                let index = Self::find_slot(&self.entries, key);
                self.entries[index] = Entry::Live { key, value };
                self.len += 1;
            }
        }
    }

    /// Interning probe: the single place where keys are compared by content
    /// (hash, then length, then bytes) instead of identity.
    pub fn find_string(&self, content: &str, hash: u32) -> Option<*mut ObjectString> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = hash as usize % capacity;
        loop {
            match self.entries[index] {
                Entry::Empty => return None,
                Entry::Tombstone => {}
                Entry::Live { key, .. } => {
                    let string = unsafe { &*key };
                    if string.hash == hash
                        && string.content.len() == content.len()
                        && string.content == content
                    {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Drops entries whose key string was not marked by the current GC
    /// cycle. Run after tracing and before the heap sweep.
    pub fn remove_white(&mut self) {
        for index in 0..self.entries.len() {
            if let Entry::Live { key, .. } = self.entries[index] {
                if !unsafe { (*key).object.is_marked } {
                    self.entries[index] = Entry::Tombstone;
                    self.len -= 1;
                    self.tombstones += 1;
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut ObjectString, Value)> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Live { key, value } => Some((*key, *value)),
            _ => None,
        })
    }

    pub fn byte_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }
}

#[derive(Clone, Copy)]
enum SetEntry {
    Empty,
    Tombstone,
    Live(*mut ObjectString),
}

/// String-membership variant of the table, used for class field schemas.
pub struct Set {
    len: usize,
    tombstones: usize,
    entries: Vec<SetEntry>,
}

impl Set {
    pub fn new() -> Set {
        Set {
            len: 0,
            tombstones: 0,
            entries: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn find_slot(entries: &[SetEntry], key: *mut ObjectString) -> usize {
        let capacity = entries.len();
        let mut index = unsafe { (*key).hash as usize } % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            match entries[index] {
                SetEntry::Empty => return tombstone.unwrap_or(index),
                SetEntry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                SetEntry::Live(entry_key) => {
                    if entry_key == key {
                        return index;
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    pub fn contains(&self, key: *mut ObjectString) -> bool {
        if self.len == 0 {
            return false;
        }
        matches!(
            self.entries[Self::find_slot(&self.entries, key)],
            SetEntry::Live(_)
        )
    }

    pub fn insert(&mut self, key: *mut ObjectString) -> bool {
        if (self.len + self.tombstones + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD {
            self.resize(grow_capacity!(self.entries.len()));
        }
        let index = Self::find_slot(&self.entries, key);
        let is_new = match self.entries[index] {
            SetEntry::Live(_) => false,
            SetEntry::Tombstone => {
                self.tombstones -= 1;
                self.len += 1;
                true
            }
            SetEntry::Empty => {
                self.len += 1;
                true
            }
        };
        self.entries[index] = SetEntry::Live(key);
        is_new
    }

    pub fn remove(&mut self, key: *mut ObjectString) -> bool {
        if self.len == 0 {
            return false;
        }
        let index = Self::find_slot(&self.entries, key);
        match self.entries[index] {
            SetEntry::Live(_) => {
                self.entries[index] = SetEntry::Tombstone;
                self.len -= 1;
                self.tombstones += 1;
                true
            }
            _ => false,
        }
    }

    fn resize(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![SetEntry::Empty; capacity]);
        self.len = 0;
        self.tombstones = 0;
        for entry in old {
            if let SetEntry::Live(key) = entry {
                let index = Self::find_slot(&self.entries, key);
                self.entries[index] = SetEntry::Live(key);
                self.len += 1;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = *mut ObjectString> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            SetEntry::Live(key) => Some(*key),
            _ => None,
        })
    }

    pub fn byte_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<SetEntry>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::object_manager::ObjectManager;
    use crate::value::{make_bool_value, make_number_value, make_null_value};

    fn strings(
        manager: &mut ObjectManager,
        intern: &mut Table,
        names: &[&str],
    ) -> Vec<*mut ObjectString> {
        names
            .iter()
            .map(|name| manager.copy_string(intern, name))
            .collect()
    }

    #[test]
    fn test_insert_get_overwrite() {
        let mut manager = ObjectManager::new();
        let mut intern = Table::new();
        let keys = strings(&mut manager, &mut intern, &["a", "b"]);

        let mut table = Table::new();
        assert!(table.insert(keys[0], make_number_value(1.0)));
        assert!(table.insert(keys[1], make_number_value(2.0)));
        assert_eq!(table.len(), 2);

        // Overwriting is not a new key.
        assert!(!table.insert(keys[0], make_number_value(3.0)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(keys[0]), Some(make_number_value(3.0)));
        assert_eq!(table.get(keys[1]), Some(make_number_value(2.0)));
    }

    #[test]
    fn test_remove_leaves_probe_chain_intact() {
        let mut manager = ObjectManager::new();
        let mut intern = Table::new();
        let keys = strings(
            &mut manager,
            &mut intern,
            &["one", "two", "three", "four", "five"],
        );

        let mut table = Table::new();
        for (index, &key) in keys.iter().enumerate() {
            table.insert(key, make_number_value(index as f64));
        }
        assert!(table.remove(keys[1]));
        assert!(!table.remove(keys[1]));
        assert_eq!(table.len(), keys.len() - 1);
        assert_eq!(table.get(keys[1]), None);
        // Entries inserted after the removed one must still be reachable.
        for (index, &key) in keys.iter().enumerate() {
            if index != 1 {
                assert_eq!(table.get(key), Some(make_number_value(index as f64)));
            }
        }
        // A tombstone slot is reused by a fresh insert.
        assert!(table.insert(keys[1], make_bool_value(true)));
        assert_eq!(table.get(keys[1]), Some(make_bool_value(true)));
    }

    #[test]
    fn test_resize_discards_tombstones() {
        let mut manager = ObjectManager::new();
        let mut intern = Table::new();
        let names: Vec<String> = (0..32).map(|index| format!("key{}", index)).collect();
        let name_refs: Vec<&str> = names.iter().map(|name| name.as_str()).collect();
        let keys = strings(&mut manager, &mut intern, &name_refs);

        let mut table = Table::new();
        for &key in &keys {
            table.insert(key, make_null_value());
        }
        for &key in &keys[..16] {
            table.remove(key);
        }
        // Force growth past several doublings; survivors stay reachable.
        assert_eq!(table.len(), 16);
        for &key in &keys[16..] {
            assert_eq!(table.get(key), Some(make_null_value()));
        }
        for &key in &keys[..16] {
            assert_eq!(table.get(key), None);
        }
    }

    #[test]
    fn test_find_string_compares_content() {
        let mut manager = ObjectManager::new();
        let mut intern = Table::new();
        let key = manager.copy_string(&mut intern, "needle");
        let hash = unsafe { (*key).hash };
        assert_eq!(intern.find_string("needle", hash), Some(key));
        assert_eq!(intern.find_string("haystack", hash), None);
    }

    #[test]
    fn test_set_membership() {
        let mut manager = ObjectManager::new();
        let mut intern = Table::new();
        let keys = strings(&mut manager, &mut intern, &["x", "y", "z"]);

        let mut set = Set::new();
        assert!(set.insert(keys[0]));
        assert!(set.insert(keys[1]));
        assert!(!set.insert(keys[0]));
        assert_eq!(set.len(), 2);
        assert!(set.contains(keys[0]));
        assert!(set.contains(keys[1]));
        assert!(!set.contains(keys[2]));

        assert!(set.remove(keys[0]));
        assert!(!set.contains(keys[0]));
        assert_eq!(set.len(), 1);
        // Reinsert through the tombstone.
        assert!(set.insert(keys[0]));
        assert!(set.contains(keys[0]));
    }
}

use crate::dex::key::Key;
use once_cell::unsync::OnceCell;
use std::collections::HashMap;

/// Lazy key → record index multimap of one section.
///
/// Built on the first lookup after any structural change; every mutation of the owning
/// section calls [`DexSectionPool::invalidate`].
#[derive(Clone, Debug, Default)]
pub struct DexSectionPool {
    map: OnceCell<HashMap<Key, Vec<usize>>>,
}

impl DexSectionPool {
    pub fn new() -> Self {
        DexSectionPool::default()
    }

    pub fn is_built(&self) -> bool {
        self.map.get().is_some()
    }

    /// Returns the map, building it from `keys` (one optional key per record index) if needed.
    pub fn map<I>(&self, keys: impl FnOnce() -> I) -> &HashMap<Key, Vec<usize>>
    where
        I: IntoIterator<Item = Option<Key>>,
    {
        self.map.get_or_init(|| {
            let mut map: HashMap<Key, Vec<usize>> = HashMap::new();
            for (index, key) in keys().into_iter().enumerate() {
                if let Some(key) = key {
                    map.entry(key).or_default().push(index);
                }
            }
            map
        })
    }

    pub fn contains<I>(&self, key: &Key, keys: impl FnOnce() -> I) -> bool
    where
        I: IntoIterator<Item = Option<Key>>,
    {
        self.map(keys).contains_key(key)
    }

    /// First record index registered under `key`.
    pub fn get<I>(&self, key: &Key, keys: impl FnOnce() -> I) -> Option<usize>
    where
        I: IntoIterator<Item = Option<Key>>,
    {
        self.map(keys).get(key).and_then(|all| all.first().copied())
    }

    pub fn get_all<I>(&self, key: &Key, keys: impl FnOnce() -> I) -> &[usize]
    where
        I: IntoIterator<Item = Option<Key>>,
    {
        self.map(keys).get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Records an appended index in an already built pool; an unbuilt pool stays unbuilt.
    pub fn push(&mut self, key: Option<Key>, index: usize) {
        if let (Some(map), Some(key)) = (self.map.get_mut(), key) {
            map.entry(key).or_default().push(index);
        }
    }

    pub fn invalidate(&mut self) {
        self.map.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_once_until_invalidated() {
        let mut pool = DexSectionPool::new();
        let keys = || vec![Some(Key::String("a".into())), None, Some(Key::String("a".into()))];
        assert!(!pool.is_built());
        assert_eq!(pool.get_all(&Key::String("a".into()), keys), &[0, 2]);
        assert!(pool.is_built());
        // a built pool ignores the key source
        assert!(!pool.contains(&Key::String("b".into()), Vec::new));
        pool.push(Some(Key::String("b".into())), 3);
        assert_eq!(pool.get(&Key::String("b".into()), Vec::new), Some(3));
        pool.invalidate();
        assert!(!pool.contains(&Key::String("a".into()), Vec::new));
    }
}

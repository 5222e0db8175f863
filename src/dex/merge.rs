use crate::dex::item::ItemHandle;
use crate::dex::key::Key;
use crate::dex::section_list::SectionList;
use crate::dex::section_type::{section_type, tag};
use crate::error::ErrorKind;
use log::{info, warn};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// What to do with an incoming class whose descriptor the destination already defines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicateAction {
    #[default]
    DropIncoming,
    /// Remove the destination's definition, then merge the incoming one.
    Replace,
}

/// Hooks steering a class merge. Every method has a default.
pub trait MergeOptions {
    fn skip_merging(&mut self, _class: &Key) -> bool {
        false
    }

    fn on_duplicate(&mut self, class: &Key) -> DuplicateAction {
        info!("[merge] {class} is already defined, keeping the existing definition");
        DuplicateAction::DropIncoming
    }

    /// The destination lacks room for the class. Nothing was changed.
    fn on_dex_full(&mut self, class: &Key, error: &ErrorKind) {
        warn!("[merge] cannot merge {class}: {error}");
    }

    /// Remove merged classes from the source.
    fn relocate_class(&self) -> bool {
        false
    }

    fn on_merge_success(&mut self, _class: &Key) {}

    fn on_merge_error(&mut self, message: &str) {
        warn!("[merge] {message}");
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultMergeOptions;

impl MergeOptions for DefaultMergeOptions {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MergeResult {
    Merged,
    Skipped,
    Full,
}

impl SectionList {
    /// Copies the class definition `class` of `source`, with everything it references,
    /// into this list. Returns whether the class was merged.
    pub fn merge_class(&mut self, source: &mut SectionList, class: ItemHandle, options: &mut dyn MergeOptions) -> bool {
        let merged = self.merge_one(source, class, options) == MergeResult::Merged;
        if merged && self.config().sort_after_merge {
            self.sort_strings();
            self.refresh();
        }
        merged
    }

    /// Merges every class of `source`, last definition first. Stops at the first class
    /// that does not fit and returns whether all were merged.
    pub fn merge_all(&mut self, source: &mut SectionList, options: &mut dyn MergeOptions) -> bool {
        let classes = source.get_section(tag::CLASS_ID).map(|s| s.handles()).unwrap_or_default();
        let mut all = true;
        let mut any = false;
        for class in classes.into_iter().rev() {
            match self.merge_one(source, class, options) {
                MergeResult::Merged => any = true,
                MergeResult::Skipped => all = false,
                MergeResult::Full => {
                    all = false;
                    break;
                }
            }
        }
        if any && self.config().sort_after_merge {
            self.sort_strings();
            self.refresh();
        }
        all
    }

    fn merge_one(&mut self, source: &mut SectionList, class: ItemHandle, options: &mut dyn MergeOptions) -> MergeResult {
        let Some(key) = source.key_of(class).filter(|_| class.section() == tag::CLASS_ID) else {
            options.on_merge_error(&format!("{class:?} is not a class definition of the source"));
            return MergeResult::Skipped;
        };
        if options.skip_merging(&key) {
            return MergeResult::Skipped;
        }
        let replaced = match self.get(&key) {
            None => None,
            Some(existing) => match options.on_duplicate(&key) {
                DuplicateAction::DropIncoming => return MergeResult::Skipped,
                DuplicateAction::Replace => Some(existing),
            },
        };

        // records reachable from the class, in discovery order
        let mut closure = vec![class];
        let mut seen: HashSet<ItemHandle> = closure.iter().copied().collect();
        let mut queue: VecDeque<ItemHandle> = closure.iter().copied().collect();
        while let Some(handle) = queue.pop_front() {
            for (_, r) in source.refs_of(handle) {
                if let Some(target) = r.target().filter(|t| seen.insert(*t)) {
                    closure.push(target);
                    queue.push_back(target);
                }
            }
        }

        // lookups first: a record is reused when the destination has its key, or when an
        // earlier record of the closure carries the same key
        let mut mapping: HashMap<ItemHandle, ItemHandle> = HashMap::new();
        let mut aliases: HashMap<ItemHandle, ItemHandle> = HashMap::new();
        let mut first_with_key: HashMap<(u16, Key), ItemHandle> = HashMap::new();
        let mut to_copy = Vec::new();
        for &handle in &closure {
            let record_key = source.key_of(handle);
            if handle != class {
                let existing = record_key
                    .as_ref()
                    .and_then(|k| self.get_section(handle.section())?.find_key(k, self));
                if let Some(existing) = existing {
                    mapping.insert(handle, existing);
                    continue;
                }
            }
            if let Some(k) = record_key {
                if let Some(&first) = first_with_key.get(&(handle.section(), k.clone())) {
                    aliases.insert(handle, first);
                    continue;
                }
                first_with_key.insert((handle.section(), k), handle);
            }
            to_copy.push(handle);
        }

        let mut added: BTreeMap<u16, usize> = BTreeMap::new();
        for handle in &to_copy {
            *added.entry(handle.section()).or_default() += 1;
        }
        if replaced.is_some() {
            if let Some(n) = added.get_mut(&tag::CLASS_ID) {
                *n -= 1;
            }
        }
        let capacity = self.config().id_capacity;
        let headroom = self.config().id_headroom;
        for (&section, &requested) in &added {
            let Some(st) = section_type(section).filter(|st| st.is_id()) else { continue };
            let count = self.get_section(section).map_or(0, |s| s.len());
            if count + requested + headroom > capacity {
                let error = ErrorKind::SectionFull { section: st.name(), count, requested, capacity };
                options.on_dex_full(&key, &error);
                return MergeResult::Full;
            }
        }

        if let Some(existing) = replaced {
            if let Some(classes) = self.get_section_mut(tag::CLASS_ID) {
                classes.remove_handles(&HashSet::from([existing]));
            }
        }
        for &handle in &to_copy {
            let Some(from) = source.get_section(handle.section()) else { continue };
            match self.ensure_section_dyn(handle.section()).copy_from(from, handle) {
                Some(copy) => {
                    mapping.insert(handle, copy);
                }
                None => options.on_merge_error(&format!("{handle:?} could not be copied")),
            }
        }
        for (alias, first) in aliases {
            if let Some(&copy) = mapping.get(&first) {
                mapping.insert(alias, copy);
            }
        }
        for &handle in &to_copy {
            let Some(&copy) = mapping.get(&handle) else { continue };
            if let Some(section) = self.get_section_mut(copy.section()) {
                section.for_each_ref_of_mut(copy, &mut |_, r| {
                    if let Some(target) = r.target() {
                        r.set_target(mapping.get(&target).copied());
                    }
                });
            }
        }
        self.invalidate_pools();

        if options.relocate_class() {
            source.remove_class(class);
        }
        options.on_merge_success(&key);
        MergeResult::Merged
    }

    /// Removes a class definition, and its class data when nothing else refers to it.
    fn remove_class(&mut self, class: ItemHandle) {
        let class_data = self
            .refs_of(class)
            .into_iter()
            .find(|(target, _)| *target == tag::CLASS_DATA)
            .and_then(|(_, r)| r.target());
        let mut users = 0;
        if let Some(data) = class_data {
            for section in self.all() {
                section.for_each_ref(&mut |_, r| {
                    if r.target() == Some(data) {
                        users += 1;
                    }
                });
            }
        }
        if let Some(classes) = self.get_section_mut(tag::CLASS_ID) {
            classes.remove_handles(&HashSet::from([class]));
        }
        if let (Some(data), 1) = (class_data, users) {
            if let Some(section) = self.get_section_mut(tag::CLASS_DATA) {
                section.remove_handles(&HashSet::from([data]));
            }
        }
        self.invalidate_pools();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use crate::dex::{ClassData, ClassId, EncodedField, EncodedMethod, FieldKey, ItemRef, MethodKey, ProtoKey};

    fn source_with(classes: &[&str]) -> (SectionList, Vec<ItemHandle>) {
        let mut list = SectionList::default();
        let mut handles = Vec::new();
        for &descriptor in classes {
            let class = list.get_or_create_class(descriptor);
            let method = list.get_or_create_method(&MethodKey::new(descriptor, "run", ProtoKey::new("V", &[])));
            let field = list.get_or_create_field(&FieldKey::new(descriptor, "count", "I"));
            let data = list.ensure_section::<ClassData>().add(ClassData {
                instance_fields: vec![EncodedField { field: field.into(), access_flags: 2 }],
                virtual_methods: vec![EncodedMethod { method: method.into(), access_flags: 1, code: ItemRef::null_offset() }],
                ..Default::default()
            });
            list.section_mut::<ClassId>().unwrap().item_mut(class).unwrap().class_data = data.into();
            handles.push(class);
        }
        list.refresh();
        (list, handles)
    }

    #[derive(Default)]
    struct Recording {
        full: Vec<String>,
        merged: Vec<Key>,
        duplicates: usize,
        replace: bool,
        relocate: bool,
    }

    impl MergeOptions for Recording {
        fn on_duplicate(&mut self, _class: &Key) -> DuplicateAction {
            self.duplicates += 1;
            if self.replace {
                DuplicateAction::Replace
            } else {
                DuplicateAction::DropIncoming
            }
        }

        fn on_dex_full(&mut self, _class: &Key, error: &ErrorKind) {
            self.full.push(error.to_string());
        }

        fn relocate_class(&self) -> bool {
            self.relocate
        }

        fn on_merge_success(&mut self, class: &Key) {
            self.merged.push(class.clone());
        }
    }

    #[test]
    fn merged_class_brings_its_members() {
        let (mut source, classes) = source_with(&["Lcom/a/Foo;"]);
        let mut dest = SectionList::default();
        dest.get_or_create_string("run");
        let mut options = Recording::default();
        assert!(dest.merge_class(&mut source, classes[0], &mut options));
        assert_eq!(options.merged, vec![Key::Class("Lcom/a/Foo;".into())]);

        assert!(dest.contains(&"Lcom/a/Foo;->run()V".parse().unwrap()));
        assert!(dest.contains(&"Lcom/a/Foo;->count:I".parse().unwrap()));
        let runs = dest.section::<crate::dex::StringId>().unwrap().iter().filter(|s| dest.string_data_text(&s.data).as_deref() == Some("run")).count();
        assert_eq!(runs, 1, "existing strings are reused");

        let classes = dest.section::<ClassId>().unwrap();
        let class = classes.get(0).unwrap();
        let data = dest.section::<ClassData>().unwrap().item(class.class_data.target().unwrap()).unwrap();
        let method = data.virtual_methods[0].method.target().unwrap();
        assert_eq!(method.section(), tag::METHOD_ID);
        assert_eq!(dest.key_of(method), Some("Lcom/a/Foo;->run()V".parse().unwrap()));
    }

    #[test]
    fn duplicates_are_dropped_unless_replaced() {
        let (mut source, classes) = source_with(&["Lcom/a/Foo;"]);
        let (mut dest, _) = source_with(&["Lcom/a/Foo;"]);
        let mut options = Recording::default();
        assert!(!dest.merge_class(&mut source, classes[0], &mut options));
        assert_eq!(options.duplicates, 1);
        assert!(options.merged.is_empty());

        options.replace = true;
        assert!(dest.merge_class(&mut source, classes[0], &mut options));
        assert_eq!(dest.section::<ClassId>().unwrap().len(), 1);
    }

    #[test]
    fn full_destination_is_left_untouched() {
        let (mut source, classes) = source_with(&["Lcom/a/Foo;"]);
        let mut dest = SectionList::new(LayoutConfig { id_capacity: 4, ..Default::default() });
        dest.get_or_create_string("x");
        dest.refresh();
        let before = dest.to_bytes();
        let mut options = Recording::default();
        assert!(!dest.merge_class(&mut source, classes[0], &mut options));
        assert_eq!(options.full.len(), 1);
        assert!(options.full[0].contains("STRING_ID"), "{}", options.full[0]);
        dest.refresh();
        assert_eq!(dest.to_bytes(), before);
    }

    #[test]
    fn merge_all_relocates_every_class() {
        let (mut source, _) = source_with(&["LA;", "LB;"]);
        let mut dest = SectionList::default();
        let mut options = Recording { relocate: true, ..Default::default() };
        assert!(dest.merge_all(&mut source, &mut options));
        assert_eq!(options.merged, vec![Key::Class("LB;".into()), Key::Class("LA;".into())]);
        assert_eq!(dest.section::<ClassId>().unwrap().len(), 2);
        assert_eq!(source.section::<ClassId>().unwrap().len(), 0);
        assert_eq!(source.section::<ClassData>().unwrap().len(), 0);
    }
}

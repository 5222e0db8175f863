use crate::block::{Block, BlockReader, IntegerCell};
use crate::config::LayoutConfig;
use crate::dex::class_sort::{sort_definition, ClassSortOutcome};
use crate::dex::data_items::{StringData, TypeList};
use crate::dex::header::Header;
use crate::dex::id_items::{AccessFlags, ClassId, FieldId, MethodId, ProtoId, StringId, TypeId};
use crate::dex::item::{ItemHandle, ItemRef, SectionItem};
use crate::dex::key::{FieldKey, Key, MethodKey, ProtoKey};
use crate::dex::map_list::{MapItem, MapList};
use crate::dex::section::{DexSection, Section};
use crate::dex::section_type::{order_rank, section_type, tag, SectionType, R8_ORDER, READ_ORDER, REMOVE_ORDER};
use crate::error::Result;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";

fn catalog_entry(section: u16) -> &'static SectionType {
    match section_type(section) {
        Some(st) => st,
        None => unreachable!("record type {section:#06x} is not in the section catalog"),
    }
}

/// All sections of one DEX file: the header, the id sections, the data sections and the
/// map list, in layout order.
pub struct SectionList {
    header: Section<Header>,
    /// Id and data sections. Id sections always precede data sections.
    sections: Vec<Box<dyn DexSection>>,
    map_list: Section<MapList>,
    type_map: HashMap<u16, usize>,
    config: LayoutConfig,
}

impl std::fmt::Debug for SectionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.all()).finish()
    }
}

impl Default for SectionList {
    fn default() -> Self {
        SectionList::new(LayoutConfig::default())
    }
}

impl SectionList {
    /// An empty file: a default header and an empty map list.
    pub fn new(config: LayoutConfig) -> Self {
        let mut list = SectionList::with_header(Header::default(), config);
        list.map_list.add(MapList::default());
        list
    }

    fn with_header(header: Header, config: LayoutConfig) -> Self {
        let map_off = header.map_off.clone();
        let mut header_section = Section::with_cells(catalog_entry(tag::HEADER), IntegerCell::new(1), IntegerCell::new(0));
        header_section.add(header);
        SectionList {
            header: header_section,
            sections: Vec::new(),
            map_list: Section::with_cells(catalog_entry(tag::MAP_LIST), IntegerCell::new(1), map_off),
            type_map: HashMap::new(),
            config,
        }
    }

    /// Reads a whole DEX file: header, map list, then every mapped section in read order.
    pub fn read(reader: &BlockReader<'_>, config: LayoutConfig) -> Result<SectionList> {
        let mut header = Header::default();
        header.read(&mut reader.create(0, reader.end()))?;
        if header.map_off.get() == 0 {
            fail!(("dex file has no map list"), ("header"));
        }
        let mut list = SectionList::with_header(header, config);
        list.map_list.read(reader)?;
        let Some(map) = list.map_list.get(0).cloned() else {
            fail!(("map list is missing"), ("offset {}", list.map_list.offset_cell().get()));
        };
        map.validate(reader.end() as u32)?;

        for &section in READ_ORDER {
            if section == tag::HEADER || section == tag::MAP_LIST {
                continue;
            }
            let Some(item) = map.get(section) else { continue };
            if item.count.get() == 0 {
                continue;
            }
            let (count, offset) = list.cells_for(section, item);
            let mut created = catalog_entry(section).create_section(count, offset);
            created.read(reader)?;
            debug!("[read] {} records of {} at {:#x}", created.len(), created.section_type().name(), created.offset_cell().get());
            list.sections.push(created);
        }
        list.sections.sort_by_key(|s| (!s.section_type().is_id(), s.offset_cell().get()));
        list.rebuild_type_map();
        list.link_refs();
        Ok(list)
    }

    /// Count and offset cells for a section being read: the header's for id sections
    /// it tracks, the map item's otherwise. The map entry wins when both disagree.
    fn cells_for(&self, section: u16, item: &MapItem) -> (IntegerCell, IntegerCell) {
        match self.header().and_then(|h| h.id_table(section)) {
            Some(table) => {
                if table.size.get() != item.count.get() || table.offset.get() != item.offset.get() {
                    warn!(
                        "[read] header says {} records at {:#x} for {}, map says {} at {:#x}",
                        table.size.get(),
                        table.offset.get(),
                        catalog_entry(section).name(),
                        item.count.get(),
                        item.offset.get()
                    );
                    table.size.set(item.count.get());
                    table.offset.set(item.offset.get());
                }
                (table.size.clone(), table.offset.clone())
            }
            None => (item.count.clone(), item.offset.clone()),
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: LayoutConfig) {
        self.config = config;
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.get(0)
    }

    pub fn header_mut(&mut self) -> Option<&mut Header> {
        self.header.get_mut(0)
    }

    pub fn map_list(&self) -> Option<&MapList> {
        self.map_list.get(0)
    }

    /// Number of sections, header and map list included.
    pub fn len(&self) -> usize {
        self.sections.len() + 2
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every section in layout order.
    pub fn all(&self) -> Vec<&dyn DexSection> {
        let mut all: Vec<&dyn DexSection> = Vec::with_capacity(self.len());
        all.push(&self.header);
        all.extend(self.sections.iter().map(|s| s.as_ref()));
        all.push(&self.map_list);
        all
    }

    fn all_mut(&mut self) -> Vec<&mut dyn DexSection> {
        let mut all: Vec<&mut dyn DexSection> = Vec::with_capacity(self.sections.len() + 2);
        all.push(&mut self.header);
        for s in self.sections.iter_mut() {
            all.push(s.as_mut());
        }
        all.push(&mut self.map_list);
        all
    }

    pub fn tags(&self) -> Vec<u16> {
        self.all().iter().map(|s| s.tag()).collect()
    }

    pub fn get_section(&self, section: u16) -> Option<&dyn DexSection> {
        match section {
            tag::HEADER => Some(&self.header),
            tag::MAP_LIST => Some(&self.map_list),
            _ => self.type_map.get(&section).map(|&i| self.sections[i].as_ref()),
        }
    }

    pub(crate) fn get_section_mut(&mut self, section: u16) -> Option<&mut dyn DexSection> {
        match section {
            tag::HEADER => Some(&mut self.header),
            tag::MAP_LIST => Some(&mut self.map_list),
            _ => match self.type_map.get(&section) {
                Some(&i) => Some(self.sections[i].as_mut()),
                None => None,
            },
        }
    }

    pub fn section<T: SectionItem>(&self) -> Option<&Section<T>> {
        self.get_section(T::TYPE)?.as_any().downcast_ref()
    }

    /// Mutable access to one section. Pools of every section are dropped, since keys
    /// are computed across sections.
    pub fn section_mut<T: SectionItem>(&mut self) -> Option<&mut Section<T>> {
        self.invalidate_pools();
        self.get_section_mut(T::TYPE)?.as_any_mut().downcast_mut()
    }

    pub fn get_or_create_section<T: SectionItem>(&mut self) -> &mut Section<T> {
        self.invalidate_pools();
        self.ensure_section::<T>()
    }

    pub(crate) fn ensure_section<T: SectionItem>(&mut self) -> &mut Section<T> {
        match self.ensure_section_dyn(T::TYPE).as_any_mut().downcast_mut::<Section<T>>() {
            Some(section) => section,
            None => unreachable!("section {:#06x} holds another record type", T::TYPE),
        }
    }

    /// The section of type `section`, created empty and placed in R8 order if missing.
    pub(crate) fn ensure_section_dyn(&mut self, section: u16) -> &mut dyn DexSection {
        if self.get_section(section).is_none() {
            let (count, offset) = match self.header().and_then(|h| h.id_table(section)) {
                Some(table) => (table.size.clone(), table.offset.clone()),
                None => (IntegerCell::new(0), IntegerCell::new(0)),
            };
            self.sections.push(catalog_entry(section).create_section(count, offset));
            self.sort_sections(R8_ORDER);
        }
        match self.get_section_mut(section) {
            Some(s) => s,
            None => unreachable!("section {section:#06x} was just created"),
        }
    }

    pub fn remove_section(&mut self, section: u16) -> bool {
        let Some(index) = self.type_map.get(&section).copied() else {
            return false;
        };
        self.sections.remove(index);
        self.rebuild_type_map();
        true
    }

    fn rebuild_type_map(&mut self) {
        self.type_map = self.sections.iter().enumerate().map(|(i, s)| (s.tag(), i)).collect();
    }

    pub fn invalidate_pools(&mut self) {
        for section in self.all_mut() {
            section.invalidate_pool();
        }
    }

    /// Reorders the id and data sections by `order`; ids stay ahead of data. Takes effect
    /// at the next refresh.
    pub fn sort_sections(&mut self, order: &[u16]) {
        self.sections.sort_by_key(|s| (!s.section_type().is_id(), order_rank(order, Some(s.tag()))));
        self.rebuild_type_map();
    }

    // ---- references

    fn resolve(&self, target: u16, raw: u32) -> Option<ItemHandle> {
        let st = section_type(target)?;
        if raw == st.null_raw() {
            return None;
        }
        let section = self.get_section(target)?;
        if st.addressed_by_offset() {
            section.handle_at_offset(raw)
        } else {
            section.handle_at(raw as usize)
        }
    }

    /// Resolves the raw value of every reference to the record it names.
    fn link_refs(&mut self) {
        let mut raws = Vec::with_capacity(self.len());
        for section in self.all() {
            let mut refs = Vec::new();
            section.for_each_ref(&mut |target, r| refs.push((target, r.raw())));
            raws.push(refs);
        }
        let mut unresolved = 0usize;
        let resolved: Vec<Vec<Option<ItemHandle>>> = raws
            .iter()
            .map(|refs| {
                refs.iter()
                    .map(|&(target, raw)| {
                        let handle = self.resolve(target, raw);
                        if handle.is_none() && section_type(target).is_some_and(|st| st.null_raw() != raw) {
                            unresolved += 1;
                            debug!("[link] {} {raw:#x} does not name a record", catalog_entry(target).name());
                        }
                        handle
                    })
                    .collect()
            })
            .collect();
        if unresolved > 0 {
            warn!("[link] {unresolved} references point at no record and will be nulled on refresh");
        }
        for (section, targets) in self.all_mut().into_iter().zip(resolved) {
            let mut targets = targets.into_iter();
            section.for_each_ref_mut(&mut |_, r| r.set_target(targets.next().flatten()));
        }
    }

    /// Rewrites every raw value from the current location of its target. Returns how many
    /// references named a record that no longer exists; those are nulled.
    fn update_refs(&mut self) -> usize {
        let mut locations: HashMap<ItemHandle, u32> = HashMap::new();
        for section in self.all() {
            let by_offset = section.section_type().addressed_by_offset();
            for (index, handle) in section.handles().into_iter().enumerate() {
                let raw = if by_offset {
                    section.location_of(handle).map_or(0, |(_, offset)| offset)
                } else {
                    index as u32
                };
                locations.insert(handle, raw);
            }
        }
        let mut dangling = 0;
        for section in self.all_mut() {
            let owner = section.section_type().name();
            section.for_each_ref_mut(&mut |target, r| {
                let null = section_type(target).map_or(0, SectionType::null_raw);
                match r.target() {
                    None => r.set_raw(null),
                    Some(handle) => match locations.get(&handle) {
                        Some(&raw) => r.set_raw(raw),
                        None => {
                            warn!("[refresh] {owner} referenced {handle:?}, which is gone; nulled");
                            r.set_target(None);
                            r.set_raw(null);
                            dangling += 1;
                        }
                    },
                }
            });
        }
        dangling
    }

    /// References held by the record `handle`.
    pub fn refs_of(&self, handle: ItemHandle) -> Vec<(u16, ItemRef)> {
        self.get_section(handle.section()).map(|s| s.refs_of(handle)).unwrap_or_default()
    }

    /// Index (id sections) or offset (data sections) of the record `handle`.
    pub fn location_of(&self, handle: ItemHandle) -> Option<(usize, u32)> {
        self.get_section(handle.section())?.location_of(handle)
    }

    fn ref_index(&self, r: &ItemRef) -> u32 {
        r.target().and_then(|h| self.location_of(h)).map_or(u32::MAX, |(index, _)| index as u32)
    }

    // ---- layout

    /// One layout pass: raw values, map list, offsets from 0, raw values again, header.
    pub fn refresh(&mut self) {
        self.update_refs();
        for section in self.all_mut() {
            section.on_refs_updated();
        }
        self.refresh_map_list();
        let mut position = 0;
        for section in self.all_mut() {
            position = section.layout(position);
        }
        let dangling = self.update_refs();
        if dangling > 0 {
            debug!("[refresh] nulled {dangling} dangling references");
        }
        if let Some(map) = self.map_list.get_mut(0) {
            map.sort_by_offset();
        }
        self.update_header(position);
    }

    fn refresh_map_list(&mut self) {
        let items = self
            .all()
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| MapItem::new(s.tag(), s.count_cell().clone(), s.offset_cell().clone()))
            .collect();
        if let Some(map) = self.map_list.get_mut(0) {
            map.items = items;
        }
    }

    fn update_header(&mut self, file_size: u32) {
        let data_off = self
            .all()
            .iter()
            .filter(|s| !s.is_empty() && !s.section_type().is_id() && s.tag() != tag::HEADER)
            .map(|s| s.offset_cell().get())
            .min()
            .unwrap_or(0);
        let present: HashSet<u16> = self.type_map.keys().copied().collect();
        let Some(header) = self.header.get_mut(0) else {
            return;
        };
        for id in tag::STRING_ID..=tag::CLASS_ID {
            if let Some(table) = header.id_table(id).filter(|_| !present.contains(&id)) {
                table.size.set(0);
                table.offset.set(0);
            }
        }
        header.file_size = file_size;
        header.header_size = crate::dex::HEADER_SIZE;
        header.data_off = data_off;
        header.data_size = if data_off == 0 { 0 } else { file_size - data_off };
    }

    /// The file image as currently laid out.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sections: Vec<&dyn DexSection> = self.all().into_iter().filter(|s| !s.is_empty()).collect();
        sections.sort_by_key(|s| s.offset_cell().get());
        let file_size = self.header().map_or(0, |h| h.file_size as usize);
        let mut out = Vec::with_capacity(file_size);
        for section in sections {
            section.write(&mut out);
        }
        if out.len() < file_size {
            out.resize(file_size, 0);
        }
        out
    }

    // ---- keys and pools

    pub fn key_of(&self, handle: ItemHandle) -> Option<Key> {
        self.get_section(handle.section())?.key_of(handle, self)
    }

    /// Pooled lookup of the record with `key` in the section that owns that kind of key.
    pub fn get(&self, key: &Key) -> Option<ItemHandle> {
        self.get_section(key.section())?.find_key(key, self)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    pub fn string_data_text(&self, r: &ItemRef) -> Option<String> {
        self.section::<StringData>()?.item(r.target()?)?.decoded()
    }

    /// Text of the string id `r` points at.
    pub fn string_text(&self, r: &ItemRef) -> Option<String> {
        let id = self.section::<StringId>()?.item(r.target()?)?;
        self.string_data_text(&id.data)
    }

    pub fn type_descriptor(&self, r: &ItemRef) -> Option<String> {
        let id = self.section::<TypeId>()?.item(r.target()?)?;
        self.string_text(&id.descriptor)
    }

    /// Descriptors of a type list; a null reference is the empty list.
    pub fn type_list_descriptors(&self, r: &ItemRef) -> Option<Vec<String>> {
        let Some(handle) = r.target() else {
            return Some(Vec::new());
        };
        let list = self.section::<TypeList>()?.item(handle)?;
        list.types.iter().map(|t| self.type_descriptor(t)).collect()
    }

    pub fn proto_key(&self, r: &ItemRef) -> Option<ProtoKey> {
        self.section::<ProtoId>()?.item(r.target()?)?.proto_key(self)
    }

    fn find_in<T: SectionItem>(&self, key: &Key) -> Option<ItemHandle> {
        self.section::<T>()?.find(key, self)
    }

    fn string_data_for(&mut self, text: &str) -> ItemHandle {
        let key = Key::String(text.to_string());
        if let Some(found) = self.find_in::<StringData>(&key) {
            return found;
        }
        self.ensure_section::<StringData>().add_with_key(StringData::new(text), key)
    }

    pub fn get_or_create_string(&mut self, text: &str) -> ItemHandle {
        let key = Key::String(text.to_string());
        if let Some(found) = self.find_in::<StringId>(&key) {
            return found;
        }
        let data = self.string_data_for(text);
        self.ensure_section::<StringId>().add_with_key(StringId { data: data.into() }, key)
    }

    pub fn get_or_create_type(&mut self, descriptor: &str) -> ItemHandle {
        let key = Key::Type(descriptor.to_string());
        if let Some(found) = self.find_in::<TypeId>(&key) {
            return found;
        }
        let descriptor = self.get_or_create_string(descriptor);
        self.ensure_section::<TypeId>().add_with_key(TypeId { descriptor: descriptor.into() }, key)
    }

    pub fn get_or_create_type_list(&mut self, descriptors: &[String]) -> ItemHandle {
        let key = Key::TypeList(descriptors.to_vec());
        if let Some(found) = self.find_in::<TypeList>(&key) {
            return found;
        }
        let types = descriptors.iter().map(|d| ItemRef::to(self.get_or_create_type(d))).collect();
        self.ensure_section::<TypeList>().add_with_key(TypeList { types }, key)
    }

    pub fn get_or_create_proto(&mut self, proto: &ProtoKey) -> ItemHandle {
        let key = Key::Proto(proto.clone());
        if let Some(found) = self.find_in::<ProtoId>(&key) {
            return found;
        }
        let item = ProtoId {
            shorty: self.get_or_create_string(&proto.shorty()).into(),
            return_type: self.get_or_create_type(&proto.return_type).into(),
            parameters: if proto.params.is_empty() {
                ItemRef::null_offset()
            } else {
                self.get_or_create_type_list(&proto.params).into()
            },
        };
        self.ensure_section::<ProtoId>().add_with_key(item, key)
    }

    pub fn get_or_create_field(&mut self, field: &FieldKey) -> ItemHandle {
        let key = Key::Field(field.clone());
        if let Some(found) = self.find_in::<FieldId>(&key) {
            return found;
        }
        let item = FieldId {
            class: self.get_or_create_type(&field.class).into(),
            field_type: self.get_or_create_type(&field.field_type).into(),
            name: self.get_or_create_string(&field.name).into(),
        };
        self.ensure_section::<FieldId>().add_with_key(item, key)
    }

    pub fn get_or_create_method(&mut self, method: &MethodKey) -> ItemHandle {
        let key = Key::Method(method.clone());
        if let Some(found) = self.find_in::<MethodId>(&key) {
            return found;
        }
        let item = MethodId {
            class: self.get_or_create_type(&method.class).into(),
            proto: self.get_or_create_proto(&method.proto).into(),
            name: self.get_or_create_string(&method.name).into(),
        };
        self.ensure_section::<MethodId>().add_with_key(item, key)
    }

    /// The class definition for `descriptor`; a new one is public and extends `Object`.
    pub fn get_or_create_class(&mut self, descriptor: &str) -> ItemHandle {
        let key = Key::Class(descriptor.to_string());
        if let Some(found) = self.find_in::<ClassId>(&key) {
            return found;
        }
        let superclass =
            if descriptor == OBJECT_DESCRIPTOR { ItemRef::null_index() } else { self.get_or_create_type(OBJECT_DESCRIPTOR).into() };
        let item = ClassId {
            class_type: self.get_or_create_type(descriptor).into(),
            access_flags: AccessFlags::PUBLIC,
            superclass,
            ..Default::default()
        };
        self.ensure_section::<ClassId>().add_with_key(item, key)
    }

    // ---- sorting

    /// Puts `T`'s records in the order of `key`, computed against this list. Stable.
    fn sort_records<T, K, F>(&mut self, key: F) -> bool
    where
        T: SectionItem,
        K: Ord,
        F: Fn(&SectionList, &T) -> K,
    {
        let Some(section) = self.section::<T>() else {
            return false;
        };
        let keys: Vec<K> = section.iter().map(|item| key(self, item)).collect();
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
        if order.iter().enumerate().all(|(i, &o)| i == o) {
            return false;
        }
        self.invalidate_pools();
        self.get_section_mut(T::TYPE).is_some_and(|s| s.permute(&order))
    }

    /// Brings strings and every id section into canonical order: strings by UTF-16 code
    /// units, ids by the indices they refer to, classes by definition order.
    pub fn sort_strings(&mut self) -> bool {
        fn utf16(text: Option<String>) -> Vec<u16> {
            text.unwrap_or_default().encode_utf16().collect()
        }
        let mut changed = self.sort_records::<StringData, _, _>(|_, s| s.text().encode_utf16().collect::<Vec<u16>>());
        changed |= self.sort_records::<StringId, _, _>(|list, s| utf16(list.string_data_text(&s.data)));
        changed |= self.sort_records::<TypeId, _, _>(|list, t| list.ref_index(&t.descriptor));
        changed |= self.sort_records::<ProtoId, _, _>(|list, p| (list.ref_index(&p.return_type), list.type_list_indices(&p.parameters)));
        changed |= self.sort_records::<FieldId, _, _>(|list, f| {
            (list.ref_index(&f.class), list.ref_index(&f.name), list.ref_index(&f.field_type))
        });
        changed |= self.sort_records::<MethodId, _, _>(|list, m| {
            (list.ref_index(&m.class), list.ref_index(&m.name), list.ref_index(&m.proto))
        });
        if let ClassSortOutcome::Sorted = sort_definition(self) {
            changed = true;
        }
        changed
    }

    fn type_list_indices(&self, r: &ItemRef) -> Vec<u32> {
        r.target()
            .and_then(|h| self.section::<TypeList>()?.item(h))
            .map(|list| list.types.iter().map(|t| self.ref_index(t)).collect())
            .unwrap_or_default()
    }

    // ---- garbage collection

    /// Removes records no class definition reaches. Sections outside the remove order
    /// are roots; string data goes with its string id.
    pub fn clear_unused(&mut self) -> usize {
        self.refresh();
        let mut reachable = HashSet::new();
        let mut pending = Vec::new();
        for section in self.all() {
            let t = section.tag();
            if REMOVE_ORDER.contains(&t) || t == tag::STRING_DATA {
                continue;
            }
            for handle in section.handles() {
                if reachable.insert(handle) {
                    pending.push(handle);
                }
            }
        }
        while let Some(handle) = pending.pop() {
            for (_, r) in self.refs_of(handle) {
                if let Some(target) = r.target() {
                    if reachable.insert(target) {
                        pending.push(target);
                    }
                }
            }
        }
        let mut removed = 0;
        for &t in REMOVE_ORDER.iter().chain(&[tag::STRING_DATA]) {
            let Some(section) = self.get_section_mut(t) else { continue };
            let unused: HashSet<ItemHandle> = section.handles().into_iter().filter(|h| !reachable.contains(h)).collect();
            if unused.is_empty() {
                continue;
            }
            let count = section.remove_handles(&unused);
            debug!("[shrink] removed {count} unused {}", section.section_type().name());
            removed += count;
        }
        if removed > 0 {
            self.invalidate_pools();
        }
        removed
    }

    /// Folds duplicate records into their first occurrence: data records with identical
    /// bytes, id records with equal keys. References to a removed duplicate are moved
    /// to the record kept.
    pub fn clear_duplicate_data(&mut self) -> usize {
        self.refresh();
        let mut replaced: HashMap<ItemHandle, ItemHandle> = HashMap::new();
        for &t in REMOVE_ORDER {
            let Some(section) = self.get_section(t) else { continue };
            let by_offset = section.section_type().addressed_by_offset();
            let mut by_bytes: HashMap<Vec<u8>, ItemHandle> = HashMap::new();
            let mut by_key: HashMap<Key, ItemHandle> = HashMap::new();
            for handle in section.handles() {
                let first = if by_offset {
                    section.item_bytes(handle).map(|b| *by_bytes.entry(b).or_insert(handle))
                } else {
                    section.key_of(handle, self).map(|k| *by_key.entry(k).or_insert(handle))
                };
                if let Some(first) = first.filter(|&f| f != handle) {
                    replaced.insert(handle, first);
                }
            }
        }
        if replaced.is_empty() {
            return 0;
        }
        for section in self.all_mut() {
            section.for_each_ref_mut(&mut |_, r| {
                if let Some(&keep) = r.target().and_then(|t| replaced.get(&t)) {
                    r.set_target(Some(keep));
                }
            });
        }
        let mut by_section: HashMap<u16, HashSet<ItemHandle>> = HashMap::new();
        for &duplicate in replaced.keys() {
            by_section.entry(duplicate.section()).or_default().insert(duplicate);
        }
        let mut removed = 0;
        for (t, handles) in by_section {
            if let Some(section) = self.get_section_mut(t) {
                removed += section.remove_handles(&handles);
            }
        }
        debug!("[shrink] folded {removed} duplicate records");
        self.invalidate_pools();
        self.refresh();
        removed
    }

    /// Drops empty id and data sections. The header and map list always stay.
    pub fn clear_empty_sections(&mut self) -> usize {
        let before = self.sections.len();
        self.sections.retain(|s| !s.is_empty() || s.section_type().is_special());
        self.rebuild_type_map();
        before - self.sections.len()
    }

    /// Repeats unused and duplicate removal until nothing changes, then drops empty
    /// sections. Returns the number of records and sections removed.
    pub fn shrink(&mut self) -> usize {
        let mut result = 0;
        loop {
            let count = self.clear_unused();
            if count == 0 {
                break;
            }
            result += count;
        }
        loop {
            let count = self.clear_duplicate_data();
            if count == 0 {
                break;
            }
            result += count + self.clear_unused();
        }
        result + self.clear_empty_sections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::{ClassData, EncodedMethod};

    fn list_with_class() -> (SectionList, ItemHandle) {
        let mut list = SectionList::default();
        let class = list.get_or_create_class("Lcom/example/Main;");
        let method = list.get_or_create_method(&MethodKey::new(
            "Lcom/example/Main;",
            "run",
            ProtoKey::new("V", &["I", "Ljava/lang/String;"]),
        ));
        let data = list.ensure_section::<ClassData>().add(ClassData {
            virtual_methods: vec![EncodedMethod { method: method.into(), access_flags: 1, code: ItemRef::null_offset() }],
            ..Default::default()
        });
        list.section_mut::<ClassId>().unwrap().item_mut(class).unwrap().class_data = data.into();
        (list, class)
    }

    #[test]
    fn get_or_create_reuses_pooled_records() {
        let (mut list, _) = list_with_class();
        let a = list.get_or_create_string("run");
        let b = list.get_or_create_string("run");
        assert_eq!(a, b);
        assert_eq!(list.section::<StringId>().unwrap().len(), list.section::<StringData>().unwrap().len());
        assert!(list.contains(&"Lcom/example/Main;->run(ILjava/lang/String;)V".parse().unwrap()));
        assert!(list.contains(&Key::Class("Lcom/example/Main;".into())));
        assert!(!list.contains(&Key::Type("Lcom/example/Other;".into())));
        // "(ILjava/lang/String;)V" has shorty VIL
        assert!(list.contains(&Key::String("VIL".into())));
    }

    #[test]
    fn refresh_lays_out_from_the_header_and_fills_the_map() {
        let (mut list, _) = list_with_class();
        list.sort_strings();
        list.refresh();
        let header = list.header().unwrap();
        assert_eq!(header.id_table(tag::STRING_ID).unwrap().offset.get(), 0x70);
        let strings = header.id_table(tag::STRING_ID).unwrap().size.get();
        assert_eq!(strings as usize, list.section::<StringId>().unwrap().len());
        assert_eq!(header.id_table(tag::TYPE_ID).unwrap().offset.get(), 0x70 + strings * 4);
        assert_eq!(header.map_off.get(), list.map_list.offset_cell().get());
        assert_eq!(header.file_size as usize, list.to_bytes().len());
        assert_eq!(header.data_off + header.data_size, header.file_size);

        let map = list.map_list().unwrap();
        assert_eq!(map.items.first().map(|i| i.type_tag), Some(tag::HEADER));
        assert_eq!(map.items.last().map(|i| i.type_tag), Some(tag::MAP_LIST));
        assert!(map.items.windows(2).all(|w| w[0].offset.get() < w[1].offset.get()));
    }

    #[test]
    fn sorted_strings_follow_utf16_order() {
        let mut list = SectionList::default();
        for s in ["b", "\u{FFFD}", "a", "\u{1F600}", "B"] {
            list.get_or_create_string(s);
        }
        assert!(list.sort_strings());
        list.refresh();
        let ids = list.section::<StringId>().unwrap();
        let texts: Vec<String> = ids.iter().filter_map(|id| list.string_data_text(&id.data)).collect();
        // the surrogate pair sorts below U+FFFD in UTF-16
        assert_eq!(texts, vec!["B", "a", "b", "\u{1F600}", "\u{FFFD}"]);
        assert!(!list.sort_strings());
    }

    #[test]
    fn removed_targets_are_nulled_on_refresh() {
        let (mut list, class) = list_with_class();
        list.refresh();
        let data = list.section::<ClassId>().unwrap().item(class).unwrap().class_data.target().unwrap();
        let mut gone = HashSet::new();
        gone.insert(data);
        list.get_section_mut(tag::CLASS_DATA).unwrap().remove_handles(&gone);
        list.refresh();
        let class = list.section::<ClassId>().unwrap().item(class).unwrap();
        assert!(class.class_data.is_null());
        assert_eq!(class.class_data.raw(), 0);
    }

    #[test]
    fn shrink_drops_unreferenced_strings_and_empty_sections() {
        let (mut list, _) = list_with_class();
        list.get_or_create_string("unused");
        list.ensure_section::<crate::dex::AnnotationSet>();
        let removed = list.shrink();
        assert!(removed >= 3, "string id, string data and the empty section");
        assert!(!list.contains(&Key::String("unused".into())));
        assert!(list.contains(&Key::String("run".into())));
        assert!(list.get_section(tag::ANNOTATION_SET).is_none());
    }

    #[test]
    fn duplicate_type_lists_fold_into_one() {
        let mut list = SectionList::default();
        let int = list.get_or_create_type("I");
        let a = list.ensure_section::<TypeList>().add(TypeList { types: vec![int.into()] });
        let b = list.ensure_section::<TypeList>().add(TypeList { types: vec![int.into()] });
        let class = list.get_or_create_class("LA;");
        let other = list.get_or_create_class("LB;");
        list.section_mut::<ClassId>().unwrap().item_mut(class).unwrap().interfaces = a.into();
        list.section_mut::<ClassId>().unwrap().item_mut(other).unwrap().interfaces = b.into();
        assert_eq!(list.clear_duplicate_data(), 1);
        let classes = list.section::<ClassId>().unwrap();
        assert_eq!(classes.item(class).unwrap().interfaces.target(), Some(a));
        assert_eq!(classes.item(other).unwrap().interfaces.target(), Some(a));
    }
}

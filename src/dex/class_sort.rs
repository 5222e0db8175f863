use crate::dex::id_items::ClassId;
use crate::dex::section_list::SectionList;
use crate::dex::section_type::tag;
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClassSortOutcome {
    Sorted,
    Unchanged,
    /// `class` sits on an inheritance cycle; the class definitions keep their order.
    Cyclic { class: String },
}

/// Indices of `classes` (descriptor, supertypes) with every supertype defined in the
/// list placed before its subtypes. Among ready classes the lowest index goes first.
fn definition_order(classes: &[(String, Vec<String>)]) -> Result<Vec<usize>, String> {
    let index: HashMap<&str, usize> = classes.iter().enumerate().map(|(i, (name, _))| (name.as_str(), i)).collect();
    let mut pending = vec![0usize; classes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); classes.len()];
    for (i, (_, supers)) in classes.iter().enumerate() {
        for s in supers {
            match index.get(s.as_str()) {
                Some(&j) if j == i => return Err(classes[i].0.clone()),
                Some(&j) => {
                    pending[i] += 1;
                    dependents[j].push(i);
                }
                None => {}
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..classes.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(classes.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &d in &dependents[next] {
            pending[d] -= 1;
            if pending[d] == 0 {
                ready.insert(d);
            }
        }
    }
    if order.len() < classes.len() {
        let stuck = (0..classes.len()).find(|&i| pending[i] > 0).unwrap_or(0);
        return Err(classes[stuck].0.clone());
    }
    Ok(order)
}

/// Reorders the class definitions so superclasses and interfaces defined in the same
/// file come first, as the runtime verifier requires.
pub fn sort_definition(list: &mut SectionList) -> ClassSortOutcome {
    let Some(classes) = list.section::<ClassId>() else {
        return ClassSortOutcome::Unchanged;
    };
    let hierarchy: Vec<(String, Vec<String>)> = classes
        .iter()
        .map(|class| {
            let name = list.type_descriptor(&class.class_type).unwrap_or_default();
            let mut supers: Vec<String> = list.type_descriptor(&class.superclass).into_iter().collect();
            supers.extend(list.type_list_descriptors(&class.interfaces).unwrap_or_default());
            (name, supers)
        })
        .collect();

    match definition_order(&hierarchy) {
        Err(class) => {
            warn!("[sort] class hierarchy of {class} is cyclic, definitions left unsorted");
            ClassSortOutcome::Cyclic { class }
        }
        Ok(order) if order.iter().enumerate().all(|(i, &o)| i == o) => ClassSortOutcome::Unchanged,
        Ok(order) => {
            debug!("[sort] reordered {} class definitions", order.len());
            list.invalidate_pools();
            match list.get_section_mut(tag::CLASS_ID).map(|section| section.permute(&order)) {
                Some(true) => ClassSortOutcome::Sorted,
                _ => ClassSortOutcome::Unchanged,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::ItemRef;

    fn chain(list: &mut SectionList, class: &str, superclass: &str) {
        let handle = list.get_or_create_class(class);
        let superclass = list.get_or_create_type(superclass);
        list.section_mut::<ClassId>().unwrap().item_mut(handle).unwrap().superclass = ItemRef::to(superclass);
    }

    fn names(list: &SectionList) -> Vec<String> {
        let classes = list.section::<ClassId>().unwrap();
        classes.iter().filter_map(|c| list.type_descriptor(&c.class_type)).collect()
    }

    #[test]
    fn superclasses_are_defined_first() {
        let mut list = SectionList::default();
        chain(&mut list, "LA;", "LB;");
        chain(&mut list, "LB;", "LC;");
        list.get_or_create_class("LC;");
        assert_eq!(sort_definition(&mut list), ClassSortOutcome::Sorted);
        assert_eq!(names(&list), vec!["LC;", "LB;", "LA;"]);
        assert_eq!(sort_definition(&mut list), ClassSortOutcome::Unchanged);
    }

    #[test]
    fn cycles_leave_the_order_alone() {
        let mut list = SectionList::default();
        chain(&mut list, "LA;", "LB;");
        chain(&mut list, "LB;", "LA;");
        list.get_or_create_class("LZ;");
        let outcome = sort_definition(&mut list);
        assert!(matches!(outcome, ClassSortOutcome::Cyclic { .. }));
        assert_eq!(names(&list), vec!["LA;", "LB;", "LZ;"]);
    }

    #[test]
    fn ties_keep_the_current_order() {
        let classes = vec![
            ("LX;".to_string(), vec!["Ljava/lang/Object;".to_string()]),
            ("LY;".to_string(), vec!["LW;".to_string()]),
            ("LW;".to_string(), vec![]),
            ("LV;".to_string(), vec![]),
        ];
        assert_eq!(definition_order(&classes), Ok(vec![0, 2, 1, 3]));
        let looped = vec![("LS;".to_string(), vec!["LS;".to_string()])];
        assert_eq!(definition_order(&looped), Err("LS;".to_string()));
    }
}

//! Class and package views.
//!
//! A method-level tree is re-aggregated so that each node stands for a class
//! (or package). Consecutive frames of the same class collapse into one
//! node: a callee of the same class contributes its self time to the node
//! and its own callees are regrouped alongside. Callees of other classes
//! become child nodes, grouped by class in first-seen order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cct::container::{CctContainer, NodeDraft};
use crate::cct::presentation::{CctTree, MethodNames, NodeData};
use crate::domain::View;
use crate::profiling::methods::MethodInfo;

/// Placeholder package of classes without one
pub const DEFAULT_PACKAGE: &str = "<default>";

/// Name of id 0 in aggregated views
const THREAD_NAME: &str = "Thread";

/// Maps method ids onto class or package ids
///
/// Id 0 is reserved for thread nodes. Other ids are assigned in order of
/// first appearance while walking the method ids in ascending order.
#[derive(Debug, Clone)]
pub struct MethodIdMap {
    view: View,
    /// Aggregated name of each id
    names: Vec<String>,
    ids: HashMap<String, u32>,
    of_method: HashMap<u32, u32>,
}

impl MethodIdMap {
    #[must_use]
    pub fn new(view: View, methods: &MethodNames) -> Self {
        let mut map = Self {
            view,
            names: vec![THREAD_NAME.to_string()],
            ids: HashMap::new(),
            of_method: HashMap::new(),
        };
        for (method, info) in methods.sorted_entries() {
            let name = match view {
                View::Package => package_of(&info.class_name).to_string(),
                View::Class | View::Method => info.class_name.clone(),
            };
            let id = map.intern(name);
            map.of_method.insert(method, id);
        }
        map
    }

    fn intern(&mut self, name: String) -> u32 {
        if let Some(id) = self.ids.get(&name) {
            return *id;
        }
        let id = u32::try_from(self.names.len()).unwrap_or(u32::MAX);
        self.ids.insert(name.clone(), id);
        self.names.push(name);
        id
    }

    #[must_use]
    pub fn view(&self) -> View {
        self.view
    }

    /// Class or package id of a method id; 0 for unknown methods
    #[must_use]
    pub fn target_of(&self, method: u32) -> u32 {
        self.of_method.get(&method).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Display names of the aggregated ids
    #[must_use]
    pub fn to_names(&self) -> MethodNames {
        let mut names = MethodNames::new();
        for (id, name) in self.names.iter().enumerate().skip(1) {
            let id = u32::try_from(id).unwrap_or(u32::MAX);
            names.insert(id, MethodInfo::new(name.clone(), "", ""));
        }
        names
    }
}

/// Package part of a fully qualified class name
#[must_use]
pub fn package_of(class_name: &str) -> &str {
    class_name
        .rfind('.')
        .map_or(DEFAULT_PACKAGE, |i| &class_name[..i])
}

/// Re-aggregate a method-view container into the view of `map`
#[must_use]
pub fn aggregate(source: &CctContainer, map: &MethodIdMap, names: Arc<MethodNames>) -> CctContainer {
    let root = source.root_index();
    let mut drafts = vec![NodeDraft {
        data: NodeData {
            self_time: [0; 2],
            total_time: [0; 2],
            ..source.node_data(root).clone()
        },
        children: Vec::new(),
    }];

    // (draft, source members, class of the draft or None for the root)
    let mut work: Vec<(usize, Vec<usize>, Option<u32>)> = vec![(0, vec![root], None)];
    while let Some((target, sources, class)) = work.pop() {
        let initial = sources.len();
        let mut members = sources;
        let mut groups: Vec<(u32, Vec<usize>)> = Vec::new();

        let mut i = 0;
        while i < members.len() {
            let member = members[i];
            let data = source.node_data(member);
            if target != 0 {
                let draft = &mut drafts[target].data;
                draft.self_time[0] += data.self_time[0];
                draft.self_time[1] += data.self_time[1];
                draft.wait_time0 += data.wait_time0;
                draft.sleep_time0 += data.sleep_time0;
                if i < initial {
                    draft.n_calls = draft.n_calls.saturating_add(data.n_calls);
                }
            }

            for child in source.child_indices(member) {
                let child = *child as usize;
                let child_class = map.target_of(source.node_data(child).id);
                if class == Some(child_class) {
                    members.push(child);
                } else {
                    match groups.iter_mut().find(|(c, _)| *c == child_class) {
                        Some((_, group)) => group.push(child),
                        None => groups.push((child_class, vec![child])),
                    }
                }
            }
            i += 1;
        }

        // Reverse so that groups are expanded in first-seen order
        let mut pending = Vec::with_capacity(groups.len());
        for (child_class, group) in groups {
            let idx = drafts.len();
            drafts.push(NodeDraft {
                data: NodeData {
                    id: child_class,
                    ..NodeData::default()
                },
                children: Vec::new(),
            });
            drafts[target].children.push(idx);
            pending.push((idx, group, Some(child_class)));
        }
        work.extend(pending.into_iter().rev());
    }

    let mut shell = source.shell().clone();
    shell.view = map.view();
    shell.names = names;
    CctContainer::assemble(drafts, shell)
}

//! Immutable CPU results snapshot.
//!
//! Holds the frozen method-view containers of every thread. Class and
//! package views are derived lazily, once, on first use. A snapshot can be
//! shared between threads.

use std::sync::{Arc, OnceLock};

use crate::cct::class_view::{aggregate, MethodIdMap};
use crate::cct::container::CctContainer;
use crate::cct::flat_profile::FlatProfileContainer;
use crate::cct::presentation::{CctTree, FreeTree, MethodNames};
use crate::cct::reverse::build_reverse_tree;
use crate::domain::{NoDataAvailable, ThreadId, View};
use crate::profiling::methods::MethodInfo;

#[derive(Debug)]
struct ViewData {
    names: Arc<MethodNames>,
    threads: Vec<Arc<CctContainer>>,
    all_threads: OnceLock<Arc<CctContainer>>,
}

impl ViewData {
    fn new(names: Arc<MethodNames>, threads: Vec<Arc<CctContainer>>) -> Self {
        Self {
            names,
            threads,
            all_threads: OnceLock::new(),
        }
    }
}

#[derive(Debug)]
pub struct CpuResultsSnapshot {
    begin_time: i64,
    time_taken: i64,
    collecting_two_timestamps: bool,
    thread_names: Arc<Vec<(ThreadId, String)>>,
    views: [OnceLock<ViewData>; 3],
}

impl CpuResultsSnapshot {
    /// Wrap the method-view containers produced by a builder
    ///
    /// # Errors
    ///
    /// [`NoDataAvailable`] if `containers` is empty.
    pub fn new(begin_time: i64, time_taken: i64, containers: Vec<CctContainer>) -> Result<Self, NoDataAvailable> {
        let first = containers.first().ok_or(NoDataAvailable)?;
        let names = Arc::clone(first.names_arc());
        let collecting_two_timestamps = first.collecting_two_timestamps();
        let thread_names: Vec<(ThreadId, String)> = containers
            .iter()
            .filter_map(|c| c.thread_id().map(|t| (t, c.thread_name().to_string())))
            .collect();

        let method_view = ViewData::new(names, containers.into_iter().map(Arc::new).collect());
        let views = [OnceLock::new(), OnceLock::new(), OnceLock::new()];
        let _ = views[View::Method.index()].set(method_view);

        Ok(Self {
            begin_time,
            time_taken,
            collecting_two_timestamps,
            thread_names: Arc::new(thread_names),
            views,
        })
    }

    fn view_data(&self, view: View) -> &ViewData {
        self.views[view.index()].get_or_init(|| {
            let method = self.method_view();
            let map = MethodIdMap::new(view, &method.names);
            let names = Arc::new(map.to_names());
            let threads = method
                .threads
                .iter()
                .map(|c| Arc::new(aggregate(c, &map, Arc::clone(&names))))
                .collect();
            ViewData::new(names, threads)
        })
    }

    fn method_view(&self) -> &ViewData {
        // Set in the constructor
        self.views[View::Method.index()].get_or_init(|| ViewData::new(Arc::new(MethodNames::new()), Vec::new()))
    }

    #[must_use]
    pub fn begin_time(&self) -> i64 {
        self.begin_time
    }

    #[must_use]
    pub fn time_taken(&self) -> i64 {
        self.time_taken
    }

    #[must_use]
    pub fn collecting_two_timestamps(&self) -> bool {
        self.collecting_two_timestamps
    }

    #[must_use]
    pub fn n_threads(&self) -> usize {
        self.thread_names.len()
    }

    /// (id, name) of every thread with data, in id order
    #[must_use]
    pub fn threads(&self) -> &[(ThreadId, String)] {
        &self.thread_names
    }

    #[must_use]
    pub fn thread_name(&self, thread: ThreadId) -> Option<&str> {
        self.thread_names
            .iter()
            .find(|(t, _)| *t == thread)
            .map(|(_, n)| n.as_str())
    }

    /// First thread carrying `name`
    #[must_use]
    pub fn thread_by_name(&self, name: &str) -> Option<ThreadId> {
        self.thread_names.iter().find(|(_, n)| n == name).map(|(t, _)| *t)
    }

    #[must_use]
    pub fn names(&self, view: View) -> Arc<MethodNames> {
        Arc::clone(&self.view_data(view).names)
    }

    #[must_use]
    pub fn container_for_thread(&self, thread: ThreadId, view: View) -> Option<Arc<CctContainer>> {
        self.view_data(view)
            .threads
            .iter()
            .find(|c| c.thread_id() == Some(thread))
            .cloned()
    }

    /// All threads merged under one root
    #[must_use]
    pub fn all_threads_container(&self, view: View) -> Arc<CctContainer> {
        let data = self.view_data(view);
        Arc::clone(data.all_threads.get_or_init(|| {
            let refs: Vec<&CctContainer> = data.threads.iter().map(AsRef::as_ref).collect();
            Arc::new(CctContainer::merge_threads(&refs, view, Arc::clone(&data.names)))
        }))
    }

    /// Root for presentation: one thread's own tree, or a merge of the
    /// selected threads (all threads when `threads` is None)
    #[must_use]
    pub fn root_container(&self, view: View, threads: Option<&[ThreadId]>) -> Arc<CctContainer> {
        match threads {
            None => self.all_threads_container(view),
            Some([single]) => self
                .container_for_thread(*single, view)
                .unwrap_or_else(|| Arc::new(self.merge_selected(view, &[]))),
            Some(selected) => Arc::new(self.merge_selected(view, selected)),
        }
    }

    fn merge_selected(&self, view: View, selected: &[ThreadId]) -> CctContainer {
        let data = self.view_data(view);
        let refs: Vec<&CctContainer> = data
            .threads
            .iter()
            .filter(|c| c.thread_id().is_some_and(|t| selected.contains(&t)))
            .map(AsRef::as_ref)
            .collect();
        CctContainer::merge_threads(&refs, view, Arc::clone(&data.names))
    }

    /// Callers of `id` (a method, class or package id per `view`)
    #[must_use]
    pub fn reverse_cct(&self, thread: Option<ThreadId>, id: u32, view: View) -> Option<FreeTree> {
        let tree = match thread {
            Some(t) => self.container_for_thread(t, view)?,
            None => self.all_threads_container(view),
        };
        build_reverse_tree(tree.as_ref(), id, Arc::clone(&self.thread_names))
    }

    /// Flat profile of one thread or of all threads
    #[must_use]
    pub fn flat_profile(&self, thread: Option<ThreadId>, view: View) -> FlatProfileContainer {
        let data = self.view_data(view);
        let trees: Vec<&dyn CctTree> = data
            .threads
            .iter()
            .filter(|c| thread.is_none() || c.thread_id() == thread)
            .map(|c| c.as_ref() as &dyn CctTree)
            .collect();
        FlatProfileContainer::from_trees(&trees)
    }

    /// Class name, method name and signature behind an id of `view`
    #[must_use]
    pub fn method_class_name_and_sig(&self, id: u32, view: View) -> Option<MethodInfo> {
        self.view_data(view).names.info(id).cloned()
    }

    /// Id of the method (class, package) displayed as `name`
    #[must_use]
    pub fn find_id_by_name(&self, name: &str, view: View) -> Option<u32> {
        self.view_data(view)
            .names
            .sorted_entries()
            .into_iter()
            .find(|(id, _)| self.view_data(view).names.display_name(*id, view) == name)
            .map(|(id, _)| id)
    }
}

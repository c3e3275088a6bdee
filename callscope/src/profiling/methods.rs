//! Method identity lookup.
//!
//! Trees store bare [`MethodId`]s; human-readable names are resolved through
//! a [`MethodInfoMapper`] supplied by the host. The host's tables may grow
//! while results are being built, so lookups are bracketed by
//! `lock`/`unlock` (see [`MapperLock`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::domain::MethodId;

/// Class, method name and signature of one instrumented method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodInfo {
    pub class_name: String,
    pub method_name: String,
    #[serde(default)]
    pub signature: String,
}

impl MethodInfo {
    #[must_use]
    pub fn new(
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into().replace('/', "."),
            method_name: method_name.into(),
            signature: signature.into(),
        }
    }

    /// `pkg.Class.method(sig)`; an empty signature renders as `()`
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.signature.is_empty() {
            format!("{}.{}()", self.class_name, self.method_name)
        } else {
            format!("{}.{}{}", self.class_name, self.method_name, self.signature)
        }
    }
}

/// Host-provided method table
pub trait MethodInfoMapper: Send + Sync {
    fn method_info(&self, id: MethodId) -> Option<MethodInfo>;

    /// Highest id currently known
    fn max_method_id(&self) -> u32;

    /// Called before a batch of lookups
    fn lock(&self, _mutable: bool) {}

    /// Called after a batch of lookups
    fn unlock(&self) {}

    /// Display name with a placeholder for unknown ids
    fn method_name(&self, id: MethodId) -> String {
        self.method_info(id)
            .map_or_else(|| format!("<unknown method #{}>", id.0), |m| m.display_name())
    }

    /// Declaring class with a placeholder for unknown ids
    fn class_name(&self, id: MethodId) -> String {
        self.method_info(id)
            .map_or_else(|| format!("<unknown class #{}>", id.0), |m| m.class_name)
    }
}

/// Scoped `lock`/`unlock` around mapper reads
pub struct MapperLock<'a> {
    mapper: &'a dyn MethodInfoMapper,
}

impl<'a> MapperLock<'a> {
    #[must_use]
    pub fn new(mapper: &'a dyn MethodInfoMapper, mutable: bool) -> Self {
        mapper.lock(mutable);
        Self { mapper }
    }
}

impl Drop for MapperLock<'_> {
    fn drop(&mut self) {
        self.mapper.unlock();
    }
}

#[derive(Debug, Default)]
struct MethodTableInner {
    /// Slot `i` holds method id `i + 1`
    infos: Vec<Option<MethodInfo>>,
    index: HashMap<MethodInfo, MethodId>,
}

/// In-memory [`MethodInfoMapper`] with id assignment on first sight
///
/// Used by stack sampling (methods are discovered from frames) and by
/// recordings that ship their own method table.
#[derive(Debug, Default)]
pub struct MethodTable {
    inner: RwLock<MethodTableInner>,
}

impl MethodTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `info`, assigning the next free one if unseen
    pub fn register(&self, info: MethodInfo) -> MethodId {
        if let Some(id) = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .get(&info)
        {
            return *id;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = inner.index.get(&info) {
            return *id;
        }
        let id = MethodId(u32::try_from(inner.infos.len() + 1).unwrap_or(u32::MAX));
        inner.infos.push(Some(info.clone()));
        inner.index.insert(info, id);
        id
    }

    /// Store `info` under a fixed id (recordings with host-assigned ids)
    pub fn insert(&self, id: MethodId, info: MethodInfo) {
        if id == MethodId::THREAD {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let slot = id.index() - 1;
        if inner.infos.len() <= slot {
            inner.infos.resize(slot + 1, None);
        }
        inner.infos[slot] = Some(info.clone());
        inner.index.insert(info, id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registered (id, info) pair in id order
    #[must_use]
    pub fn entries(&self) -> Vec<(MethodId, MethodInfo)> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .infos
            .iter()
            .enumerate()
            .filter_map(|(i, info)| {
                let id = MethodId(u32::try_from(i + 1).ok()?);
                info.clone().map(|info| (id, info))
            })
            .collect()
    }
}

impl MethodInfoMapper for MethodTable {
    fn method_info(&self, id: MethodId) -> Option<MethodInfo> {
        if id == MethodId::THREAD {
            return None;
        }
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.infos.get(id.index() - 1).cloned().flatten()
    }

    fn max_method_id(&self) -> u32 {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        u32::try_from(inner.infos.len()).unwrap_or(u32::MAX)
    }
}

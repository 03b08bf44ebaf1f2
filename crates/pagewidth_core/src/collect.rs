use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::debug;

use crate::api::{Block, NotionApi, Workspace};

#[derive(Debug, Clone, Default)]
pub struct PageSet {
    pages: Vec<Block>,
    ids: HashSet<String>,
}

impl PageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, page: Block) -> bool {
        if !self.ids.insert(page.id.clone()) {
            return false;
        }
        self.pages.push(page);
        true
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, page_id: &str) -> bool {
        self.ids.contains(page_id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.pages.iter()
    }
}

impl<'a> IntoIterator for &'a PageSet {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Block> for PageSet {
    fn from_iter<I: IntoIterator<Item = Block>>(iter: I) -> Self {
        let mut set = Self::new();
        for page in iter {
            set.insert(page);
        }
        set
    }
}

/// Roots are kept whatever their block type; below them only `page` blocks
/// are recorded. Each id is expanded at most once.
pub fn collect_pages<A: NotionApi>(api: &mut A, workspace: &Workspace) -> Result<PageSet> {
    let roots = api
        .get_root_pages(workspace)
        .with_context(|| format!("failed to fetch root pages of workspace {}", workspace.name))?;
    debug!(workspace = %workspace.id, roots = roots.len(), "collecting pages");

    let mut pages = PageSet::new();
    let mut expanded = HashSet::new();
    let mut stack: Vec<Block> = roots.into_iter().rev().collect();

    while let Some(page) = stack.pop() {
        if !expanded.insert(page.id.clone()) {
            debug!(page = %page.id, "skipping already expanded page");
            continue;
        }

        debug!(page = %page.id, parent = ?page.parent_id, "expanding page");
        let children = api
            .get_children(&page)
            .with_context(|| format!("failed to fetch children of page {}", page.id))?;
        let child_pages = children
            .into_iter()
            .filter(|child| child.is_page() && !expanded.contains(&child.id))
            .collect::<Vec<_>>();

        pages.insert(page);
        stack.extend(child_pages.into_iter().rev());
    }

    debug!(pages = pages.len(), requests = api.request_count(), "page collection finished");
    Ok(pages)
}

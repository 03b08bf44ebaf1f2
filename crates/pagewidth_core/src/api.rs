use anyhow::Result;
use thiserror::Error;

/// Error phrases Notion returns when the session user may read a page but not edit it.
pub const ACCESS_DENIED_SIGNATURES: &[&str] = &[
    "User does not have edit access to record",
    "Not allowed to edit column: format",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Page,
    Other,
}

impl BlockKind {
    pub fn from_wire(value: &str) -> Self {
        if value == "page" {
            Self::Page
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
    pub parent_id: Option<String>,
    pub title: Option<String>,
    pub child_ids: Vec<String>,
}

impl Block {
    pub fn is_page(&self) -> bool {
        self.kind == BlockKind::Page
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => "<untitled>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub root_page_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationErrorReason {
    AccessDenied,
    Other,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct MutationError {
    pub reason: MutationErrorReason,
    pub message: String,
}

impl MutationError {
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let reason = if ACCESS_DENIED_SIGNATURES
            .iter()
            .any(|signature| message.contains(signature))
        {
            MutationErrorReason::AccessDenied
        } else {
            MutationErrorReason::Other
        };
        Self { reason, message }
    }

    pub fn is_access_denied(&self) -> bool {
        self.reason == MutationErrorReason::AccessDenied
    }
}

pub trait NotionApi {
    fn resolve_user_id(&mut self, email: &str) -> Result<String>;
    /// Workspaces the user is a full member of; guest-only workspaces are excluded.
    fn list_workspaces(&mut self, user_id: &str) -> Result<Vec<Workspace>>;
    fn get_root_pages(&mut self, workspace: &Workspace) -> Result<Vec<Block>>;
    fn get_children(&mut self, page: &Block) -> Result<Vec<Block>>;
    fn set_full_width(&mut self, page_id: &str, full_width: bool) -> Result<(), MutationError>;
    fn request_count(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::BTreeMap;

    use super::{Block, BlockKind, MutationError, NotionApi, Workspace};

    #[derive(Default)]
    pub(crate) struct MockApi {
        pub(crate) users: BTreeMap<String, String>,
        pub(crate) workspaces: Vec<Workspace>,
        pub(crate) blocks: BTreeMap<String, Block>,
        pub(crate) failing_children: Vec<String>,
        pub(crate) mutation_errors: BTreeMap<String, String>,
        pub(crate) children_requests: Vec<String>,
        pub(crate) mutations: Vec<(String, bool)>,
        pub(crate) request_count: usize,
    }

    impl MockApi {
        pub(crate) fn add_page(&mut self, id: &str, parent: Option<&str>, children: &[&str]) {
            self.add_block(id, BlockKind::Page, parent, children);
        }

        pub(crate) fn add_text(&mut self, id: &str, parent: &str) {
            self.add_block(id, BlockKind::Other, Some(parent), &[]);
        }

        fn add_block(&mut self, id: &str, kind: BlockKind, parent: Option<&str>, children: &[&str]) {
            self.blocks.insert(
                id.to_string(),
                Block {
                    id: id.to_string(),
                    kind,
                    parent_id: parent.map(ToString::to_string),
                    title: Some(format!("Title {id}")),
                    child_ids: children.iter().map(ToString::to_string).collect(),
                },
            );
        }

        pub(crate) fn workspace(&self, roots: &[&str]) -> Workspace {
            Workspace {
                id: "space-1".to_string(),
                name: "Team".to_string(),
                root_page_ids: roots.iter().map(ToString::to_string).collect(),
            }
        }

        fn lookup(&self, ids: &[String]) -> Vec<Block> {
            ids.iter()
                .filter_map(|id| self.blocks.get(id).cloned())
                .collect()
        }
    }

    impl NotionApi for MockApi {
        fn resolve_user_id(&mut self, email: &str) -> anyhow::Result<String> {
            self.request_count += 1;
            self.users
                .get(email)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown user {email}"))
        }

        fn list_workspaces(&mut self, _user_id: &str) -> anyhow::Result<Vec<Workspace>> {
            self.request_count += 1;
            Ok(self.workspaces.clone())
        }

        fn get_root_pages(&mut self, workspace: &Workspace) -> anyhow::Result<Vec<Block>> {
            self.request_count += 1;
            Ok(self.lookup(&workspace.root_page_ids))
        }

        fn get_children(&mut self, page: &Block) -> anyhow::Result<Vec<Block>> {
            self.request_count += 1;
            self.children_requests.push(page.id.clone());
            if self.failing_children.contains(&page.id) {
                anyhow::bail!("Notion API request failed with HTTP 401 Unauthorized");
            }
            let current = self
                .blocks
                .get(&page.id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing block {}", page.id))?;
            Ok(self.lookup(&current.child_ids))
        }

        fn set_full_width(&mut self, page_id: &str, full_width: bool) -> Result<(), MutationError> {
            self.request_count += 1;
            if let Some(message) = self.mutation_errors.get(page_id) {
                return Err(MutationError::classify(message.clone()));
            }
            self.mutations.push((page_id.to_string(), full_width));
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockKind, MutationError, MutationErrorReason};

    #[test]
    fn classify_matches_known_signatures_by_substring() {
        let error = MutationError::classify(
            "Notion API error [HTTP 400] ValidationError: User does not have edit access to record",
        );
        assert_eq!(error.reason, MutationErrorReason::AccessDenied);

        let error = MutationError::classify("Not allowed to edit column: format");
        assert!(error.is_access_denied());
    }

    #[test]
    fn classify_treats_unrecognized_text_as_other() {
        let error = MutationError::classify("Internal Server Error");
        assert_eq!(error.reason, MutationErrorReason::Other);
        assert_eq!(error.to_string(), "Internal Server Error");

        let error = MutationError::classify("user does not have edit access to record");
        assert_eq!(error.reason, MutationErrorReason::Other);
    }

    #[test]
    fn block_kind_only_recognizes_plain_pages() {
        assert_eq!(BlockKind::from_wire("page"), BlockKind::Page);
        assert_eq!(BlockKind::from_wire("collection_view_page"), BlockKind::Other);
        assert_eq!(BlockKind::from_wire("text"), BlockKind::Other);
    }
}

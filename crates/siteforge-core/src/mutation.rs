//! Structural edits on a component tree
//!
//! Every operation takes `&self` and returns a new tree, so a failed edit
//! leaves the caller holding the unmodified prior tree. Index arguments are
//! clamped to the valid range rather than rejected.

use serde::{Deserialize, Serialize};

use crate::component::{ComponentId, NewComponent, PropsPatch};
use crate::tree::{ComponentTree, MAX_DEPTH, Node};
use crate::{Error, Result};

/// Map a parent reference from a payload to an arena parent, treating the
/// reserved `root` id as the page root.
fn parent_ref(parent: Option<&ComponentId>) -> Option<&ComponentId> {
    parent.filter(|p| !p.is_root())
}

impl ComponentTree {
    /// Insert `component` (and any nested children) under `parent` at `index`.
    ///
    /// Components without an id get a freshly generated one. Returns the new
    /// tree and the id of the inserted component.
    ///
    /// # Errors
    /// - `Error::ParentNotFound` if `parent` is not in the tree
    /// - `Error::DuplicateId` if any submitted id already exists in the tree
    ///   or repeats inside the submitted subtree
    /// - `Error::RootNotAddressable` if a submitted component uses the root id
    /// - `Error::DepthExceeded` if the result would nest deeper than [`MAX_DEPTH`]
    pub fn insert(
        &self,
        parent: Option<&ComponentId>,
        component: NewComponent,
        index: usize,
    ) -> Result<(ComponentTree, ComponentId)> {
        let parent = parent_ref(parent);
        let parent_depth = match parent {
            None => 0,
            Some(p) if self.contains(p) => self.depth_of(p)?,
            Some(p) => return Err(Error::ParentNotFound(p.to_string())),
        };

        let mut staged = Vec::new();
        let id = self.stage(component, parent.cloned(), 1, parent_depth, &mut staged)?;

        let mut next = self.clone();
        for node in staged {
            next.nodes.insert(node.id.clone(), node);
        }
        let siblings = next
            .children_mut(parent)
            .ok_or_else(|| Error::ParentNotFound(format!("{:?}", parent)))?;
        let at = index.min(siblings.len());
        siblings.insert(at, id.clone());

        Ok((next, id))
    }

    /// Flatten a submitted subtree into arena nodes, assigning ids and
    /// checking uniqueness and depth without touching `self`.
    fn stage(
        &self,
        component: NewComponent,
        parent: Option<ComponentId>,
        level: usize,
        base_depth: usize,
        staged: &mut Vec<Node>,
    ) -> Result<ComponentId> {
        if base_depth + level > MAX_DEPTH {
            return Err(Error::DepthExceeded { limit: MAX_DEPTH });
        }

        let id = component.id.unwrap_or_else(ComponentId::generate);
        if id.is_root() {
            return Err(Error::RootNotAddressable(id.to_string()));
        }
        if self.contains(&id) || staged.iter().any(|n| n.id == id) {
            return Err(Error::DuplicateId(id.to_string()));
        }

        let slot = staged.len();
        staged.push(Node {
            id: id.clone(),
            kind: component.kind,
            props: component.props,
            parent,
            children: Vec::new(),
        });

        let mut children = Vec::with_capacity(component.children.len());
        for child in component.children {
            children.push(self.stage(child, Some(id.clone()), level + 1, base_depth, staged)?);
        }
        staged[slot].children = children;

        Ok(id)
    }

    /// Merge `patch` into the properties of `id`. Children and order are
    /// untouched; an empty patch yields a tree equal to `self`.
    ///
    /// # Errors
    /// - `Error::RootNotAddressable` if `id` is the root id
    /// - `Error::ComponentNotFound` if `id` is not in the tree
    pub fn update(&self, id: &ComponentId, patch: &PropsPatch) -> Result<ComponentTree> {
        if id.is_root() {
            return Err(Error::RootNotAddressable(id.to_string()));
        }
        if !self.contains(id) {
            return Err(Error::ComponentNotFound(id.to_string()));
        }

        let mut next = self.clone();
        if let Some(node) = next.nodes.get_mut(id) {
            patch.apply_to(&mut node.props);
        }
        Ok(next)
    }

    /// Relocate `id` and its subtree under `new_parent` at `index`.
    ///
    /// `index` is interpreted against the new parent's children after `id` has
    /// been detached, so moving within the same parent places the component at
    /// exactly that position.
    ///
    /// # Errors
    /// - `Error::RootNotAddressable` if `id` is the root id
    /// - `Error::ComponentNotFound` if `id` is not in the tree
    /// - `Error::ParentNotFound` if `new_parent` is not in the tree
    /// - `Error::CycleDetected` if `new_parent` is `id` or one of its descendants
    /// - `Error::DepthExceeded` if the moved subtree would nest too deep
    pub fn move_component(
        &self,
        id: &ComponentId,
        new_parent: Option<&ComponentId>,
        index: usize,
    ) -> Result<ComponentTree> {
        if id.is_root() {
            return Err(Error::RootNotAddressable(id.to_string()));
        }
        if !self.contains(id) {
            return Err(Error::ComponentNotFound(id.to_string()));
        }

        let new_parent = parent_ref(new_parent);
        let parent_depth = match new_parent {
            None => 0,
            Some(p) if !self.contains(p) => return Err(Error::ParentNotFound(p.to_string())),
            Some(p) if self.is_in_subtree(p, id) => {
                return Err(Error::CycleDetected {
                    component: id.to_string(),
                    target: p.to_string(),
                });
            }
            Some(p) => self.depth_of(p)?,
        };
        if parent_depth + self.height_of(id) > MAX_DEPTH {
            return Err(Error::DepthExceeded { limit: MAX_DEPTH });
        }

        let mut next = self.clone();
        next.detach(id)?;

        let siblings = next
            .children_mut(new_parent)
            .ok_or_else(|| Error::ParentNotFound(format!("{:?}", new_parent)))?;
        let at = index.min(siblings.len());
        siblings.insert(at, id.clone());
        if let Some(node) = next.nodes.get_mut(id) {
            node.parent = new_parent.cloned();
        }

        Ok(next)
    }

    /// Delete `id` and its entire subtree.
    ///
    /// # Errors
    /// - `Error::RootNotAddressable` if `id` is the root id
    /// - `Error::ComponentNotFound` if `id` is not in the tree
    pub fn remove(&self, id: &ComponentId) -> Result<ComponentTree> {
        if id.is_root() {
            return Err(Error::RootNotAddressable(id.to_string()));
        }
        if !self.contains(id) {
            return Err(Error::ComponentNotFound(id.to_string()));
        }

        let mut next = self.clone();
        next.detach(id)?;
        for gone in self.subtree_ids(id) {
            next.nodes.remove(&gone);
        }
        Ok(next)
    }

    /// Unlink `id` from its parent's child list, closing the gap.
    fn detach(&mut self, id: &ComponentId) -> Result<()> {
        let parent = self
            .nodes
            .get(id)
            .ok_or_else(|| Error::ComponentNotFound(id.to_string()))?
            .parent
            .clone();
        let siblings = self
            .children_mut(parent.as_ref())
            .ok_or_else(|| Error::ParentNotFound(format!("{:?}", parent)))?;
        siblings.retain(|c| c != id);
        Ok(())
    }

    /// Apply a mutation payload.
    pub fn apply(&self, mutation: &Mutation) -> Result<Applied> {
        match mutation {
            Mutation::Insert {
                parent,
                component,
                index,
            } => {
                let (tree, id) = self.insert(parent.as_ref(), component.clone(), *index)?;
                Ok(Applied {
                    tree,
                    affected: Some(id),
                })
            }
            Mutation::Update { id, props } => Ok(Applied {
                tree: self.update(id, props)?,
                affected: Some(id.clone()),
            }),
            Mutation::Move { id, parent, index } => Ok(Applied {
                tree: self.move_component(id, parent.as_ref(), *index)?,
                affected: Some(id.clone()),
            }),
            Mutation::Remove { id } => {
                let former_parent = self.parent_of(id).ok().flatten().cloned();
                Ok(Applied {
                    tree: self.remove(id)?,
                    affected: former_parent,
                })
            }
        }
    }
}

/// A structural edit as submitted by the editing client.
///
/// A `parent` of `null` (or the reserved id `"root"`) targets the page root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Insert {
        #[serde(default)]
        parent: Option<ComponentId>,
        component: NewComponent,
        #[serde(default)]
        index: usize,
    },
    Update {
        id: ComponentId,
        #[serde(default)]
        props: PropsPatch,
    },
    Move {
        id: ComponentId,
        #[serde(default)]
        parent: Option<ComponentId>,
        #[serde(default)]
        index: usize,
    },
    Remove {
        id: ComponentId,
    },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Insert { .. } => "insert",
            Mutation::Update { .. } => "update",
            Mutation::Move { .. } => "move",
            Mutation::Remove { .. } => "remove",
        }
    }
}

/// Result of applying a [`Mutation`].
#[derive(Debug, Clone)]
pub struct Applied {
    pub tree: ComponentTree,
    /// The component whose rendered subtree changed: the inserted, updated or
    /// moved component, or the former parent of a removed one (`None` when
    /// the change happened directly under the page root).
    pub affected: Option<ComponentId>,
}

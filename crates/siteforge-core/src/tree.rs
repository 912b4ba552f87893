//! Arena representation of a page's component tree
//!
//! Components are stored in a map keyed by id, each holding the ordered list
//! of its child ids and a non-owning link to its parent. Sibling order is the
//! position in that list, so externally visible `order` values are always
//! `0..n-1`. Cycle and depth checks walk parent links by id.
//!
//! The tree serializes as the nested wire format (`Vec<Component>` of the
//! root's children).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::component::{Component, ComponentId, ComponentKind, Props};
use crate::{Error, Result};

/// Maximum nesting depth of a component tree. Root-level components are at
/// depth 1.
pub const MAX_DEPTH: usize = 32;

/// Address of a component: the chain of ids from a root-level component down
/// to the component itself.
pub type ComponentPath = Vec<ComponentId>;

/// A component stored in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) id: ComponentId,
    pub(crate) kind: ComponentKind,
    pub(crate) props: Props,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) children: Vec<ComponentId>,
}

impl Node {
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    /// Parent id, `None` for root-level components.
    pub fn parent(&self) -> Option<&ComponentId> {
        self.parent.as_ref()
    }

    /// Child ids in render order.
    pub fn children(&self) -> &[ComponentId] {
        &self.children
    }
}

/// A page's component tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Component>", into = "Vec<Component>")]
pub struct ComponentTree {
    pub(crate) nodes: HashMap<ComponentId, Node>,
    pub(crate) roots: Vec<ComponentId>,
}

impl ComponentTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of components in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &ComponentId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Ids of the root-level components in order.
    pub fn root_children(&self) -> &[ComponentId] {
        &self.roots
    }

    /// Ordered child ids of `parent` (`None` for the page root).
    ///
    /// # Errors
    /// - `Error::ParentNotFound` if `parent` is not in the tree
    pub fn children_of(&self, parent: Option<&ComponentId>) -> Result<&[ComponentId]> {
        match parent {
            None => Ok(&self.roots),
            Some(id) => self
                .nodes
                .get(id)
                .map(|n| n.children.as_slice())
                .ok_or_else(|| Error::ParentNotFound(id.to_string())),
        }
    }

    pub(crate) fn children_mut(
        &mut self,
        parent: Option<&ComponentId>,
    ) -> Option<&mut Vec<ComponentId>> {
        match parent {
            None => Some(&mut self.roots),
            Some(id) => self.nodes.get_mut(id).map(|n| &mut n.children),
        }
    }

    /// Parent of `id`, `Ok(None)` when it sits directly under the page root.
    ///
    /// # Errors
    /// - `Error::ComponentNotFound` if `id` is not in the tree
    pub fn parent_of(&self, id: &ComponentId) -> Result<Option<&ComponentId>> {
        self.nodes
            .get(id)
            .map(|n| n.parent.as_ref())
            .ok_or_else(|| Error::ComponentNotFound(id.to_string()))
    }

    /// Position of `id` among its siblings, which is also its `order`.
    pub fn index_of(&self, id: &ComponentId) -> Option<usize> {
        let parent = self.nodes.get(id)?.parent.as_ref();
        self.children_of(parent).ok()?.iter().position(|c| c == id)
    }

    /// Depth of `id` (root-level components have depth 1).
    ///
    /// # Errors
    /// - `Error::ComponentNotFound` if `id` is not in the tree
    pub fn depth_of(&self, id: &ComponentId) -> Result<usize> {
        Ok(self.path_to(id)?.len())
    }

    /// Id chain from the root-level ancestor of `id` down to `id`.
    ///
    /// # Errors
    /// - `Error::ComponentNotFound` if `id` is not in the tree
    pub fn path_to(&self, id: &ComponentId) -> Result<ComponentPath> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let node = self
                .nodes
                .get(cur)
                .ok_or_else(|| Error::ComponentNotFound(cur.to_string()))?;
            path.push(node.id.clone());
            if path.len() > MAX_DEPTH {
                return Err(Error::DepthExceeded { limit: MAX_DEPTH });
            }
            current = node.parent.as_ref();
        }
        path.reverse();
        Ok(path)
    }

    /// Whether `candidate` lies in the subtree rooted at `ancestor`
    /// (a component counts as part of its own subtree).
    pub fn is_in_subtree(&self, candidate: &ComponentId, ancestor: &ComponentId) -> bool {
        let mut current = Some(candidate);
        let mut steps = 0;
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            steps += 1;
            if steps > MAX_DEPTH {
                return false;
            }
            current = self.nodes.get(cur).and_then(|n| n.parent.as_ref());
        }
        false
    }

    /// Number of levels in the subtree rooted at `id` (a leaf has height 1).
    pub(crate) fn height_of(&self, id: &ComponentId) -> usize {
        let mut max = 0;
        let mut stack = vec![(id, 1usize)];
        while let Some((cur, level)) = stack.pop() {
            max = max.max(level);
            if let Some(node) = self.nodes.get(cur) {
                stack.extend(node.children.iter().map(|c| (c, level + 1)));
            }
        }
        max
    }

    /// Ids in the subtree rooted at `id`, pre-order.
    pub(crate) fn subtree_ids(&self, id: &ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur.clone());
            if let Some(node) = self.nodes.get(cur) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Depth-first, pre-order traversal of the whole tree.
    pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        let mut stack: Vec<&ComponentId> = self.roots.iter().rev().collect();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let node = self.nodes.get(id)?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Read-only lookup returning the component and its subtree in wire form.
    ///
    /// # Errors
    /// - `Error::ComponentNotFound` if `id` is not in the tree
    pub fn find(&self, id: &ComponentId) -> Result<Component> {
        let order = self
            .index_of(id)
            .ok_or_else(|| Error::ComponentNotFound(id.to_string()))?;
        self.build_component(id, order as i64, 1)
    }

    fn build_component(&self, id: &ComponentId, order: i64, depth: usize) -> Result<Component> {
        if depth > MAX_DEPTH {
            return Err(Error::DepthExceeded { limit: MAX_DEPTH });
        }
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| Error::ComponentNotFound(id.to_string()))?;
        let children = node
            .children
            .iter()
            .enumerate()
            .map(|(i, child)| self.build_component(child, i as i64, depth + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Component {
            id: node.id.clone(),
            kind: node.kind.clone(),
            props: node.props.clone(),
            children,
            order,
        })
    }

    /// Nested wire form of the root's children with dense `order` values.
    pub fn to_components(&self) -> Vec<Component> {
        self.roots
            .iter()
            .enumerate()
            .filter_map(|(i, id)| self.build_component(id, i as i64, 1).ok())
            .collect()
    }

    /// Build the arena from the nested wire form.
    ///
    /// Siblings are ordered by their stored `order` (gaps allowed, ties keep
    /// input order).
    ///
    /// # Errors
    /// - `Error::DuplicateId` if an id occurs twice anywhere in the tree
    /// - `Error::RootNotAddressable` if a component uses the reserved root id
    /// - `Error::DepthExceeded` if nesting exceeds [`MAX_DEPTH`]
    pub fn from_components(components: Vec<Component>) -> Result<Self> {
        let mut tree = Self::new();
        tree.roots = tree.adopt(components, None, 1)?;
        Ok(tree)
    }

    fn adopt(
        &mut self,
        mut components: Vec<Component>,
        parent: Option<&ComponentId>,
        depth: usize,
    ) -> Result<Vec<ComponentId>> {
        if components.is_empty() {
            return Ok(Vec::new());
        }
        if depth > MAX_DEPTH {
            return Err(Error::DepthExceeded { limit: MAX_DEPTH });
        }
        components.sort_by_key(|c| c.order);

        let mut ids = Vec::with_capacity(components.len());
        for component in components {
            if component.id.is_root() {
                return Err(Error::RootNotAddressable(component.id.to_string()));
            }
            if self.nodes.contains_key(&component.id) {
                return Err(Error::DuplicateId(component.id.to_string()));
            }
            let id = component.id;
            self.nodes.insert(
                id.clone(),
                Node {
                    id: id.clone(),
                    kind: component.kind,
                    props: component.props,
                    parent: parent.cloned(),
                    children: Vec::new(),
                },
            );
            let children = self.adopt(component.children, Some(&id), depth + 1)?;
            if let Some(node) = self.nodes.get_mut(&id) {
                node.children = children;
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Check the structural invariants: every node is reachable exactly once,
    /// parent links agree with child lists, and depth is bounded.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        let mut stack: Vec<(Option<&ComponentId>, &ComponentId, usize)> =
            self.roots.iter().map(|id| (None, id, 1)).collect();

        while let Some((parent, id, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(Error::DepthExceeded { limit: MAX_DEPTH });
            }
            if !seen.insert(id) {
                return Err(Error::DuplicateId(id.to_string()));
            }
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| Error::ComponentNotFound(id.to_string()))?;
            if node.parent.as_ref() != parent {
                return Err(Error::ParentNotFound(format!(
                    "parent link of {} is inconsistent",
                    id
                )));
            }
            stack.extend(node.children.iter().map(|c| (Some(id), c, depth + 1)));
        }

        if seen.len() != self.nodes.len() {
            return Err(Error::ComponentNotFound(
                "tree contains unreachable components".to_string(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<Vec<Component>> for ComponentTree {
    type Error = Error;

    fn try_from(components: Vec<Component>) -> Result<Self> {
        Self::from_components(components)
    }
}

impl From<ComponentTree> for Vec<Component> {
    fn from(tree: ComponentTree) -> Self {
        tree.to_components()
    }
}

//! Cycle guard for walks over the relationship graph.
//!
//! Relationship graphs may be cyclic (`Author` many-to-many `Book` and back).
//! Storing or loading an entity recurses into its collections, so every
//! recursion step first [`enter`](TraversalGuard::enter)s the related type
//! and is refused when that type is already on the path from the root.
//! Nodes live in an arena owned by the guard; a guard is created for one
//! top-level call and dropped with it.

/// Handle to a node in a [`TraversalGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node {
    entity: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena of traversal nodes answering "is this type already an ancestor".
///
/// # Examples
///
/// ```
/// use relmap_core::TraversalGuard;
///
/// let mut guard = TraversalGuard::new("Author");
/// let root = guard.root();
///
/// let books = guard.enter(root, "Book").expect("Book is not on the path");
/// // Author -> Book -> Author would loop
/// assert!(guard.enter(books, "Author").is_none());
/// guard.leave(root, books);
///
/// // siblings do not see each other
/// assert!(guard.enter(root, "Book").is_some());
/// ```
#[derive(Debug)]
pub struct TraversalGuard {
    nodes: Vec<Node>,
}

impl TraversalGuard {
    /// Starts a traversal rooted at `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            nodes: vec![Node {
                entity: entity.into(),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Entity wrapped by `node`.
    pub fn entity(&self, node: NodeId) -> &str {
        &self.nodes[node.0].entity
    }

    /// Whether `entity` is `node` itself or one of its ancestors. O(depth).
    pub fn is_on_path(&self, node: NodeId, entity: &str) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            let n = &self.nodes[id.0];
            if n.entity == entity {
                return true;
            }
            current = n.parent;
        }
        false
    }

    /// Descends from `node` into `entity`.
    ///
    /// Returns `None` when `entity` is already on the path, in which case
    /// the caller skips that branch.
    pub fn enter(&mut self, node: NodeId, entity: &str) -> Option<NodeId> {
        if self.is_on_path(node, entity) {
            return None;
        }
        let child = NodeId(self.nodes.len());
        self.nodes.push(Node {
            entity: entity.to_string(),
            parent: Some(node),
            children: Vec::new(),
        });
        self.nodes[node.0].children.push(child);
        Some(child)
    }

    /// Returns from `child` to `node`, detaching the child.
    pub fn leave(&mut self, node: NodeId, child: NodeId) {
        self.nodes[node.0].children.retain(|c| *c != child);
    }

    /// Entities from the root down to `node`.
    pub fn path(&self, node: NodeId) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let n = &self.nodes[id.0];
            path.push(n.entity.as_str());
            current = n.parent;
        }
        path.reverse();
        path
    }

    /// Nodes currently attached below `node`.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }
}

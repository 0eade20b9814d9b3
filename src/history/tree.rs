//! Arena-backed action tree.
//!
//! Nodes are addressed by [`ActionId`]. Tearing a node down removes it from
//! the arena, which invalidates its id for good.

use std::collections::HashMap;

use crate::action::{Action, ActionId};

#[derive(Debug)]
pub(crate) struct Node {
    pub action: Action,
    pub parent: Option<ActionId>,
    /// Previous child of the same parent, displaced by this one.
    pub sibling: Option<ActionId>,
    /// Most recently appended child.
    pub next: Option<ActionId>,
}

/// Actions released by one archive step.
#[derive(Debug, Default)]
pub(crate) struct Archived {
    pub root: Option<Action>,
    /// Abandoned branches hanging off the archived root.
    pub pruned: Vec<Action>,
}

#[derive(Debug)]
pub(crate) struct Tree {
    nodes: HashMap<ActionId, Node>,
    next_id: u64,
    pub root: Option<ActionId>,
    pub head: Option<ActionId>,
    pub focus: Option<ActionId>,
    pub size: usize,
    pub limit: usize,
}

impl Tree {
    pub fn new(limit: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 0,
            root: None,
            head: None,
            focus: None,
            size: 0,
            limit,
        }
    }

    pub fn issue_id(&mut self) -> ActionId {
        let id = ActionId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn get(&self, id: ActionId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: ActionId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn action(&self, id: Option<ActionId>) -> Option<Action> {
        id.and_then(|id| self.nodes.get(&id)).map(|node| node.action.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Link `action` as the head's newest child and make it the head.
    pub fn attach(&mut self, action: Action) {
        let id = action.id();
        let parent = self.head;
        let sibling = parent
            .and_then(|p| self.nodes.get_mut(&p))
            .and_then(|p| p.next.replace(id));

        self.nodes.insert(
            id,
            Node {
                action,
                parent,
                sibling,
                next: None,
            },
        );

        self.head = Some(id);
        if self.root.is_none() {
            self.root = Some(id);
        }
        self.size += 1;
    }

    /// Actions strictly after `base` through head, oldest first.
    ///
    /// Stops at root even if `base` is never met.
    pub fn to_array(&self, base: Option<ActionId>) -> Vec<Action> {
        let mut items = Vec::new();
        let mut cursor = self.head;

        while let Some(id) = cursor {
            if Some(id) == base {
                break;
            }
            let Some(node) = self.nodes.get(&id) else {
                break;
            };
            items.push(node.action.clone());
            if Some(id) == self.root {
                break;
            }
            cursor = node.parent;
        }

        items.reverse();
        items
    }

    /// Recount root→head.
    pub fn set_size(&mut self) {
        let mut count = 0;
        let mut cursor = self.head;

        while let Some(id) = cursor {
            let Some(node) = self.nodes.get(&id) else {
                break;
            };
            count += 1;
            if Some(id) == self.root {
                break;
            }
            cursor = node.parent;
        }

        self.size = count;
    }

    /// True when `archive` would discard the root.
    ///
    /// The focus anchors rollforward, so a root that is also the focus stays.
    pub fn is_archivable(&self) -> bool {
        self.size > self.limit && self.root.is_some() && self.focus != self.root
    }

    /// Discard the root once the branch is longer than `limit`.
    pub fn archive(&mut self) -> Archived {
        let mut out = Archived::default();
        if !self.is_archivable() {
            return out;
        }
        let Some(root_id) = self.root else {
            return out;
        };

        let successor = self.successor_on_branch(root_id);
        let Some(root) = self.nodes.remove(&root_id) else {
            return out;
        };

        let mut child = root.next;
        while let Some(id) = child {
            child = self.nodes.get(&id).and_then(|n| n.sibling);
            if Some(id) != successor {
                self.prune(id, &mut out.pruned);
            }
        }

        if let Some(node) = successor.and_then(|id| self.nodes.get_mut(&id)) {
            node.parent = None;
            node.sibling = None;
        }

        self.root = successor;
        self.size = self.size.saturating_sub(1);
        if self.size == 0 {
            self.root = None;
            self.head = None;
            self.focus = None;
        }

        out.root = Some(root.action);
        out
    }

    /// Drop every node.
    pub fn clear(&mut self) -> Vec<Action> {
        self.root = None;
        self.head = None;
        self.focus = None;
        self.size = 0;
        self.nodes.drain().map(|(_, node)| node.action).collect()
    }

    /// The child of `root` on the path to head.
    fn successor_on_branch(&self, root: ActionId) -> Option<ActionId> {
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = self.nodes.get(&id)?;
            if node.parent == Some(root) {
                return Some(id);
            }
            cursor = node.parent;
        }
        self.nodes.get(&root).and_then(|n| n.next)
    }

    fn prune(&mut self, id: ActionId, out: &mut Vec<Action>) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.remove(&id) else {
                continue;
            };
            let mut child = node.next;
            while let Some(c) = child {
                child = self.nodes.get(&c).and_then(|n| n.sibling);
                stack.push(c);
            }
            out.push(node.action);
        }
    }
}

//! In-process document tree with mutation observers.
//!
//! Mutations queue records on every matching observer; `deliver` hands each
//! observer its pending batch in mutation order.
//!
//! Elements live in a slot arena. Removing an element frees its whole
//! subtree and the slots are reused by later `create_element` calls; ids
//! carry a generation so a stale id never aliases the slot's new occupant.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: usize,
    generation: u32,
}

/// Snapshot of an element at the time a mutation was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub attributes: BTreeMap<String, String>,
}

impl Node {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MutationKind {
    ChildList,
    Attributes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added_nodes: Vec<Node>,
    pub removed_nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObserveOptions {
    /// Direct children added or removed
    pub child_list: bool,
    /// Extend the other options to all descendants of the target
    pub subtree: bool,
    pub attributes: bool,
}

pub type MutationCallback = Box<dyn FnMut(&[MutationRecord]) + Send>;

#[derive(Default)]
struct Element {
    generation: u32,
    live: bool,
    attributes: BTreeMap<String, String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Registration {
    target: NodeId,
    options: ObserveOptions,
    callback: Arc<Mutex<MutationCallback>>,
    pending: Vec<MutationRecord>,
}

struct Tree {
    nodes: Vec<Element>,
    free: Vec<usize>,
    observers: Vec<Registration>,
}

pub struct Document {
    tree: Mutex<Tree>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

const ROOT: NodeId = NodeId {
    index: 0,
    generation: 0,
};

impl Document {
    /// An empty document containing only `body`.
    pub fn new() -> Self {
        let body = Element {
            live: true,
            ..Default::default()
        };
        Self {
            tree: Mutex::new(Tree {
                nodes: vec![body],
                free: Vec::new(),
                observers: Vec::new(),
            }),
        }
    }

    pub fn body(&self) -> NodeId {
        ROOT
    }

    /// Create a detached element.
    pub fn create_element(&self) -> NodeId {
        let mut tree = self.lock();
        match tree.free.pop() {
            Some(index) => {
                let element = &mut tree.nodes[index];
                element.live = true;
                NodeId {
                    index,
                    generation: element.generation,
                }
            }
            None => {
                tree.nodes.push(Element {
                    live: true,
                    ..Default::default()
                });
                NodeId {
                    index: tree.nodes.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let mut tree = self.lock();
        tree.check(node)?;
        tree.nodes[node.index]
            .attributes
            .insert(name.to_string(), value.to_string());
        tree.queue(MutationRecord {
            kind: MutationKind::Attributes,
            target: node,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
        });
        Ok(())
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.append_children(parent, &[child])
    }

    /// Append all `children` in one mutation, like inserting a fragment.
    pub fn append_children(&self, parent: NodeId, children: &[NodeId]) -> Result<()> {
        let mut tree = self.lock();
        tree.check(parent)?;
        for (i, &child) in children.iter().enumerate() {
            tree.check(child)?;
            if child == ROOT || tree.nodes[child.index].parent.is_some() {
                bail!("node {:?} is already attached", child);
            }
            if tree.is_inclusive_ancestor(child, parent) || children[..i].contains(&child) {
                bail!("cannot append node {:?} under {:?}", child, parent);
            }
        }

        let mut added_nodes = Vec::with_capacity(children.len());
        for &child in children {
            tree.nodes[child.index].parent = Some(parent);
            tree.nodes[parent.index].children.push(child);
            added_nodes.push(tree.snapshot(child));
        }
        if !added_nodes.is_empty() {
            tree.queue(MutationRecord {
                kind: MutationKind::ChildList,
                target: parent,
                added_nodes,
                removed_nodes: Vec::new(),
            });
        }
        Ok(())
    }

    /// Detach `child` and free it with all its descendants. Their ids are
    /// stale afterwards.
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let mut tree = self.lock();
        tree.check(parent)?;
        tree.check(child)?;
        let Some(pos) = tree.nodes[parent.index]
            .children
            .iter()
            .position(|&c| c == child)
        else {
            bail!("node {:?} is not a child of {:?}", child, parent);
        };
        tree.nodes[parent.index].children.remove(pos);
        let removed = tree.snapshot(child);
        tree.queue(MutationRecord {
            kind: MutationKind::ChildList,
            target: parent,
            added_nodes: Vec::new(),
            removed_nodes: vec![removed],
        });
        tree.release(child);
        Ok(())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        let tree = self.lock();
        tree.check(node).ok()?;
        tree.nodes[node.index].parent
    }

    /// First connected element whose `id` attribute equals `id`, in tree order.
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        let tree = self.lock();
        let mut stack = vec![ROOT];
        while let Some(node) = stack.pop() {
            let element = &tree.nodes[node.index];
            if element.attributes.get("id").map(String::as_str) == Some(id) {
                return Some(node);
            }
            stack.extend(element.children.iter().rev());
        }
        None
    }

    /// Register `callback` for mutations at `target` (and its descendants
    /// with `subtree`). Observers live as long as the document.
    pub fn observe(
        &self,
        target: NodeId,
        options: ObserveOptions,
        callback: MutationCallback,
    ) -> Result<()> {
        if !options.child_list && !options.attributes {
            bail!("observe requires child_list or attributes");
        }
        let mut tree = self.lock();
        tree.check(target)?;
        tree.observers.push(Registration {
            target,
            options,
            callback: Arc::new(Mutex::new(callback)),
            pending: Vec::new(),
        });
        Ok(())
    }

    /// Deliver pending records: each observer with a non-empty queue is
    /// called once with its batch. Returns the number of batches delivered.
    pub fn deliver(&self) -> usize {
        let batches: Vec<_> = {
            let mut tree = self.lock();
            tree.observers
                .iter_mut()
                .filter(|r| !r.pending.is_empty())
                .map(|r| (r.callback.clone(), std::mem::take(&mut r.pending)))
                .collect()
        };

        // Callbacks may touch the document, so the tree lock is released here.
        for (callback, records) in &batches {
            let mut callback = callback.lock().unwrap_or_else(|e| e.into_inner());
            (*callback)(records.as_slice());
        }
        batches.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Tree {
    fn check(&self, node: NodeId) -> Result<()> {
        match self.nodes.get(node.index) {
            Some(element) if element.live && element.generation == node.generation => Ok(()),
            _ => bail!("unknown node {:?}", node),
        }
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(n) = cur {
            if n == ancestor {
                return true;
            }
            cur = self.nodes[n.index].parent;
        }
        false
    }

    fn snapshot(&self, node: NodeId) -> Node {
        Node {
            attributes: self.nodes[node.index].attributes.clone(),
        }
    }

    /// Return `node` and its descendants to the free list.
    fn release(&mut self, node: NodeId) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            let element = &mut self.nodes[n.index];
            stack.append(&mut element.children);
            element.attributes.clear();
            element.parent = None;
            element.live = false;
            element.generation = element.generation.wrapping_add(1);
            self.free.push(n.index);
        }
    }

    fn queue(&mut self, record: MutationRecord) {
        let interested: Vec<usize> = self
            .observers
            .iter()
            .enumerate()
            .filter(|(_, r)| self.wants(r, &record))
            .map(|(i, _)| i)
            .collect();
        for i in interested {
            self.observers[i].pending.push(record.clone());
        }
    }

    fn wants(&self, reg: &Registration, record: &MutationRecord) -> bool {
        let kind_enabled = match record.kind {
            MutationKind::ChildList => reg.options.child_list,
            MutationKind::Attributes => reg.options.attributes,
        };
        if !kind_enabled {
            return false;
        }
        if reg.target == record.target {
            return true;
        }
        reg.options.subtree && self.is_inclusive_ancestor(reg.target, record.target)
    }
}

//! Arena-backed doubly-linked instruction sequence.
//!
//! Instructions live in a `Vec` arena and are linked through `prev`/`next` indices.
//! Handles ([`InstrId`]) stay valid for the lifetime of the list because nodes are
//! never freed; this is what lets branch and exception-handler boundaries refer to
//! instructions structurally while new code is spliced in around them.

use std::collections::HashMap;

use crate::assembly::{InstrId, Instruction};

#[derive(Debug, Clone)]
struct Node {
    instruction: Instruction,
    prev: Option<InstrId>,
    next: Option<InstrId>,
}

/// Ordered, linked sequence of instructions with stable handles.
#[derive(Debug, Clone, Default)]
pub struct InstructionList {
    nodes: Vec<Node>,
    head: Option<InstrId>,
    tail: Option<InstrId>,
}

impl InstructionList {
    /// Creates an empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the list holds no instruction
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First instruction in order
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.head
    }

    /// Last instruction in order
    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.tail
    }

    /// Instruction following `id`
    #[must_use]
    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.nodes.get(id.index()).and_then(|node| node.next)
    }

    /// Instruction preceding `id`
    #[must_use]
    pub fn prev(&self, id: InstrId) -> Option<InstrId> {
        self.nodes.get(id.index()).and_then(|node| node.prev)
    }

    /// True if `id` is a handle produced by this list
    #[must_use]
    pub fn contains(&self, id: InstrId) -> bool {
        id.index() < self.nodes.len()
    }

    /// Borrow the instruction behind `id`
    #[must_use]
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.nodes.get(id.index()).map(|node| &node.instruction)
    }

    /// Mutably borrow the instruction behind `id`
    pub fn get_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.nodes.get_mut(id.index()).map(|node| &mut node.instruction)
    }

    fn alloc(&mut self, instruction: Instruction) -> InstrId {
        let id = InstrId(self.nodes.len() as u32);
        self.nodes.push(Node {
            instruction,
            prev: None,
            next: None,
        });
        id
    }

    /// Appends an instruction at the end and returns its handle
    pub fn push_back(&mut self, instruction: Instruction) -> InstrId {
        let id = self.alloc(instruction);
        match self.tail {
            Some(tail) => {
                self.nodes[tail.index()].next = Some(id);
                self.nodes[id.index()].prev = Some(tail);
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Inserts a single instruction directly before `anchor`.
    ///
    /// Returns `None` if `anchor` does not belong to this list.
    pub fn insert_before(&mut self, anchor: InstrId, instruction: Instruction) -> Option<InstrId> {
        if !self.contains(anchor) {
            return None;
        }

        let id = self.alloc(instruction);
        let prev = self.nodes[anchor.index()].prev;
        self.nodes[id.index()].prev = prev;
        self.nodes[id.index()].next = Some(anchor);
        self.nodes[anchor.index()].prev = Some(id);
        match prev {
            Some(prev) => self.nodes[prev.index()].next = Some(id),
            None => self.head = Some(id),
        }
        Some(id)
    }

    /// Inserts a single instruction directly after `anchor`.
    ///
    /// Returns `None` if `anchor` does not belong to this list.
    pub fn insert_after(&mut self, anchor: InstrId, instruction: Instruction) -> Option<InstrId> {
        if !self.contains(anchor) {
            return None;
        }

        let id = self.alloc(instruction);
        let next = self.nodes[anchor.index()].next;
        self.nodes[id.index()].prev = Some(anchor);
        self.nodes[id.index()].next = next;
        self.nodes[anchor.index()].next = Some(id);
        match next {
            Some(next) => self.nodes[next.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
        Some(id)
    }

    /// Inserts a run of instructions before `anchor`, preserving their order.
    ///
    /// Returns the handles of the inserted instructions, or `None` if `anchor`
    /// does not belong to this list.
    pub fn insert_all_before(
        &mut self,
        anchor: InstrId,
        instructions: impl IntoIterator<Item = Instruction>,
    ) -> Option<Vec<InstrId>> {
        if !self.contains(anchor) {
            return None;
        }

        let mut ids = Vec::new();
        for instruction in instructions {
            ids.push(self.insert_before(anchor, instruction)?);
        }
        Some(ids)
    }

    /// Iterates `(handle, instruction)` pairs in list order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Handles in list order
    #[must_use]
    pub fn ids(&self) -> Vec<InstrId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Maps every handle to its position in list order
    #[must_use]
    pub fn positions(&self) -> HashMap<InstrId, usize> {
        self.iter()
            .enumerate()
            .map(|(position, (id, _))| (id, position))
            .collect()
    }
}

impl FromIterator<Instruction> for InstructionList {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        let mut list = InstructionList::new();
        for instruction in iter {
            list.push_back(instruction);
        }
        list
    }
}

/// Iterator over an [`InstructionList`] in list order.
pub struct Iter<'a> {
    list: &'a InstructionList,
    cursor: Option<InstrId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InstrId, &'a Instruction);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.list.nodes.get(id.index())?;
        self.cursor = node.next;
        Some((id, &node.instruction))
    }
}

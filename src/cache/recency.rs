//! Index-linked recency list over an arena.
//!
//! Slots never move, so the cache's key map can hold plain indices; freed
//! slots are reused through a free list.

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct RecencyList<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> RecencyList<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Insert as most recent and return the slot index.
    pub fn push_front(&mut self, value: T) -> usize {
        let node = Node {
            value,
            prev: None,
            next: self.head,
        };
        let index = if let Some(index) = self.free.pop() {
            self.nodes[index] = Some(node);
            index
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        };

        if let Some(old_head) = self.head {
            if let Some(node) = self.nodes[old_head].as_mut() {
                node.prev = Some(index);
            }
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
        self.len += 1;
        index
    }

    fn unlink(&mut self, index: usize) -> Option<()> {
        let (prev, next) = {
            let node = self.nodes.get(index)?.as_ref()?;
            (node.prev, node.next)
        };
        match prev {
            Some(prev) => self.nodes[prev].as_mut()?.next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].as_mut()?.prev = prev,
            None => self.tail = prev,
        }
        Some(())
    }

    pub fn move_to_front(&mut self, index: usize) {
        if self.head == Some(index) || self.unlink(index).is_none() {
            return;
        }
        let old_head = self.head;
        if let Some(node) = self.nodes[index].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(old_head) = old_head {
            if let Some(node) = self.nodes[old_head].as_mut() {
                node.prev = Some(index);
            }
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.unlink(index)?;
        let node = self.nodes[index].take()?;
        self.free.push(index);
        self.len -= 1;
        Some(node.value)
    }

    /// Least recently used slot.
    pub fn back(&self) -> Option<usize> {
        self.tail
    }

    /// The slot just more recent than `index`.
    pub fn prev(&self, index: usize) -> Option<usize> {
        self.nodes.get(index)?.as_ref()?.prev
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.nodes.get(index)?.as_ref().map(|node| &node.value)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.nodes.get_mut(index)?.as_mut().map(|node| &mut node.value)
    }

    /// Values from most to least recent.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let index = cursor?;
            let node = self.nodes.get(index)?.as_ref()?;
            cursor = node.next;
            Some((index, &node.value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::RecencyList;

    fn order(list: &RecencyList<&'static str>) -> Vec<&'static str> {
        list.iter().map(|(_, value)| *value).collect()
    }

    #[test]
    fn promote_and_remove_keep_links_consistent() {
        let mut list = RecencyList::new();
        let a = list.push_front("a");
        let b = list.push_front("b");
        let c = list.push_front("c");
        assert_eq!(order(&list), ["c", "b", "a"]);

        list.move_to_front(a);
        assert_eq!(order(&list), ["a", "c", "b"]);
        assert_eq!(list.back(), Some(b));
        assert_eq!(list.prev(b), Some(c));

        assert_eq!(list.remove(c), Some("c"));
        assert_eq!(order(&list), ["a", "b"]);
        assert_eq!(list.remove(c), None);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut list = RecencyList::new();
        let a = list.push_front("a");
        list.remove(a);
        let b = list.push_front("b");
        assert_eq!(a, b);
        assert_eq!(list.back(), Some(b));
        assert_eq!(order(&list), ["b"]);
    }
}

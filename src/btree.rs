/*
A disk-resident ordered map from u64 keys to encoded records.

Leaf nodes hold (key, record payload) cells; internal nodes hold
(key, child page) cells plus a trailing right-most child pointer. For an
internal node with cells (k0,c0)..(kn-1,cn-1) and right pointer R:

  every key in subtree ci is < ki
  every key in subtree R is >= kn-1

A leaf split promotes the first key of the right half, and that key also
remains as the smallest key of the new right leaf. Descent therefore takes
the first child whose separator is strictly greater than the search key.

Deletes remove cells but never merge siblings; nodes may become underfull.
*/

use log::{debug, info};

use crate::cell::{InternalCell, LeafCell};
use crate::errors::{DbError, Result};
use crate::page::{Node, NodeType, NODE_HEADER_SIZE};
use crate::pager::Pager;
use crate::record::Record;
use crate::util::pack_uint32;

/// A node splits once it would hold more keys than this.
pub const MAX_KEYS_PER_NODE: u16 = 100;

/// Handle to a tree rooted at some page. The root page id changes when an
/// insert splits the root; callers tracking the tree by root must re-read it
/// after mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTree {
    root_page: u32,
}

impl BTree {
    /// Allocate a fresh leaf page and return a tree rooted there.
    pub fn create(pager: &mut Pager) -> Result<BTree> {
        let page_id = pager.allocate_page()?;
        Node::format(page_id, pager.page_size(), NodeType::Leaf).store(pager)?;
        debug!("created btree rooted at page {page_id}");
        Ok(BTree { root_page: page_id })
    }

    /// Attach to an existing tree.
    pub fn open(root_page: u32) -> BTree {
        BTree { root_page }
    }

    /// Reformat `root_page` as an empty leaf and attach to it.
    pub fn reinit(pager: &mut Pager, root_page: u32) -> Result<BTree> {
        Node::format(root_page, pager.page_size(), NodeType::Leaf).store(pager)?;
        Ok(BTree { root_page })
    }

    pub fn root_page(&self) -> u32 {
        self.root_page
    }

    /// Insert a record under `key`. Re-inserting an existing key replaces
    /// its payload.
    pub fn insert(&mut self, pager: &mut Pager, key: u64, record: &Record) -> Result<()> {
        debug!("btree insert: key={key} root={}", self.root_page);
        let payload = record.encode()?;

        if let Some((split_key, new_page)) = insert_recursive(pager, self.root_page, key, &payload)?
        {
            // the root itself split: hoist a new internal root above it
            let new_root_id = pager.allocate_page()?;
            let mut root = Node::format(new_root_id, pager.page_size(), NodeType::Internal);
            root.set_right_page(new_page);
            root.insert_cell_bytes(0, &InternalCell::new(split_key, self.root_page).to_bytes())?;
            root.store(pager)?;

            info!("created new btree root at page {new_root_id}");
            self.root_page = new_root_id;
        }
        Ok(())
    }

    /// Look up the record stored under `key`.
    pub fn search(&self, pager: &mut Pager, key: u64) -> Result<Option<Record>> {
        debug!("btree search: key={key} root={}", self.root_page);
        search_recursive(pager, self.root_page, key)
    }

    /// Remove `key`. Returns whether a cell was removed.
    pub fn delete(&mut self, pager: &mut Pager, key: u64) -> Result<bool> {
        debug!("btree delete: key={key} root={}", self.root_page);
        delete_recursive(pager, self.root_page, key)
    }

    /// Replace the record under `key` if it exists.
    pub fn update(&mut self, pager: &mut Pager, key: u64, record: &Record) -> Result<bool> {
        if self.delete(pager, key)? {
            self.insert(pager, key, record)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// All (key, record) pairs in ascending key order.
    pub fn scan(&self, pager: &mut Pager) -> Result<Vec<(u64, Record)>> {
        let mut results = Vec::new();
        scan_recursive(pager, self.root_page, &mut results)?;
        Ok(results)
    }
}

fn leaf_cell_at(node: &Node, index: usize) -> Result<LeafCell> {
    let offset = node.cell_offset(index)?;
    let (cell, _) = LeafCell::from_bytes(node.bytes(), offset)?;
    Ok(cell)
}

fn internal_cell_at(node: &Node, index: usize) -> Result<InternalCell> {
    let offset = node.cell_offset(index)?;
    let (cell, _) = InternalCell::from_bytes(node.bytes(), offset)?;
    Ok(cell)
}

fn set_internal_child(node: &mut Node, index: usize, child: u32) -> Result<()> {
    let cell = internal_cell_at(node, index)?;
    let offset = node.cell_offset(index)? + InternalCell::child_field_offset(cell.key);
    node.bytes_mut()[offset..offset + 4].copy_from_slice(&pack_uint32(child));
    Ok(())
}

fn needs_split(node: &Node, cell_len: usize) -> Result<bool> {
    Ok(node.used_space()? + cell_len > node.page_size() * 3 / 4
        || node.num_keys() >= MAX_KEYS_PER_NODE)
}

fn insert_recursive(
    pager: &mut Pager,
    page_id: u32,
    key: u64,
    payload: &[u8],
) -> Result<Option<(u64, u32)>> {
    let node = Node::load(pager, page_id)?;
    if node.is_leaf() {
        insert_into_leaf(pager, node, key, payload)
    } else {
        insert_into_internal(pager, node, key, payload)
    }
}

fn insert_into_leaf(
    pager: &mut Pager,
    mut node: Node,
    key: u64,
    payload: &[u8],
) -> Result<Option<(u64, u32)>> {
    let cell = LeafCell::new(key, payload.to_vec());

    // a cell that exceeds the split threshold on a fresh page can never be
    // placed, it would split forever
    if NODE_HEADER_SIZE + cell.encoded_len() > node.page_size() * 3 / 4 {
        return Err(DbError::ResourceLimit(format!(
            "record of {} bytes is too large for page size {}",
            payload.len(),
            node.page_size()
        )));
    }

    let insert_idx = node.find_key_index(key)?;
    if insert_idx < node.num_keys() as usize && node.key_at(insert_idx)? == key {
        // logical update: drop the old cell, then place the new payload
        node.remove_cell(insert_idx)?;
    }

    if needs_split(&node, cell.encoded_len())? {
        return split_leaf(pager, node, cell, insert_idx).map(Some);
    }

    node.insert_cell_bytes(insert_idx, &cell.to_bytes())?;
    node.store(pager)?;
    Ok(None)
}

fn split_leaf(
    pager: &mut Pager,
    mut node: Node,
    pending: LeafCell,
    insert_idx: usize,
) -> Result<(u64, u32)> {
    info!("splitting leaf page {}", node.page_id);

    let mut cells = Vec::with_capacity(node.num_keys() as usize + 1);
    for i in 0..node.num_keys() as usize {
        cells.push(leaf_cell_at(&node, i)?);
    }
    cells.insert(insert_idx, pending);

    let split_point = cells.len() / 2;
    let split_key = cells[split_point].key;

    node.clear();
    for (i, cell) in cells[..split_point].iter().enumerate() {
        node.insert_cell_bytes(i, &cell.to_bytes())?;
    }
    node.store(pager)?;

    let new_page_id = pager.allocate_page()?;
    let mut new_node = Node::format(new_page_id, pager.page_size(), NodeType::Leaf);
    for (i, cell) in cells[split_point..].iter().enumerate() {
        new_node.insert_cell_bytes(i, &cell.to_bytes())?;
    }
    new_node.store(pager)?;

    Ok((split_key, new_page_id))
}

fn insert_into_internal(
    pager: &mut Pager,
    mut node: Node,
    key: u64,
    payload: &[u8],
) -> Result<Option<(u64, u32)>> {
    let idx = node.child_index(key)?;
    let num_keys = node.num_keys() as usize;
    let child = if idx < num_keys {
        internal_cell_at(&node, idx)?.child
    } else {
        node.right_page()
    };
    if child == 0 {
        return Err(DbError::corrupt(format!(
            "internal node {} has no child for key {key}",
            node.page_id
        )));
    }

    let Some((split_key, new_page)) = insert_recursive(pager, child, key, payload)? else {
        return Ok(None);
    };

    // the child split: keys >= split_key now live on new_page, so the
    // pointer that referenced the child moves there, and the child is
    // re-attached under the promoted separator
    if idx < num_keys {
        set_internal_child(&mut node, idx, new_page)?;
    } else {
        node.set_right_page(new_page);
    }

    let separator = InternalCell::new(split_key, child);
    if needs_split(&node, separator.encoded_len())? {
        return split_internal(pager, node, separator, idx).map(Some);
    }

    node.insert_cell_bytes(idx, &separator.to_bytes())?;
    node.store(pager)?;
    Ok(None)
}

fn split_internal(
    pager: &mut Pager,
    mut node: Node,
    pending: InternalCell,
    insert_idx: usize,
) -> Result<(u64, u32)> {
    info!("splitting internal page {}", node.page_id);

    let mut cells = Vec::with_capacity(node.num_keys() as usize + 1);
    for i in 0..node.num_keys() as usize {
        cells.push(internal_cell_at(&node, i)?);
    }
    cells.insert(insert_idx, pending);

    let old_right = node.right_page();
    let split_point = cells.len() / 2;
    let promoted = cells[split_point];

    node.clear();
    for (i, cell) in cells[..split_point].iter().enumerate() {
        node.insert_cell_bytes(i, &cell.to_bytes())?;
    }
    // the promoted separator's subtree becomes the left node's right arm
    node.set_right_page(promoted.child);
    node.store(pager)?;

    let new_page_id = pager.allocate_page()?;
    let mut new_node = Node::format(new_page_id, pager.page_size(), NodeType::Internal);
    for (i, cell) in cells[split_point + 1..].iter().enumerate() {
        new_node.insert_cell_bytes(i, &cell.to_bytes())?;
    }
    new_node.set_right_page(old_right);
    new_node.store(pager)?;

    Ok((promoted.key, new_page_id))
}

fn search_recursive(pager: &mut Pager, page_id: u32, key: u64) -> Result<Option<Record>> {
    let node = Node::load(pager, page_id)?;

    if node.is_leaf() {
        let idx = node.find_key_index(key)?;
        if idx < node.num_keys() as usize && node.key_at(idx)? == key {
            let cell = leaf_cell_at(&node, idx)?;
            let (record, _) = Record::decode(&cell.payload, 0)?;
            return Ok(Some(record));
        }
        Ok(None)
    } else {
        let idx = node.child_index(key)?;
        let child = if idx < node.num_keys() as usize {
            internal_cell_at(&node, idx)?.child
        } else {
            node.right_page()
        };
        if child == 0 {
            return Ok(None);
        }
        search_recursive(pager, child, key)
    }
}

fn delete_recursive(pager: &mut Pager, page_id: u32, key: u64) -> Result<bool> {
    let mut node = Node::load(pager, page_id)?;

    if node.is_leaf() {
        let idx = node.find_key_index(key)?;
        if idx < node.num_keys() as usize && node.key_at(idx)? == key {
            node.remove_cell(idx)?;
            node.store(pager)?;
            return Ok(true);
        }
        Ok(false)
    } else {
        let idx = node.child_index(key)?;
        let child = if idx < node.num_keys() as usize {
            internal_cell_at(&node, idx)?.child
        } else {
            node.right_page()
        };
        if child == 0 {
            return Ok(false);
        }
        delete_recursive(pager, child, key)
    }
}

fn scan_recursive(
    pager: &mut Pager,
    page_id: u32,
    results: &mut Vec<(u64, Record)>,
) -> Result<()> {
    let node = Node::load(pager, page_id)?;

    if node.is_leaf() {
        for i in 0..node.num_keys() as usize {
            let cell = leaf_cell_at(&node, i)?;
            let (record, _) = Record::decode(&cell.payload, 0)?;
            results.push((cell.key, record));
        }
    } else {
        for i in 0..node.num_keys() as usize {
            let child = internal_cell_at(&node, i)?.child;
            scan_recursive(pager, child, results)?;
        }
        if node.right_page() != 0 {
            scan_recursive(pager, node.right_page(), results)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::DEFAULT_PAGE_SIZE;
    use crate::record::Value;
    use tempfile::NamedTempFile;

    fn open_pager() -> (NamedTempFile, Pager) {
        let file = NamedTempFile::new().unwrap();
        let pager = Pager::open(file.path(), DEFAULT_PAGE_SIZE).unwrap();
        (file, pager)
    }

    fn row(n: i64) -> Record {
        Record::new(vec![Value::Int(n), Value::Text(format!("row-{n}"))])
    }

    #[test]
    fn test_create_allocates_leaf_root() {
        let (_f, mut pager) = open_pager();
        let tree = BTree::create(&mut pager).unwrap();
        assert_eq!(tree.root_page(), 1);

        let node = Node::load(&mut pager, 1).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.num_keys(), 0);
    }

    #[test]
    fn test_insert_and_search_single() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        tree.insert(&mut pager, 1, &row(1)).unwrap();
        let found = tree.search(&mut pager, 1).unwrap().unwrap();
        assert_eq!(found, row(1));
    }

    #[test]
    fn test_search_missing_key() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();
        assert!(tree.search(&mut pager, 42).unwrap().is_none());

        tree.insert(&mut pager, 1, &row(1)).unwrap();
        assert!(tree.search(&mut pager, 42).unwrap().is_none());
    }

    #[test]
    fn test_insert_out_of_order_scans_sorted() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        for key in [5u64, 1, 9, 3, 7, 2, 8] {
            tree.insert(&mut pager, key, &row(key as i64)).unwrap();
        }

        let keys: Vec<u64> = tree
            .scan(&mut pager)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 5, 7, 8, 9]);
    }

    #[test]
    fn test_duplicate_insert_replaces_payload() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        tree.insert(&mut pager, 4, &row(4)).unwrap();
        let replacement = Record::new(vec![Value::Text("replaced".into())]);
        tree.insert(&mut pager, 4, &replacement).unwrap();

        let rows = tree.scan(&mut pager).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, replacement);
        assert_eq!(tree.search(&mut pager, 4).unwrap().unwrap(), replacement);
    }

    #[test]
    fn test_zero_and_large_keys() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        tree.insert(&mut pager, 0, &row(0)).unwrap();
        tree.insert(&mut pager, u32::MAX as u64 + 17, &row(17)).unwrap();

        assert!(tree.search(&mut pager, 0).unwrap().is_some());
        assert!(tree.search(&mut pager, u32::MAX as u64 + 17).unwrap().is_some());
    }

    #[test]
    fn test_root_split_changes_root_page() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();
        let original_root = tree.root_page();

        for key in 0..150u64 {
            tree.insert(&mut pager, key, &row(key as i64)).unwrap();
        }

        assert_ne!(tree.root_page(), original_root);
        let root = Node::load(&mut pager, tree.root_page()).unwrap();
        assert!(!root.is_leaf());

        // every key is still reachable, including promoted separators
        for key in 0..150u64 {
            let found = tree.search(&mut pager, key).unwrap();
            assert_eq!(found.unwrap(), row(key as i64), "key {key}");
        }
    }

    #[test]
    fn test_many_random_order_inserts() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        // deterministic shuffle of 0..500
        let mut keys: Vec<u64> = (0..500).collect();
        for i in 0..keys.len() {
            let j = (i * 7919 + 13) % keys.len();
            keys.swap(i, j);
        }

        for &key in &keys {
            tree.insert(&mut pager, key, &row(key as i64)).unwrap();
        }

        let scanned: Vec<u64> = tree
            .scan(&mut pager)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(scanned, (0..500).collect::<Vec<u64>>());

        for key in (0..500).step_by(17) {
            assert!(tree.search(&mut pager, key).unwrap().is_some(), "key {key}");
        }
    }

    #[test]
    fn test_internal_node_splits() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        // enough keys to overflow the first internal root as well
        let count = 8000u64;
        for key in 0..count {
            tree.insert(&mut pager, key, &Record::new(vec![Value::Int(key as i64)]))
                .unwrap();
        }

        let root = Node::load(&mut pager, tree.root_page()).unwrap();
        assert!(!root.is_leaf());

        let scanned = tree.scan(&mut pager).unwrap();
        assert_eq!(scanned.len(), count as usize);
        for (i, (key, _)) in scanned.iter().enumerate() {
            assert_eq!(*key, i as u64);
        }

        for key in (0..count).step_by(211) {
            let found = tree.search(&mut pager, key).unwrap();
            assert_eq!(
                found.unwrap().values(),
                &[Value::Int(key as i64)],
                "key {key}"
            );
        }
    }

    #[test]
    fn test_delete_existing_and_missing() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        for key in 0..20u64 {
            tree.insert(&mut pager, key, &row(key as i64)).unwrap();
        }

        assert!(tree.delete(&mut pager, 7).unwrap());
        assert!(!tree.delete(&mut pager, 7).unwrap());
        assert!(!tree.delete(&mut pager, 999).unwrap());

        assert!(tree.search(&mut pager, 7).unwrap().is_none());
        assert_eq!(tree.scan(&mut pager).unwrap().len(), 19);
    }

    #[test]
    fn test_delete_in_split_tree() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        for key in 0..300u64 {
            tree.insert(&mut pager, key, &row(key as i64)).unwrap();
        }
        for key in 0..10u64 {
            assert!(tree.delete(&mut pager, key).unwrap(), "key {key}");
        }

        let keys: Vec<u64> = tree
            .scan(&mut pager)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys.len(), 290);
        assert_eq!(keys[0], 10);
    }

    #[test]
    fn test_update_grows_record() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        tree.insert(&mut pager, 1, &row(1)).unwrap();
        let bigger = Record::new(vec![Value::Text("x".repeat(600))]);
        assert!(tree.update(&mut pager, 1, &bigger).unwrap());
        assert_eq!(tree.search(&mut pager, 1).unwrap().unwrap(), bigger);

        assert!(!tree.update(&mut pager, 2, &bigger).unwrap());
    }

    #[test]
    fn test_oversized_record_rejected() {
        let (_f, mut pager) = open_pager();
        let mut tree = BTree::create(&mut pager).unwrap();

        let huge = Record::new(vec![Value::Blob(vec![0xAB; 4000])]);
        assert!(matches!(
            tree.insert(&mut pager, 1, &huge),
            Err(DbError::ResourceLimit(_))
        ));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let file = NamedTempFile::new().unwrap();
        let root;
        {
            let mut pager = Pager::open(file.path(), DEFAULT_PAGE_SIZE).unwrap();
            let mut tree = BTree::create(&mut pager).unwrap();
            for key in 0..250u64 {
                tree.insert(&mut pager, key, &row(key as i64)).unwrap();
            }
            root = tree.root_page();
            pager.close().unwrap();
        }

        let mut pager = Pager::open(file.path(), DEFAULT_PAGE_SIZE).unwrap();
        let tree = BTree::open(root);
        let rows = tree.scan(&mut pager).unwrap();
        assert_eq!(rows.len(), 250);
        assert_eq!(rows[249].0, 249);
        assert_eq!(
            tree.search(&mut pager, 123).unwrap().unwrap(),
            row(123)
        );
    }
}

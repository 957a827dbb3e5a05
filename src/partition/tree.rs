//! Arena-backed hierarchy of partition predicates.
//!
//! Every directory level of a listing becomes a node carrying the predicate
//! its own segment implies. Files are leaves and become fragments. Pruning
//! walks the tree depth first and discards whole subtrees whose accumulated
//! predicate contradicts the filter.

use super::Partitioning;
use crate::{
    expr::{is_unsatisfiable, Predicate},
    fs::{relative_segments, FileInfo, FileKind},
    observability::log_debug,
};

const ROOT: usize = 0;

#[derive(Debug)]
struct Node {
    segment: String,
    path: String,
    predicate: Predicate,
    parent: Option<usize>,
    children: Vec<usize>,
    kind: FileKind,
    fragment: Option<usize>,
}

impl Node {
    fn new(segment: &str, path: String, parent: Option<usize>, kind: FileKind) -> Self {
        Self {
            segment: segment.to_string(),
            path,
            predicate: Predicate::always_true(),
            parent,
            children: Vec::new(),
            kind,
            fragment: None,
        }
    }
}

/// Read-only partition hierarchy over a file listing.
///
/// Nodes live in a flat arena and refer to their parent by index. Fragments
/// are the file leaves, numbered in depth-first order with siblings visited by
/// segment name.
#[derive(Debug)]
pub struct PartitionTree {
    nodes: Vec<Node>,
    leaves: Vec<usize>,
}

impl PartitionTree {
    /// Builds a tree from `listing`, decoding directory segments below
    /// `base_dir` with `partitioning`.
    ///
    /// Entries outside `base_dir` are ignored. Segments the partitioning cannot
    /// decode contribute no restriction.
    pub fn from_listing<I>(listing: I, base_dir: &str, partitioning: &dyn Partitioning) -> Self
    where
        I: IntoIterator<Item = FileInfo>,
    {
        let mut builder = Builder::new(base_dir);
        let mut listing: Vec<FileInfo> = listing.into_iter().collect();
        listing.sort_by(|lhs, rhs| lhs.path.cmp(&rhs.path));
        for info in listing {
            let Some(segments) = relative_segments(base_dir, &info.path) else {
                continue;
            };
            builder.insert(&segments, info.kind, None, Some(partitioning));
        }
        builder.finish()
    }

    /// Builds a tree whose nodes carry explicitly supplied predicates.
    ///
    /// Implied parent directories that are not listed carry `true`.
    pub fn with_predicates<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (FileInfo, Predicate)>,
    {
        let mut builder = Builder::new("");
        let mut entries: Vec<(FileInfo, Predicate)> = entries.into_iter().collect();
        entries.sort_by(|(lhs, _), (rhs, _)| lhs.path.cmp(&rhs.path));
        for (info, predicate) in entries {
            let Some(segments) = relative_segments("", &info.path) else {
                continue;
            };
            builder.insert(&segments, info.kind, Some(predicate), None);
        }
        builder.finish()
    }

    /// Number of fragments (file leaves).
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// True when the listing held no files.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Path of fragment `fragment`.
    pub fn fragment_path(&self, fragment: usize) -> Option<&str> {
        self.leaves
            .get(fragment)
            .map(|&node| self.nodes[node].path.as_str())
    }

    /// Paths of every fragment in fragment order.
    pub fn fragment_paths(&self) -> impl Iterator<Item = &str> + '_ {
        self.leaves.iter().map(|&node| self.nodes[node].path.as_str())
    }

    /// Partition predicate of fragment `fragment`: the de-duplicated
    /// conjunction of its own and every ancestor's predicate, root excluded.
    pub fn partition_predicate(&self, fragment: usize) -> Option<Predicate> {
        let mut node = *self.leaves.get(fragment)?;
        let mut lineage = Vec::new();
        while node != ROOT {
            lineage.push(self.nodes[node].predicate.clone());
            node = self.nodes[node].parent?;
        }
        lineage.reverse();
        Some(Predicate::and_distinct(lineage))
    }

    /// Fragments that may satisfy `filter` given the dataset's `root` predicate.
    ///
    /// A subtree is skipped only when `filter AND root AND node` is provably
    /// unsatisfiable, so a fragment that could match is never dropped.
    pub fn prune(&self, filter: &Predicate, root: &Predicate) -> Vec<usize> {
        let mut survivors = Vec::new();
        if is_unsatisfiable(filter, root) {
            log_debug!(component = "prune", event = "root_pruned", filter = %filter);
            return survivors;
        }
        self.visit(ROOT, &Predicate::always_true(), filter, root, &mut survivors);
        survivors
    }

    fn visit(
        &self,
        node: usize,
        effective: &Predicate,
        filter: &Predicate,
        root: &Predicate,
        survivors: &mut Vec<usize>,
    ) {
        for &child in &self.nodes[node].children {
            let own = &self.nodes[child].predicate;
            let refined = if own.is_trivially_true() {
                effective.clone()
            } else {
                let refined = Predicate::and_distinct([effective.clone(), own.clone()]);
                let guarantee = Predicate::and_distinct([root.clone(), refined.clone()]);
                if is_unsatisfiable(filter, &guarantee) {
                    log_debug!(
                        component = "prune",
                        event = "subtree_pruned",
                        path = %self.nodes[child].path,
                    );
                    continue;
                }
                refined
            };
            match self.nodes[child].fragment {
                Some(fragment) => survivors.push(fragment),
                None => self.visit(child, &refined, filter, root, survivors),
            }
        }
    }
}

struct Builder {
    nodes: Vec<Node>,
}

impl Builder {
    fn new(base_dir: &str) -> Self {
        let root = Node::new(
            "",
            base_dir.trim_matches('/').to_string(),
            None,
            FileKind::Directory,
        );
        Self { nodes: vec![root] }
    }

    fn insert(
        &mut self,
        segments: &[&str],
        kind: FileKind,
        explicit: Option<Predicate>,
        partitioning: Option<&dyn Partitioning>,
    ) {
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut node = ROOT;
        for (depth, segment) in parents.iter().enumerate() {
            node = self.child(node, segment, FileKind::Directory, depth, partitioning);
        }
        let leaf = self.child(node, last, kind, parents.len(), partitioning);
        self.nodes[leaf].kind = kind;
        if let Some(predicate) = explicit {
            self.nodes[leaf].predicate = predicate;
        }
    }

    fn child(
        &mut self,
        parent: usize,
        segment: &str,
        kind: FileKind,
        depth: usize,
        partitioning: Option<&dyn Partitioning>,
    ) -> usize {
        if let Some(&existing) = self.nodes[parent]
            .children
            .iter()
            .find(|&&child| self.nodes[child].segment == segment)
        {
            return existing;
        }
        let path = crate::fs::join_path(&self.nodes[parent].path, segment);
        let mut node = Node::new(segment, path, Some(parent), kind);
        if kind == FileKind::Directory {
            if let Some(predicate) =
                partitioning.and_then(|partitioning| partitioning.parse_segment(depth, segment))
            {
                node.predicate = predicate;
            }
        }
        let index = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(index);
        index
    }

    fn finish(mut self) -> PartitionTree {
        let mut order: Vec<Vec<usize>> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut children = node.children.clone();
            children.sort_by(|&lhs, &rhs| self.nodes[lhs].segment.cmp(&self.nodes[rhs].segment));
            order.push(children);
        }
        for (node, children) in self.nodes.iter_mut().zip(order) {
            node.children = children;
        }

        let mut leaves = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(node) = stack.pop() {
            if self.nodes[node].kind == FileKind::File {
                self.nodes[node].fragment = Some(leaves.len());
                leaves.push(node);
            }
            stack.extend(self.nodes[node].children.iter().rev());
        }
        PartitionTree {
            nodes: self.nodes,
            leaves,
        }
    }
}

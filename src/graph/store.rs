//! §4.9 / §6: the process-wide label/type → producer catalog, mutated only
//! by `CREATE VIRTUAL` statements and otherwise read-only. A producer stores
//! its compiled sub-query clause list rather than raw source text — per
//! §4.5 "does not execute the sub-query eagerly" — so resolving it later
//! only has to build and run an Operation chain, not re-tokenize/re-parse.
//!
//! Guarded by a `tokio::sync::RwLock` per §5: write on `CREATE VIRTUAL`,
//! read otherwise, so concurrent Runners resolving labels/types never block
//! an executor thread while another Runner's `CREATE VIRTUAL` is in flight.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::parser::Clause;

#[derive(Clone)]
pub struct NodeProducer {
    pub label: String,
    pub clauses: Vec<Clause>,
}

#[derive(Clone)]
pub struct RelationshipProducer {
    pub rel_type: String,
    pub left_label: String,
    pub right_label: String,
    pub clauses: Vec<Clause>,
}

#[derive(Default)]
struct GraphStoreInner {
    nodes: HashMap<String, NodeProducer>,
    relationships: HashMap<String, RelationshipProducer>,
}

pub struct GraphStore {
    inner: RwLock<GraphStoreInner>,
}

impl Default for GraphStore {
    fn default() -> Self {
        GraphStore::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        GraphStore { inner: RwLock::new(GraphStoreInner::default()) }
    }

    /// Concurrent `CREATE VIRTUAL` against the same label is last-writer-wins
    /// (§5).
    pub async fn register_node(&self, label: String, clauses: Vec<Clause>) {
        log::info!("registering virtual node producer :{}", label);
        let mut inner = self.inner.write().await;
        inner.nodes.insert(label.clone(), NodeProducer { label, clauses });
    }

    pub async fn register_relationship(
        &self,
        rel_type: String,
        left_label: String,
        right_label: String,
        clauses: Vec<Clause>,
    ) {
        log::info!(
            "registering virtual relationship producer :{} ({} -> {})",
            rel_type,
            left_label,
            right_label
        );
        let mut inner = self.inner.write().await;
        inner
            .relationships
            .insert(rel_type.clone(), RelationshipProducer { rel_type, left_label, right_label, clauses });
    }

    pub async fn node_producer(&self, label: &str) -> Option<NodeProducer> {
        self.inner.read().await.nodes.get(label).cloned()
    }

    pub async fn relationship_producer(&self, rel_type: &str) -> Option<RelationshipProducer> {
        self.inner.read().await.relationships.get(rel_type).cloned()
    }

    /// `CALL schema()` (§6): every registered label, in name order.
    pub async fn node_labels(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut labels: Vec<_> = inner.nodes.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// `CALL schema()` (§6): every registered relationship type, with its
    /// declared endpoint labels, in name order.
    pub async fn relationship_types(&self) -> Vec<(String, String, String)> {
        let inner = self.inner.read().await;
        let mut types: Vec<_> = inner
            .relationships
            .values()
            .map(|p| (p.rel_type.clone(), p.left_label.clone(), p.right_label.clone()))
            .collect();
        types.sort_by(|a, b| a.0.cmp(&b.0));
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unregistered_label_resolves_to_none() {
        let store = GraphStore::new();
        assert!(store.node_producer("Person").await.is_none());
    }

    #[tokio::test]
    async fn re_registering_a_label_is_last_writer_wins() {
        let store = GraphStore::new();
        store.register_node("Person".into(), vec![Clause::Return { items: vec![] }]).await;
        store.register_node("Person".into(), vec![]).await;
        assert_eq!(store.node_producer("Person").await.unwrap().clauses.len(), 0);
    }

    #[tokio::test]
    async fn node_labels_are_sorted() {
        let store = GraphStore::new();
        store.register_node("Zebra".into(), vec![]).await;
        store.register_node("Apple".into(), vec![]).await;
        assert_eq!(store.node_labels().await, vec!["Apple".to_string(), "Zebra".to_string()]);
    }
}

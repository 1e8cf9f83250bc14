//! The collector: per-fetch runtime engine that accumulates scanned
//! rows, indexes them by join key, and merges child result sets into
//! their parents.
//!
//! One collector exists per view in the graph for the duration of one
//! read. Rows are appended in scan order; the join-key position map
//! preserves scan order per key, so multiple matches merge in the
//! order their rows arrived. Children merge bottom-up (deepest
//! relation first), and every mutation of shared state goes through
//! the tree-wide [`MergeArbiter`].

mod arbiter;
mod key;
mod tree;

pub use arbiter::MergeArbiter;
pub use key::{Key, normalize_key};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{EngineError, EngineResult};
use crate::schema::{Record, RecordSchema};
use crate::selector::{Selector, Session};
use crate::value::Value;
use crate::view::{Cardinality, MatchStrategy, Relation, View};

use tree::SelfRefBinding;

/// How a child collector merges into its parent.
#[derive(Debug, Clone)]
struct RelationBinding {
    name: String,
    cardinality: Cardinality,
    strategy: MatchStrategy,
    /// Parent-side join column (keys the parent's position map).
    parent_column: String,
    /// Parent-side join field position, when mapped by the schema.
    parent_field: Option<usize>,
    /// Holder field position on the parent schema.
    holder: usize,
    /// Child-side join column.
    on_column: String,
    /// Child-side join field position, when mapped by the schema.
    on_field: Option<usize>,
}

/// One join column this collector indexes while scanning.
#[derive(Debug, Clone)]
struct IndexColumn {
    column: String,
    field: Option<usize>,
}

/// Ephemeral per-fetch collector for one view.
pub struct Collector {
    slot: usize,
    parent_slot: Option<usize>,
    view: Arc<View>,
    schema: Arc<RecordSchema>,
    relation: Option<RelationBinding>,
    children: Vec<Arc<Collector>>,
    parallel: bool,
    arbiter: Arc<MergeArbiter>,
    fetched_tx: watch::Sender<bool>,
    parent_fetched: Option<watch::Receiver<bool>>,
    index_columns: Vec<IndexColumn>,
    self_ref: Option<SelfRefBinding>,
}

impl Collector {
    /// Build the collector tree for an initialized view graph.
    ///
    /// Relations whose holder is excluded by the caller's projection
    /// get no collector and are not fetched; unprojected scalar fields
    /// are still scanned (join keys may need them) but hidden from the
    /// rendered output.
    pub fn build(
        view: &View,
        session: &Session,
        arbiter: &Arc<MergeArbiter>,
    ) -> EngineResult<Arc<Collector>> {
        Self::build_node(view, None, None, session, arbiter)
    }

    fn build_node(
        view: &View,
        relation: Option<&Relation>,
        parent: Option<(usize, &Arc<RecordSchema>, watch::Receiver<bool>)>,
        session: &Session,
        arbiter: &Arc<MergeArbiter>,
    ) -> EngineResult<Arc<Collector>> {
        let schema = match session.selector(&view.name) {
            Some(sel) if !sel.projection.is_empty() => {
                apply_projection(view.schema()?.as_ref(), sel)?
            }
            _ => view.schema()?,
        };
        let slot = arbiter.allocate();
        let (fetched_tx, fetched_rx) = watch::channel(false);

        let (parent_slot, parent_fetched, binding) = match (relation, parent) {
            (Some(rel), Some((parent_slot, parent_schema, parent_rx))) => {
                let holder = parent_schema.field_index(&rel.holder).ok_or_else(|| {
                    EngineError::Internal(format!("holder '{}' missing from parent schema", rel.holder))
                })?;
                let binding = RelationBinding {
                    name: rel.name.clone(),
                    cardinality: rel.cardinality,
                    strategy: rel.strategy,
                    parent_column: rel.column.clone(),
                    parent_field: parent_schema.field_index(&rel.column),
                    holder,
                    on_column: rel.of.on_column.clone(),
                    on_field: schema.field_index(&rel.of.on_column),
                };
                (Some(parent_slot), Some(parent_rx), Some(binding))
            }
            _ => (None, None, None),
        };

        let included: Vec<&Relation> = view
            .with
            .iter()
            .filter(|rel| {
                session
                    .selector(&view.name)
                    .is_none_or(|sel| sel.includes(&rel.holder))
            })
            .collect();

        let mut seen = HashSet::new();
        let index_columns = included
            .iter()
            .filter(|rel| seen.insert(rel.column.clone()))
            .map(|rel| IndexColumn {
                column: rel.column.clone(),
                field: schema.field_index(&rel.column),
            })
            .collect();

        let self_ref = match &view.self_reference {
            Some(sr) => Some(SelfRefBinding {
                holder: schema.field_index(&sr.holder).ok_or_else(|| {
                    EngineError::Internal(format!("self-reference holder '{}' unresolved", sr.holder))
                })?,
                parent_column: schema.field_index(&sr.parent_column).ok_or_else(|| {
                    EngineError::Internal(format!("self-reference column '{}' unresolved", sr.parent_column))
                })?,
                child_column: schema.field_index(&sr.child_column).ok_or_else(|| {
                    EngineError::Internal(format!("self-reference column '{}' unresolved", sr.child_column))
                })?,
            }),
            None => None,
        };

        let parallel = relation.is_some_and(Relation::supports_parallel);
        let mut collector = Collector {
            slot,
            parent_slot,
            view: Arc::new(view.clone()),
            schema: schema.clone(),
            relation: binding,
            children: Vec::new(),
            parallel,
            arbiter: arbiter.clone(),
            fetched_tx,
            parent_fetched,
            index_columns,
            self_ref,
        };

        for rel in included {
            let child = Self::build_node(
                &rel.of.view,
                Some(rel),
                Some((slot, &schema, fetched_rx.clone())),
                session,
                arbiter,
            )?;
            collector.children.push(child);
        }

        Ok(Arc::new(collector))
    }

    pub fn view(&self) -> &Arc<View> {
        &self.view
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn children(&self) -> &[Arc<Collector>] {
        &self.children
    }

    /// True for a child whose fetch must wait for the parent's
    /// completion signal.
    pub fn is_sequential_child(&self) -> bool {
        self.relation.is_some() && !self.parallel
    }

    /// Append one scanned row in scan order, recording join-key
    /// positions for every relation whose child might match it.
    /// `unmapped` carries scanned columns absent from the schema.
    pub fn add_row(&self, record: Record, unmapped: HashMap<String, Value>) -> EngineResult<()> {
        self.arbiter.with_state(self.slot, |state| {
            let pos = state.dest.len();
            for ic in &self.index_columns {
                let value = match ic.field {
                    Some(idx) => record.get_at(idx).cloned().unwrap_or(Value::Null),
                    None => unmapped.get(&ic.column).cloned().unwrap_or(Value::Null),
                };
                let key = normalize_key(&value)?;
                if key.is_null() {
                    continue;
                }
                state
                    .positions
                    .entry(ic.column.clone())
                    .or_default()
                    .entry(key)
                    .or_default()
                    .push(pos);
            }
            state.dest.push(record);
            state.unmapped.push(unmapped);
            Ok(())
        })
    }

    /// Mark all rows for this view as scanned, releasing children
    /// waiting on the sequential gate.
    pub fn fetched(&self) {
        self.fetched_tx.send_replace(true);
    }

    /// Wait for the parent's completion signal (a one-shot gate); a
    /// root collector returns immediately.
    pub async fn wait_parent_fetched(&self) -> EngineResult<()> {
        let Some(rx) = &self.parent_fetched else {
            return Ok(());
        };
        let mut rx = rx.clone();
        rx.wait_for(|fetched| *fetched)
            .await
            .map_err(|_| EngineError::Internal("parent fetch gate dropped".to_string()))?;
        Ok(())
    }

    /// Distinct parent join-key values in first-seen order, plus the
    /// child-side column name for the `IN` predicate.
    pub fn parent_placeholders(&self) -> EngineResult<(Vec<Value>, String)> {
        let rel = self
            .relation
            .as_ref()
            .ok_or_else(|| EngineError::Internal("root collector has no parent keys".to_string()))?;
        let parent_slot = self
            .parent_slot
            .ok_or_else(|| EngineError::Internal("missing parent slot".to_string()))?;

        self.arbiter.with_states(|states| {
            let parent = &states[parent_slot];
            let mut seen = HashSet::new();
            let mut values = Vec::new();
            for (i, row) in parent.dest.iter().enumerate() {
                let value = match rel.parent_field {
                    Some(idx) => row.get_at(idx).cloned().unwrap_or(Value::Null),
                    None => parent
                        .unmapped
                        .get(i)
                        .and_then(|m| m.get(&rel.parent_column))
                        .cloned()
                        .unwrap_or(Value::Null),
                };
                let key = normalize_key(&value)?;
                if key.is_null() {
                    continue;
                }
                if seen.insert(key.clone()) {
                    values.push(key.into_value());
                }
            }
            Ok((values, rel.on_column.clone()))
        })
    }

    /// Recursively merge all child collectors bottom-up, then apply
    /// the self-reference rebuild if the view declares one.
    pub fn merge_data(&self) -> EngineResult<()> {
        for child in &self.children {
            child.merge_data()?;
            child.merge_into_parent()?;
        }
        if let Some(binding) = self.self_ref {
            self.arbiter.with_state(self.slot, |state| {
                let rows = std::mem::take(&mut state.dest);
                state.unmapped.clear();
                state.dest = tree::build_tree(rows, binding)?;
                Ok::<_, EngineError>(())
            })?;
        }
        Ok(())
    }

    /// Join this collector's rows into the parent holder slots.
    /// Unmatched child rows are dropped without error.
    fn merge_into_parent(&self) -> EngineResult<()> {
        let rel = self
            .relation
            .as_ref()
            .ok_or_else(|| EngineError::Internal("root collector cannot merge upward".to_string()))?;
        let parent_slot = self
            .parent_slot
            .ok_or_else(|| EngineError::Internal("missing parent slot".to_string()))?;

        let merged = self.arbiter.with_states(|states| {
            let child_rows = std::mem::take(&mut states[self.slot].dest);
            let child_unmapped = std::mem::take(&mut states[self.slot].unmapped);
            let parent = &mut states[parent_slot];

            // The position index is normally built while the parent
            // scans; build it here if this relation's column was
            // never indexed.
            if !parent.positions.contains_key(&rel.parent_column) {
                let mut index: HashMap<Key, Vec<usize>> = HashMap::new();
                for (i, row) in parent.dest.iter().enumerate() {
                    let value = match rel.parent_field {
                        Some(idx) => row.get_at(idx).cloned().unwrap_or(Value::Null),
                        None => parent
                            .unmapped
                            .get(i)
                            .and_then(|m| m.get(&rel.parent_column))
                            .cloned()
                            .unwrap_or(Value::Null),
                    };
                    let key = normalize_key(&value)?;
                    if !key.is_null() {
                        index.entry(key).or_default().push(i);
                    }
                }
                parent.positions.insert(rel.parent_column.clone(), index);
            }

            let mut merged = 0usize;
            for (i, row) in child_rows.into_iter().enumerate() {
                let value = match rel.on_field {
                    Some(idx) => row.get_at(idx).cloned().unwrap_or(Value::Null),
                    None => child_unmapped
                        .get(i)
                        .and_then(|m| m.get(&rel.on_column))
                        .cloned()
                        .unwrap_or(Value::Null),
                };
                let key = normalize_key(&value)?;
                if key.is_null() {
                    continue;
                }
                let positions = match parent
                    .positions
                    .get(&rel.parent_column)
                    .and_then(|m| m.get(&key))
                {
                    Some(positions) => positions.clone(),
                    None => continue,
                };
                for &p in &positions {
                    parent.dest[p].attach_child(rel.holder, row.clone())?;
                    merged += 1;
                }
            }
            Ok::<_, EngineError>(merged)
        })?;

        tracing::debug!(
            relation = %rel.name,
            cardinality = ?rel.cardinality,
            strategy = %rel.strategy,
            merged,
            "merged child rows into parent"
        );
        Ok(())
    }

    /// Number of rows collected so far.
    pub fn row_count(&self) -> usize {
        self.arbiter.with_state(self.slot, |state| state.dest.len())
    }

    /// Drain the destination slice (the final output on the root).
    pub fn take_output(&self) -> Vec<Record> {
        self.arbiter
            .with_state(self.slot, |state| std::mem::take(&mut state.dest))
    }
}

/// Clone a view schema with every field outside the projection marked
/// hidden. Field order and indexes are unchanged, so join-key and
/// holder positions stay valid.
fn apply_projection(schema: &RecordSchema, selector: &Selector) -> EngineResult<Arc<RecordSchema>> {
    let mut projected = RecordSchema::new();
    for field in schema.fields() {
        let mut field = field.clone();
        field.hidden = field.hidden || !selector.includes(&field.name);
        projected.push_field(field)?;
    }
    Ok(Arc::new(projected))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::value::DataType;

    fn users_with_orders(strategy: MatchStrategy) -> View {
        let orders = View::new("orders", "orders").with_columns(vec![
            Column::new("id", DataType::Int),
            Column::new("user_id", DataType::Int),
        ]);
        let mut view = View::new("users", "users")
            .with_columns(vec![
                Column::new("id", DataType::Int),
                Column::new("name", DataType::Text),
            ])
            .with_relation(
                Relation::many("user_orders", "id", "Orders", orders, "user_id")
                    .with_strategy(strategy),
            );
        view.init().unwrap();
        view
    }

    fn record(schema: &Arc<RecordSchema>, values: &[(usize, Value)]) -> Record {
        let mut rec = Record::new(schema.clone());
        for (idx, value) in values {
            rec.set_at(*idx, value.clone()).unwrap();
        }
        rec
    }

    fn scan_users(collector: &Collector, ids: &[i64]) {
        for &id in ids {
            let rec = record(
                collector.schema(),
                &[(0, Value::Int(id)), (1, Value::Text(format!("user-{id}")))],
            );
            collector.add_row(rec, HashMap::new()).unwrap();
        }
    }

    fn scan_orders(child: &Collector, rows: &[(i64, i64)]) {
        for &(id, user_id) in rows {
            let rec = record(
                child.schema(),
                &[(0, Value::Int(id)), (1, Value::Int(user_id))],
            );
            child.add_row(rec, HashMap::new()).unwrap();
        }
    }

    fn order_ids(json: &serde_json::Value) -> Vec<i64> {
        json["Orders"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn merge_attaches_children_exactly_once_and_drops_orphans() {
        let view = users_with_orders(MatchStrategy::ReadAll);
        let arbiter = MergeArbiter::new();
        let root = Collector::build(&view, &Session::new(), &arbiter).unwrap();

        scan_users(&root, &[1, 2]);
        scan_orders(&root.children()[0], &[(10, 1), (11, 2), (12, 1), (13, 99)]);

        root.merge_data().unwrap();
        let output = root.take_output();

        assert_eq!(output.len(), 2);
        assert_eq!(order_ids(&output[0].to_json()), vec![10, 12]);
        assert_eq!(order_ids(&output[1].to_json()), vec![11]);
    }

    #[test]
    fn strategies_produce_identical_output() {
        let mut outputs = Vec::new();
        for strategy in [MatchStrategy::ReadAll, MatchStrategy::ReadMatched] {
            let view = users_with_orders(strategy);
            let arbiter = MergeArbiter::new();
            let root = Collector::build(&view, &Session::new(), &arbiter).unwrap();

            scan_users(&root, &[1, 2, 3]);
            scan_orders(&root.children()[0], &[(10, 1), (11, 3), (12, 1)]);

            root.merge_data().unwrap();
            let json: Vec<_> = root.take_output().iter().map(Record::to_json).collect();
            outputs.push(json);
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn one_cardinality_overwrites_holder() {
        let profile = View::new("profiles", "profiles").with_columns(vec![
            Column::new("id", DataType::Int),
            Column::new("user_id", DataType::Int),
        ]);
        let mut view = View::new("users", "users")
            .with_columns(vec![Column::new("id", DataType::Int)])
            .with_relation(Relation::one("user_profile", "id", "Profile", profile, "user_id"));
        view.init().unwrap();

        let arbiter = MergeArbiter::new();
        let root = Collector::build(&view, &Session::new(), &arbiter).unwrap();
        scan_users(&root, &[1]);
        scan_orders(&root.children()[0], &[(100, 1)]);

        root.merge_data().unwrap();
        let output = root.take_output();
        let json = output[0].to_json();
        assert_eq!(json["Profile"]["id"].as_i64(), Some(100));
    }

    #[test]
    fn parent_placeholders_dedupe_in_first_seen_order() {
        let view = users_with_orders(MatchStrategy::ReadMatched);
        let arbiter = MergeArbiter::new();
        let root = Collector::build(&view, &Session::new(), &arbiter).unwrap();

        scan_users(&root, &[3, 1, 3, 2]);

        let (values, column) = root.children()[0].parent_placeholders().unwrap();
        assert_eq!(column, "user_id");
        assert_eq!(values, vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn projection_excludes_relations() {
        let view = users_with_orders(MatchStrategy::ReadAll);
        let mut session = Session::new();
        session.selector_mut("users").projection = vec!["id".to_string(), "name".to_string()];

        let arbiter = MergeArbiter::new();
        let root = Collector::build(&view, &session, &arbiter).unwrap();
        assert!(root.children().is_empty());
    }

    #[test]
    fn projection_hides_unlisted_scalar_fields() {
        let view = users_with_orders(MatchStrategy::ReadAll);
        let mut session = Session::new();
        session.selector_mut("users").projection = vec!["name".to_string(), "Orders".to_string()];

        let arbiter = MergeArbiter::new();
        let root = Collector::build(&view, &session, &arbiter).unwrap();

        // The join column is still scanned and merged on, but only
        // projected fields reach the output.
        scan_users(&root, &[1]);
        scan_orders(&root.children()[0], &[(10, 1)]);
        root.merge_data().unwrap();

        let json = root.take_output()[0].to_json();
        assert!(json.get("id").is_none());
        assert_eq!(json["name"], serde_json::json!("user-1"));
        assert_eq!(order_ids(&json), vec![10]);
    }

    #[tokio::test]
    async fn sequential_gate_releases_on_fetched() {
        let view = users_with_orders(MatchStrategy::ReadMatched);
        let arbiter = MergeArbiter::new();
        let root = Collector::build(&view, &Session::new(), &arbiter).unwrap();
        let child = root.children()[0].clone();
        assert!(child.is_sequential_child());

        let waiter = tokio::spawn(async move { child.wait_parent_fetched().await });
        root.fetched();
        waiter.await.unwrap().unwrap();
    }

    #[test]
    fn self_reference_rebuild_runs_after_merge() {
        let mut view = View::new("categories", "categories")
            .with_columns(vec![
                Column::new("id", DataType::Int),
                Column::new("parent_id", DataType::Int),
            ])
            .with_self_reference("Children", "parent_id", "id");
        view.init().unwrap();

        let arbiter = MergeArbiter::new();
        let root = Collector::build(&view, &Session::new(), &arbiter).unwrap();
        for (id, parent) in [(1, Value::Null), (2, Value::Int(1)), (3, Value::Int(1))] {
            let rec = record(root.schema(), &[(0, Value::Int(id)), (1, parent)]);
            root.add_row(rec, HashMap::new()).unwrap();
        }

        root.merge_data().unwrap();
        let output = root.take_output();
        assert_eq!(output.len(), 1);
        let json = output[0].to_json();
        assert_eq!(json["Children"].as_array().unwrap().len(), 2);
    }
}

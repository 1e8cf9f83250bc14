//! The reader: view registry plus the concurrent fetch-and-merge
//! pipeline.
//!
//! One `Reader` holds initialized views, a row source, and the codec
//! registry. A read builds an ephemeral collector tree, spawns one
//! fetch task per view, and merges bottom-up once every task has
//! finished. `ReadAll` children fetch concurrently with their parent;
//! sequential strategies wait on the parent's completion gate and
//! constrain their query with the parent's join keys.

mod sql;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collect::{Collector, MergeArbiter};
use crate::error::{EngineError, EngineResult};
use crate::schema::Record;
use crate::selector::{Selector, Session};
use crate::source::{Codec, CodecRegistry, RowSource};
use crate::view::View;

/// Long-lived engine entry point.
pub struct Reader {
    source: Arc<dyn RowSource>,
    codecs: Arc<CodecRegistry>,
    views: DashMap<String, Arc<View>>,
}

/// Per-read shared state handed to every fetch task.
struct FetchContext {
    source: Arc<dyn RowSource>,
    codecs: Arc<CodecRegistry>,
    cancel: CancellationToken,
    /// Effective selector per view name, inheritance already applied.
    selectors: HashMap<String, Selector>,
}

impl Reader {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self {
            source,
            codecs: Arc::new(CodecRegistry::new()),
            views: DashMap::new(),
        }
    }

    pub fn with_codecs(mut self, codecs: Arc<CodecRegistry>) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn codecs(&self) -> &Arc<CodecRegistry> {
        &self.codecs
    }

    /// Initialize and register a view graph under its root name.
    ///
    /// Initialization failures and name collisions are fatal; every
    /// codec named by a column must already be registered.
    pub fn register(&self, mut view: View) -> EngineResult<()> {
        view.init()?;
        check_codecs(&view, &self.codecs)?;
        if self.views.contains_key(&view.name) {
            return Err(EngineError::DuplicateView(view.name));
        }
        tracing::debug!(view = %view.name, "registered view");
        self.views.insert(view.name.clone(), Arc::new(view));
        Ok(())
    }

    pub fn view(&self, name: &str) -> Option<Arc<View>> {
        self.views.get(name).map(|entry| entry.value().clone())
    }

    /// Materialize a view into nested records.
    pub async fn read(&self, view: &str, session: &Session) -> EngineResult<Vec<Record>> {
        self.read_with_cancel(view, session, CancellationToken::new())
            .await
    }

    /// Materialize a view, aborting with `Cancelled` when the token
    /// fires. Partial output is discarded.
    pub async fn read_with_cancel(
        &self,
        view: &str,
        session: &Session,
        cancel: CancellationToken,
    ) -> EngineResult<Vec<Record>> {
        let view = self
            .views
            .get(view)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::ViewNotFound(view.to_string()))?;

        let arbiter = MergeArbiter::new();
        let root = Collector::build(&view, session, &arbiter)?;

        let mut selectors = HashMap::new();
        resolve_selectors(&view, session, None, &mut selectors);

        let ctx = Arc::new(FetchContext {
            source: self.source.clone(),
            codecs: self.codecs.clone(),
            cancel,
            selectors,
        });

        tracing::debug!(view = %view.name, "read started");
        fetch_node(ctx, root.clone()).await?;
        root.merge_data()?;

        let output = root.take_output();
        tracing::debug!(view = %view.name, records = output.len(), "read finished");
        Ok(output)
    }
}

fn check_codecs(view: &View, codecs: &CodecRegistry) -> EngineResult<()> {
    for col in &view.columns {
        if let Some(name) = &col.codec
            && !codecs.contains(name)
        {
            return Err(EngineError::UnknownCodec(name.clone()));
        }
    }
    for rel in &view.with {
        check_codecs(&rel.of.view, codecs)?;
    }
    Ok(())
}

/// Compute the effective selector per view. A `ReadDerived` child
/// without its own selector inherits the parent's criteria, paging and
/// ordering; the projection stays local because it governs which of
/// the child's own relations are fetched.
fn resolve_selectors(
    view: &View,
    session: &Session,
    inherited: Option<&Selector>,
    out: &mut HashMap<String, Selector>,
) {
    let effective = match session.selector(&view.name) {
        // An empty selector (created by `selector_mut` and never
        // filled in) does not shadow inheritance.
        Some(own) if !own.is_empty() => Some(own.clone()),
        _ => inherited.map(|sel| {
            let mut sel = sel.clone();
            sel.projection = Vec::new();
            sel
        }),
    };
    if let Some(sel) = &effective {
        out.insert(view.name.clone(), sel.clone());
    }
    for rel in &view.with {
        let pass_down = if rel.strategy.inherits_selector() {
            effective.as_ref()
        } else {
            None
        };
        resolve_selectors(&rel.of.view, session, pass_down, out);
    }
}

/// Spawn one fetch task per collector; a plain function so the
/// recursion goes through `JoinHandle` instead of a self-referential
/// future type.
fn spawn_fetch(ctx: Arc<FetchContext>, collector: Arc<Collector>) -> JoinHandle<EngineResult<()>> {
    tokio::spawn(fetch_node(ctx, collector))
}

async fn fetch_node(ctx: Arc<FetchContext>, collector: Arc<Collector>) -> EngineResult<()> {
    let handles: Vec<_> = collector
        .children()
        .iter()
        .map(|child| spawn_fetch(ctx.clone(), child.clone()))
        .collect();

    let own = fetch_one(&ctx, &collector).await;
    // Release waiting children even on failure so the tree never
    // deadlocks; their zero-key fetches no-op.
    collector.fetched();

    let mut first_err = own.err();
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
            Err(join) => {
                if first_err.is_none() {
                    first_err = Some(EngineError::Internal(format!("fetch task failed: {join}")));
                }
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Execute one view's query and feed its rows into the collector.
async fn fetch_one(ctx: &FetchContext, collector: &Collector) -> EngineResult<()> {
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let view = collector.view();
    let selector = ctx.selectors.get(&view.name);

    let column_in = if collector.is_sequential_child() {
        collector.wait_parent_fetched().await?;
        let (values, on_column) = collector.parent_placeholders()?;
        if values.is_empty() {
            // No parent keys, nothing to match; skip the round trip.
            tracing::debug!(view = %view.name, "no parent keys, fetch skipped");
            return Ok(());
        }
        Some((on_column, values))
    } else {
        None
    };

    let query = sql::build_query(view, selector, column_in)?;
    tracing::debug!(view = %view.name, sql = %query.sql, binds = query.args.len(), "executing fetch");

    let mut rows = tokio::select! {
        () = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
        result = ctx.source.query(&query.sql, &query.args) => result?,
    };

    // Resolve each driver column to a schema field and codec once per
    // result set.
    let schema = collector.schema();
    let mut bindings = Vec::with_capacity(rows.columns().len());
    for meta in rows.columns() {
        let field = schema.field_index(&meta.name);
        let codec: Option<Arc<dyn Codec>> = match view.column(&meta.name).and_then(|c| c.codec.as_ref()) {
            Some(name) => Some(ctx.codecs.get(name)?),
            None => None,
        };
        bindings.push((meta.name.clone(), field, codec));
    }

    while let Some(row) = rows.next_row().await? {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut record = Record::new(schema.clone());
        let mut unmapped = HashMap::new();
        for ((name, field, codec), value) in bindings.iter().zip(row) {
            let value = match codec {
                Some(codec) => codec.decode(value)?,
                None => value,
            };
            match field {
                Some(idx) => record.set_scanned(*idx, value)?,
                None => {
                    unmapped.insert(name.clone(), value);
                }
            }
        }
        collector.add_row(record, unmapped)?;
    }

    tracing::debug!(view = %view.name, rows = collector.row_count(), "fetch complete");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::value::{DataType, Value};
    use crate::view::{MatchStrategy, Relation};

    fn derived_graph() -> View {
        let archive = View::new("orders_archive", "orders_archive").with_columns(vec![
            Column::new("id", DataType::Int),
            Column::new("user_id", DataType::Int),
            Column::new("status", DataType::Int),
        ]);
        let mut view = View::new("users", "users")
            .with_columns(vec![Column::new("id", DataType::Int)])
            .with_filterable(&["id"])
            .with_relation(
                Relation::many("archived", "id", "Archived", archive, "user_id")
                    .with_strategy(MatchStrategy::ReadDerived),
            );
        view.init().unwrap();
        view
    }

    #[test]
    fn derived_child_inherits_parent_selector() {
        let view = derived_graph();
        let mut session = Session::new();
        session.set_selector(
            "users",
            Selector::new()
                .with_limit(3)
                .with_criteria("safe_column(id) = ?", vec![Value::Int(1)]),
        );

        let mut out = HashMap::new();
        resolve_selectors(&view, &session, None, &mut out);

        let child = out.get("orders_archive").unwrap();
        assert_eq!(child.limit, Some(3));
        assert_eq!(child.criteria.as_deref(), Some("safe_column(id) = ?"));
        assert_eq!(child.placeholders, vec![Value::Int(1)]);
    }

    #[test]
    fn derived_child_keeps_its_own_selector() {
        let view = derived_graph();
        let mut session = Session::new();
        session.set_selector("users", Selector::new().with_limit(3));
        session.set_selector("orders_archive", Selector::new().with_limit(50));

        let mut out = HashMap::new();
        resolve_selectors(&view, &session, None, &mut out);

        assert_eq!(out.get("orders_archive").unwrap().limit, Some(50));
    }

    #[test]
    fn empty_child_selector_does_not_shadow_inheritance() {
        let view = derived_graph();
        let mut session = Session::new();
        session.set_selector("users", Selector::new().with_limit(3));
        session.selector_mut("orders_archive");

        let mut out = HashMap::new();
        resolve_selectors(&view, &session, None, &mut out);
        assert_eq!(out.get("orders_archive").unwrap().limit, Some(3));
    }

    #[test]
    fn matched_child_does_not_inherit() {
        let orders = View::new("orders", "orders").with_columns(vec![
            Column::new("id", DataType::Int),
            Column::new("user_id", DataType::Int),
        ]);
        let mut view = View::new("users", "users")
            .with_columns(vec![Column::new("id", DataType::Int)])
            .with_relation(Relation::many("orders", "id", "Orders", orders, "user_id"));
        view.init().unwrap();

        let mut session = Session::new();
        session.set_selector("users", Selector::new().with_limit(3));

        let mut out = HashMap::new();
        resolve_selectors(&view, &session, None, &mut out);
        assert!(out.get("orders").is_none());
    }

    #[test]
    fn projection_is_not_inherited() {
        let view = derived_graph();
        let mut session = Session::new();
        session.set_selector("users", Selector::new().project(&["id", "Archived"]));

        let mut out = HashMap::new();
        resolve_selectors(&view, &session, None, &mut out);
        assert!(out.get("orders_archive").unwrap().projection.is_empty());
    }
}

use crate::{
    Result,
    chart::{
        graphics::{DrawingStore, NsData, ParsedGraphics, apply_graphics_cmds, parse_graphic_data},
        models::{ChartResponseData, DataPoint, StudyResponseData},
        study::StudyMetadata,
    },
    error::TradingViewError,
    handler::{DataUpdate, IndicatorUpdate, MappedRow, SessionEvent, queue::EventQueue},
    socket::ChartEvent,
};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::{debug, error, trace, warn};
use ustr::Ustr;

/// Everything one chart session has materialized from the wire. Mutated only
/// by the session's reader task; everyone else gets snapshots.
#[derive(Default)]
pub struct ChartState {
    /// `$prices` bars, appended in server order. Never reordered or deduped.
    pub ohlc: Vec<DataPoint>,
    /// Raw indicator rows per study, append-only.
    pub indicator_data: HashMap<Ustr, Vec<Vec<Value>>>,
    /// Raw drawings per study.
    pub graphics_raw: HashMap<Ustr, DrawingStore>,
    /// Session-global bar positions that drawings reference by index.
    /// Rewritten only by non-`"nochange"` updates.
    pub graphics_indexes: Vec<Value>,
}

/// Applies `timescale_update`/`du` deltas to the session state and turns
/// each one into a [`SessionEvent`] for the queue.
#[derive(Clone)]
pub struct DataLoader {
    state: Arc<RwLock<ChartState>>,
    studies: Arc<DashMap<Ustr, StudyMetadata>>,
    errored_studies: Arc<DashMap<Ustr, Ustr>>,
    queue: EventQueue,
}

impl DataLoader {
    pub fn new(queue: EventQueue) -> Self {
        Self {
            state: Arc::new(RwLock::new(ChartState::default())),
            studies: Arc::new(DashMap::new()),
            errored_studies: Arc::new(DashMap::new()),
            queue,
        }
    }

    /// Routes one classified message. Only a server `critical_error` comes
    /// back as `Err`; everything else is absorbed here.
    pub async fn handle_events(&self, event: ChartEvent, message: &[Value]) -> Result<()> {
        match event {
            ChartEvent::Data => {
                trace!("received chart data: {:?}", message);
                if let Some(data) = message.get(1) {
                    self.apply_chart_update(data).await;
                }
                Ok(())
            }
            ChartEvent::CriticalError => {
                error!("critical error from server: {:?}", message);
                let reason = message
                    .get(1)
                    .and_then(Value::as_str)
                    .map(Ustr::from)
                    .unwrap_or_else(|| Ustr::from(&format!("{message:?}")));
                Err(TradingViewError::CriticalError(reason).into())
            }
            ChartEvent::StudyError => {
                let study_id = message
                    .get(1)
                    .and_then(Value::as_str)
                    .map(Ustr::from)
                    .unwrap_or_default();
                let reason = message
                    .get(3)
                    .and_then(Value::as_str)
                    .map(Ustr::from)
                    .unwrap_or_default();
                error!("study error for {}: {}", study_id, reason);
                self.errored_studies.insert(study_id, reason);
                self.queue.push(SessionEvent::StudyError { study_id, reason });
                Ok(())
            }
            ChartEvent::Unknown(m) => {
                debug!("ignoring server method {}: {:?}", m, message);
                Ok(())
            }
        }
    }

    /// Applies one data mapping. All state mutation happens under a single
    /// write lock, so snapshots and the emitted event always see the full
    /// post-state of the message.
    pub async fn apply_chart_update(&self, data: &Value) {
        let mut update = DataUpdate::default();
        let mut new_rows: HashMap<Ustr, Vec<Vec<Value>>> = HashMap::new();

        {
            let mut state = self.state.write().await;

            if let Some(prices) = data.get("$prices") {
                match ChartResponseData::deserialize(prices) {
                    Ok(resp) => {
                        for point in resp.series {
                            state.ohlc.push(point.clone());
                            update.ohlc.push(point);
                        }
                    }
                    Err(e) => warn!("malformed $prices entry: {}", e),
                }
            }

            let mut graphics_changed: Vec<Ustr> = Vec::new();
            if let Some(entries) = data.as_object() {
                for (key, val) in entries {
                    if !key.starts_with("st") || !val.is_object() {
                        continue;
                    }
                    let study_id = Ustr::from(key);
                    let resp = match StudyResponseData::deserialize(val) {
                        Ok(resp) => resp,
                        Err(e) => {
                            warn!("malformed study entry {}: {}", key, e);
                            continue;
                        }
                    };

                    if !resp.studies.is_empty() {
                        let rows = state.indicator_data.entry(study_id).or_default();
                        for point in resp.studies {
                            rows.push(point.value.clone());
                            new_rows.entry(study_id).or_default().push(point.value);
                        }
                    }

                    let Some(ns) = resp.raw_graphics else {
                        continue;
                    };

                    if !ns.indexes.is_null() && ns.indexes != Value::from("nochange") {
                        match ns.indexes.as_array() {
                            Some(indexes) => state.graphics_indexes = indexes.clone(),
                            None => warn!("unexpected graphics indexes shape: {}", ns.indexes),
                        }
                    }

                    if !ns.d.is_empty() {
                        match serde_json::from_str::<NsData>(&ns.d) {
                            Ok(NsData {
                                graphics_cmds: Some(cmds),
                            }) => {
                                let store = state.graphics_raw.entry(study_id).or_default();
                                apply_graphics_cmds(store, &cmds);
                                graphics_changed.push(study_id);
                            }
                            Ok(_) => {}
                            Err(e) => error!("failed to parse graphical data: {}", e),
                        }
                    }
                }
            }

            for study_id in graphics_changed {
                let parsed = state
                    .graphics_raw
                    .get(&study_id)
                    .map(|store| parse_graphic_data(store, &state.graphics_indexes))
                    .unwrap_or_default();
                update.graphics.insert(study_id, parsed);
            }
        }

        for (study_id, rows) in new_rows {
            let mapped = match self.studies.get(&study_id) {
                Some(meta) => IndicatorUpdate::Mapped(map_indicator_rows(&meta, &rows)),
                None => IndicatorUpdate::Raw(rows),
            };
            update.indicators.insert(study_id, mapped);
        }

        if !update.is_empty() {
            self.queue.push(SessionEvent::Data(update));
        }
    }

    pub(crate) fn register_study(&self, study_id: Ustr, metadata: StudyMetadata) {
        self.studies.insert(study_id, metadata);
    }

    pub fn study_metadata(&self, study_id: &str) -> Option<StudyMetadata> {
        self.studies
            .get(&Ustr::from(study_id))
            .map(|meta| meta.value().clone())
    }

    pub fn errored_studies(&self) -> Vec<(Ustr, Ustr)> {
        self.errored_studies
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Snapshot of all OHLC bars received so far.
    pub async fn ohlc(&self) -> Vec<DataPoint> {
        self.state.read().await.ohlc.clone()
    }

    /// Snapshot of a study's raw rows.
    pub async fn indicator_data(&self, study_id: &str) -> Vec<Vec<Value>> {
        self.state
            .read()
            .await
            .indicator_data
            .get(&Ustr::from(study_id))
            .cloned()
            .unwrap_or_default()
    }

    /// A study's current drawings, parsed against the current index array.
    pub async fn indicator_graphics(&self, study_id: &str) -> ParsedGraphics {
        let state = self.state.read().await;
        state
            .graphics_raw
            .get(&Ustr::from(study_id))
            .map(|store| parse_graphic_data(store, &state.graphics_indexes))
            .unwrap_or_default()
    }

    pub async fn graphics_indexes(&self) -> Vec<Value> {
        self.state.read().await.graphics_indexes.clone()
    }
}

fn map_indicator_rows(meta: &StudyMetadata, rows: &[Vec<Value>]) -> Vec<MappedRow> {
    let names = meta.column_names();
    rows.iter()
        .map(|row| {
            let mut mapped = MappedRow::new();
            for (i, cell) in row.iter().enumerate() {
                let column = match names.get(i) {
                    Some(name) => name.clone(),
                    None => format!("plot_{}", i - 1),
                };
                mapped.insert(column, cell.clone());
            }
            mapped
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::study::{Plot, ScriptKind};
    use serde_json::json;

    fn loader() -> (DataLoader, EventQueue) {
        let queue = EventQueue::bounded(16);
        (DataLoader::new(queue.clone()), queue)
    }

    fn rsi_metadata() -> StudyMetadata {
        StudyMetadata {
            pine_id: "USER;rsi".into(),
            pine_version: "1.0".into(),
            description: None,
            inputs: HashMap::new(),
            plots: vec![Plot {
                id: "plot_0".into(),
                title: "RSI".into(),
            }],
            script: "…".into(),
            kind: ScriptKind::Study,
        }
    }

    async fn data_event(queue: &EventQueue) -> DataUpdate {
        match queue.try_recv().expect("expected an event") {
            SessionEvent::Data(update) => update,
            other => panic!("expected data event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ohlc_append() {
        let (loader, queue) = loader();
        let data = json!({"$prices": {"s": [
            {"i": 0, "v": [1700000000.0, 100.0, 101.0, 99.0, 100.5, 12345.0]}
        ]}});

        loader.apply_chart_update(&data).await;

        let ohlc = loader.ohlc().await;
        assert_eq!(ohlc.len(), 1);
        assert_eq!(
            ohlc[0].value,
            vec![1700000000.0, 100.0, 101.0, 99.0, 100.5, 12345.0]
        );

        let update = data_event(&queue).await;
        assert_eq!(update.ohlc, ohlc);
        assert!(update.indicators.is_empty());
        assert!(update.graphics.is_empty());

        // Append-only: a second delta grows the list, never rewrites it.
        loader
            .apply_chart_update(&json!({"$prices": {"s": [
                {"i": 1, "v": [1700000060.0, 100.5, 102.0, 100.0, 101.0, 999.0]}
            ]}}))
            .await;
        assert_eq!(loader.ohlc().await.len(), 2);
        assert_eq!(data_event(&queue).await.ohlc.len(), 1);
    }

    #[tokio::test]
    async fn test_indicator_mapping_with_metadata() {
        let (loader, queue) = loader();
        loader.register_study("st1".into(), rsi_metadata());

        let data = json!({"st1": {"st": [{"i": 0, "v": [1700000000, 72.5]}]}});
        loader.apply_chart_update(&data).await;

        let update = data_event(&queue).await;
        match &update.indicators[&Ustr::from("st1")] {
            IndicatorUpdate::Mapped(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["timestamp"], json!(1700000000));
                assert_eq!(rows[0]["RSI"], json!(72.5));
            }
            other => panic!("expected mapped rows, got {other:?}"),
        }
        assert_eq!(loader.indicator_data("st1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_indicator_unmapped_without_metadata() {
        let (loader, queue) = loader();
        let data = json!({"st9": {"st": [{"i": 0, "v": [1700000000, 1.0, 2.0]}]}});
        loader.apply_chart_update(&data).await;

        let update = data_event(&queue).await;
        match &update.indicators[&Ustr::from("st9")] {
            IndicatorUpdate::Raw(rows) => {
                assert_eq!(rows, &vec![vec![json!(1700000000), json!(1.0), json!(2.0)]]);
            }
            other => panic!("expected raw rows, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_trailing_columns_get_plot_names() {
        let (loader, queue) = loader();
        loader.register_study("st1".into(), rsi_metadata());

        // Three value columns but only one named plot.
        let data = json!({"st1": {"st": [{"i": 0, "v": [1700000000, 72.5, 30.0, 70.0]}]}});
        loader.apply_chart_update(&data).await;

        let update = data_event(&queue).await;
        let IndicatorUpdate::Mapped(rows) = &update.indicators[&Ustr::from("st1")] else {
            panic!("expected mapped rows");
        };
        assert_eq!(rows[0]["RSI"], json!(72.5));
        assert_eq!(rows[0]["plot_1"], json!(30.0));
        assert_eq!(rows[0]["plot_2"], json!(70.0));
    }

    #[tokio::test]
    async fn test_graphics_create_resolve_and_erase() {
        let (loader, queue) = loader();

        // Seed the index array alongside the first create.
        let create = json!({"st1": {"ns": {
            "indexes": [1000, 2000, 3000],
            "d": r#"{"graphicsCmds":{"create":{"dwglabels":[{"data":[{"id":"L1","x":2,"y":17.0,"yl":"ab","t":"hi","st":"flg"}]}]}}}"#
        }}});
        loader.apply_chart_update(&create).await;

        let update = data_event(&queue).await;
        let parsed = &update.graphics[&Ustr::from("st1")];
        assert_eq!(parsed.labels.len(), 1);
        assert_eq!(parsed.labels[0].x, json!(3000));
        assert_eq!(parsed.labels[0].y_loc, json!("abovebar"));
        assert_eq!(parsed.labels[0].style, json!("flag"));

        let erase = json!({"st1": {"ns": {
            "indexes": "nochange",
            "d": r#"{"graphicsCmds":{"erase":[{"action":"one","type":"dwglabels","id":"L1"}]}}"#
        }}});
        loader.apply_chart_update(&erase).await;

        let update = data_event(&queue).await;
        assert!(update.graphics[&Ustr::from("st1")].labels.is_empty());
        assert!(loader.indicator_graphics("st1").await.labels.is_empty());
    }

    #[tokio::test]
    async fn test_nochange_preserves_indexes() {
        let (loader, queue) = loader();
        loader
            .apply_chart_update(&json!({"st1": {"ns": {
                "indexes": [10, 20, 30],
                "d": r#"{"graphicsCmds":{"create":{"dwglabels":[{"data":[{"id":"L1","x":0}]}]}}}"#
            }}}))
            .await;
        let _ = data_event(&queue).await;

        loader
            .apply_chart_update(&json!({"st1": {"ns": {"indexes": "nochange", "d": "{}"}}}))
            .await;

        assert_eq!(
            loader.graphics_indexes().await,
            vec![json!(10), json!(20), json!(30)]
        );
        // An empty graphicsCmds document changes nothing, so no event either.
        assert!(queue.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_malformed_ns_d_skipped_rest_proceeds() {
        let (loader, queue) = loader();
        let data = json!({
            "$prices": {"s": [{"i": 0, "v": [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]}]},
            "st1": {"ns": {"indexes": [1, 2], "d": "{not json"}}
        });
        loader.apply_chart_update(&data).await;

        // The bar still lands and the index replacement still happened.
        assert_eq!(loader.ohlc().await.len(), 1);
        assert_eq!(loader.graphics_indexes().await.len(), 2);
        let update = data_event(&queue).await;
        assert_eq!(update.ohlc.len(), 1);
        assert!(update.graphics.is_empty());
    }

    #[tokio::test]
    async fn test_empty_update_emits_nothing() {
        let (loader, queue) = loader();
        loader.apply_chart_update(&json!({"st1": {"node": "x"}})).await;
        assert!(queue.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_study_error_marks_study_and_keeps_session() {
        let (loader, queue) = loader();
        let message = vec![
            json!("cs_abc123def456"),
            json!("st2"),
            json!(0),
            json!("Pine compilation failed"),
        ];
        let result = loader.handle_events(ChartEvent::StudyError, &message).await;
        assert!(result.is_ok());

        assert_eq!(
            loader.errored_studies(),
            vec![("st2".into(), "Pine compilation failed".into())]
        );
        assert_eq!(
            queue.try_recv(),
            Some(SessionEvent::StudyError {
                study_id: "st2".into(),
                reason: "Pine compilation failed".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_critical_error_is_terminal() {
        let (loader, _queue) = loader();
        let message = vec![json!("cs_abc123def456"), json!("session revoked")];
        let err = loader
            .handle_events(ChartEvent::CriticalError, &message)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("session revoked"));
    }
}

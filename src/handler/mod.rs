use crate::chart::{graphics::ParsedGraphics, models::DataPoint};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use ustr::Ustr;

pub mod queue;

/// A mapped indicator row: `{"timestamp": …, "<plot title>": …, …}`.
pub type MappedRow = Map<String, Value>;

/// The rows one message contributed to a study, mapped through plot titles
/// when the study's metadata is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndicatorUpdate {
    Mapped(Vec<MappedRow>),
    Raw(Vec<Vec<Value>>),
}

/// What one `timescale_update`/`du` changed. Never the full state: bars and
/// rows are the appended ones only; graphics carry the affected studies'
/// current drawings in parsed form.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DataUpdate {
    pub ohlc: Vec<DataPoint>,
    pub indicators: HashMap<Ustr, IndicatorUpdate>,
    pub graphics: HashMap<Ustr, ParsedGraphics>,
}

impl DataUpdate {
    pub fn is_empty(&self) -> bool {
        self.ohlc.is_empty() && self.indicators.is_empty() && self.graphics.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Data(DataUpdate),
    /// The server rejected one study; the session itself stays up.
    StudyError { study_id: Ustr, reason: Ustr },
}

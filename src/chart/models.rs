use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One OHLC bar as delivered under `$prices.s`. The value vector is stored
/// verbatim: `[timestamp, open, high, low, close, volume, …]`.
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq)]
pub struct DataPoint {
    #[serde(rename(deserialize = "i"))]
    pub index: i64,
    #[serde(rename(deserialize = "v"))]
    pub value: Vec<f64>,
}

/// One indicator row under `st<N>.st`. Cells stay `Value` so nulls and
/// non-numeric plot outputs survive untouched.
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq)]
pub struct StudyDataPoint {
    #[serde(rename(deserialize = "i"))]
    pub index: i64,
    #[serde(rename(deserialize = "v"))]
    pub value: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartResponseData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(rename(deserialize = "s"), default)]
    pub series: Vec<DataPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StudyResponseData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(rename(deserialize = "st"), default)]
    pub studies: Vec<StudyDataPoint>,
    #[serde(rename(deserialize = "ns"), default)]
    pub raw_graphics: Option<GraphicDataResponse>,
}

/// The `ns` envelope of a study update. `indexes` is either the replacement
/// index array or the literal string `"nochange"`; `d` is a JSON document in
/// a string, holding `graphicsCmds`.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphicDataResponse {
    #[serde(default)]
    pub d: String,
    #[serde(default)]
    pub indexes: Value,
}

pub trait OHLCV {
    fn datetime(&self) -> Result<DateTime<Utc>>;
    fn timestamp(&self) -> i64;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
    fn is_ohlcv(&self) -> bool;
}

impl OHLCV for DataPoint {
    fn datetime(&self) -> Result<DateTime<Utc>> {
        if self.value.is_empty() {
            return Err(Error::Generic("DataPoint value is empty".into()));
        }

        let timestamp = self.value[0] as i64;
        if let Some(datetime) = DateTime::<Utc>::from_timestamp(timestamp, 0) {
            return Ok(datetime);
        }

        Err(Error::Generic(
            "Failed to convert timestamp to DateTime".into(),
        ))
    }

    fn timestamp(&self) -> i64 {
        self.value.first().copied().unwrap_or_default() as i64
    }

    fn open(&self) -> f64 {
        self.value.get(1).copied().unwrap_or(f64::NAN)
    }

    fn high(&self) -> f64 {
        self.value.get(2).copied().unwrap_or(f64::NAN)
    }

    fn low(&self) -> f64 {
        self.value.get(3).copied().unwrap_or(f64::NAN)
    }

    fn close(&self) -> f64 {
        self.value.get(4).copied().unwrap_or(f64::NAN)
    }

    fn volume(&self) -> f64 {
        self.value.get(5).copied().unwrap_or(f64::NAN)
    }

    fn is_ohlcv(&self) -> bool {
        self.value.len() >= 6
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_point_deserialize() {
        let dp: DataPoint =
            serde_json::from_value(json!({"i": 0, "v": [1700000000.0, 100.0, 101.0, 99.0, 100.5, 12345.0]}))
                .unwrap();
        assert_eq!(dp.index, 0);
        assert_eq!(dp.timestamp(), 1700000000);
        assert_eq!(dp.open(), 100.0);
        assert_eq!(dp.close(), 100.5);
        assert_eq!(dp.volume(), 12345.0);
        assert!(dp.is_ohlcv());
    }

    #[test]
    fn test_study_data_point_keeps_nulls() {
        let dp: StudyDataPoint =
            serde_json::from_value(json!({"i": 3, "v": [1700000000, 72.5, null]})).unwrap();
        assert_eq!(dp.value.len(), 3);
        assert!(dp.value[2].is_null());
    }

    #[test]
    fn test_graphic_data_response_nochange() {
        let resp: GraphicDataResponse =
            serde_json::from_value(json!({"d": "", "indexes": "nochange"})).unwrap();
        assert_eq!(resp.indexes, Value::from("nochange"));
    }
}

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use ustr::Ustr;

/// What the server should run the script as. Anything that is neither a
/// plain study nor a strategy keeps its original kind string but is sent as
/// a plain script.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    #[default]
    Study,
    Strategy,
    Other(Ustr),
}

impl ScriptKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "study" => ScriptKind::Study,
            "strategy" => ScriptKind::Strategy,
            other => ScriptKind::Other(Ustr::from(other)),
        }
    }

    /// The indicator type string `create_study` puts on the wire.
    pub fn wire_kind(&self) -> &'static str {
        match self {
            ScriptKind::Strategy => "StrategyScript@tv-scripting-101!",
            _ => "Script@tv-scripting-101!",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyInput {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    pub value: Value,
    #[serde(rename = "isFake", default)]
    pub is_fake: bool,
}

/// One plot column: the `plot_N` id and its title with whitespace collapsed
/// to underscores.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub id: Ustr,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum StudyInputParam {
    Text(String),
    Input { v: Value, f: bool, t: Value },
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyMetadata {
    pub pine_id: Ustr,
    pub pine_version: Ustr,
    pub description: Option<String>,
    pub inputs: HashMap<String, StudyInput>,
    /// Ordered by the numeric suffix of the plot id, never by response
    /// object order.
    pub plots: Vec<Plot>,
    pub script: String,
    pub kind: ScriptKind,
}

impl StudyMetadata {
    /// Builds metadata from a pine-facade translate response. The response
    /// shape drifts, so every section degrades independently: a non-list
    /// `inputs` means no inputs, a non-mapping `styles` means no plots,
    /// missing keys fall back rather than fail.
    pub fn from_translate_response(
        response: &Value,
        indicator_id: &str,
        version: &str,
    ) -> Result<Self> {
        if !response
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let reason = response
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            return Err(Error::Metadata(reason.into()));
        }

        let result = response.get("result").cloned().unwrap_or_default();
        let meta_info = result.get("metaInfo").cloned().unwrap_or_default();

        let mut inputs = HashMap::new();
        if let Some(meta_inputs) = meta_info.get("inputs").and_then(Value::as_array) {
            for item in meta_inputs {
                let Some(input_id) = item.get("id").and_then(Value::as_str) else {
                    continue;
                };
                if matches!(input_id, "text" | "pineId" | "pineVersion") {
                    continue;
                }
                inputs.insert(
                    input_id.to_owned(),
                    StudyInput {
                        name: item
                            .get("name")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                        input_type: item
                            .get("type")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                        value: item.get("defval").cloned().unwrap_or(Value::Null),
                        is_fake: item
                            .get("isFake")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    },
                );
            }
        }

        let mut plots: Vec<Plot> = Vec::new();
        if let Some(styles) = meta_info.get("styles").and_then(Value::as_object) {
            for (plot_id, style) in styles {
                if let Some(title) = style.get("title").and_then(Value::as_str) {
                    plots.push(Plot {
                        id: Ustr::from(plot_id),
                        title: title.replace(' ', "_"),
                    });
                }
            }
        }
        plots.sort_by_key(|plot| plot_ordinal(&plot.id));

        let kind = meta_info
            .get("extra")
            .and_then(|extra| extra.get("kind"))
            .and_then(Value::as_str)
            .or_else(|| {
                meta_info
                    .get("package")
                    .and_then(|package| package.get("type"))
                    .and_then(Value::as_str)
            })
            .unwrap_or("study");

        Ok(StudyMetadata {
            pine_id: meta_info
                .get("scriptIdPart")
                .and_then(Value::as_str)
                .unwrap_or(indicator_id)
                .into(),
            pine_version: meta_info
                .get("pine")
                .and_then(|pine| pine.get("version"))
                .and_then(Value::as_str)
                .unwrap_or(version)
                .into(),
            description: meta_info
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned),
            inputs,
            plots,
            script: result
                .get("ilTemplate")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            kind: ScriptKind::parse(kind),
        })
    }

    /// Column names for mapped indicator rows: timestamp first, then the
    /// plot titles in plot order.
    pub fn column_names(&self) -> Vec<String> {
        std::iter::once("timestamp".to_owned())
            .chain(self.plots.iter().map(|plot| plot.title.clone()))
            .collect()
    }

    /// The server-facing `create_study` inputs payload:
    /// `{text, pineId, pineVersion, <input_id>: {v, f, t}, …}`.
    /// `custom_inputs` overlays the default `value` of matching keys.
    pub fn to_study_inputs(
        &self,
        custom_inputs: Option<&HashMap<String, Value>>,
    ) -> Result<Value> {
        let mut payload: HashMap<String, StudyInputParam> = HashMap::new();
        payload.insert("text".into(), StudyInputParam::Text(self.script.clone()));
        payload.insert(
            "pineId".into(),
            StudyInputParam::Text(self.pine_id.to_string()),
        );
        payload.insert(
            "pineVersion".into(),
            StudyInputParam::Text(self.pine_version.to_string()),
        );

        for (input_id, input) in &self.inputs {
            let value = custom_inputs
                .and_then(|custom| custom.get(input_id))
                .unwrap_or(&input.value);
            payload.insert(
                input_id.clone(),
                StudyInputParam::Input {
                    v: value.clone(),
                    f: input.is_fake,
                    t: input
                        .input_type
                        .as_deref()
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                },
            );
        }

        let json_value = serde_json::to_value(payload)?;
        Ok(json_value)
    }
}

/// Numeric suffix of a `plot_N` id; ids without one sort last, by name.
fn plot_ordinal(id: &str) -> (u32, Ustr) {
    id.rsplit_once('_')
        .and_then(|(_, n)| n.parse::<u32>().ok())
        .map(|n| (n, Ustr::from("")))
        .unwrap_or((u32::MAX, Ustr::from(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn translate_response() -> Value {
        json!({
            "success": true,
            "result": {
                "ilTemplate": "pine-bytecode…",
                "metaInfo": {
                    "scriptIdPart": "USER;deadbeef",
                    "description": "Relative Strength",
                    "pine": {"version": "12.0"},
                    "extra": {"kind": "study"},
                    "inputs": [
                        {"id": "in_0", "name": "Length", "type": "integer", "defval": 14},
                        {"id": "pineVersion", "defval": "12.0"},
                        {"id": "in_1", "name": "Source", "type": "source", "defval": "close", "isFake": true}
                    ],
                    "styles": {
                        "plot_10": {"title": "Upper Band"},
                        "plot_0": {"title": "RSI"},
                        "plot_2": {"title": "Lower Band"}
                    }
                }
            }
        })
    }

    #[test]
    fn test_from_translate_response() {
        let meta =
            StudyMetadata::from_translate_response(&translate_response(), "USER;x", "last").unwrap();
        assert_eq!(meta.pine_id.as_str(), "USER;deadbeef");
        assert_eq!(meta.pine_version.as_str(), "12.0");
        assert_eq!(meta.kind, ScriptKind::Study);
        assert_eq!(meta.script, "pine-bytecode…");
        assert_eq!(meta.inputs.len(), 2);
        assert!(meta.inputs["in_1"].is_fake);
        // Plot order follows the numeric suffix, not the object order.
        assert_eq!(
            meta.column_names(),
            vec!["timestamp", "RSI", "Lower_Band", "Upper_Band"]
        );
    }

    #[test]
    fn test_from_translate_response_failure() {
        let response = json!({"success": false, "reason": "unknown script"});
        let err = StudyMetadata::from_translate_response(&response, "id", "last").unwrap_err();
        assert!(err.to_string().contains("unknown script"));
    }

    #[test]
    fn test_tolerates_wrong_shapes() {
        let response = json!({
            "success": true,
            "result": {
                "ilTemplate": "t",
                "metaInfo": {"inputs": {"not": "a list"}, "styles": ["not a mapping"]}
            }
        });
        let meta = StudyMetadata::from_translate_response(&response, "fallback-id", "7").unwrap();
        assert!(meta.inputs.is_empty());
        assert!(meta.plots.is_empty());
        assert_eq!(meta.pine_id.as_str(), "fallback-id");
        assert_eq!(meta.pine_version.as_str(), "7");
        assert_eq!(meta.kind, ScriptKind::Study);
    }

    #[test]
    fn test_kind_precedence_and_wire_strings() {
        let mut response = translate_response();
        response["result"]["metaInfo"]["extra"] = json!({});
        response["result"]["metaInfo"]["package"] = json!({"type": "strategy"});
        let meta = StudyMetadata::from_translate_response(&response, "id", "last").unwrap();
        assert_eq!(meta.kind, ScriptKind::Strategy);
        assert_eq!(meta.kind.wire_kind(), "StrategyScript@tv-scripting-101!");
        assert_eq!(ScriptKind::Study.wire_kind(), "Script@tv-scripting-101!");
        assert_eq!(
            ScriptKind::parse("fundamental").wire_kind(),
            "Script@tv-scripting-101!"
        );
    }

    #[test]
    fn test_to_study_inputs_overlay() {
        let meta =
            StudyMetadata::from_translate_response(&translate_response(), "USER;x", "last").unwrap();
        let custom = HashMap::from([("in_0".to_owned(), json!(21))]);
        let inputs = meta.to_study_inputs(Some(&custom)).unwrap();

        assert_eq!(inputs["text"], json!("pine-bytecode…"));
        assert_eq!(inputs["pineId"], json!("USER;deadbeef"));
        assert_eq!(inputs["pineVersion"], json!("12.0"));
        assert_eq!(inputs["in_0"], json!({"v": 21, "f": false, "t": "integer"}));
        assert_eq!(
            inputs["in_1"],
            json!({"v": "close", "f": true, "t": "source"})
        );
    }
}

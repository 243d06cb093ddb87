use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;
use ustr::Ustr;

/// Raw drawings of one study: `draw_type -> item id -> item as delivered`.
/// The inner map is ordered by id so parsed output is deterministic.
pub type DrawingStore = HashMap<Ustr, BTreeMap<String, Value>>;

lazy_static::lazy_static! {
    static ref EXTEND: HashMap<&'static str, &'static str> =
        [("r", "right"), ("l", "left"), ("b", "both"), ("n", "none")]
            .into_iter()
            .collect();
    static ref Y_LOC: HashMap<&'static str, &'static str> =
        [("pr", "price"), ("ab", "abovebar"), ("bl", "belowbar")]
            .into_iter()
            .collect();
    static ref LABEL_STYLE: HashMap<&'static str, &'static str> = [
        ("n", "none"),
        ("xcr", "xcross"),
        ("cr", "cross"),
        ("tup", "triangleup"),
        ("tdn", "triangledown"),
        ("flg", "flag"),
        ("cir", "circle"),
        ("aup", "arrowup"),
        ("adn", "arrowdown"),
        ("lup", "label_up"),
        ("ldn", "label_down"),
        ("llf", "label_left"),
        ("lrg", "label_right"),
        ("llwlf", "label_lower_left"),
        ("llwrg", "label_lower_right"),
        ("luplf", "label_upper_left"),
        ("luprg", "label_upper_right"),
        ("lcn", "label_center"),
        ("sq", "square"),
        ("dia", "diamond"),
    ]
    .into_iter()
    .collect();
    static ref LINE_STYLE: HashMap<&'static str, &'static str> = [
        ("sol", "solid"),
        ("dot", "dotted"),
        ("dsh", "dashed"),
        ("al", "arrow_left"),
        ("ar", "arrow_right"),
        ("ab", "arrow_both"),
    ]
    .into_iter()
    .collect();
    static ref BOX_STYLE: HashMap<&'static str, &'static str> =
        [("sol", "solid"), ("dot", "dotted"), ("dsh", "dashed")]
            .into_iter()
            .collect();
}

/// The `graphicsCmds` document carried inside `ns.d`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct NsData {
    #[serde(rename = "graphicsCmds", default)]
    pub graphics_cmds: Option<GraphicsCmds>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct GraphicsCmds {
    #[serde(default)]
    pub erase: Vec<EraseCmd>,
    #[serde(default)]
    pub create: HashMap<Ustr, Vec<CreateGroup>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EraseCmd {
    pub action: String,
    #[serde(rename = "type", default)]
    pub draw_type: Option<Ustr>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CreateGroup {
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Applies one `graphicsCmds` diff to a study's store: erases first, in
/// listed order, then creates. An `erase.one` without a type is a no-op
/// (source behavior, kept until the server contract says otherwise).
pub fn apply_graphics_cmds(store: &mut DrawingStore, cmds: &GraphicsCmds) {
    for erase in &cmds.erase {
        match erase.action.as_str() {
            "all" => match erase.draw_type {
                Some(draw_type) => {
                    store.insert(draw_type, BTreeMap::new());
                }
                None => store.clear(),
            },
            "one" => {
                if let Some(draw_type) = erase.draw_type
                    && let Some(items) = store.get_mut(&draw_type)
                    && let Some(id) = &erase.id
                {
                    items.remove(id);
                }
            }
            other => warn!("unknown graphics erase action: {}", other),
        }
    }

    for (draw_type, groups) in &cmds.create {
        let items = store.entry(*draw_type).or_default();
        for group in groups {
            for item in &group.data {
                match item.get("id").and_then(Value::as_str) {
                    Some(id) => {
                        items.insert(id.to_owned(), item.clone());
                    }
                    None => warn!("skipping graphic item without id: {}", item),
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: Value,
    pub x: Value,
    pub y: Value,
    pub y_loc: Value,
    pub text: Value,
    pub style: Value,
    pub color: Value,
    pub text_color: Value,
    pub size: Value,
    pub text_align: Value,
    pub tool_tip: Value,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub id: Value,
    pub x1: Value,
    pub y1: Value,
    pub x2: Value,
    pub y2: Value,
    pub extend: Value,
    pub style: Value,
    pub color: Value,
    pub width: Value,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphicBox {
    pub id: Value,
    pub x1: Value,
    pub y1: Value,
    pub x2: Value,
    pub y2: Value,
    pub color: Value,
    pub bg_color: Value,
    pub extend: Value,
    pub style: Value,
    pub width: Value,
    pub text: Value,
    pub text_size: Value,
    pub text_color: Value,
    pub text_v_align: Value,
    pub text_h_align: Value,
    pub text_wrap: Value,
}

/// A study's drawings with short codes expanded and bar indices resolved.
/// Sibling kinds are passed through raw.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ParsedGraphics {
    pub labels: Vec<Label>,
    pub lines: Vec<Line>,
    pub boxes: Vec<GraphicBox>,
    pub tables: Vec<Value>,
    pub polygons: Vec<Value>,
    #[serde(rename = "horizLines")]
    pub horiz_lines: Vec<Value>,
    #[serde(rename = "horizHists")]
    pub horiz_hists: Vec<Value>,
}

fn translate(table: &HashMap<&'static str, &'static str>, code: Value) -> Value {
    match code.as_str().and_then(|c| table.get(c)) {
        Some(expanded) => Value::from(*expanded),
        None => code,
    }
}

/// Resolves a drawing's bar reference through the session index array.
/// Non-integer or out-of-range references pass through unchanged.
fn resolve_index(x: Value, indexes: &[Value]) -> Value {
    match x.as_i64() {
        Some(i) if i >= 0 && (i as usize) < indexes.len() => indexes[i as usize].clone(),
        _ => x,
    }
}

fn field(item: &Value, key: &str) -> Value {
    item.get(key).cloned().unwrap_or(Value::Null)
}

fn parse_label(item: &Value, indexes: &[Value]) -> Label {
    Label {
        id: field(item, "id"),
        x: resolve_index(field(item, "x"), indexes),
        y: field(item, "y"),
        y_loc: translate(&Y_LOC, field(item, "yl")),
        text: field(item, "t"),
        style: translate(&LABEL_STYLE, field(item, "st")),
        color: field(item, "ci"),
        text_color: field(item, "tci"),
        size: field(item, "sz"),
        text_align: field(item, "ta"),
        tool_tip: field(item, "tt"),
    }
}

fn parse_line(item: &Value, indexes: &[Value]) -> Line {
    Line {
        id: field(item, "id"),
        x1: resolve_index(field(item, "x1"), indexes),
        y1: field(item, "y1"),
        x2: resolve_index(field(item, "x2"), indexes),
        y2: field(item, "y2"),
        extend: translate(&EXTEND, field(item, "ex")),
        style: translate(&LINE_STYLE, field(item, "st")),
        color: field(item, "ci"),
        width: field(item, "w"),
    }
}

fn parse_box(item: &Value, indexes: &[Value]) -> GraphicBox {
    GraphicBox {
        id: field(item, "id"),
        x1: resolve_index(field(item, "x1"), indexes),
        y1: field(item, "y1"),
        x2: resolve_index(field(item, "x2"), indexes),
        y2: field(item, "y2"),
        color: field(item, "c"),
        bg_color: field(item, "bc"),
        extend: translate(&EXTEND, field(item, "ex")),
        style: translate(&BOX_STYLE, field(item, "st")),
        width: field(item, "w"),
        text: field(item, "t"),
        text_size: field(item, "ts"),
        text_color: field(item, "tc"),
        text_v_align: field(item, "tva"),
        text_h_align: field(item, "tha"),
        text_wrap: field(item, "tw"),
    }
}

fn kind_items<'a>(store: &'a DrawingStore, draw_type: &str) -> impl Iterator<Item = &'a Value> {
    store
        .get(&Ustr::from(draw_type))
        .into_iter()
        .flat_map(|items| items.values())
}

/// Walks a study's current raw store and produces the readable form.
pub fn parse_graphic_data(store: &DrawingStore, indexes: &[Value]) -> ParsedGraphics {
    ParsedGraphics {
        labels: kind_items(store, "dwglabels")
            .map(|item| parse_label(item, indexes))
            .collect(),
        lines: kind_items(store, "dwglines")
            .map(|item| parse_line(item, indexes))
            .collect(),
        boxes: kind_items(store, "dwgboxes")
            .map(|item| parse_box(item, indexes))
            .collect(),
        tables: kind_items(store, "dwgtables").cloned().collect(),
        polygons: kind_items(store, "polygons").cloned().collect(),
        horiz_lines: kind_items(store, "horizlines").cloned().collect(),
        horiz_hists: kind_items(store, "hhists").cloned().collect(),
    }
}

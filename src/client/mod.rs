pub mod misc;

pub use misc::{
    get_chart_token, get_indicator_metadata, get_layout_sources, get_user_data, list_layouts,
    list_private_indicators,
};

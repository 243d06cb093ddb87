pub mod chart;
pub mod client;
pub mod error;
pub mod handler;
pub mod socket;
pub mod user;
pub mod utils;

mod data_loader;

pub use chart::{
    ChartSession, DataPoint, GraphicBox, Label, Line, OHLCV, ParsedGraphics, ScriptKind,
    SessionState, StudyDataPoint, StudyMetadata,
};
pub use client::{get_indicator_metadata, get_user_data};
pub use data_loader::{ChartState, DataLoader};
pub use error::{Error, TradingViewError};
pub use handler::{DataUpdate, IndicatorUpdate, SessionEvent, queue::EventQueue};
pub use user::{Cookies, UserData};

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) static UA: &str = "Mozilla/5.0 (Windows NT 10.0; WOW64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.5666.197 Safari/537.36";

pub mod graphics;
pub mod models;
pub mod session;
pub mod study;

pub use graphics::{GraphicBox, Label, Line, ParsedGraphics};
pub use models::{DataPoint, OHLCV, StudyDataPoint};
pub use session::{ChartSession, SessionState};
pub use study::{ScriptKind, StudyInput, StudyMetadata};

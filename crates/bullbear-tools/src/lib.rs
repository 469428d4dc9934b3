pub mod error;
pub mod market;
pub mod registry;
pub mod static_source;
pub mod tool;

pub use error::{MarketDataError, ToolError, ToolFailure};
pub use market::{
    market_tools, FundamentalsTool, IndicatorsTool, MarketDataSource, NewsTool, StockDataTool,
};
pub use registry::{is_failure_output, ToolRegistry, FAILURE_PREFIX};
pub use static_source::{StaticMarketData, SymbolData};
pub use tool::{parse_input, Tool};

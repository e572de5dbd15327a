//! Concrete tools shipped with the server

pub mod current_time;
pub mod registry;
pub mod web_search;

pub use current_time::CurrentTimeTool;
pub use registry::create_tool_registry;
pub use web_search::WebSearchTool;

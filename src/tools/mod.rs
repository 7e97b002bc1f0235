//! 工具层：Tool Catalog（名称 → 参数规格 → Operation）、规划器回复格式、执行器

pub mod catalog;
pub mod executor;
pub mod schema;

pub use catalog::{Catalog, DefaultValue, ParamKind, ParamSpec, Problem, ToolSpec, ValidationError};
pub use executor::{ToolExecutor, ToolOutcome};
pub use schema::planner_reply_schema_json;

//! `{{variable}}` interpolation over layered scopes.

pub mod engine;
pub mod mock;
pub mod parser;
pub mod pathparams;
pub mod request;
pub mod scopes;

pub use engine::{
    escape_json_string, interpolate, interpolate_json, resolve_environment_values, Interpolator,
    MAX_DEPTH,
};
pub use mock::{mock_value, replace_mock_vars};
pub use parser::{has_placeholders, parse_placeholders, Placeholder};
pub use pathparams::interpolate_path_params;
pub use request::interpolate_request;
pub use scopes::{Scope, VariableScopes};

pub mod token;
pub mod postprocess;

use serde_json::{Map, Value};

pub type JsonMap = Map<String, Value>;

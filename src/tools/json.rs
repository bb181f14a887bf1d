//! JSON helper tools.

use serde_json::{json, Value};

use super::descriptor::{from_fn, ParamSpec, ToolDescriptor, ValueType};

pub fn descriptors() -> Vec<ToolDescriptor> {
    vec![ToolDescriptor::new(
        "json_is_valid",
        "Check if the input string is valid JSON. Returns true if it parses, false otherwise.",
        from_fn(|args| {
            let s = args.str("s")?;
            Ok(json!(serde_json::from_str::<Value>(s).is_ok()))
        }),
    )
    .param(ParamSpec::required("s", ValueType::Str).describe("The string to check"))
    .returns(ValueType::Bool)]
}

//! 工具参数校验
//!
//! 用 jsonschema 编译工具声明的 parameters_schema，调用前校验参数；
//! 所有违规信息合并成一条原因（作为 capability_invalid_parameters 的说明）。

use jsonschema::validator_for;
use serde_json::Value;

/// 校验失败时返回可读原因
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    if !args.is_object() {
        return Err(format!("arguments must be a JSON object, got {args}"));
    }
    let validator = validator_for(schema).map_err(|e| format!("invalid tool schema: {e}"))?;
    if validator.is_valid(args) {
        return Ok(());
    }
    let messages = validator
        .iter_errors(args)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(messages.join("; "))
}

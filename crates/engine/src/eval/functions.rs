//! The registered expression function table.
//!
//! Functions are dispatched by name after rectification; arguments arrive
//! fully evaluated. Argument count or type mismatches are call errors.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;

use smelter_types::{Mapping, Value};

use super::EvalError;

const REGISTERED: [&str; 14] = [
    "len",
    "trim",
    "line",
    "lines",
    "string",
    "keys",
    "values",
    "map",
    "b64encode",
    "b64decode",
    "b64encodeUrl",
    "b64decodeUrl",
    "json",
    "yaml",
];

/// True when `name` is a callable function.
pub fn is_registered(name: &str) -> bool {
    REGISTERED.contains(&name)
}

/// Invokes the named function with evaluated arguments.
pub fn call(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "len" => len(name, args),
        // ASCII whitespace plus CR/LF only; Unicode spaces stay put.
        "trim" => map_string(name, args, |s| {
            s.trim_matches(|c: char| c.is_ascii_whitespace()).to_string()
        }),
        "line" => map_string(name, args, |s| s.split('\n').next().unwrap_or("").to_string()),
        "lines" => lines(name, args),
        "string" => {
            let [arg] = expect_args::<1>(name, args)?;
            Ok(Value::String(arg.to_display_string()))
        }
        "keys" => keys(name, args),
        "values" => values(name, args),
        "map" => apply_map(name, args),
        "b64encode" => map_string(name, args, |s| STANDARD.encode(s)),
        "b64encodeUrl" => map_string(name, args, |s| URL_SAFE.encode(s)),
        "b64decode" => decode(name, args, &STANDARD),
        "b64decodeUrl" => decode(name, args, &URL_SAFE),
        "json" => {
            let [arg] = expect_args::<1>(name, args)?;
            serde_json::to_string(&arg.to_json())
                .map(Value::String)
                .map_err(|e| EvalError::call(name, e.to_string()))
        }
        "yaml" => {
            let [arg] = expect_args::<1>(name, args)?;
            serde_yaml::to_string(arg)
                .map(Value::String)
                .map_err(|e| EvalError::call(name, e.to_string()))
        }
        _ => Err(EvalError::call(name, "unknown function")),
    }
}

fn expect_args<'a, const N: usize>(name: &str, args: &'a [Value]) -> Result<&'a [Value; N], EvalError> {
    args.try_into()
        .map_err(|_| EvalError::call(name, format!("incorrect number of arguments (expected {N})")))
}

fn string_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a str, EvalError> {
    let [arg] = expect_args::<1>(name, args)?;
    match arg {
        Value::String(s) => Ok(s),
        other => Err(EvalError::call(name, format!("invalid argument type {}", other.kind()))),
    }
}

fn map_string(name: &str, args: &[Value], f: impl Fn(&str) -> String) -> Result<Value, EvalError> {
    Ok(Value::String(f(string_arg(name, args)?)))
}

fn len(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let [arg] = expect_args::<1>(name, args)?;
    let length = match arg {
        Value::String(s) => s.chars().count(),
        Value::Sequence(items) => items.len(),
        Value::Mapping(map) => map.len(),
        other => {
            return Err(EvalError::call(name, format!("invalid argument type {}", other.kind())));
        }
    };
    Ok(Value::Number(length as f64))
}

fn lines(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let text = string_arg(name, args)?;
    let trimmed = text.strip_suffix('\n').unwrap_or(text);
    Ok(Value::Sequence(
        trimmed.split('\n').map(|line| Value::String(line.to_string())).collect(),
    ))
}

fn keys(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let [arg] = expect_args::<1>(name, args)?;
    let Value::Mapping(map) = arg else {
        return Err(EvalError::call(name, format!("invalid argument type {}", arg.kind())));
    };
    Ok(Value::Sequence(map.keys().map(|k| Value::String(k.clone())).collect()))
}

fn values(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let [arg] = expect_args::<1>(name, args)?;
    let Value::Mapping(map) = arg else {
        return Err(EvalError::call(name, format!("invalid argument type {}", arg.kind())));
    };
    Ok(Value::Sequence(map.values().cloned().collect()))
}

/// Applies a named function to each element of a sequence, or each value of
/// a mapping (keys preserved).
fn apply_map(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let [target, function] = expect_args::<2>(name, args)?;
    let Value::String(function_name) = function else {
        return Err(EvalError::call(name, "2nd argument must be a function name in string form"));
    };
    if !is_registered(function_name) {
        return Err(EvalError::call(name, format!("function \"{function_name}\" is unknown")));
    }

    match target {
        Value::Sequence(items) => {
            let mut mapped = Vec::with_capacity(items.len());
            for item in items {
                mapped.push(call(function_name, std::slice::from_ref(item))?);
            }
            Ok(Value::Sequence(mapped))
        }
        Value::Mapping(map) => {
            let mut mapped = Mapping::new();
            for (key, item) in map {
                mapped.insert(key.clone(), call(function_name, std::slice::from_ref(item))?);
            }
            Ok(Value::Mapping(mapped))
        }
        other => Err(EvalError::call(
            name,
            format!("invalid argument type {} for iterable", other.kind()),
        )),
    }
}

fn decode(name: &str, args: &[Value], engine: &impl Engine) -> Result<Value, EvalError> {
    let encoded = string_arg(name, args)?;
    let bytes = engine
        .decode(encoded)
        .map_err(|e| EvalError::call(name, e.to_string()))?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|e| EvalError::call(name, e.to_string()))
}

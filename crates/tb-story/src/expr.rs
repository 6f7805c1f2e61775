use std::collections::BTreeMap;

use rhai::{Dynamic, Engine, Map, Scope, FLOAT, INT};
use tb_core::{BridgeError, FieldValue, SharedStr};

pub(crate) type CharacterFields = BTreeMap<String, BTreeMap<String, FieldValue>>;

thread_local! {
    /// One evaluator per thread instead of one per expression. Strict
    /// variables make an unknown name an error rather than unit.
    static EVAL_ENGINE: Engine = {
        let mut engine = Engine::new();
        engine.set_strict_variables(true);
        engine
    };
}

fn field_to_dynamic(value: &FieldValue) -> Dynamic {
    match value {
        FieldValue::Null => Dynamic::UNIT,
        FieldValue::Int(value) => Dynamic::from(*value as INT),
        FieldValue::Float(value) => Dynamic::from(*value as FLOAT),
        FieldValue::Bool(value) => Dynamic::from(*value),
        FieldValue::Str(value) => Dynamic::from(value.as_str().unwrap_or("").to_string()),
    }
}

fn dynamic_to_field(value: Dynamic, expr: &str) -> Result<FieldValue, BridgeError> {
    let type_name = value.type_name();
    if value.is_unit() {
        return Ok(FieldValue::Null);
    }
    if let Ok(flag) = value.as_bool() {
        return Ok(FieldValue::Bool(flag));
    }
    if let Ok(int) = value.as_int() {
        return i32::try_from(int).map(FieldValue::Int).map_err(|_| {
            BridgeError::new(
                "ENGINE_EXPR",
                format!("Expression \"{}\" overflows the integer field range.", expr),
            )
        });
    }
    if let Ok(float) = value.as_float() {
        return Ok(FieldValue::Float(float));
    }
    if let Ok(text) = value.into_string() {
        return Ok(FieldValue::Str(SharedStr::from(text)));
    }
    Err(BridgeError::new(
        "ENGINE_EXPR",
        format!(
            "Expression \"{}\" produced unsupported type \"{}\".",
            expr, type_name
        ),
    ))
}

/// Evaluate one expression with every known character in scope as a map of
/// its fields. Expressions cannot mutate the scope; assignment happens only
/// through `set` statements.
pub(crate) fn eval(expr: &str, characters: &CharacterFields) -> Result<FieldValue, BridgeError> {
    let mut scope = Scope::new();
    for (name, fields) in characters {
        let mut map = Map::new();
        for (field, value) in fields {
            map.insert(field.as_str().into(), field_to_dynamic(value));
        }
        scope.push_dynamic(name.to_string(), Dynamic::from(map));
    }

    let value = EVAL_ENGINE
        .with(|engine| engine.eval_with_scope::<Dynamic>(&mut scope, expr))
        .map_err(|error| {
            BridgeError::new(
                "ENGINE_EXPR",
                format!("Expression \"{}\" failed: {}", expr, error),
            )
        })?;
    dynamic_to_field(value, expr)
}

/// Evaluate a `when` condition. Anything but a boolean result is an error,
/// never a truthiness guess.
pub(crate) fn eval_condition(
    expr: &str,
    characters: &CharacterFields,
) -> Result<bool, BridgeError> {
    match eval(expr, characters)? {
        FieldValue::Bool(value) => Ok(value),
        other => Err(BridgeError::new(
            "ENGINE_BOOLEAN_EXPECTED",
            format!(
                "Condition \"{}\" must evaluate to boolean, got {}.",
                expr,
                other.type_name()
            ),
        )),
    }
}

use chrono::Timelike;
use object::Value;
use rand::Rng;

use crate::{ErrorCode, ExecCx, ExecResult};

const INCORRECT_CALL: ErrorCode = ErrorCode::Other(40);

/// Looks up and runs a built-in function. `None` when `name` is not one.
pub(crate) fn call(cx: &mut ExecCx<'_>, name: &str, args: &[Value]) -> Option<ExecResult<Value>> {
    let result = match name {
        "ARG" => arg(cx, args),
        "CONDITION" => condition(cx, args),
        "TIME" => time(cx, args),
        "RANDOM" => random(cx, args),
        "LENGTH" => Ok(Value::whole(
            args.first().map_or(0, |v| v.to_rexx_string().chars().count()) as i64,
        )),
        "DIGITS" => Ok(Value::whole(cx.settings().numeric.digits as i64)),
        "ADDRESS" => Ok(Value::from(cx.settings().address.clone())),
        "TRACE" => Ok(Value::from(cx.settings().trace.to_string())),
        _ => return None,
    };
    Some(result)
}

fn option(cx: &mut ExecCx<'_>, name: &str, value: Option<&Value>, default: char) -> ExecResult<char> {
    let Some(value) = value.filter(|v| !v.is_nil()) else {
        return Ok(default);
    };
    match value.to_rexx_string().chars().next() {
        Some(c) => Ok(c.to_ascii_uppercase()),
        None => Err(cx.raise_error(INCORRECT_CALL, format!("{name} option must not be empty"))),
    }
}

fn whole(cx: &mut ExecCx<'_>, name: &str, value: &Value) -> ExecResult<i64> {
    match value.as_whole() {
        Some(n) => Ok(n),
        None => Err(cx.raise_error(
            INCORRECT_CALL,
            format!("{name} argument \"{value}\" must be a whole number"),
        )),
    }
}

fn arg(cx: &mut ExecCx<'_>, args: &[Value]) -> ExecResult<Value> {
    let Some(n) = args.first() else {
        return Ok(Value::whole(cx.args().len() as i64));
    };
    let n = whole(cx, "ARG", n)?;
    if n < 1 {
        return Err(cx.raise_error(INCORRECT_CALL, "ARG position must be positive"));
    }
    let value = cx.args().get(n as usize - 1).filter(|v| !v.is_nil()).cloned();
    match args.get(1) {
        None => Ok(value.unwrap_or_else(|| Value::from(""))),
        Some(opt) => match option(cx, "ARG", Some(opt), 'E')? {
            'E' => Ok(Value::boolean(value.is_some())),
            'O' => Ok(Value::boolean(value.is_none())),
            other => Err(cx.raise_error(INCORRECT_CALL, format!("ARG option {other}"))),
        },
    }
}

fn condition(cx: &mut ExecCx<'_>, args: &[Value]) -> ExecResult<Value> {
    let opt = option(cx, "CONDITION", args.first(), 'I')?;
    let Some(condition) = cx.condition_object().cloned() else {
        return Ok(Value::from(""));
    };
    let value = match opt {
        'C' => Value::from(condition.name.clone()),
        'D' => Value::from(condition.description.clone()),
        'I' => Value::from(condition.instruction.map_or("", |i| i.keyword())),
        'S' => Value::from(cx.trap_state(&condition.name).keyword()),
        'A' => {
            let parts: Vec<String> = condition.additional.iter().map(|v| v.to_string()).collect();
            Value::from(parts.join(" "))
        }
        'R' => condition.result.clone().unwrap_or_else(|| Value::from("")),
        other => return Err(cx.raise_error(INCORRECT_CALL, format!("CONDITION option {other}"))),
    };
    Ok(value)
}

fn time(cx: &mut ExecCx<'_>, args: &[Value]) -> ExecResult<Value> {
    let opt = option(cx, "TIME", args.first(), 'N')?;
    let settings = cx.settings_mut();
    let value = match opt {
        'N' => Value::from(settings.clause_time().format("%H:%M:%S").to_string()),
        'L' => Value::from(settings.clause_time().format("%H:%M:%S%.6f").to_string()),
        'S' => {
            Value::whole(i64::from(settings.clause_time().num_seconds_from_midnight()))
        }
        'E' => Value::from(format!("{:.6}", settings.elapsed(false))),
        'R' => Value::from(format!("{:.6}", settings.elapsed(true))),
        other => return Err(cx.raise_error(INCORRECT_CALL, format!("TIME option {other}"))),
    };
    Ok(value)
}

fn random(cx: &mut ExecCx<'_>, args: &[Value]) -> ExecResult<Value> {
    let present = |i: usize| args.get(i).filter(|v| !v.is_nil());
    let min = match present(0) {
        Some(v) => whole(cx, "RANDOM", v)?,
        None => 0,
    };
    let max = match present(1) {
        Some(v) => whole(cx, "RANDOM", v)?,
        None => 999,
    };
    if let Some(seed) = present(2) {
        let seed = whole(cx, "RANDOM", seed)?;
        cx.settings_mut().reseed(seed as u64);
    }
    if min > max {
        return Err(cx.raise_error(
            INCORRECT_CALL,
            format!("RANDOM minimum {min} exceeds maximum {max}"),
        ));
    }
    Ok(Value::whole(cx.settings_mut().random().gen_range(min..=max)))
}

use super::error::{RuntimeError, RuntimeResult};
use super::value::Value;

/// Composite formatting: `{n}` is replaced by `args[n]`, `{{` and `}}`
/// are literal braces. An optional `,alignment` or `:format` suffix is
/// accepted and ignored.
pub fn format_template(template: &str, args: &[Value]) -> RuntimeResult<String> {
    let invalid = || RuntimeError::Format(template.to_string());
    let mut output = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                output.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                output.push('}');
            }
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => spec.push(ch),
                        None => return Err(invalid()),
                    }
                }
                let index = spec
                    .split([',', ':'])
                    .next()
                    .map(str::trim)
                    .and_then(|index| index.parse::<usize>().ok())
                    .ok_or_else(invalid)?;
                let value = args.get(index).ok_or_else(invalid)?;
                output.push_str(&value.to_string());
            }
            '}' => return Err(invalid()),
            other => output.push(other),
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_positional_arguments() {
        let key = format_template(
            "Sample.Calculator.Calc_{0}_{1}",
            &[Value::I32(1), Value::I32(2)],
        )
        .unwrap();
        assert_eq!(key, "Sample.Calculator.Calc_1_2");
    }

    #[test]
    fn handles_escapes_and_reuse() {
        let text = format_template("{{{0}}} {0,5} {1:N}", &[Value::string("a"), Value::Bool(true)]).unwrap();
        assert_eq!(text, "{a} a True");
    }

    #[test]
    fn rejects_bad_templates() {
        assert!(format_template("{2}", &[Value::Null]).is_err());
        assert!(format_template("{0", &[Value::Null]).is_err());
        assert!(format_template("x}", &[]).is_err());
        assert!(format_template("{x}", &[Value::Null]).is_err());
    }
}

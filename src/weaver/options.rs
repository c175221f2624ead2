use thiserror::Error;
use weave_cache::{DURATION_OPTION, EVICTION_OPTION};
use weave_utils::find_best_match;

use crate::module::{Annotation, Instruction, Literal, TypeRef};

const KNOWN_OPTIONS: &[&str] = &["duration", "eviction"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    Absolute,
    Sliding,
}

impl Eviction {
    pub fn as_str(self) -> &'static str {
        match self {
            Eviction::Absolute => "Absolute",
            Eviction::Sliding => "Sliding",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    #[error("unknown cache option `{name}`")]
    Unknown {
        name: String,
        suggestion: Option<String>,
    },
    #[error("cache option `{name}` expects {expected}, found {found}")]
    InvalidValue {
        name: String,
        expected: &'static str,
        found: String,
    },
    #[error("cache option `{name}` is given more than once")]
    Duplicate { name: String },
}

/// Options carried by a cache annotation, checked at scan time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Entry lifetime in seconds.
    pub duration: Option<u32>,
    pub eviction: Option<Eviction>,
}

impl CacheOptions {
    pub fn from_annotation(annotation: &Annotation) -> Result<Self, OptionError> {
        let mut options = Self::default();
        for arg in &annotation.args {
            let name = arg.name.to_ascii_lowercase();
            match name.as_str() {
                "duration" => {
                    if options.duration.is_some() {
                        return Err(OptionError::Duplicate { name: arg.name.clone() });
                    }
                    options.duration = Some(parse_duration(&arg.name, &arg.value)?);
                }
                "eviction" => {
                    if options.eviction.is_some() {
                        return Err(OptionError::Duplicate { name: arg.name.clone() });
                    }
                    options.eviction = Some(parse_eviction(&arg.name, &arg.value)?);
                }
                _ => {
                    return Err(OptionError::Unknown {
                        name: arg.name.clone(),
                        suggestion: find_best_match(&name, KNOWN_OPTIONS.iter().copied()),
                    });
                }
            }
        }
        Ok(options)
    }

    pub fn is_empty(&self) -> bool {
        self.duration.is_none() && self.eviction.is_none()
    }

    /// Instructions that add each option to the options map on top of the
    /// stack, leaving the map in place.
    pub fn populate(&self, add: &crate::module::MethodRef) -> Vec<Instruction> {
        let mut code = Vec::new();
        if let Some(duration) = self.duration {
            code.extend([
                Instruction::Dup,
                Instruction::Ldstr(DURATION_OPTION.to_string()),
                Instruction::LdcI4(duration as i32),
                Instruction::Box(TypeRef::I32),
                Instruction::CallVirt(add.clone()),
            ]);
        }
        if let Some(eviction) = self.eviction {
            code.extend([
                Instruction::Dup,
                Instruction::Ldstr(EVICTION_OPTION.to_string()),
                Instruction::Ldstr(eviction.as_str().to_string()),
                Instruction::CallVirt(add.clone()),
            ]);
        }
        code
    }
}

fn parse_duration(name: &str, value: &Literal) -> Result<u32, OptionError> {
    match value {
        Literal::Int(seconds) if (0..=i64::from(i32::MAX)).contains(seconds) => Ok(*seconds as u32),
        Literal::Int(seconds) => Err(OptionError::InvalidValue {
            name: name.to_string(),
            expected: "a non-negative number of seconds",
            found: seconds.to_string(),
        }),
        other => Err(OptionError::InvalidValue {
            name: name.to_string(),
            expected: "an integer",
            found: other.kind().to_string(),
        }),
    }
}

fn parse_eviction(name: &str, value: &Literal) -> Result<Eviction, OptionError> {
    let text = match value {
        Literal::Ident(text) | Literal::Str(text) => text,
        other => {
            return Err(OptionError::InvalidValue {
                name: name.to_string(),
                expected: "`absolute` or `sliding`",
                found: other.kind().to_string(),
            });
        }
    };
    if text.eq_ignore_ascii_case("absolute") {
        Ok(Eviction::Absolute)
    } else if text.eq_ignore_ascii_case("sliding") {
        Ok(Eviction::Sliding)
    } else {
        Err(OptionError::InvalidValue {
            name: name.to_string(),
            expected: "`absolute` or `sliding`",
            found: format!("`{text}`"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::MethodRef;

    #[test]
    fn reads_duration_and_eviction() {
        let annotation = Annotation::new("Cache")
            .with_arg("Duration", Literal::Int(60))
            .with_arg("eviction", Literal::Ident("sliding".into()));
        let options = CacheOptions::from_annotation(&annotation).unwrap();
        assert_eq!(options.duration, Some(60));
        assert_eq!(options.eviction, Some(Eviction::Sliding));
    }

    #[test]
    fn unknown_option_suggests_closest_name() {
        let annotation = Annotation::new("Cache").with_arg("durration", Literal::Int(5));
        match CacheOptions::from_annotation(&annotation) {
            Err(OptionError::Unknown { suggestion, .. }) => {
                assert_eq!(suggestion.as_deref(), Some("duration"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_ill_typed_values() {
        let negative = Annotation::new("Cache").with_arg("duration", Literal::Int(-1));
        assert!(matches!(
            CacheOptions::from_annotation(&negative),
            Err(OptionError::InvalidValue { .. })
        ));
        let text = Annotation::new("Cache").with_arg("duration", Literal::Str("1m".into()));
        assert!(CacheOptions::from_annotation(&text).is_err());
        let twice = Annotation::new("Cache")
            .with_arg("duration", Literal::Int(1))
            .with_arg("Duration", Literal::Int(2));
        assert!(matches!(
            CacheOptions::from_annotation(&twice),
            Err(OptionError::Duplicate { .. })
        ));
    }

    #[test]
    fn populate_emits_one_add_per_option() {
        let add = MethodRef::new("System.Collections.Generic.Dictionary", "Add").with_arity(2);
        let options = CacheOptions {
            duration: Some(30),
            eviction: None,
        };
        let code = options.populate(&add);
        assert_eq!(code.len(), 5);
        assert_eq!(code[1], Instruction::Ldstr("Duration".into()));
        assert!(CacheOptions::default().populate(&add).is_empty());
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::module::{Instruction, LocalId, MethodDef, TypeRef};

use super::references::HostReferences;

/// How method keys are derived from a member's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// `Type.Method_{0}_{1}`; overloads sharing a name collide.
    #[default]
    Compatible,
    /// `Type.Method(i32,string)_{0}_{1}`.
    Signature,
}

/// A key format string plus the number of run-time values it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    template: String,
    generic_count: usize,
    param_count: usize,
}

impl KeyTemplate {
    pub fn for_method(owner: &str, method: &MethodDef, strategy: KeyStrategy) -> Self {
        let mut template = format!("{owner}.{}", method.name);
        if strategy == KeyStrategy::Signature {
            template.push_str(&method.signature());
        }
        let generic_count = method.generic_params.len();
        let param_count = method.params.len();
        for index in 0..generic_count + param_count {
            template.push_str(&format!("_{{{index}}}"));
        }
        Self {
            template,
            generic_count,
            param_count,
        }
    }

    /// Getters and setters share `Type.Property`.
    pub fn for_property(owner: &str, property: &str) -> Self {
        Self {
            template: format!("{owner}.{property}"),
            generic_count: 0,
            param_count: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn placeholder_count(&self) -> usize {
        self.generic_count + self.param_count
    }

    pub fn is_literal(&self) -> bool {
        self.placeholder_count() == 0
    }

    /// Code that leaves the run-time key on the stack.
    ///
    /// Literal templates are pushed as is. Otherwise an `object[]` is built
    /// in `args` (generic type tokens first, then parameters, boxing value
    /// types) and handed to `String.Format`.
    pub fn materialize(
        &self,
        method: &MethodDef,
        args: Option<LocalId>,
        refs: &HostReferences,
    ) -> Vec<Instruction> {
        let mut code = vec![Instruction::Ldstr(self.template.clone())];
        let Some(args) = args.filter(|_| !self.is_literal()) else {
            return code;
        };

        code.extend([
            Instruction::LdcI4(self.placeholder_count() as i32),
            Instruction::NewArr(TypeRef::Object),
            Instruction::Stloc(args),
        ]);
        for (index, generic) in method.generic_params.iter().enumerate() {
            code.extend([
                Instruction::Ldloc(args),
                Instruction::LdcI4(index as i32),
                Instruction::LdToken(TypeRef::GenericParam(generic.clone())),
                Instruction::Call(refs.get_type_from_handle.clone()),
                Instruction::Stelem,
            ]);
        }
        for (index, param) in method.params.iter().enumerate() {
            code.extend([
                Instruction::Ldloc(args),
                Instruction::LdcI4((self.generic_count + index) as i32),
                Instruction::Ldarg(method.arg_slot(index)),
            ]);
            if param.ty.needs_box() {
                code.push(Instruction::Box(param.ty.clone()));
            }
            code.push(Instruction::Stelem);
        }
        code.extend([
            Instruction::Ldloc(args),
            Instruction::Call(refs.string_format.clone()),
        ]);
        code
    }
}

impl fmt::Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleDef, ParamDef};
    use crate::runtime::{Value, format_template};
    use proptest::prelude::*;

    fn render(key: &KeyTemplate, values: &[&str]) -> String {
        let args: Vec<Value> = values.iter().map(|value| Value::string(*value)).collect();
        format_template(key.as_str(), &args).unwrap()
    }

    fn calc() -> MethodDef {
        let mut method = MethodDef::new("Calc", TypeRef::F64);
        method.is_static = true;
        method.params = vec![ParamDef::new("a", TypeRef::I32), ParamDef::new("b", TypeRef::I32)];
        method
    }

    fn refs() -> HostReferences {
        let mut module = ModuleDef::new("Sample", "Sample");
        module.references.push("Cache".into());
        HostReferences::resolve(&module).unwrap()
    }

    #[test]
    fn method_template_has_one_placeholder_per_parameter() {
        let key = KeyTemplate::for_method("Sample.Calculator", &calc(), KeyStrategy::Compatible);
        assert_eq!(key.as_str(), "Sample.Calculator.Calc_{0}_{1}");
        assert_eq!(render(&key, &["1", "2"]), "Sample.Calculator.Calc_1_2");
    }

    #[test]
    fn argument_text_is_not_substituted_again() {
        let key = KeyTemplate::for_method("Sample.Calculator", &calc(), KeyStrategy::Compatible);
        assert_eq!(render(&key, &["{1}", "x"]), "Sample.Calculator.Calc_{1}_x");
    }

    #[test]
    fn generic_arguments_come_first() {
        let mut method = calc();
        method.generic_params = vec!["T".into()];
        let key = KeyTemplate::for_method("Sample.Calculator", &method, KeyStrategy::Compatible);
        assert_eq!(key.as_str(), "Sample.Calculator.Calc_{0}_{1}_{2}");

        let code = key.materialize(&method, Some(LocalId(0)), &refs());
        let token = code
            .iter()
            .position(|i| matches!(i, Instruction::LdToken(_)))
            .unwrap();
        let first_arg = code
            .iter()
            .position(|i| matches!(i, Instruction::Ldarg(_)))
            .unwrap();
        assert!(token < first_arg);
        assert_eq!(code.iter().filter(|i| matches!(i, Instruction::Box(_))).count(), 2);
    }

    #[test]
    fn signature_strategy_separates_overloads() {
        let mut other = calc();
        other.params[1].ty = TypeRef::String;
        let a = KeyTemplate::for_method("T", &calc(), KeyStrategy::Signature);
        let b = KeyTemplate::for_method("T", &other, KeyStrategy::Signature);
        assert_eq!(a.as_str(), "T.Calc(i32,i32)_{0}_{1}");
        assert_ne!(a, b);
        assert_eq!(
            KeyTemplate::for_method("T", &calc(), KeyStrategy::Compatible),
            KeyTemplate::for_method("T", &other, KeyStrategy::Compatible)
        );
    }

    #[test]
    fn property_keys_are_literal() {
        let key = KeyTemplate::for_property("Sample.User", "Name");
        assert!(key.is_literal());
        assert_eq!(key.materialize(&calc(), Some(LocalId(0)), &refs()).len(), 1);
    }

    proptest! {
        #[test]
        fn placeholders_match_arity(params in 0usize..6, generics in 0usize..3) {
            let mut method = MethodDef::new("M", TypeRef::I32);
            method.params = (0..params).map(|i| ParamDef::new(format!("p{i}"), TypeRef::I64)).collect();
            method.generic_params = (0..generics).map(|i| format!("T{i}")).collect();
            let key = KeyTemplate::for_method("Owner", &method, KeyStrategy::Compatible);
            prop_assert_eq!(key.placeholder_count(), params + generics);
            prop_assert_eq!(key.as_str().matches('{').count(), params + generics);
            prop_assert!(key.as_str().starts_with("Owner.M"));
        }

        #[test]
        fn rendering_is_deterministic(values in proptest::collection::vec("[a-z0-9]{0,6}", 0..5)) {
            let mut method = MethodDef::new("M", TypeRef::I32);
            method.params = values.iter().enumerate().map(|(i, _)| ParamDef::new(format!("p{i}"), TypeRef::String)).collect();
            let key = KeyTemplate::for_method("Owner", &method, KeyStrategy::Compatible);
            let values: Vec<&str> = values.iter().map(String::as_str).collect();
            let rendered = render(&key, &values);
            prop_assert_eq!(rendered.clone(), render(&key, &values));
            prop_assert!(!rendered.contains('{'), "placeholder left in {}", rendered);
        }
    }
}

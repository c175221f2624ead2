use std::fmt;

use serde::{Deserialize, Serialize};

use super::body::{BlockId, LocalId};
use super::types::TypeRef;

/// A call target: `Owner::name[/arity][<T, ..>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arity: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_args: Vec<TypeRef>,
}

impl MethodRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            arity: None,
            generic_args: Vec::new(),
        }
    }

    pub fn with_arity(mut self, arity: u16) -> Self {
        self.arity = Some(arity);
        self
    }

    pub fn with_generic_args(mut self, args: Vec<TypeRef>) -> Self {
        self.generic_args = args;
        self
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)?;
        if let Some(arity) = self.arity {
            write!(f, "/{arity}")?;
        }
        if !self.generic_args.is_empty() {
            let args: Vec<String> = self.generic_args.iter().map(ToString::to_string).collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum Instruction {
    Nop,
    LdNull,
    LdcI4(i32),
    LdcI8(i64),
    LdcR8(f64),
    Ldstr(String),
    LdToken(TypeRef),
    Ldarg(u16),
    Starg(u16),
    Ldloc(LocalId),
    Stloc(LocalId),
    Ldfld(FieldRef),
    Stfld(FieldRef),
    Ldsfld(FieldRef),
    Stsfld(FieldRef),
    NewArr(TypeRef),
    Ldelem,
    Stelem,
    Box(TypeRef),
    UnboxAny(TypeRef),
    Dup,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Ceq,
    Clt,
    Cgt,
    Br(BlockId),
    BrTrue(BlockId),
    BrFalse(BlockId),
    Call(MethodRef),
    CallVirt(MethodRef),
    NewObj(MethodRef),
    Throw,
    Ret,
}

/// Every mnemonic understood by the text format.
pub const MNEMONICS: &[&str] = &[
    "nop", "ldnull", "ldc.i4", "ldc.i8", "ldc.r8", "ldstr", "ldtoken", "ldarg", "starg", "ldloc",
    "stloc", "ldfld", "stfld", "ldsfld", "stsfld", "newarr", "ldelem", "stelem", "box",
    "unbox.any", "dup", "pop", "add", "sub", "mul", "div", "rem", "ceq", "clt", "cgt", "br",
    "brtrue", "brfalse", "call", "callvirt", "newobj", "throw", "ret",
];

impl Instruction {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Nop => "nop",
            Instruction::LdNull => "ldnull",
            Instruction::LdcI4(_) => "ldc.i4",
            Instruction::LdcI8(_) => "ldc.i8",
            Instruction::LdcR8(_) => "ldc.r8",
            Instruction::Ldstr(_) => "ldstr",
            Instruction::LdToken(_) => "ldtoken",
            Instruction::Ldarg(_) => "ldarg",
            Instruction::Starg(_) => "starg",
            Instruction::Ldloc(_) => "ldloc",
            Instruction::Stloc(_) => "stloc",
            Instruction::Ldfld(_) => "ldfld",
            Instruction::Stfld(_) => "stfld",
            Instruction::Ldsfld(_) => "ldsfld",
            Instruction::Stsfld(_) => "stsfld",
            Instruction::NewArr(_) => "newarr",
            Instruction::Ldelem => "ldelem",
            Instruction::Stelem => "stelem",
            Instruction::Box(_) => "box",
            Instruction::UnboxAny(_) => "unbox.any",
            Instruction::Dup => "dup",
            Instruction::Pop => "pop",
            Instruction::Add => "add",
            Instruction::Sub => "sub",
            Instruction::Mul => "mul",
            Instruction::Div => "div",
            Instruction::Rem => "rem",
            Instruction::Ceq => "ceq",
            Instruction::Clt => "clt",
            Instruction::Cgt => "cgt",
            Instruction::Br(_) => "br",
            Instruction::BrTrue(_) => "brtrue",
            Instruction::BrFalse(_) => "brfalse",
            Instruction::Call(_) => "call",
            Instruction::CallVirt(_) => "callvirt",
            Instruction::NewObj(_) => "newobj",
            Instruction::Throw => "throw",
            Instruction::Ret => "ret",
        }
    }

    pub fn branch_target(&self) -> Option<BlockId> {
        match self {
            Instruction::Br(target) | Instruction::BrTrue(target) | Instruction::BrFalse(target) => {
                Some(*target)
            }
            _ => None,
        }
    }

    /// Control never continues to the next instruction after these.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Br(_) | Instruction::Ret | Instruction::Throw)
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_ref_display() {
        let retrieve = MethodRef::new("Cache.ICacheProvider", "Retrieve")
            .with_arity(1)
            .with_generic_args(vec![TypeRef::F64]);
        assert_eq!(retrieve.to_string(), "Cache.ICacheProvider::Retrieve/1<f64>");
        assert_eq!(
            MethodRef::new("Cache.CacheProvider", "get_Provider").to_string(),
            "Cache.CacheProvider::get_Provider"
        );
    }

    #[test]
    fn mnemonic_table_covers_every_opcode() {
        for instruction in [
            Instruction::UnboxAny(TypeRef::I32),
            Instruction::LdcR8(1.0),
            Instruction::CallVirt(MethodRef::new("A", "b")),
            Instruction::Ret,
        ] {
            assert!(MNEMONICS.contains(&instruction.mnemonic()));
        }
    }
}

//! Resolves surface syntax into a [`ModuleDef`].

use std::collections::HashMap;

use weave_span::Span;
use weave_utils::find_best_match;

use super::grammar::ParserError;
use super::syntax::{
    BodyLine, FieldSyntax, Item, Member, MethodSyntax, Operand, PropertySyntax, TypeExpr,
    TypeSyntax, Word,
};
use crate::module::{
    Block, BlockId, FieldDef, FieldRef, Instruction, LocalId, MNEMONICS, MethodBody, MethodDef,
    MethodKind, MethodRef, ModuleDef, ParamDef, PropertyDef, TypeDef, TypeKind, TypeRef,
    Visibility,
};

const TYPE_FLAGS: &[&str] = &["abstract", "interface", "private", "public"];
const FIELD_FLAGS: &[&str] = &["static", "private", "public"];
const METHOD_FLAGS: &[&str] = &[
    "static", "abstract", "private", "public", "ctor", "getter", "setter",
];

pub fn lower(items: Vec<Item>) -> Result<ModuleDef, Vec<ParserError>> {
    let mut errors = Vec::new();
    let mut module: Option<ModuleDef> = None;
    let mut assembly = None;
    let mut references = Vec::new();
    let mut types = Vec::new();
    let mut type_names: HashMap<String, Span> = HashMap::new();

    for item in items {
        match item {
            Item::Module {
                name,
                annotations,
                span,
            } => {
                if module.is_some() {
                    errors.push(ParserError::new("duplicate `module` declaration", span));
                    continue;
                }
                let mut def = ModuleDef::new(name.clone(), name);
                def.annotations = annotations;
                module = Some(def);
            }
            Item::Assembly {
                name,
                annotations,
                span,
            } => {
                if assembly.is_some() {
                    errors.push(ParserError::new("duplicate `assembly` declaration", span));
                    continue;
                }
                assembly = Some((name, annotations));
            }
            Item::Reference { name, .. } => {
                if !references.contains(&name) {
                    references.push(name);
                }
            }
            Item::Type(syntax) => {
                if let Some(previous) = type_names.insert(syntax.name.clone(), syntax.span) {
                    errors.push(
                        ParserError::new(format!("type `{}` is defined twice", syntax.name), syntax.span)
                            .with_help(format!(
                                "first definition at {}..{}",
                                previous.start(),
                                previous.end()
                            )),
                    );
                    continue;
                }
                match lower_type(syntax) {
                    Ok(ty) => types.push(ty),
                    Err(mut type_errors) => errors.append(&mut type_errors),
                }
            }
        }
    }

    let Some(mut module) = module else {
        errors.push(
            ParserError::new("missing `module` declaration", Span::new(0, 0))
                .with_help("start the file with `module <Name>`"),
        );
        return Err(errors);
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    if let Some((name, annotations)) = assembly {
        module.assembly.name = name;
        module.assembly.annotations = annotations;
    }
    module.references = references;
    module.types = types;
    Ok(module)
}

fn unknown_word(word: &Word, what: &str, known: &[&str]) -> ParserError {
    let error = ParserError::new(format!("unknown {what} `{}`", word.text), word.span);
    match find_best_match(&word.text, known.iter().copied()) {
        Some(suggestion) => error.with_help(format!("did you mean `{suggestion}`?")),
        None => error.with_help(format!("expected one of: {}", known.join(", "))),
    }
}

fn resolve_type(expr: &TypeExpr, generics: &[String]) -> TypeRef {
    let mut ty = if generics.contains(&expr.name) {
        TypeRef::GenericParam(expr.name.clone())
    } else {
        TypeRef::primitive(&expr.name).unwrap_or_else(|| TypeRef::named(expr.name.clone()))
    };
    for _ in 0..expr.array_depth {
        ty = TypeRef::array(ty);
    }
    ty
}

fn lower_type(syntax: TypeSyntax) -> Result<TypeDef, Vec<ParserError>> {
    let mut errors = Vec::new();
    let mut ty = TypeDef::new(syntax.name);
    ty.base = syntax.base;
    ty.annotations = syntax.annotations;
    ty.span = Some(syntax.span);

    for word in &syntax.words {
        match word.text.as_str() {
            "abstract" => ty.is_abstract = true,
            "interface" => ty.kind = TypeKind::Interface,
            "private" => ty.visibility = Visibility::Private,
            "public" => ty.visibility = Visibility::Public,
            _ => errors.push(unknown_word(word, "type flag", TYPE_FLAGS)),
        }
    }

    let mut properties = Vec::new();
    for member in syntax.members {
        match member {
            Member::Field(field) => match lower_field(field) {
                Ok(field) => {
                    ty.add_field(field);
                }
                Err(error) => errors.push(error),
            },
            Member::Method(method) => match lower_method(method, &ty) {
                Ok(method) => {
                    ty.add_method(method);
                }
                Err(mut method_errors) => errors.append(&mut method_errors),
            },
            Member::Property(property) => properties.push(property),
        }
    }

    // Accessor names may refer to methods declared after the property.
    for property in properties {
        match lower_property(property, &mut ty) {
            Ok(property) => {
                ty.add_property(property);
            }
            Err(error) => errors.push(error),
        }
    }

    if errors.is_empty() {
        Ok(ty)
    } else {
        Err(errors)
    }
}

fn lower_field(syntax: FieldSyntax) -> Result<FieldDef, ParserError> {
    let mut field = FieldDef::new(syntax.name, resolve_type(&syntax.ty, &[]));
    field.annotations = syntax.annotations;
    for word in &syntax.words {
        match word.text.as_str() {
            "static" => field.is_static = true,
            "private" => field.visibility = Visibility::Private,
            "public" => field.visibility = Visibility::Public,
            _ => return Err(unknown_word(word, "field flag", FIELD_FLAGS)),
        }
    }
    Ok(field)
}

fn lower_property(syntax: PropertySyntax, ty: &mut TypeDef) -> Result<PropertyDef, ParserError> {
    let mut property = PropertyDef::new(syntax.name, resolve_type(&syntax.ty, &[]));
    property.annotations = syntax.annotations;
    property.span = Some(syntax.span);

    let mut words = syntax.words.iter();
    while let Some(word) = words.next() {
        let kind = match word.text.as_str() {
            "get" => MethodKind::Getter,
            "set" => MethodKind::Setter,
            _ => return Err(unknown_word(word, "property clause", &["get", "set"])),
        };
        let Some(target) = words.next() else {
            return Err(ParserError::new(
                format!("`{}` needs an accessor method name", word.text),
                word.span,
            ));
        };
        let Some(index) = ty.find_method(&target.text) else {
            let names: Vec<&str> = ty.methods.iter().map(|method| method.name.as_str()).collect();
            let error = ParserError::new(
                format!("accessor method `{}` is not defined on `{}`", target.text, ty.name),
                target.span,
            );
            return Err(match find_best_match(&target.text, names) {
                Some(suggestion) => error.with_help(format!("did you mean `{suggestion}`?")),
                None => error,
            });
        };
        let method = &mut ty.methods[index];
        if method.kind == MethodKind::Normal {
            method.kind = kind;
        }
        match kind {
            MethodKind::Getter => property.getter = Some(index),
            _ => property.setter = Some(index),
        }
    }
    Ok(property)
}

fn lower_method(syntax: MethodSyntax, owner: &TypeDef) -> Result<MethodDef, Vec<ParserError>> {
    let mut errors = Vec::new();
    let generics = syntax.generics;
    let mut method = MethodDef::new(syntax.name, resolve_type(&syntax.return_type, &generics));
    method.params = syntax
        .params
        .iter()
        .map(|param| ParamDef::new(param.name.clone(), resolve_type(&param.ty, &generics)))
        .collect();
    method.annotations = syntax.annotations;
    method.span = Some(syntax.span);

    for word in &syntax.words {
        match word.text.as_str() {
            "static" => method.is_static = true,
            "abstract" => method.is_abstract = true,
            "private" => method.visibility = Visibility::Private,
            "public" => method.visibility = Visibility::Public,
            "ctor" => method.kind = MethodKind::Constructor,
            "getter" => method.kind = MethodKind::Getter,
            "setter" => method.kind = MethodKind::Setter,
            _ => errors.push(unknown_word(word, "method flag", METHOD_FLAGS)),
        }
    }
    if owner.is_interface() {
        method.is_abstract = true;
    }
    method.generic_params = generics;

    if let Some(lines) = syntax.body {
        let lowered = BodyLowering::new(&method).lower(&lines);
        match lowered {
            Ok(body) => method.body = Some(body),
            Err(mut body_errors) => errors.append(&mut body_errors),
        }
    }

    if errors.is_empty() {
        Ok(method)
    } else {
        Err(errors)
    }
}

struct BodyLowering<'a> {
    method: &'a MethodDef,
    body: MethodBody,
    labels: HashMap<String, BlockId>,
    errors: Vec<ParserError>,
}

impl<'a> BodyLowering<'a> {
    fn new(method: &'a MethodDef) -> Self {
        Self {
            method,
            body: MethodBody::new(),
            labels: HashMap::new(),
            errors: Vec::new(),
        }
    }

    fn lower(mut self, lines: &[BodyLine]) -> Result<MethodBody, Vec<ParserError>> {
        for line in lines {
            if let BodyLine::Locals(locals) = line {
                for local in locals {
                    if self.body.local_named(&local.name).is_some() {
                        self.errors.push(ParserError::new(
                            format!("local `{}` is declared twice", local.name),
                            local.span,
                        ));
                        continue;
                    }
                    let ty = resolve_type(&local.ty, &self.method.generic_params);
                    self.body.add_local(Some(local.name.clone()), ty);
                }
            }
        }

        // Labels split the body into blocks; consecutive labels share one.
        let mut block = 0u32;
        let mut has_content = false;
        for line in lines {
            match line {
                BodyLine::Label(word) => {
                    if has_content {
                        block += 1;
                        has_content = false;
                    }
                    if self.labels.insert(word.text.clone(), BlockId(block)).is_some() {
                        self.errors.push(ParserError::new(
                            format!("label `{}` is defined twice", word.text),
                            word.span,
                        ));
                    }
                }
                BodyLine::Instruction { .. } => has_content = true,
                BodyLine::Locals(_) => {}
            }
        }

        let mut blocks: Vec<Vec<Instruction>> = vec![Vec::new(); block as usize + 1];
        let mut current = 0usize;
        let mut has_content = false;
        for line in lines {
            match line {
                BodyLine::Label(_) => {
                    if has_content {
                        current += 1;
                        has_content = false;
                    }
                }
                BodyLine::Instruction {
                    opcode, operands, ..
                } => {
                    has_content = true;
                    match self.instruction(opcode, operands) {
                        Ok(instruction) => blocks[current].push(instruction),
                        Err(error) => self.errors.push(error),
                    }
                }
                BodyLine::Locals(_) => {}
            }
        }

        for instructions in blocks {
            self.body.push_block(Block::new(instructions));
        }

        if self.errors.is_empty() {
            if let Err(error) = self.body.validate() {
                let span = self.method.span.unwrap_or_default();
                self.errors.push(ParserError::new(
                    format!("invalid body for `{}`: {error}", self.method.name),
                    span,
                ));
            }
        }

        if self.errors.is_empty() {
            Ok(self.body)
        } else {
            Err(self.errors)
        }
    }

    fn expect_operands<'o>(
        &self,
        opcode: &Word,
        operands: &'o [(Operand, Span)],
        count: usize,
    ) -> Result<&'o [(Operand, Span)], ParserError> {
        if operands.len() == count {
            return Ok(operands);
        }
        let noun = if count == 1 { "operand" } else { "operands" };
        Err(ParserError::new(
            format!(
                "`{}` takes {count} {noun}, found {}",
                opcode.text,
                operands.len()
            ),
            opcode.span,
        ))
    }

    fn single<'o>(
        &self,
        opcode: &Word,
        operands: &'o [(Operand, Span)],
    ) -> Result<&'o (Operand, Span), ParserError> {
        let operands = self.expect_operands(opcode, operands, 1)?;
        Ok(&operands[0])
    }

    fn mismatch(opcode: &Word, expected: &str, (operand, span): &(Operand, Span)) -> ParserError {
        ParserError::new(
            format!(
                "`{}` expects {expected}, found {}",
                opcode.text,
                operand.describe()
            ),
            *span,
        )
    }

    fn instruction(
        &self,
        opcode: &Word,
        operands: &[(Operand, Span)],
    ) -> Result<Instruction, ParserError> {
        let simple = match opcode.text.as_str() {
            "nop" => Some(Instruction::Nop),
            "ldnull" => Some(Instruction::LdNull),
            "ldelem" => Some(Instruction::Ldelem),
            "stelem" => Some(Instruction::Stelem),
            "dup" => Some(Instruction::Dup),
            "pop" => Some(Instruction::Pop),
            "add" => Some(Instruction::Add),
            "sub" => Some(Instruction::Sub),
            "mul" => Some(Instruction::Mul),
            "div" => Some(Instruction::Div),
            "rem" => Some(Instruction::Rem),
            "ceq" => Some(Instruction::Ceq),
            "clt" => Some(Instruction::Clt),
            "cgt" => Some(Instruction::Cgt),
            "throw" => Some(Instruction::Throw),
            "ret" => Some(Instruction::Ret),
            _ => None,
        };
        if let Some(instruction) = simple {
            self.expect_operands(opcode, operands, 0)?;
            return Ok(instruction);
        }

        let instruction = match opcode.text.as_str() {
            "ldc.i4" => match self.single(opcode, operands)? {
                (Operand::Int(value), span) => {
                    let value = i32::try_from(*value).map_err(|_| {
                        ParserError::new(format!("`{value}` does not fit in i32"), *span)
                    })?;
                    Instruction::LdcI4(value)
                }
                other => return Err(Self::mismatch(opcode, "an integer", other)),
            },
            "ldc.i8" => match self.single(opcode, operands)? {
                (Operand::Int(value), _) => Instruction::LdcI8(*value),
                other => return Err(Self::mismatch(opcode, "an integer", other)),
            },
            "ldc.r8" => match self.single(opcode, operands)? {
                (Operand::Float(value), _) => Instruction::LdcR8(*value),
                (Operand::Int(value), _) => Instruction::LdcR8(*value as f64),
                other => return Err(Self::mismatch(opcode, "a number", other)),
            },
            "ldstr" => match self.single(opcode, operands)? {
                (Operand::Str(value), _) => Instruction::Ldstr(value.clone()),
                other => return Err(Self::mismatch(opcode, "a string", other)),
            },
            "ldtoken" | "newarr" | "box" | "unbox.any" => {
                let ty = match self.single(opcode, operands)? {
                    (Operand::Type(expr), _) => resolve_type(expr, &self.method.generic_params),
                    other => return Err(Self::mismatch(opcode, "a type", other)),
                };
                match opcode.text.as_str() {
                    "ldtoken" => Instruction::LdToken(ty),
                    "newarr" => Instruction::NewArr(ty),
                    "box" => Instruction::Box(ty),
                    _ => Instruction::UnboxAny(ty),
                }
            }
            "ldarg" | "starg" => {
                let slot = self.arg_slot(opcode, self.single(opcode, operands)?)?;
                if opcode.text == "ldarg" {
                    Instruction::Ldarg(slot)
                } else {
                    Instruction::Starg(slot)
                }
            }
            "ldloc" | "stloc" => {
                let local = self.local(opcode, self.single(opcode, operands)?)?;
                if opcode.text == "ldloc" {
                    Instruction::Ldloc(local)
                } else {
                    Instruction::Stloc(local)
                }
            }
            "ldfld" | "stfld" | "ldsfld" | "stsfld" => {
                let field = match self.single(opcode, operands)? {
                    (
                        Operand::Member {
                            owner,
                            name,
                            arity: None,
                            generic_args,
                        },
                        _,
                    ) if generic_args.is_empty() => FieldRef::new(owner.clone(), name.clone()),
                    other => return Err(Self::mismatch(opcode, "a field `Owner::name`", other)),
                };
                match opcode.text.as_str() {
                    "ldfld" => Instruction::Ldfld(field),
                    "stfld" => Instruction::Stfld(field),
                    "ldsfld" => Instruction::Ldsfld(field),
                    _ => Instruction::Stsfld(field),
                }
            }
            "br" | "brtrue" | "brfalse" => {
                let target = self.label(opcode, self.single(opcode, operands)?)?;
                match opcode.text.as_str() {
                    "br" => Instruction::Br(target),
                    "brtrue" => Instruction::BrTrue(target),
                    _ => Instruction::BrFalse(target),
                }
            }
            "call" | "callvirt" | "newobj" => {
                let method = match self.single(opcode, operands)? {
                    (
                        Operand::Member {
                            owner,
                            name,
                            arity,
                            generic_args,
                        },
                        _,
                    ) => MethodRef {
                        owner: owner.clone(),
                        name: name.clone(),
                        arity: *arity,
                        generic_args: generic_args
                            .iter()
                            .map(|arg| resolve_type(arg, &self.method.generic_params))
                            .collect(),
                    },
                    other => return Err(Self::mismatch(opcode, "a method `Owner::name`", other)),
                };
                match opcode.text.as_str() {
                    "call" => Instruction::Call(method),
                    "callvirt" => Instruction::CallVirt(method),
                    _ => Instruction::NewObj(method),
                }
            }
            _ => return Err(unknown_word(opcode, "instruction", MNEMONICS)),
        };
        Ok(instruction)
    }

    fn arg_slot(&self, opcode: &Word, operand: &(Operand, Span)) -> Result<u16, ParserError> {
        let max = self.method.params.len() + usize::from(!self.method.is_static);
        match operand {
            (Operand::Int(value), span) => match usize::try_from(*value) {
                Ok(slot) if slot < max => Ok(slot as u16),
                _ => Err(ParserError::new(
                    format!("argument slot {value} is out of range for `{}`", self.method.name),
                    *span,
                )),
            },
            (Operand::Type(expr), span) if expr.array_depth == 0 => {
                if expr.name == "this" && !self.method.is_static {
                    return Ok(0);
                }
                self.method
                    .params
                    .iter()
                    .position(|param| param.name == expr.name)
                    .map(|index| self.method.arg_slot(index))
                    .ok_or_else(|| {
                        ParserError::new(format!("unknown parameter `{}`", expr.name), *span)
                    })
            }
            other => Err(Self::mismatch(opcode, "a parameter", other)),
        }
    }

    fn local(&self, opcode: &Word, operand: &(Operand, Span)) -> Result<LocalId, ParserError> {
        match operand {
            (Operand::Int(value), span) => match usize::try_from(*value) {
                Ok(index) if index < self.body.locals.len() => Ok(LocalId(index as u16)),
                _ => Err(ParserError::new(format!("local {value} is not declared"), *span)),
            },
            (Operand::Type(expr), span) if expr.array_depth == 0 => {
                self.body.local_named(&expr.name).ok_or_else(|| {
                    let names = self.body.locals.iter().filter_map(|local| local.name.as_deref());
                    let error =
                        ParserError::new(format!("local `{}` is not declared", expr.name), *span);
                    match find_best_match(&expr.name, names) {
                        Some(suggestion) => error.with_help(format!("did you mean `{suggestion}`?")),
                        None => error.with_help("declare it with `locals name: type`"),
                    }
                })
            }
            other => Err(Self::mismatch(opcode, "a local", other)),
        }
    }

    fn label(&self, opcode: &Word, operand: &(Operand, Span)) -> Result<BlockId, ParserError> {
        match operand {
            (Operand::Type(expr), span) if expr.array_depth == 0 => {
                self.labels.get(&expr.name).copied().ok_or_else(|| {
                    let error = ParserError::new(format!("unknown label `{}`", expr.name), *span);
                    match find_best_match(&expr.name, self.labels.keys()) {
                        Some(suggestion) => error.with_help(format!("did you mean `{suggestion}`?")),
                        None => error,
                    }
                })
            }
            other => Err(Self::mismatch(opcode, "a label", other)),
        }
    }
}

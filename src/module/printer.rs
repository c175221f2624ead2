use std::collections::HashMap;
use std::fmt::Write;

use super::annotation::{Annotation, escape};
use super::body::{BlockId, LocalId, MethodBody};
use super::definition::{
    FieldDef, MethodDef, MethodKind, ModuleDef, PropertyDef, TypeDef, TypeKind, Visibility,
};
use super::instruction::Instruction;

const INDENT: &str = "    ";

/// Render `module` in the `.cwil` text form accepted by the parser.
pub fn print_module(module: &ModuleDef) -> String {
    let mut out = String::new();
    line(&mut out, 0, &format!("module {}{}", module.name, annotations(&module.annotations)));
    line(
        &mut out,
        0,
        &format!(
            "assembly {}{}",
            module.assembly.name,
            annotations(&module.assembly.annotations)
        ),
    );
    for reference in &module.references {
        line(&mut out, 0, &format!("reference {reference}"));
    }
    for ty in &module.types {
        out.push('\n');
        print_type(&mut out, ty);
    }
    out
}

fn line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

fn annotations(annotations: &[Annotation]) -> String {
    annotations
        .iter()
        .map(|annotation| format!(" {annotation}"))
        .collect()
}

fn print_type(out: &mut String, ty: &TypeDef) {
    let mut header = format!("type {}", ty.name);
    if let Some(base) = &ty.base {
        let _ = write!(header, " extends {base}");
    }
    if ty.is_abstract {
        header.push_str(" abstract");
    }
    if ty.kind == TypeKind::Interface {
        header.push_str(" interface");
    }
    if ty.visibility == Visibility::Private {
        header.push_str(" private");
    }
    header.push_str(&annotations(&ty.annotations));

    if ty.fields.is_empty() && ty.methods.is_empty() && ty.properties.is_empty() {
        line(out, 0, &header);
        return;
    }
    header.push(':');
    line(out, 0, &header);

    for field in &ty.fields {
        print_field(out, field);
    }
    for method in &ty.methods {
        print_method(out, method, ty.kind == TypeKind::Interface);
    }
    for property in &ty.properties {
        print_property(out, ty, property);
    }
}

fn print_field(out: &mut String, field: &FieldDef) {
    let mut text = format!("field {}: {}", field.name, field.ty);
    if field.is_static {
        text.push_str(" static");
    }
    if field.visibility == Visibility::Private {
        text.push_str(" private");
    }
    text.push_str(&annotations(&field.annotations));
    line(out, 1, &text);
}

fn print_property(out: &mut String, ty: &TypeDef, property: &PropertyDef) {
    let mut text = format!("property {}: {}", property.name, property.ty);
    if let Some(getter) = property.getter.and_then(|index| ty.methods.get(index)) {
        let _ = write!(text, " get {}", getter.name);
    }
    if let Some(setter) = property.setter.and_then(|index| ty.methods.get(index)) {
        let _ = write!(text, " set {}", setter.name);
    }
    text.push_str(&annotations(&property.annotations));
    line(out, 1, &text);
}

fn print_method(out: &mut String, method: &MethodDef, in_interface: bool) {
    let mut text = format!("method {}", method.name);
    if !method.generic_params.is_empty() {
        let _ = write!(text, "<{}>", method.generic_params.join(", "));
    }
    let params: Vec<String> = method
        .params
        .iter()
        .map(|param| format!("{}: {}", param.name, param.ty))
        .collect();
    let _ = write!(text, "({}) -> {}", params.join(", "), method.return_type);
    if method.is_static {
        text.push_str(" static");
    }
    if method.is_abstract && !in_interface {
        text.push_str(" abstract");
    }
    if method.visibility == Visibility::Private {
        text.push_str(" private");
    }
    match method.kind {
        MethodKind::Normal => {}
        MethodKind::Constructor => text.push_str(" ctor"),
        MethodKind::Getter => text.push_str(" getter"),
        MethodKind::Setter => text.push_str(" setter"),
    }
    text.push_str(&annotations(&method.annotations));

    match &method.body {
        Some(body) => {
            text.push(':');
            line(out, 1, &text);
            print_body(out, body);
        }
        None => line(out, 1, &text),
    }
}

fn local_name(body: &MethodBody, local: LocalId) -> String {
    body.locals
        .get(local.index())
        .and_then(|def| def.name.clone())
        .unwrap_or_else(|| format!("_{}", local.0))
}

fn print_body(out: &mut String, body: &MethodBody) {
    if !body.locals.is_empty() {
        let locals: Vec<String> = (0..body.locals.len())
            .map(|index| {
                let id = LocalId(index as u16);
                format!("{}: {}", local_name(body, id), body.locals[index].ty)
            })
            .collect();
        line(out, 2, &format!("locals {}", locals.join(", ")));
    }

    let labels: HashMap<BlockId, String> = body
        .layout()
        .iter()
        .enumerate()
        .map(|(position, id)| (*id, format!("L{position}")))
        .collect();
    let entry_targeted = body.entry().is_some_and(|entry| {
        body.blocks().any(|(_, block)| {
            block
                .instructions
                .iter()
                .any(|instruction| instruction.branch_target() == Some(entry))
        })
    });

    for (position, (id, block)) in body.blocks().enumerate() {
        if position > 0 || entry_targeted {
            line(out, 2, &format!("{}:", labels[&id]));
        }
        for instruction in &block.instructions {
            line(out, 2, &instruction_text(body, &labels, instruction));
        }
    }
}

fn instruction_text(
    body: &MethodBody,
    labels: &HashMap<BlockId, String>,
    instruction: &Instruction,
) -> String {
    let mnemonic = instruction.mnemonic();
    let label = |target: &BlockId| {
        labels
            .get(target)
            .cloned()
            .unwrap_or_else(|| format!("B{}", target.0))
    };
    match instruction {
        Instruction::LdcI4(value) => format!("{mnemonic} {value}"),
        Instruction::LdcI8(value) => format!("{mnemonic} {value}"),
        Instruction::LdcR8(value) => format!("{mnemonic} {value:?}"),
        Instruction::Ldstr(value) => format!("{mnemonic} \"{}\"", escape(value)),
        Instruction::LdToken(ty)
        | Instruction::NewArr(ty)
        | Instruction::Box(ty)
        | Instruction::UnboxAny(ty) => format!("{mnemonic} {ty}"),
        Instruction::Ldarg(slot) | Instruction::Starg(slot) => format!("{mnemonic} {slot}"),
        Instruction::Ldloc(local) | Instruction::Stloc(local) => {
            format!("{mnemonic} {}", local_name(body, *local))
        }
        Instruction::Ldfld(field)
        | Instruction::Stfld(field)
        | Instruction::Ldsfld(field)
        | Instruction::Stsfld(field) => format!("{mnemonic} {field}"),
        Instruction::Br(target) | Instruction::BrTrue(target) | Instruction::BrFalse(target) => {
            format!("{mnemonic} {}", label(target))
        }
        Instruction::Call(method) | Instruction::CallVirt(method) | Instruction::NewObj(method) => {
            format!("{mnemonic} {method}")
        }
        _ => mnemonic.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    const SOURCE: &str = "\
module Sample.Lib @Cache
assembly Sample
reference Cache

type Sample.Loop @Cache(duration: 30, eviction: \"sliding\"):
    field count: i32 static private
    method Spin<T>(n: i32, tag: T) -> f64 static:
        locals i: i32
        L0:
        ldarg 0
        ldloc i
        clt
        brtrue L0
        ldstr \"done \\\"ok\\\"\"
        pop
        ldc.r8 0.5
        ret
    method Describe() -> string abstract
";

    #[test]
    fn printed_text_reparses_to_the_same_text() {
        let module = parse_module(SOURCE).expect("source should parse");
        let printed = print_module(&module);
        let reparsed = parse_module(&printed).expect("printed text should parse");
        assert_eq!(print_module(&reparsed), printed);
        assert_eq!(
            reparsed.types[0].methods[0].body,
            module.types[0].methods[0].body
        );
    }

    #[test]
    fn entry_label_is_printed_only_when_targeted() {
        let module = parse_module(SOURCE).expect("source should parse");
        let printed = print_module(&module);
        assert!(printed.contains("        L0:\n        ldarg 0\n"));
        assert!(printed.contains("ldstr \"done \\\"ok\\\"\""));
        assert!(printed.contains("@Cache(duration: 30, eviction: \"sliding\"):"));
        assert!(printed.contains("    method Describe() -> string abstract\n"));
    }
}

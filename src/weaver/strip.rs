use weave_utils::Diagnostic;

use crate::module::{Annotated, ModuleDef};

use super::scanner::ScanRules;

/// Abstract members cannot carry the cache marker; each one is a fatal
/// error. Runs before anything is rewritten.
pub fn check_abstract(module: &ModuleDef, rules: &ScanRules, source_id: &str) -> Vec<Diagnostic> {
    let mut errors = Vec::new();
    for ty in &module.types {
        for method in ty.methods.iter().filter(|method| method.is_abstract) {
            if let Some(marker) = method.find_annotation(&rules.cache_marker) {
                errors.push(
                    Diagnostic::error(
                        source_id,
                        marker.span.or(method.span),
                        format!("abstract method `{}::{}` cannot be cached", ty.name, method.name),
                    )
                    .with_label("marked here")
                    .with_help(format!(
                        "remove `@{}` or give the method a body",
                        rules.cache_marker
                    )),
                );
            }
        }
        for (index, property) in ty.properties.iter().enumerate() {
            let abstract_getter = ty.getter_of(index).is_some_and(|getter| getter.is_abstract);
            if abstract_getter && property.has_annotation(&rules.cache_marker) {
                errors.push(Diagnostic::error(
                    source_id,
                    property.span,
                    format!("abstract property `{}.{}` cannot be cached", ty.name, property.name),
                ));
            }
        }
    }
    errors
}

/// Remove every cache and no-cache marker from the module, its assembly,
/// each type and each member.
pub fn strip_module(module: &mut ModuleDef, rules: &ScanRules) -> usize {
    let mut removed = strip(module, rules) + strip(&mut module.assembly, rules);
    for ty in &mut module.types {
        removed += strip(ty, rules);
        removed += ty.fields.iter_mut().map(|field| strip(field, rules)).sum::<usize>();
        removed += ty.properties.iter_mut().map(|property| strip(property, rules)).sum::<usize>();
        removed += ty.methods.iter_mut().map(|method| strip(method, rules)).sum::<usize>();
    }
    removed
}

fn strip<A: Annotated>(item: &mut A, rules: &ScanRules) -> usize {
    item.strip_annotation(&rules.cache_marker) + item.strip_annotation(&rules.no_cache_marker)
}

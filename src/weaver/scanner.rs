use tracing::debug;
use weave_utils::Diagnostic;

use crate::module::{
    Annotated, Annotation, COMPILER_GENERATED, MethodDef, MethodId, ModuleDef, PropertyId, TypeId,
};

use super::options::{CacheOptions, OptionError};

/// Marker names the scanner looks for.
#[derive(Debug, Clone)]
pub struct ScanRules {
    pub cache_marker: String,
    pub no_cache_marker: String,
    /// Name of the property that yields the provider; never woven itself.
    pub accessor_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateMember {
    Method(MethodId),
    Property(PropertyId),
}

/// Where the annotation selecting a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Member,
    Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeaveCandidate {
    pub ty: TypeId,
    pub member: CandidateMember,
    pub annotation: Annotation,
    pub options: CacheOptions,
    pub source: CandidateSource,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<WeaveCandidate>,
    pub warnings: Vec<Diagnostic>,
}

/// Collect weave candidates in declaration order, stripping the markers
/// from every visited member.
pub fn scan(module: &mut ModuleDef, rules: &ScanRules, source_id: &str) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    for ty in module.type_ids().collect::<Vec<_>>() {
        scan_type(module, ty, rules, source_id, &mut outcome);
    }
    debug!(candidates = outcome.candidates.len(), "scan finished");
    outcome
}

fn scan_type(
    module: &mut ModuleDef,
    ty: TypeId,
    rules: &ScanRules,
    source_id: &str,
    outcome: &mut ScanOutcome,
) {
    let class_marker = module.type_def(ty).find_annotation(&rules.cache_marker).cloned();
    let type_name = module.type_def(ty).name.clone();

    for index in 0..module.type_def(ty).methods.len() {
        let method = &module.type_def(ty).methods[index];
        let marker = method.find_annotation(&rules.cache_marker).cloned();
        if let Some((annotation, source)) = include_method(
            method,
            marker.is_some(),
            class_marker.is_some(),
            rules,
        )
        .then(|| pick(marker, class_marker.as_ref()))
        .flatten()
        {
            push_candidate(
                outcome,
                ty,
                CandidateMember::Method(MethodId { ty, index }),
                annotation,
                source,
                source_id,
                method.span,
                &format!("{type_name}::{}", method.name),
            );
        }
        strip_markers(&mut module.type_mut(ty).methods[index], rules);
    }

    for index in 0..module.type_def(ty).properties.len() {
        let def = module.type_def(ty);
        let property = &def.properties[index];
        let marker = property.find_annotation(&rules.cache_marker).cloned();
        if let Some((annotation, source)) =
            include_property(def, index, marker.is_some(), class_marker.is_some(), rules)
                .then(|| pick(marker, class_marker.as_ref()))
                .flatten()
        {
            let span = property.span;
            let label = format!("{type_name}.{}", property.name);
            push_candidate(
                outcome,
                ty,
                CandidateMember::Property(PropertyId { ty, index }),
                annotation,
                source,
                source_id,
                span,
                &label,
            );
        }
        strip_markers(&mut module.type_mut(ty).properties[index], rules);
    }

    strip_markers(module.type_mut(ty), rules);
}

#[allow(clippy::too_many_arguments)]
fn push_candidate(
    outcome: &mut ScanOutcome,
    ty: TypeId,
    member: CandidateMember,
    annotation: Annotation,
    source: CandidateSource,
    source_id: &str,
    span: Option<weave_span::Span>,
    label: &str,
) {
    match CacheOptions::from_annotation(&annotation) {
        Ok(options) => outcome.candidates.push(WeaveCandidate {
            ty,
            member,
            annotation,
            options,
            source,
        }),
        Err(error) => {
            let mut warning = Diagnostic::warning(
                source_id,
                annotation.span.or(span),
                format!("skipping `{label}`: {error}"),
            );
            if let OptionError::Unknown {
                suggestion: Some(suggestion),
                ..
            } = &error
            {
                warning = warning.with_suggestion(suggestion.clone());
            }
            outcome.warnings.push(warning);
        }
    }
}

/// The member's own marker wins over the type's.
fn pick(
    marker: Option<Annotation>,
    class_marker: Option<&Annotation>,
) -> Option<(Annotation, CandidateSource)> {
    match (marker, class_marker) {
        (Some(marker), _) => Some((marker, CandidateSource::Member)),
        (None, Some(class_marker)) => Some((class_marker.clone(), CandidateSource::Type)),
        (None, None) => None,
    }
}

fn include_method(method: &MethodDef, marked: bool, class_marked: bool, rules: &ScanRules) -> bool {
    if method.has_annotation(&rules.no_cache_marker)
        || method.is_constructor()
        || method.is_accessor()
        || method.has_annotation(COMPILER_GENERATED)
    {
        return false;
    }
    // Class-level markers cannot reach bodiless members.
    marked || (class_marked && !method.is_abstract)
}

fn include_property(
    ty: &crate::module::TypeDef,
    index: usize,
    marked: bool,
    class_marked: bool,
    rules: &ScanRules,
) -> bool {
    let property = &ty.properties[index];
    if property.has_annotation(&rules.no_cache_marker) || property.name == rules.accessor_name {
        return false;
    }
    match ty.getter_of(index) {
        Some(getter) if getter.has_annotation(COMPILER_GENERATED) || getter.is_abstract => false,
        Some(_) => marked || class_marked,
        // A marked write-only property is reported later as unpaired.
        None => marked,
    }
}

fn strip_markers<A: Annotated>(item: &mut A, rules: &ScanRules) {
    item.strip_annotation(&rules.cache_marker);
    item.strip_annotation(&rules.no_cache_marker);
}

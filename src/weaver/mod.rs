//! The weaving pipeline: scan, validate, resolve accessors, synthesize
//! keys, rewrite bodies, strip markers.

pub mod accessor;
pub mod capability;
pub mod key;
pub mod options;
pub mod references;
pub mod scanner;
pub mod setter;
pub mod strip;
pub mod transform;

use std::collections::HashMap;

use thiserror::Error;
use tracing::{info, warn};
use weave_span::Span;
use weave_utils::{Diagnostic, DiagnosticSeverity};

use crate::config::WeaveConfig;
use crate::module::{MethodId, ModuleDef, PropertyId};

pub use accessor::{AccessorError, AccessorPlan, CacheAccessor};
pub use capability::{CapabilityError, Operation, ProviderCapabilities};
pub use key::{KeyStrategy, KeyTemplate};
pub use options::{CacheOptions, Eviction, OptionError};
pub use references::HostReferences;
pub use scanner::{CandidateMember, CandidateSource, ScanRules, WeaveCandidate};
pub use transform::{TransformError, TransformSummary};

#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("weaving failed")]
    Fatal(Vec<Diagnostic>),
}

impl WeaveError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            WeaveError::Fatal(diagnostics) => diagnostics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberOutcome {
    Woven {
        key: String,
        store_sites: usize,
        /// A property setter now evicts the key.
        invalidates_on_set: bool,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberReport {
    /// `Type::method` or `Type.Property`.
    pub member: String,
    pub outcome: MemberOutcome,
}

#[derive(Debug, Default)]
pub struct WeaveReport {
    pub diagnostics: Vec<Diagnostic>,
    pub members: Vec<MemberReport>,
    /// Types that received a synthesized static accessor.
    pub synthesized_accessors: Vec<String>,
    pub stripped_markers: usize,
}

impl WeaveReport {
    pub fn outcome(&self, member: &str) -> Option<&MemberOutcome> {
        self.members
            .iter()
            .find(|report| report.member == member)
            .map(|report| &report.outcome)
    }

    pub fn woven(&self) -> impl Iterator<Item = &MemberReport> {
        self.members
            .iter()
            .filter(|report| matches!(report.outcome, MemberOutcome::Woven { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &MemberReport> {
        self.members
            .iter()
            .filter(|report| matches!(report.outcome, MemberOutcome::Skipped { .. }))
    }

    pub fn woven_count(&self) -> usize {
        self.woven().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity() == DiagnosticSeverity::Warning)
    }
}

/// Per-run bookkeeping shared by all candidates.
#[derive(Default)]
struct WeaveState {
    capabilities: HashMap<String, Result<ProviderCapabilities, CapabilityError>>,
    /// Key template to the first member that used it.
    keys: HashMap<String, String>,
}

pub struct Weaver {
    config: WeaveConfig,
    source_id: String,
}

impl Weaver {
    pub fn new(config: WeaveConfig) -> Self {
        Self {
            config,
            source_id: String::from("<module>"),
        }
    }

    /// Name used for diagnostics, usually the input path.
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    fn rules(&self) -> ScanRules {
        ScanRules {
            cache_marker: self.config.cache_marker.clone(),
            no_cache_marker: self.config.no_cache_marker.clone(),
            accessor_name: self.config.accessor_name.clone(),
        }
    }

    /// Weave `module` in place.
    ///
    /// Fatal problems are detected before the module is touched. Candidates
    /// that fail validation are skipped with a warning and the rest proceed.
    pub fn run(&self, module: &mut ModuleDef) -> Result<WeaveReport, WeaveError> {
        let rules = self.rules();
        let fatal = strip::check_abstract(module, &rules, &self.source_id);
        if !fatal.is_empty() {
            return Err(WeaveError::Fatal(fatal));
        }

        let mut report = WeaveReport::default();
        let scan = scanner::scan(module, &rules, &self.source_id);
        for warning in &scan.warnings {
            warn!("{}", warning.message());
        }
        report.diagnostics.extend(scan.warnings);

        if !scan.candidates.is_empty() {
            let refs = HostReferences::resolve(module).map_err(|message| {
                WeaveError::Fatal(vec![
                    Diagnostic::error(&self.source_id, None, message)
                        .with_help(format!("add `reference {}` to the module header", references::CACHE_ASSEMBLY)),
                ])
            })?;

            let mut state = WeaveState::default();
            for candidate in &scan.candidates {
                let (member, outcome) = match candidate.member {
                    CandidateMember::Method(id) => {
                        self.weave_method(module, id, candidate, &refs, &mut state, &mut report)
                    }
                    CandidateMember::Property(id) => {
                        self.weave_property(module, id, candidate, &refs, &mut state, &mut report)
                    }
                };
                report.members.push(MemberReport { member, outcome });
            }
        }

        report.stripped_markers = strip::strip_module(module, &rules);
        info!(
            woven = report.woven_count(),
            skipped = report.skipped_count(),
            "weaving finished"
        );

        if self.config.fail_on_warnings && report.warnings().next().is_some() {
            let promoted = report
                .warnings()
                .map(|warning| {
                    Diagnostic::error(&self.source_id, warning.span(), warning.message())
                })
                .collect();
            return Err(WeaveError::Fatal(promoted));
        }
        Ok(report)
    }

    fn weave_method(
        &self,
        module: &mut ModuleDef,
        id: MethodId,
        candidate: &WeaveCandidate,
        refs: &HostReferences,
        state: &mut WeaveState,
        report: &mut WeaveReport,
    ) -> (String, MemberOutcome) {
        let owner = module.type_def(id.ty).name.clone();
        let method = module.method(id);
        let label = format!("{owner}::{}", method.name);
        let span = method.span;
        let is_static = method.is_static;

        if let Err(error) = transform::check(method) {
            return self.skip(report, label, span, error.to_string());
        }
        let key = KeyTemplate::for_method(&owner, method, self.config.key_strategy);

        let Some((accessor, capabilities, bind)) =
            self.prepare_accessor(module, id.ty, is_static, state, report, &label, span)
        else {
            return self.last_skip(report, label);
        };

        self.note_key(state, report, &key, &label, span);
        let plan = transform::TransformPlan {
            key: &key,
            accessor: &accessor,
            capabilities: &capabilities,
            options: &candidate.options,
            refs,
            bind,
            trace: self.config.trace_keys,
        };
        match transform::transform_method(module.method_mut(id), &plan) {
            Ok(summary) => {
                info!(member = %label, key = %key, stores = summary.store_sites, "woven");
                (
                    label,
                    MemberOutcome::Woven {
                        key: key.to_string(),
                        store_sites: summary.store_sites,
                        invalidates_on_set: false,
                    },
                )
            }
            Err(error) => self.skip(report, label, span, error.to_string()),
        }
    }

    fn weave_property(
        &self,
        module: &mut ModuleDef,
        id: PropertyId,
        candidate: &WeaveCandidate,
        refs: &HostReferences,
        state: &mut WeaveState,
        report: &mut WeaveReport,
    ) -> (String, MemberOutcome) {
        let ty = module.type_def(id.ty);
        let owner = ty.name.clone();
        let property = &ty.properties[id.index];
        let label = format!("{owner}.{}", property.name);
        let span = property.span;
        let setter_index = property.setter.filter(|_| ty.setter_of(id.index).is_some());

        let (Some(getter_index), Some(getter)) = (property.getter, ty.getter_of(id.index)) else {
            return self.skip(report, label, span, "setter has no pairable getter".into());
        };
        let is_static = getter.is_static;
        if let Err(error) = transform::check(getter) {
            return self.skip(report, label, span, format!("getter: {error}"));
        }
        if let Some(setter) = ty.setter_of(id.index) {
            if let Err(error) = setter::check(setter) {
                return self.skip(report, label, span, format!("setter: {error}"));
            }
        }
        let key = KeyTemplate::for_property(&owner, &property.name);

        let Some((accessor, capabilities, bind)) =
            self.prepare_accessor(module, id.ty, is_static, state, report, &label, span)
        else {
            return self.last_skip(report, label);
        };

        self.note_key(state, report, &key, &label, span);
        let plan = transform::TransformPlan {
            key: &key,
            accessor: &accessor,
            capabilities: &capabilities,
            options: &candidate.options,
            refs,
            bind,
            trace: self.config.trace_keys,
        };
        let getter_id = MethodId {
            ty: id.ty,
            index: getter_index,
        };
        let summary = match transform::transform_method(module.method_mut(getter_id), &plan) {
            Ok(summary) => summary,
            Err(error) => return self.skip(report, label, span, format!("getter: {error}")),
        };

        let mut invalidates_on_set = false;
        if let Some(index) = setter_index {
            let setter = module.method_mut(MethodId { ty: id.ty, index });
            match setter::invalidate_setter(
                setter,
                &key,
                &accessor,
                &capabilities,
                refs,
                self.config.trace_keys,
            ) {
                Ok(()) => invalidates_on_set = true,
                Err(error) => {
                    self.warn(report, span, format!("setter of `{label}` not invalidated: {error}"))
                }
            }
        }

        info!(member = %label, key = %key, stores = summary.store_sites, "woven");
        (
            label,
            MemberOutcome::Woven {
                key: key.to_string(),
                store_sites: summary.store_sites,
                invalidates_on_set,
            },
        )
    }

    /// Resolve the accessor, validate its provider and synthesize a static
    /// accessor when needed. On failure a warning is pushed and `None`
    /// returned. The third value asks the transformer to bind the provider.
    #[allow(clippy::too_many_arguments)]
    fn prepare_accessor(
        &self,
        module: &mut ModuleDef,
        ty: crate::module::TypeId,
        is_static: bool,
        state: &mut WeaveState,
        report: &mut WeaveReport,
        label: &str,
        span: Option<Span>,
    ) -> Option<(CacheAccessor, ProviderCapabilities, bool)> {
        let plan = match accessor::resolve(module, ty, is_static, &self.config.accessor_name) {
            Ok(plan) => plan,
            Err(error) => {
                self.warn(report, span, format!("skipping `{label}`: {error}"));
                return None;
            }
        };

        let provider = plan.provider_type().to_string();
        let capabilities = state
            .capabilities
            .entry(provider.clone())
            .or_insert_with(|| {
                let result = capability::validate(module, &provider);
                if let Err(CapabilityError::Missing { operations, .. }) = &result {
                    for operation in operations {
                        warn!(provider = %provider, "method {operation} missing");
                    }
                }
                result
            })
            .clone();
        let capabilities = match capabilities {
            Ok(capabilities) => capabilities,
            Err(error) => {
                self.warn(report, span, format!("skipping `{label}`: {error}"));
                return None;
            }
        };

        Some(match plan {
            AccessorPlan::Existing(accessor) => (accessor, capabilities, false),
            AccessorPlan::Synthesize { ty } => {
                let accessor = accessor::synthesize(module, ty, &self.config.accessor_name);
                report
                    .synthesized_accessors
                    .push(module.type_def(ty).name.clone());
                (accessor, capabilities, true)
            }
        })
    }

    fn note_key(
        &self,
        state: &mut WeaveState,
        report: &mut WeaveReport,
        key: &KeyTemplate,
        label: &str,
        span: Option<Span>,
    ) {
        match state.keys.get(key.as_str()) {
            Some(first) => {
                let mut diagnostic = Diagnostic::warning(
                    &self.source_id,
                    span,
                    format!("key template `{key}` of `{label}` is also used by `{first}`"),
                );
                if self.config.key_strategy == KeyStrategy::Compatible {
                    diagnostic =
                        diagnostic.with_help("set `key_strategy = \"signature\"` to tell overloads apart");
                }
                warn!("{}", diagnostic.message());
                report.diagnostics.push(diagnostic);
            }
            None => {
                state.keys.insert(key.as_str().to_string(), label.to_string());
            }
        }
    }

    fn warn(&self, report: &mut WeaveReport, span: Option<Span>, message: String) {
        warn!("{message}");
        report
            .diagnostics
            .push(Diagnostic::warning(&self.source_id, span, message));
    }

    fn skip(
        &self,
        report: &mut WeaveReport,
        label: String,
        span: Option<Span>,
        reason: String,
    ) -> (String, MemberOutcome) {
        self.warn(report, span, format!("skipping `{label}`: {reason}"));
        (label, MemberOutcome::Skipped { reason })
    }

    /// Skip using the warning `prepare_accessor` just pushed as the reason.
    fn last_skip(&self, report: &WeaveReport, label: String) -> (String, MemberOutcome) {
        let reason = report
            .diagnostics
            .last()
            .map(|diagnostic| {
                let prefix = format!("skipping `{label}`: ");
                diagnostic
                    .message()
                    .strip_prefix(&prefix)
                    .unwrap_or(diagnostic.message())
                    .to_string()
            })
            .unwrap_or_default();
        (label, MemberOutcome::Skipped { reason })
    }
}

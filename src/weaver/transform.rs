//! Rewrites a method body so it consults the cache before running.
//!
//! The woven body looks like this, with `E` the original entry block:
//!
//! ```text
//! prologue:  key = format(template, args); [bind provider]
//!            if !cache.Contains(key) goto E
//! fallback:  result = cache.Retrieve<R>(key); goto tail
//! E ...      (original code; before every `ret`:
//!             result = value; cache.Store(key, result[, options]); push result)
//! tail:      push result; ret      (split off the last original return)
//! ```
//!
//! Only new blocks are added; original blocks keep their ids so every
//! existing branch still lands where it did.

use thiserror::Error;
use tracing::debug;

use crate::module::{Block, BodyError, Instruction, LocalId, MethodDef, TypeRef};

use super::accessor::CacheAccessor;
use super::capability::ProviderCapabilities;
use super::key::KeyTemplate;
use super::options::CacheOptions;
use super::references::HostReferences;

pub const KEY_LOCAL: &str = "__cache_key";
pub const RESULT_LOCAL: &str = "__cache_result";
pub const ARGS_LOCAL: &str = "__cache_args";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("method has no body")]
    NoBody,
    #[error("method returns void")]
    VoidReturn,
    #[error("method does not contain any return instruction")]
    NoReturn,
    #[error("malformed body: {0}")]
    Malformed(#[from] BodyError),
}

/// Everything the rewrite needs besides the method itself.
#[derive(Debug, Clone, Copy)]
pub struct TransformPlan<'a> {
    pub key: &'a KeyTemplate,
    pub accessor: &'a CacheAccessor,
    pub capabilities: &'a ProviderCapabilities,
    pub options: &'a CacheOptions,
    pub refs: &'a HostReferences,
    /// Assign the registry's provider through the synthesized setter first.
    pub bind: bool,
    pub trace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformSummary {
    pub store_sites: usize,
}

/// Reject methods the transformer cannot rewrite, without touching them.
pub fn check(method: &MethodDef) -> Result<usize, TransformError> {
    if method.return_type.is_void() {
        return Err(TransformError::VoidReturn);
    }
    let body = method.body.as_ref().ok_or(TransformError::NoBody)?;
    body.validate()?;
    match body.return_sites().len() {
        0 => Err(TransformError::NoReturn),
        sites => Ok(sites),
    }
}

pub fn transform_method(
    method: &mut MethodDef,
    plan: &TransformPlan<'_>,
) -> Result<TransformSummary, TransformError> {
    check(method)?;
    let return_type = method.return_type.clone();

    let (key, result, args) = {
        let body = method.body.as_mut().ok_or(TransformError::NoBody)?;
        let key = body.add_local(Some(KEY_LOCAL.into()), TypeRef::String);
        let result = body.add_local(Some(RESULT_LOCAL.into()), return_type.clone());
        let args = (!plan.key.is_literal())
            .then(|| body.add_local(Some(ARGS_LOCAL.into()), TypeRef::array(TypeRef::Object)));
        (key, result, args)
    };
    let materialize = plan.key.materialize(method, args, plan.refs);

    let body = method.body.as_mut().ok_or(TransformError::NoBody)?;
    let entry = body.entry().ok_or(TransformError::Malformed(BodyError::Empty))?;

    let sites = body.return_sites();
    let store = store_sequence(plan, &return_type, key, result);
    for (block, index) in sites.iter().rev() {
        body.block_mut(*block)
            .instructions
            .splice(*index..*index, store.iter().cloned());
    }

    // The reload right before the last `ret` becomes the shared tail.
    let (last_block, last_ret) = body
        .return_sites()
        .last()
        .copied()
        .ok_or(TransformError::NoReturn)?;
    let tail = body.split_block(last_block, last_ret - 1);

    let mut fallback = Vec::new();
    if plan.trace {
        fallback.extend(plan.refs.trace("loading from cache"));
    }
    fallback.extend(plan.accessor.load());
    fallback.extend([
        Instruction::Ldloc(key),
        Instruction::CallVirt(plan.capabilities.retrieve(&return_type)),
        Instruction::Stloc(result),
        Instruction::Br(tail),
    ]);
    body.insert_block_front(Block::new(fallback));

    let mut prologue = materialize;
    prologue.push(Instruction::Stloc(key));
    if plan.bind {
        if let Some(setter) = &plan.accessor.setter {
            prologue.extend([
                Instruction::Call(plan.refs.get_provider.clone()),
                Instruction::Call(setter.clone()),
            ]);
        }
    }
    if plan.trace {
        prologue.extend(plan.refs.trace_key("cache key created: {0}", key));
    }
    prologue.extend(plan.accessor.load());
    prologue.extend([
        Instruction::Ldloc(key),
        Instruction::CallVirt(plan.capabilities.contains()),
        Instruction::BrFalse(entry),
    ]);
    body.insert_block_front(Block::new(prologue));

    body.validate()?;
    debug!(method = %method.name, key = %plan.key, stores = sites.len(), "rewrote body");
    Ok(TransformSummary {
        store_sites: sites.len(),
    })
}

/// Injected before each `ret`: stash the value, store it, push it back.
fn store_sequence(
    plan: &TransformPlan<'_>,
    return_type: &TypeRef,
    key: LocalId,
    result: LocalId,
) -> Vec<Instruction> {
    let mut code = vec![Instruction::Stloc(result)];
    if plan.trace {
        code.extend(plan.refs.trace("storing to cache"));
    }
    code.extend(plan.accessor.load());
    code.extend([Instruction::Ldloc(key), Instruction::Ldloc(result)]);
    if return_type.needs_box() {
        code.push(Instruction::Box(return_type.clone()));
    }
    if plan.capabilities.accepts_options() {
        code.push(Instruction::NewObj(plan.refs.dictionary_new.clone()));
        code.extend(plan.options.populate(&plan.refs.dictionary_add));
    }
    code.extend([
        Instruction::CallVirt(plan.capabilities.store()),
        Instruction::Ldloc(result),
    ]);
    code
}

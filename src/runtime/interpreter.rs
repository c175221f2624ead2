use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use weave_cache::{CacheProvider, ProviderRegistry};

use crate::module::{
    BlockId, FieldRef, Instruction, MethodBody, MethodDef, MethodRef, ModuleDef, TypeDef, TypeRef,
};

use super::error::{RuntimeError, RuntimeResult};
use super::host::{HostMethod, ProviderOp, call_host, call_provider};
use super::value::{Object, Value};

pub const DEFAULT_MAX_DEPTH: usize = 256;
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;
/// Largest array `newarr` will allocate.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Executes module code, woven or not, against a provider registry.
///
/// Static fields live in the interpreter and persist across calls; the
/// module itself is never mutated.
pub struct Interpreter {
    module: Arc<ModuleDef>,
    registry: ProviderRegistry,
    statics: RwLock<HashMap<String, Value>>,
    trace: Mutex<Vec<String>>,
    step_limit: u64,
    max_depth: usize,
}

struct Frame<'m> {
    label: String,
    method: &'m MethodDef,
    args: Vec<Value>,
    locals: Vec<Value>,
    generics: Vec<TypeRef>,
    stack: Vec<Value>,
}

impl Frame<'_> {
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> RuntimeResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::StackUnderflow(self.label.clone()))
    }

    fn pop_n(&mut self, count: usize) -> RuntimeResult<Vec<Value>> {
        if self.stack.len() < count {
            return Err(RuntimeError::StackUnderflow(self.label.clone()));
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    fn resolve(&self, ty: &TypeRef) -> TypeRef {
        ty.substitute(&self.method.generic_params, &self.generics)
    }

    fn local(&mut self, index: usize) -> RuntimeResult<&mut Value> {
        let method = &self.label;
        self.locals
            .get_mut(index)
            .ok_or_else(|| RuntimeError::InvalidLocal {
                method: method.clone(),
                local: index as u16,
            })
    }

    fn arg(&mut self, slot: u16) -> RuntimeResult<&mut Value> {
        let method = &self.label;
        self.args
            .get_mut(usize::from(slot))
            .ok_or_else(|| RuntimeError::InvalidArgument {
                method: method.clone(),
                slot,
            })
    }
}

enum Flow {
    Next,
    Jump(BlockId),
    Return(Value),
}

#[derive(Default)]
struct Budget {
    steps: u64,
    depth: usize,
}

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Clone, Copy)]
enum Num {
    I32(i32),
    I64(i64),
    F64(f64),
}

impl Num {
    fn of(value: &Value) -> RuntimeResult<Self> {
        match value {
            Value::I32(value) => Ok(Num::I32(*value)),
            Value::Bool(value) => Ok(Num::I32(i32::from(*value))),
            Value::I64(value) => Ok(Num::I64(*value)),
            Value::F64(value) => Ok(Num::F64(*value)),
            other => Err(RuntimeError::mismatch("number", other.type_name())),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::I32(value) => f64::from(value),
            Num::I64(value) => value as f64,
            Num::F64(value) => value,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Num::I32(value) => i64::from(value),
            Num::I64(value) => value,
            Num::F64(value) => value as i64,
        }
    }
}

fn arithmetic(op: Arith, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
    let (lhs, rhs) = (Num::of(lhs)?, Num::of(rhs)?);
    match (lhs, rhs) {
        (Num::F64(_), _) | (_, Num::F64(_)) => {
            let (a, b) = (lhs.as_f64(), rhs.as_f64());
            Ok(Value::F64(match op {
                Arith::Add => a + b,
                Arith::Sub => a - b,
                Arith::Mul => a * b,
                Arith::Div => a / b,
                Arith::Rem => a % b,
            }))
        }
        (Num::I32(a), Num::I32(b)) => {
            if matches!(op, Arith::Div | Arith::Rem) && b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(Value::I32(match op {
                Arith::Add => a.wrapping_add(b),
                Arith::Sub => a.wrapping_sub(b),
                Arith::Mul => a.wrapping_mul(b),
                Arith::Div => a.wrapping_div(b),
                Arith::Rem => a.wrapping_rem(b),
            }))
        }
        _ => {
            let (a, b) = (lhs.as_i64(), rhs.as_i64());
            if matches!(op, Arith::Div | Arith::Rem) && b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(Value::I64(match op {
                Arith::Add => a.wrapping_add(b),
                Arith::Sub => a.wrapping_sub(b),
                Arith::Mul => a.wrapping_mul(b),
                Arith::Div => a.wrapping_div(b),
                Arith::Rem => a.wrapping_rem(b),
            }))
        }
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    let (lhs, rhs) = (Num::of(lhs).ok()?, Num::of(rhs).ok()?);
    match (lhs, rhs) {
        (Num::F64(_), _) | (_, Num::F64(_)) => lhs.as_f64().partial_cmp(&rhs.as_f64()),
        _ => Some(lhs.as_i64().cmp(&rhs.as_i64())),
    }
}

fn flag(value: bool) -> Value {
    Value::I32(i32::from(value))
}

impl Interpreter {
    pub fn new(module: &ModuleDef, registry: ProviderRegistry) -> Self {
        let statics = module
            .types
            .iter()
            .flat_map(|ty| {
                ty.fields
                    .iter()
                    .filter(|field| field.is_static)
                    .map(move |field| (static_key(&ty.name, &field.name), Value::default_for(&field.ty)))
            })
            .collect();
        Self {
            module: Arc::new(module.clone()),
            registry,
            statics: RwLock::new(statics),
            trace: Mutex::new(Vec::new()),
            step_limit: DEFAULT_STEP_LIMIT,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn module(&self) -> &ModuleDef {
        &self.module
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Lines written through `Debug.WriteLine` so far.
    pub fn trace_log(&self) -> Vec<String> {
        self.trace.lock().clone()
    }

    pub fn static_field(&self, owner: &str, name: &str) -> Option<Value> {
        let key = self.static_slot(&FieldRef::new(owner, name)).ok()?;
        self.statics.read().get(&key).cloned()
    }

    pub fn set_static_field(&self, owner: &str, name: &str, value: Value) -> RuntimeResult<()> {
        let key = self.static_slot(&FieldRef::new(owner, name))?;
        self.statics.write().insert(key, value);
        Ok(())
    }

    /// Find `name` on `ty` or its base types, optionally by parameter count.
    pub fn find_method(
        &self,
        ty: &str,
        name: &str,
        arity: Option<usize>,
    ) -> Option<(&TypeDef, &MethodDef)> {
        self.type_chain(ty).into_iter().find_map(|owner| {
            owner
                .methods_named(name)
                .find(|method| arity.is_none_or(|arity| method.params.len() == arity))
                .map(|method| (owner, method))
        })
    }

    pub fn invoke(
        &self,
        ty: &str,
        method: &str,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        self.invoke_generic(ty, method, Vec::new(), this, args)
    }

    pub fn invoke_generic(
        &self,
        ty: &str,
        method: &str,
        generic_args: Vec<TypeRef>,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let (owner, def) = self
            .find_method(ty, method, Some(args.len()))
            .ok_or_else(|| RuntimeError::UnknownMethod(format!("{ty}::{method}/{}", args.len())))?;
        let this = if def.is_static {
            None
        } else {
            match this {
                None | Some(Value::Null) => {
                    return Err(RuntimeError::NullReference(format!("{ty}::{method}")));
                }
                this => this,
            }
        };
        tracing::debug!(method = %format!("{}::{}", owner.name, def.name), "invoking");
        let mut budget = Budget::default();
        self.call_method(owner, def, generic_args, this, args, &mut budget)
    }

    /// Create an instance of `ty`, running its parameterless constructor
    /// when it has one.
    pub fn instantiate(&self, ty: &str) -> RuntimeResult<Value> {
        let mut budget = Budget::default();
        self.construct(ty, Some(0), Vec::new(), &mut budget)
    }

    fn type_chain(&self, name: &str) -> Vec<&TypeDef> {
        let mut chain = Vec::new();
        let mut next = Some(name);
        while let Some(name) = next {
            let Some(id) = self.module.find_type(name) else {
                break;
            };
            let ty = self.module.type_def(id);
            if chain.iter().any(|seen: &&TypeDef| seen.name == ty.name) {
                break;
            }
            chain.push(ty);
            next = ty.base.as_deref();
        }
        chain
    }

    fn static_slot(&self, field: &FieldRef) -> RuntimeResult<String> {
        self.type_chain(&field.owner)
            .into_iter()
            .find(|ty| {
                ty.fields
                    .iter()
                    .any(|candidate| candidate.is_static && candidate.name == field.name)
            })
            .map(|ty| static_key(&ty.name, &field.name))
            .ok_or_else(|| RuntimeError::UnknownField(field.to_string()))
    }

    fn construct(
        &self,
        ty: &str,
        arity: Option<usize>,
        args: Vec<Value>,
        budget: &mut Budget,
    ) -> RuntimeResult<Value> {
        let id = self
            .module
            .find_type(ty)
            .ok_or_else(|| RuntimeError::UnknownType(ty.to_string()))?;
        let def = self.module.type_def(id);

        let mut fields = HashMap::new();
        for owner in self.type_chain(ty).into_iter().rev() {
            for field in owner.fields.iter().filter(|field| !field.is_static) {
                fields.insert(field.name.clone(), Value::default_for(&field.ty));
            }
        }
        let object = Value::Object(Arc::new(Object::new(&def.name, fields)));

        let constructor = def.methods.iter().find(|method| {
            method.is_constructor() && arity.is_none_or(|arity| method.params.len() == arity)
        });
        match constructor {
            Some(constructor) => {
                self.call_method(def, constructor, Vec::new(), Some(object.clone()), args, budget)?;
            }
            None if args.is_empty() => {}
            None => {
                return Err(RuntimeError::UnknownMethod(format!("{ty}::init/{}", args.len())));
            }
        }
        Ok(object)
    }

    fn call_method(
        &self,
        owner: &TypeDef,
        method: &MethodDef,
        generics: Vec<TypeRef>,
        this: Option<Value>,
        args: Vec<Value>,
        budget: &mut Budget,
    ) -> RuntimeResult<Value> {
        let label = format!("{}::{}", owner.name, method.name);
        if args.len() != method.params.len() {
            return Err(RuntimeError::ArityMismatch {
                method: label,
                expected: method.params.len(),
                found: args.len(),
            });
        }
        let body = method
            .body
            .as_ref()
            .ok_or_else(|| RuntimeError::NoBody(label.clone()))?;
        if budget.depth >= self.max_depth {
            return Err(RuntimeError::StackOverflow(self.max_depth));
        }

        let mut frame = Frame {
            label,
            method,
            args: this.into_iter().chain(args).collect(),
            locals: Vec::new(),
            generics,
            stack: Vec::new(),
        };
        frame.locals = body
            .locals
            .iter()
            .map(|local| Value::default_for(&frame.resolve(&local.ty)))
            .collect();

        budget.depth += 1;
        let result = self.run(&mut frame, body, budget);
        budget.depth -= 1;
        result
    }

    fn run(&self, frame: &mut Frame<'_>, body: &MethodBody, budget: &mut Budget) -> RuntimeResult<Value> {
        let mut block = body
            .entry()
            .ok_or_else(|| RuntimeError::NoBody(frame.label.clone()))?;
        let mut pc = 0;
        loop {
            let Some(instruction) = body.block(block).instructions.get(pc) else {
                block = body
                    .fallthrough(block)
                    .ok_or_else(|| RuntimeError::FellOffEnd(frame.label.clone()))?;
                pc = 0;
                continue;
            };
            budget.steps += 1;
            if budget.steps > self.step_limit {
                return Err(RuntimeError::StepLimitExceeded(self.step_limit));
            }
            pc += 1;
            match self.step(frame, instruction, budget)? {
                Flow::Next => {}
                Flow::Jump(target) => {
                    if !body.contains_block(target) || !body.layout().contains(&target) {
                        return Err(RuntimeError::InvalidBranch {
                            method: frame.label.clone(),
                            block: target.0,
                        });
                    }
                    block = target;
                    pc = 0;
                }
                Flow::Return(value) => return Ok(value),
            }
        }
    }

    fn step(&self, frame: &mut Frame<'_>, instruction: &Instruction, budget: &mut Budget) -> RuntimeResult<Flow> {
        match instruction {
            Instruction::Nop => {}
            Instruction::LdNull => frame.push(Value::Null),
            Instruction::LdcI4(value) => frame.push(Value::I32(*value)),
            Instruction::LdcI8(value) => frame.push(Value::I64(*value)),
            Instruction::LdcR8(value) => frame.push(Value::F64(*value)),
            Instruction::Ldstr(text) => frame.push(Value::string(text)),
            Instruction::LdToken(ty) => {
                let ty = frame.resolve(ty);
                frame.push(Value::Type(ty.to_string()));
            }
            Instruction::Ldarg(slot) => {
                let value = frame.arg(*slot)?.clone();
                frame.push(value);
            }
            Instruction::Starg(slot) => {
                let value = frame.pop()?;
                *frame.arg(*slot)? = value;
            }
            Instruction::Ldloc(local) => {
                let value = frame.local(local.index())?.clone();
                frame.push(value);
            }
            Instruction::Stloc(local) => {
                let value = frame.pop()?;
                *frame.local(local.index())? = value;
            }
            Instruction::Ldfld(field) => {
                let target = frame.pop()?;
                let object = instance(&target, field)?;
                let value = object
                    .field(&field.name)
                    .ok_or_else(|| RuntimeError::UnknownField(field.to_string()))?;
                frame.push(value);
            }
            Instruction::Stfld(field) => {
                let value = frame.pop()?;
                let target = frame.pop()?;
                instance(&target, field)?.set_field(field.name.clone(), value);
            }
            Instruction::Ldsfld(field) => {
                let key = self.static_slot(field)?;
                let value = self.statics.read().get(&key).cloned().unwrap_or_default();
                frame.push(value);
            }
            Instruction::Stsfld(field) => {
                let key = self.static_slot(field)?;
                let value = frame.pop()?;
                self.statics.write().insert(key, value);
            }
            Instruction::NewArr(element) => {
                let len = frame.pop()?.as_i32()?;
                let len = usize::try_from(len).map_err(|_| RuntimeError::IndexOutOfRange {
                    index: i64::from(len),
                    len: 0,
                })?;
                if len > MAX_ARRAY_LEN {
                    return Err(RuntimeError::ArrayTooLarge { len, max: MAX_ARRAY_LEN });
                }
                let element = frame.resolve(element);
                let mut items = Vec::new();
                items
                    .try_reserve_exact(len)
                    .map_err(|_| RuntimeError::ArrayTooLarge { len, max: MAX_ARRAY_LEN })?;
                items.resize(len, Value::default_for(&element));
                frame.push(Value::array(items));
            }
            Instruction::Ldelem => {
                let index = frame.pop()?.as_i32()?;
                let array = frame.pop()?;
                let value = with_element(&array, index, |slot| slot.clone())?;
                frame.push(value);
            }
            Instruction::Stelem => {
                let value = frame.pop()?;
                let index = frame.pop()?.as_i32()?;
                let array = frame.pop()?;
                with_element(&array, index, |slot| *slot = value)?;
            }
            Instruction::Box(_) => {}
            Instruction::UnboxAny(ty) => {
                let ty = frame.resolve(ty);
                let value = frame.pop()?.convert(&ty)?;
                frame.push(value);
            }
            Instruction::Dup => {
                let value = frame.pop()?;
                frame.push(value.clone());
                frame.push(value);
            }
            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::Add => self.binary(frame, Arith::Add)?,
            Instruction::Sub => self.binary(frame, Arith::Sub)?,
            Instruction::Mul => self.binary(frame, Arith::Mul)?,
            Instruction::Div => self.binary(frame, Arith::Div)?,
            Instruction::Rem => self.binary(frame, Arith::Rem)?,
            Instruction::Ceq => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let equal = match compare(&lhs, &rhs) {
                    Some(ordering) => ordering.is_eq(),
                    None => lhs == rhs,
                };
                frame.push(flag(equal));
            }
            Instruction::Clt | Instruction::Cgt => {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                let ordering = compare(&lhs, &rhs);
                let result = if matches!(instruction, Instruction::Clt) {
                    ordering.is_some_and(|ordering| ordering.is_lt())
                } else {
                    ordering.is_some_and(|ordering| ordering.is_gt())
                };
                frame.push(flag(result));
            }
            Instruction::Br(target) => return Ok(Flow::Jump(*target)),
            Instruction::BrTrue(target) => {
                if frame.pop()?.is_truthy() {
                    return Ok(Flow::Jump(*target));
                }
            }
            Instruction::BrFalse(target) => {
                if !frame.pop()?.is_truthy() {
                    return Ok(Flow::Jump(*target));
                }
            }
            Instruction::Call(target) => self.call(frame, target, false, budget)?,
            Instruction::CallVirt(target) => self.call(frame, target, true, budget)?,
            Instruction::NewObj(target) => {
                let value = if HostMethod::lookup(target) == Some(HostMethod::DictionaryNew) {
                    Value::empty_map()
                } else {
                    let arity = match target.arity {
                        Some(arity) => usize::from(arity),
                        None => self.constructor_arity(&target.owner),
                    };
                    let args = frame.pop_n(arity)?;
                    self.construct(&target.owner, Some(arity), args, budget)?
                };
                frame.push(value);
            }
            Instruction::Throw => {
                let value = frame.pop()?;
                return Err(RuntimeError::Thrown(value.to_string()));
            }
            Instruction::Ret => {
                let value = if frame.method.return_type.is_void() {
                    Value::Null
                } else {
                    frame.pop()?
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn binary(&self, frame: &mut Frame<'_>, op: Arith) -> RuntimeResult<()> {
        let rhs = frame.pop()?;
        let lhs = frame.pop()?;
        frame.push(arithmetic(op, &lhs, &rhs)?);
        Ok(())
    }

    fn constructor_arity(&self, ty: &str) -> usize {
        self.module
            .find_type(ty)
            .and_then(|id| {
                self.module
                    .type_def(id)
                    .methods
                    .iter()
                    .find(|method| method.is_constructor())
            })
            .map_or(0, |method| method.params.len())
    }

    fn call(
        &self,
        frame: &mut Frame<'_>,
        target: &MethodRef,
        virtual_call: bool,
        budget: &mut Budget,
    ) -> RuntimeResult<()> {
        let generics: Vec<TypeRef> = target.generic_args.iter().map(|ty| frame.resolve(ty)).collect();
        let arity = target.arity.map(usize::from);

        if let Some((owner, def)) = self.find_method(&target.owner, &target.name, arity) {
            let args = frame.pop_n(def.params.len())?;
            let this = if def.is_static { None } else { Some(frame.pop()?) };
            let result = match &this {
                Some(Value::Provider(provider)) => {
                    self.provider_call(provider.as_ref(), target, &generics, args)?
                }
                Some(Value::Null) => return Err(RuntimeError::NullReference(target.to_string())),
                Some(Value::Object(object)) if virtual_call => {
                    let (owner, def) = self
                        .find_method(&object.class, &target.name, Some(def.params.len()))
                        .filter(|(_, method)| method.body.is_some())
                        .unwrap_or((owner, def));
                    let value = self.call_method(owner, def, generics, this.clone(), args, budget)?;
                    (!def.return_type.is_void()).then_some(value)
                }
                _ => {
                    let value = self.call_method(owner, def, generics, this.clone(), args, budget)?;
                    (!def.return_type.is_void()).then_some(value)
                }
            };
            if let Some(value) = result {
                frame.push(value);
            }
            return Ok(());
        }

        if let Some(host) = HostMethod::lookup(target) {
            let args = frame.pop_n(host.arity())?;
            let receiver = if host.has_receiver() { Some(frame.pop()?) } else { None };
            let mut sink = |line: String| self.trace.lock().push(line);
            if let Some(value) = call_host(host, receiver, args, &self.registry, &mut sink)? {
                frame.push(value);
            }
            return Ok(());
        }

        let op = ProviderOp::lookup(&target.name)
            .ok_or_else(|| RuntimeError::UnknownMethod(target.to_string()))?;
        let args = frame.pop_n(arity.unwrap_or(op.default_arity()))?;
        let this = frame.pop()?;
        let result = match &this {
            Value::Provider(provider) => self.provider_call(provider.as_ref(), target, &generics, args)?,
            Value::Object(object) => {
                let (owner, def) = self
                    .find_method(&object.class, &target.name, Some(args.len()))
                    .ok_or_else(|| RuntimeError::UnknownMethod(target.to_string()))?;
                let value = self.call_method(owner, def, generics, Some(this.clone()), args, budget)?;
                (!def.return_type.is_void()).then_some(value)
            }
            Value::Null => return Err(RuntimeError::NullReference(target.to_string())),
            other => return Err(RuntimeError::mismatch("cache provider", other.type_name())),
        };
        if let Some(value) = result {
            frame.push(value);
        }
        Ok(())
    }

    fn provider_call(
        &self,
        provider: &dyn CacheProvider,
        target: &MethodRef,
        generics: &[TypeRef],
        args: Vec<Value>,
    ) -> RuntimeResult<Option<Value>> {
        let op = ProviderOp::lookup(&target.name)
            .ok_or_else(|| RuntimeError::UnknownMethod(target.to_string()))?;
        let value = call_provider(provider, op, generics.first(), args)?;
        Ok(value.filter(|_| op.returns_value()))
    }
}

fn static_key(owner: &str, name: &str) -> String {
    format!("{owner}::{name}")
}

fn instance<'v>(target: &'v Value, field: &FieldRef) -> RuntimeResult<&'v Object> {
    match target {
        Value::Object(object) => Ok(object),
        Value::Null => Err(RuntimeError::NullReference(field.to_string())),
        other => Err(RuntimeError::mismatch("object", other.type_name())),
    }
}

fn with_element<R>(array: &Value, index: i32, f: impl FnOnce(&mut Value) -> R) -> RuntimeResult<R> {
    let Value::Array(items) = array else {
        return Err(match array {
            Value::Null => RuntimeError::NullReference("array".into()),
            other => RuntimeError::mismatch("array", other.type_name()),
        });
    };
    let mut items = items.write();
    let len = items.len();
    let slot = usize::try_from(index)
        .ok()
        .and_then(|index| items.get_mut(index))
        .ok_or(RuntimeError::IndexOutOfRange {
            index: i64::from(index),
            len,
        })?;
    Ok(f(slot))
}

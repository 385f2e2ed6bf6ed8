//! Lowering of checked programs into the block IR.
//!
//! Each function is lowered by its own [`FunctionCodegen`], which owns the
//! IR builder, the variable scopes and the cleanup stack. Coroutines add a
//! [`CoroutineContext`] that lives exactly as long as that codegen.

use crate::language::{
    ast::*,
    ir::{self, BlockId, Builder, CmpOp, CoroIntrinsic, InstKind, IrType, Module, Storage, ValueId},
};
use std::collections::HashMap;
use tracing::{debug, trace};

pub mod builtins;
mod coroutine;
mod emit;
pub mod error;
mod fixup;
mod params;
mod scopes;
mod suspend;

#[cfg(test)]
mod tests;

pub use builtins::{HOST_FUNCTIONS, HostFunction, host_function};
use coroutine::{CoroutineContext, FrameFreeMarker, SuspendKind};
pub use error::{FunctionError, LoweringError, LoweringErrors};
use scopes::{CleanupAction, CleanupEntry, CleanupKind, JumpDest};

#[derive(Clone, Debug)]
pub struct LowerOptions {
    /// Run the IR verifier on every lowered function.
    pub verify: bool,
}

impl Default for LowerOptions {
    fn default() -> Self {
        Self { verify: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Signature {
    params: usize,
    ret: IrType,
}

pub struct Compiler {
    options: LowerOptions,
    signatures: HashMap<String, Signature>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(LowerOptions::default())
    }
}

impl Compiler {
    pub fn new(options: LowerOptions) -> Self {
        let signatures = HOST_FUNCTIONS
            .iter()
            .map(|host| {
                (
                    host.name.to_string(),
                    Signature {
                        params: host.params,
                        ret: host.ret,
                    },
                )
            })
            .collect();
        Self {
            options,
            signatures,
        }
    }

    /// Makes `definition` callable from functions lowered afterwards.
    pub fn declare(&mut self, definition: &Definition) {
        let ret = match definition {
            Definition::Function(_) => IrType::I64,
            Definition::Coroutine(_) => IrType::Ptr,
        };
        self.signatures.insert(
            definition.name().to_string(),
            Signature {
                params: definition.param_count(),
                ret,
            },
        );
    }

    pub fn compile_program(&mut self, program: &CheckedProgram) -> Result<Module, LoweringErrors> {
        for definition in &program.definitions {
            self.declare(definition);
        }

        let mut module = Module::default();
        let mut errors = Vec::new();
        for definition in &program.definitions {
            let lowered = match definition {
                Definition::Function(def) => self.lower_function(def),
                Definition::Coroutine(def) => self.lower_coroutine(def),
            };
            match lowered {
                Ok(function) => module.functions.push(function),
                Err(error) => {
                    debug!(function = definition.name(), %error, "lowering failed");
                    errors.push(FunctionError {
                        function: definition.name().to_string(),
                        error,
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(module)
        } else {
            Err(LoweringErrors { errors })
        }
    }

    pub fn lower_function(&self, def: &FunctionDef) -> Result<ir::Function, LoweringError> {
        if let FunctionKind::Coroutine { promise } = &def.kind {
            return Err(LoweringError::Unresolved {
                construct: "coroutine promise",
                span: promise.span,
            });
        }
        let mut codegen = FunctionCodegen::new(
            &self.signatures,
            &def.name.name,
            &def.params,
            IrType::I64,
            Storage::Stack,
        );
        let zero = codegen.builder.build_const(0, IrType::I64);
        codegen.builder.build_store(codegen.return_slot, zero);
        let return_block = codegen.builder.create_block("return");
        codegen.return_dest = Some(JumpDest {
            block: return_block,
            depth: codegen.current_depth(),
        });

        codegen.emit_block_stmt(&def.body)?;

        codegen.builder.emit_block(return_block);
        let value = codegen.builder.build_load(codegen.return_slot, IrType::I64);
        codegen.builder.build_ret(Some(value));
        codegen.finish(&self.options)
    }

    /// Lowers a resolved coroutine into a single function carrying the
    /// `coroutine` attribute, ready to be split into ramp, resume and
    /// destroy parts.
    pub fn lower_coroutine(&self, def: &CoroutineDef) -> Result<ir::Function, LoweringError> {
        let mut codegen = FunctionCodegen::new(
            &self.signatures,
            &def.name.name,
            &def.params,
            IrType::Ptr,
            Storage::Frame,
        );
        codegen.emit_coroutine_body(&def.body, &def.params)?;
        codegen.finish(&self.options)
    }
}

#[derive(Clone, Copy, Debug)]
struct Binding {
    ptr: ValueId,
    ty: IrType,
    slots: u32,
}

struct FunctionCodegen<'a> {
    name: String,
    signatures: &'a HashMap<String, Signature>,
    builder: Builder,
    scopes: Vec<HashMap<String, Binding>>,
    cleanups: Vec<CleanupEntry>,
    /// Storage of locals declared by the body.
    local_storage: Storage,
    return_slot: ValueId,
    return_dest: Option<JumpDest>,
    labels: HashMap<String, JumpDest>,
    temporaries: HashMap<TempId, Binding>,
    coroutine: Option<CoroutineContext>,
    frame_free: Option<FrameFreeMarker>,
}

impl<'a> FunctionCodegen<'a> {
    fn new(
        signatures: &'a HashMap<String, Signature>,
        name: &str,
        params: &[Ident],
        ret: IrType,
        local_storage: Storage,
    ) -> Self {
        let param_types: Vec<(String, IrType)> = params
            .iter()
            .map(|param| (param.name.clone(), IrType::I64))
            .collect();
        let mut builder = Builder::new(name, &param_types, ret);
        let return_slot = builder.build_alloca("retval", 1, Storage::Stack);
        let mut codegen = Self {
            name: name.to_string(),
            signatures,
            builder,
            scopes: vec![HashMap::new()],
            cleanups: Vec::new(),
            local_storage,
            return_slot,
            return_dest: None,
            labels: HashMap::new(),
            temporaries: HashMap::new(),
            coroutine: None,
            frame_free: None,
        };
        let incoming: Vec<ir::Param> = codegen.builder.params().to_vec();
        for param in incoming {
            let slot = codegen
                .builder
                .build_alloca(&param.name, 1, Storage::Stack);
            codegen.builder.build_store(slot, param.value);
            codegen.bind(
                &param.name,
                Binding {
                    ptr: slot,
                    ty: param.ty,
                    slots: 1,
                },
            );
        }
        codegen
    }

    fn finish(self, options: &LowerOptions) -> Result<ir::Function, LoweringError> {
        let function = self.builder.finish()?;
        if options.verify {
            ir::verify_function(&function)?;
        }
        trace!(function = %function.name, blocks = function.blocks.len(), "lowered");
        Ok(function)
    }

    fn bind(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), binding);
        }
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn lookup_or_err(&self, ident: &Ident) -> Result<Binding, LoweringError> {
        self.lookup(&ident.name)
            .ok_or_else(|| LoweringError::UnknownVariable {
                name: ident.name.clone(),
                span: ident.span,
            })
    }

    fn coro_value(&mut self, intrinsic: CoroIntrinsic, args: Vec<ValueId>) -> ValueId {
        self.builder
            .build_coro(intrinsic, args)
            .unwrap_or_else(|| unreachable!("{} produces no value", intrinsic.name()))
    }

    /// Converts `value` to an `i1` condition.
    fn to_bool(&mut self, value: ValueId) -> ValueId {
        match self.builder.value_type(value) {
            IrType::I1 => value,
            IrType::Ptr => {
                let null = self.builder.build_null();
                self.builder.build_cmp(CmpOp::Ne, value, null)
            }
            ty => {
                let zero = self.builder.build_const(0, ty);
                self.builder.build_cmp(CmpOp::Ne, value, zero)
            }
        }
    }
}

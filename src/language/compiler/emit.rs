use super::*;

impl FunctionCodegen<'_> {
    pub(super) fn emit_block_stmt(&mut self, block: &Block) -> Result<(), LoweringError> {
        let scope = self.enter_scope();
        for statement in &block.statements {
            self.emit_stmt(statement)?;
        }
        self.exit_scope(scope)
    }

    pub(super) fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), LoweringError> {
        // Unreachable code is dropped unless a label makes it reachable again.
        if !self.builder.is_live() && !contains_label(stmt) {
            return Ok(());
        }
        match stmt {
            Stmt::Let(decl) => self.emit_let(decl).map(|_| ()),
            Stmt::Expr(expr) => self.emit_expr(expr).map(|_| ()),
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => self.emit_if(cond, then_block, else_block.as_ref()),
            Stmt::While { cond, body } => self.emit_while(cond, body),
            Stmt::Block(block) => self.emit_block_stmt(block),
            Stmt::Return(ret) => self.emit_return(ret),
            Stmt::CoReturn(ret) => self.emit_co_return(ret),
            Stmt::Defer(expr) => {
                self.push_defer(CleanupKind::NormalAndEh, expr.clone());
                Ok(())
            }
            Stmt::Labeled { label, body } => {
                let dest = self.jump_dest_for_label(label);
                self.builder.emit_block(dest.block);
                self.emit_stmt(body)
            }
        }
    }

    /// Declares a local and returns its address.
    pub(super) fn emit_let(&mut self, decl: &LetStmt) -> Result<ValueId, LoweringError> {
        let storage = if decl.caller_owned {
            Storage::Stack
        } else {
            self.local_storage
        };
        let name = &decl.name.name;
        let binding = match &decl.init {
            Initializer::Expr(init) => {
                let value = self.emit_expr(init)?;
                let ptr = self.builder.build_alloca(name, 1, storage);
                self.builder.build_store(ptr, value);
                Binding {
                    ptr,
                    ty: self.builder.value_type(value),
                    slots: 1,
                }
            }
            Initializer::Aggregate(items) => {
                let ptr = self.builder.build_alloca(name, items.len() as u32, storage);
                for (index, item) in items.iter().enumerate() {
                    let value = self.emit_expr(item)?;
                    let field = self.builder.build_field_addr(ptr, index as u32);
                    self.builder.build_store(field, value);
                }
                Binding {
                    ptr,
                    ty: IrType::I64,
                    slots: items.len() as u32,
                }
            }
        };
        self.bind(name, binding);
        Ok(binding.ptr)
    }

    fn emit_if(
        &mut self,
        cond: &Expr,
        then_block: &Block,
        else_block: Option<&Block>,
    ) -> Result<(), LoweringError> {
        let then_bb = self.builder.create_block("if.then");
        let else_bb = else_block.map(|_| self.builder.create_block("if.else"));
        let end_bb = self.builder.create_block("if.end");

        let cond = self.emit_cond(cond)?;
        self.builder
            .build_cond_br(cond, then_bb, else_bb.unwrap_or(end_bb));

        self.builder.emit_block(then_bb);
        self.emit_block_stmt(then_block)?;
        if self.builder.is_live() {
            self.builder.build_br(end_bb);
        }

        if let (Some(else_bb), Some(else_block)) = (else_bb, else_block) {
            self.builder.emit_block(else_bb);
            self.emit_block_stmt(else_block)?;
            if self.builder.is_live() {
                self.builder.build_br(end_bb);
            }
        }

        if self.builder.has_predecessors(end_bb) {
            self.builder.emit_block(end_bb);
        } else {
            self.builder.clear_insertion_point();
        }
        Ok(())
    }

    fn emit_while(&mut self, cond: &Expr, body: &Block) -> Result<(), LoweringError> {
        let cond_bb = self.builder.create_block("while.cond");
        let body_bb = self.builder.create_block("while.body");
        let end_bb = self.builder.create_block("while.end");

        self.builder.emit_block(cond_bb);
        let cond = self.emit_cond(cond)?;
        self.builder.build_cond_br(cond, body_bb, end_bb);

        self.builder.emit_block(body_bb);
        self.emit_block_stmt(body)?;
        if self.builder.is_live() {
            self.builder.build_br(cond_bb);
        }

        self.builder.emit_block(end_bb);
        Ok(())
    }

    fn emit_return(&mut self, ret: &ReturnStmt) -> Result<(), LoweringError> {
        let Some(dest) = self.return_dest else {
            return Err(LoweringError::Unresolved {
                construct: "return",
                span: ret.span,
            });
        };
        let value = match &ret.value {
            Some(value) => self.emit_expr(value)?,
            None => self.builder.build_const(0, IrType::I64),
        };
        self.builder.build_store(self.return_slot, value);
        self.branch_through_cleanups(dest)
    }

    fn emit_co_return(&mut self, ret: &CoReturnStmt) -> Result<(), LoweringError> {
        let Some(final_dest) = self.coroutine.as_ref().map(|ctx| ctx.final_dest) else {
            return Err(LoweringError::NotInCoroutine {
                construct: "co_return",
            });
        };
        if ret.value.is_some() {
            return Err(LoweringError::Unresolved {
                construct: "co_return operand",
                span: ret.span,
            });
        }
        if let Some(promise_call) = &ret.promise_call {
            self.emit_expr(promise_call)?;
        }
        self.branch_through_cleanups(final_dest)
    }

    pub(super) fn emit_cond(&mut self, expr: &Expr) -> Result<ValueId, LoweringError> {
        let value = self.emit_expr(expr)?;
        Ok(self.to_bool(value))
    }

    pub(super) fn emit_expr(&mut self, expr: &Expr) -> Result<ValueId, LoweringError> {
        match expr {
            Expr::Int(value) => Ok(self.builder.build_const(*value, IrType::I64)),
            Expr::Bool(value) => Ok(self.builder.build_const(i64::from(*value), IrType::I1)),
            Expr::Var(ident) => {
                let binding = self.lookup_or_err(ident)?;
                if binding.slots > 1 {
                    // Aggregates evaluate to their address.
                    return Ok(binding.ptr);
                }
                Ok(self.builder.build_load(binding.ptr, binding.ty))
            }
            Expr::Field { base, index } => {
                let field = self.field_addr(base, *index)?;
                Ok(self.builder.build_load(field, IrType::I64))
            }
            Expr::Unary { op, operand } => {
                let value = self.emit_expr(operand)?;
                Ok(match op {
                    UnaryOp::Neg => {
                        let zero = self.builder.build_const(0, IrType::I64);
                        self.builder.build_binary(ir::BinaryOp::Sub, zero, value)
                    }
                    UnaryOp::Not => {
                        let cond = self.to_bool(value);
                        let one = self.builder.build_const(1, IrType::I1);
                        self.builder.build_binary(ir::BinaryOp::Xor, cond, one)
                    }
                })
            }
            Expr::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),
            Expr::Assign { target, value } => {
                let value = self.emit_expr(value)?;
                let ptr = match target {
                    Place::Var(ident) => self.lookup_or_err(ident)?.ptr,
                    Place::Field { base, index } => self.field_addr(base, *index)?,
                };
                self.builder.build_store(ptr, value);
                Ok(value)
            }
            Expr::Call { callee, args } => {
                let signature = self.signatures.get(&callee.name).copied().ok_or_else(|| {
                    LoweringError::UnknownFunction {
                        name: callee.name.clone(),
                        span: callee.span,
                    }
                })?;
                if signature.params != args.len() {
                    return Err(LoweringError::ArityMismatch {
                        name: callee.name.clone(),
                        expected: signature.params,
                        received: args.len(),
                        span: callee.span,
                    });
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.emit_expr(arg)?);
                }
                match self.emit_call(&callee.name, values, signature.ret)? {
                    Some(value) => Ok(value),
                    None => Ok(self.builder.build_const(0, IrType::I64)),
                }
            }
            Expr::Seq(items) => {
                let mut last = None;
                for item in items {
                    last = Some(self.emit_expr(item)?);
                }
                match last {
                    Some(value) => Ok(value),
                    None => Ok(self.builder.build_const(0, IrType::I64)),
                }
            }
            Expr::Coro(builtin) => self.emit_coro_builtin(builtin),
            Expr::Await { span, .. } => Err(LoweringError::Unresolved {
                construct: "co_await",
                span: *span,
            }),
            Expr::Yield { span, .. } => Err(LoweringError::Unresolved {
                construct: "co_yield",
                span: *span,
            }),
            Expr::Suspend(point) => self.emit_suspend_point(point),
            Expr::Temporary(id) => {
                let binding = self
                    .temporaries
                    .get(id)
                    .copied()
                    .ok_or(LoweringError::UnboundTemporary { id: id.0 })?;
                Ok(self.builder.build_load(binding.ptr, binding.ty))
            }
        }
    }

    fn emit_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<ValueId, LoweringError> {
        let lhs = self.emit_expr(lhs)?;
        let rhs = self.emit_expr(rhs)?;
        let cmp = match op {
            BinaryOp::Eq => Some(CmpOp::Eq),
            BinaryOp::NotEq => Some(CmpOp::Ne),
            BinaryOp::Lt => Some(CmpOp::Lt),
            BinaryOp::LtEq => Some(CmpOp::Le),
            BinaryOp::Gt => Some(CmpOp::Gt),
            BinaryOp::GtEq => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(cmp) = cmp {
            return Ok(self.builder.build_cmp(cmp, lhs, rhs));
        }
        let arith = match op {
            BinaryOp::Add => ir::BinaryOp::Add,
            BinaryOp::Sub => ir::BinaryOp::Sub,
            BinaryOp::Mul => ir::BinaryOp::Mul,
            BinaryOp::Div => ir::BinaryOp::Div,
            BinaryOp::Rem => ir::BinaryOp::Rem,
            BinaryOp::And | BinaryOp::Or => {
                let lhs = self.to_bool(lhs);
                let rhs = self.to_bool(rhs);
                let logic = if op == BinaryOp::And {
                    ir::BinaryOp::And
                } else {
                    ir::BinaryOp::Or
                };
                return Ok(self.builder.build_binary(logic, lhs, rhs));
            }
            _ => unreachable!("comparison handled above"),
        };
        Ok(self.builder.build_binary(arith, lhs, rhs))
    }

    fn field_addr(&mut self, base: &Ident, index: u32) -> Result<ValueId, LoweringError> {
        let binding = self.lookup_or_err(base)?;
        if index >= binding.slots || binding.slots < 2 {
            return Err(LoweringError::NotAnAggregate {
                name: base.name.clone(),
                span: base.span,
            });
        }
        Ok(self.builder.build_field_addr(binding.ptr, index))
    }

    fn emit_coro_builtin(&mut self, builtin: &CoroBuiltin) -> Result<ValueId, LoweringError> {
        if self.local_storage != Storage::Frame {
            return Err(LoweringError::NotInCoroutine {
                construct: "coroutine builtin",
            });
        }
        Ok(match builtin {
            CoroBuiltin::Frame => self.coro_value(CoroIntrinsic::Frame, Vec::new()),
            CoroBuiltin::Size => self.coro_value(CoroIntrinsic::Size, Vec::new()),
            CoroBuiltin::Free(frame) => {
                let frame = self.emit_expr(frame)?;
                let freed = self.coro_value(CoroIntrinsic::Free, vec![frame]);
                self.frame_free = Some(FrameFreeMarker {
                    block: self.builder.insert_block(),
                    value: freed,
                });
                freed
            }
        })
    }
}

fn contains_label(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Labeled { .. } => true,
        Stmt::Block(block) => block.statements.iter().any(contains_label),
        _ => false,
    }
}

use super::*;

/// Which suspend point of the coroutine is being emitted; decides the block
/// name prefix and whether the save is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum SuspendKind {
    Initial,
    Normal,
    Final,
}

/// Per-function state of a coroutine lowering.
#[derive(Clone, Debug)]
pub(super) struct CoroutineContext {
    /// Number of initial, await and yield points emitted so far.
    pub suspend_count: u32,
    pub kind: SuspendKind,
    /// Where a suspended coroutine hands control back to its resumer.
    pub resume_exit: BlockId,
    pub destroy_label: String,
    /// Target of `co_return`: the final suspend.
    pub final_dest: JumpDest,
}

/// The `coro.free` emitted by the deallocate statement, consumed by the
/// destroy-path fixup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct FrameFreeMarker {
    pub block: BlockId,
    pub value: ValueId,
}

impl FunctionCodegen<'_> {
    pub(super) fn emit_coroutine_body(
        &mut self,
        body: &CoroutineBody,
        params: &[Ident],
    ) -> Result<(), LoweringError> {
        let Stmt::Labeled {
            label: destroy_label,
            body: deallocate,
        } = &body.deallocate
        else {
            return Err(LoweringError::UnlabeledDeallocate);
        };
        let Stmt::Return(ReturnStmt {
            value: Some(return_value),
            ..
        }) = &body.return_stmt
        else {
            return Err(LoweringError::MalformedReturn);
        };
        if !matches!(body.promise_decl.init, Initializer::Aggregate(_)) {
            return Err(LoweringError::MalformedPromise);
        }
        debug!(function = %self.name, params = params.len(), "lowering coroutine");

        // Ramp: use caller-provided storage when the probe finds some,
        // otherwise allocate.
        let probe = self.coro_value(CoroIntrinsic::Alloc, Vec::new());
        let resume_exit = self.builder.create_block("coro.ret");
        let memory = match &body.allocate {
            Some(allocate) => {
                let entry = self.builder.insert_block();
                let null = self.builder.build_null();
                let elided = self.builder.build_cmp(CmpOp::Ne, probe, null);
                let alloc_bb = self.builder.create_block("coro.alloc");
                let init_bb = self.builder.create_block("coro.init");
                self.builder.build_cond_br(elided, init_bb, alloc_bb);

                self.builder.emit_block(alloc_bb);
                let allocated = self.emit_expr(allocate)?;
                let allocated_in = self.builder.insert_block();
                self.builder.build_br(init_bb);

                self.builder.emit_block(init_bb);
                self.builder
                    .build_phi(IrType::Ptr, vec![(probe, entry), (allocated, allocated_in)])
            }
            None => probe,
        };

        // `coro.begin` needs the promise address, which only exists once
        // the promise is declared; keep its position until then.
        let align = self.builder.build_const(0, IrType::I32);
        let info = self.builder.build_null();
        let begin = self.builder.reserve_slot(IrType::Ptr);

        let setup_depth = self.current_depth();
        self.push_cleanup(
            CleanupKind::Eh,
            CleanupAction::DestroyFrame {
                deallocate: (**deallocate).clone(),
            },
        );

        let promise = self.emit_let(&body.promise_decl)?;
        self.builder.fill_slot(
            begin,
            InstKind::Coro {
                intrinsic: CoroIntrinsic::Begin,
                args: vec![memory, probe, align, promise, info],
            },
        );

        match &body.result_decl {
            Some(result_decl) => {
                self.emit_let(result_decl)?;
            }
            None => {
                let value = self.emit_expr(return_value)?;
                self.builder.build_store(self.return_slot, value);
            }
        }

        let body_scope = self.enter_scope();
        let destroy_dest = JumpDest {
            block: self.builder.create_block(destroy_label),
            depth: self.current_depth(),
        };
        self.labels.insert(destroy_label.clone(), destroy_dest);

        self.emit_param_moves(&body.param_moves, params)?;
        self.push_cleanup(CleanupKind::Eh, CleanupAction::EndFrame);

        let final_bb = self.builder.create_block("coro.final");
        self.coroutine = Some(CoroutineContext {
            suspend_count: 0,
            kind: SuspendKind::Initial,
            resume_exit,
            destroy_label: destroy_label.clone(),
            final_dest: JumpDest {
                block: final_bb,
                depth: self.current_depth(),
            },
        });

        self.emit_suspend_point(&body.initial_suspend)?;
        self.set_suspend_kind(SuspendKind::Normal);
        self.emit_block_stmt(&body.body)?;
        if self.builder.is_live() || self.builder.has_predecessors(final_bb) {
            self.builder.emit_block(final_bb);
            self.set_suspend_kind(SuspendKind::Final);
            self.emit_suspend_point(&body.final_suspend)?;
        }

        self.exit_scope(body_scope)?;
        self.pop_cleanups_to(setup_depth);

        self.emit_stmt(&body.deallocate)?;
        self.fixup_destroy()?;

        self.builder.emit_block(resume_exit);
        let null = self.builder.build_null();
        self.builder.build_coro(CoroIntrinsic::End, vec![null]);
        if body.result_decl.is_some() {
            let value = self.emit_expr(return_value)?;
            self.builder.build_store(self.return_slot, value);
        }
        let value = self.builder.build_load(self.return_slot, IrType::Ptr);
        self.builder.build_ret(Some(value));

        self.builder.set_coroutine();
        debug!(
            function = %self.name,
            suspend_points = self.coroutine.as_ref().map_or(0, |ctx| ctx.suspend_count),
            "coroutine lowered"
        );
        Ok(())
    }

    fn set_suspend_kind(&mut self, kind: SuspendKind) {
        if let Some(ctx) = self.coroutine.as_mut() {
            ctx.kind = kind;
        }
    }
}

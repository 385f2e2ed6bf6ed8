use super::*;

/// Every cleanup runs while an exception unwinds through its scope; the
/// kind decides whether normal exits run it too.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum CleanupKind {
    Eh,
    NormalAndEh,
}

impl CleanupKind {
    fn is_normal(self) -> bool {
        matches!(self, CleanupKind::NormalAndEh)
    }
}

#[derive(Clone, Debug)]
pub(super) enum CleanupAction {
    /// Deferred expression, evaluated against the variables visible where
    /// it was registered.
    Defer { expr: Expr, var_depth: usize },
    /// Frees the coroutine frame and ends it.
    DestroyFrame { deallocate: Stmt },
    /// Ends the current activation of the frame.
    EndFrame,
}

#[derive(Clone, Debug)]
pub(super) struct CleanupEntry {
    pub kind: CleanupKind,
    pub action: CleanupAction,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct ScopeMarker {
    cleanups: usize,
    vars: usize,
}

/// Branch target together with the cleanup depth it lives at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) struct JumpDest {
    pub block: BlockId,
    pub depth: usize,
}

impl FunctionCodegen<'_> {
    pub(super) fn current_depth(&self) -> usize {
        self.cleanups.len()
    }

    pub(super) fn enter_scope(&mut self) -> ScopeMarker {
        let marker = ScopeMarker {
            cleanups: self.cleanups.len(),
            vars: self.scopes.len(),
        };
        self.scopes.push(HashMap::new());
        marker
    }

    /// Leaves a scope, running its normal cleanups innermost first.
    pub(super) fn exit_scope(&mut self, marker: ScopeMarker) -> Result<(), LoweringError> {
        if self.builder.is_live() {
            for index in (marker.cleanups..self.cleanups.len()).rev() {
                if self.cleanups[index].kind.is_normal() {
                    self.emit_cleanup(index)?;
                }
            }
        }
        self.cleanups.truncate(marker.cleanups);
        self.scopes.truncate(marker.vars);
        Ok(())
    }

    pub(super) fn push_cleanup(&mut self, kind: CleanupKind, action: CleanupAction) {
        trace!(function = %self.name, ?kind, depth = self.cleanups.len(), "push cleanup");
        self.cleanups.push(CleanupEntry { kind, action });
    }

    pub(super) fn push_defer(&mut self, kind: CleanupKind, expr: Expr) {
        let var_depth = self.scopes.len();
        self.push_cleanup(kind, CleanupAction::Defer { expr, var_depth });
    }

    /// Pops cleanups above `depth` without emitting them.
    pub(super) fn pop_cleanups_to(&mut self, depth: usize) {
        self.cleanups.truncate(depth);
    }

    /// Emits the normal cleanups between the insertion point and `dest`,
    /// then branches there. The cleanups stay registered for other exits.
    pub(super) fn branch_through_cleanups(&mut self, dest: JumpDest) -> Result<(), LoweringError> {
        if !self.builder.is_live() {
            return Ok(());
        }
        for index in (dest.depth..self.cleanups.len()).rev() {
            if self.cleanups[index].kind.is_normal() {
                self.emit_cleanup(index)?;
            }
        }
        self.builder.build_br(dest.block);
        Ok(())
    }

    pub(super) fn jump_dest_for_label(&mut self, label: &str) -> JumpDest {
        if let Some(dest) = self.labels.get(label) {
            return *dest;
        }
        let dest = JumpDest {
            block: self.builder.create_block(label),
            depth: self.current_depth(),
        };
        self.labels.insert(label.to_string(), dest);
        dest
    }

    /// Emits a call, as an `invoke` when an exception would have cleanups
    /// to run.
    pub(super) fn emit_call(
        &mut self,
        callee: &str,
        args: Vec<ValueId>,
        ty: IrType,
    ) -> Result<Option<ValueId>, LoweringError> {
        if self.cleanups.is_empty() {
            return Ok(self.builder.build_call(callee, args, ty));
        }
        let unwind = self.unwind_block()?;
        let normal = self.builder.create_block("invoke.cont");
        let result = self.builder.build_invoke(callee, args, ty, normal, unwind);
        self.builder.emit_block(normal);
        Ok(result)
    }

    /// Builds a landing pad that runs every cleanup, innermost first, and
    /// resumes unwinding. Each cleanup is emitted with only the cleanups
    /// below it registered.
    fn unwind_block(&mut self) -> Result<BlockId, LoweringError> {
        let resume_at = self.builder.insert_block();
        let pad = self.builder.create_block("lpad");
        self.builder.mark_landing_pad(pad);
        self.builder.clear_insertion_point();
        self.builder.emit_block(pad);

        let registered = self.cleanups.clone();
        let mut result = Ok(());
        for index in (0..registered.len()).rev() {
            self.cleanups.truncate(index + 1);
            result = self.emit_cleanup(index);
            if result.is_err() {
                break;
            }
        }
        self.cleanups = registered;
        result?;

        self.builder.build_resume();
        self.builder.position_at_end(resume_at);
        Ok(pad)
    }

    fn emit_cleanup(&mut self, index: usize) -> Result<(), LoweringError> {
        let above = self.cleanups.split_off(index);
        let result = match above.first() {
            Some(entry) => self.run_cleanup_action(&entry.action),
            None => Ok(()),
        };
        self.cleanups.extend(above);
        result
    }

    fn run_cleanup_action(&mut self, action: &CleanupAction) -> Result<(), LoweringError> {
        match action {
            CleanupAction::Defer { expr, var_depth } => {
                let hidden = self.scopes.split_off((*var_depth).min(self.scopes.len()));
                let result = self.emit_expr(expr).map(|_| ());
                self.scopes.extend(hidden);
                result
            }
            CleanupAction::DestroyFrame { deallocate } => {
                let outer = self.frame_free.take();
                let result = self
                    .emit_stmt(deallocate)
                    .and_then(|_| self.fixup_destroy());
                self.frame_free = outer;
                result
            }
            CleanupAction::EndFrame => {
                let null = self.builder.build_null();
                self.builder.build_coro(CoroIntrinsic::End, vec![null]);
                Ok(())
            }
        }
    }
}

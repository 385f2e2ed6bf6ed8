use super::*;
use crate::language::ir::{SUSPEND_DESTROYED, SUSPEND_RESUMED};

impl FunctionCodegen<'_> {
    /// Lowers one suspend point into its ready/suspend/cleanup blocks and
    /// returns the value the point resumes with.
    pub(super) fn emit_suspend_point(
        &mut self,
        point: &SuspendPoint,
    ) -> Result<ValueId, LoweringError> {
        let Some(ctx) = self.coroutine.as_mut() else {
            return Err(LoweringError::NotInCoroutine {
                construct: "suspend point",
            });
        };
        let (tag, number) = match (point.syntax, ctx.kind) {
            (SuspendSyntax::Yield, _) => {
                ctx.suspend_count += 1;
                ("yield", ctx.suspend_count)
            }
            (SuspendSyntax::Await, SuspendKind::Initial) => {
                ctx.suspend_count += 1;
                ("init", ctx.suspend_count)
            }
            (SuspendSyntax::Await, SuspendKind::Normal) => {
                ctx.suspend_count += 1;
                ("await", ctx.suspend_count)
            }
            (SuspendSyntax::Await, SuspendKind::Final) => ("final", 0),
        };
        let resume_exit = ctx.resume_exit;
        let destroy_label = ctx.destroy_label.clone();
        let is_final = number == 0;
        let prefix = if number > 1 {
            format!("{tag}{number}")
        } else {
            tag.to_string()
        };

        for (part, expr) in [
            ("ready", &point.ready),
            ("suspend", &point.suspend),
            ("resume", &point.resume),
        ] {
            let found = expr.count_temp_refs(point.temp);
            if found != 1 {
                return Err(LoweringError::TemporaryReference { part, found });
            }
        }

        // The awaited value is evaluated once and lives in the frame so the
        // resume expression can still read it after suspension.
        let common = self.emit_expr(&point.common)?;
        let ty = self.builder.value_type(common);
        let slot = self
            .builder
            .build_alloca(&format!("{prefix}.temp"), 1, self.local_storage);
        self.builder.build_store(slot, common);
        self.temporaries.insert(
            point.temp,
            Binding {
                ptr: slot,
                ty,
                slots: 1,
            },
        );

        let ready_bb = self.builder.create_block(&format!("{prefix}.ready"));
        let suspend_bb = self.builder.create_block(&format!("{prefix}.suspend"));
        let cleanup_bb = self.builder.create_block(&format!("{prefix}.cleanup"));

        let scope = self.enter_scope();
        let ready = self.emit_cond(&point.ready)?;
        self.builder.build_cond_br(ready, ready_bb, suspend_bb);

        self.builder.emit_block(suspend_bb);
        let final_flag = self.builder.build_const(i64::from(is_final), IrType::I1);
        let save = self.coro_value(CoroIntrinsic::Save, vec![final_flag]);
        self.emit_expr(&point.suspend)?;
        let outcome = self.coro_value(CoroIntrinsic::Suspend, vec![save]);
        self.builder.build_switch(
            outcome,
            resume_exit,
            vec![(SUSPEND_RESUMED, ready_bb), (SUSPEND_DESTROYED, cleanup_bb)],
        );

        self.builder.emit_block(cleanup_bb);
        let destroy = self.jump_dest_for_label(&destroy_label);
        self.branch_through_cleanups(destroy)?;

        self.builder.emit_block(ready_bb);
        let value = self.emit_expr(&point.resume)?;
        self.exit_scope(scope)?;
        self.temporaries.remove(&point.temp);

        debug!(function = %self.name, point = %prefix, is_final, "lowered suspend point");
        Ok(value)
    }
}

use super::*;

impl FunctionCodegen<'_> {
    /// Copies every parameter into a frame local of the same name. Later
    /// references to the parameter resolve to the copy, which outlives the
    /// ramp's activation.
    pub(super) fn emit_param_moves(
        &mut self,
        moves: &[ParamMove],
        params: &[Ident],
    ) -> Result<(), LoweringError> {
        for param_move in moves {
            let name = &param_move.param.name;
            if !params.iter().any(|param| param.name == *name) {
                return Err(LoweringError::UnknownParam {
                    param: name.clone(),
                });
            }
            let found = param_move.init.count_var_refs(name);
            if found != 1 {
                return Err(LoweringError::ParamMoveReference {
                    param: name.clone(),
                    found,
                });
            }

            let copy = LetStmt::new(param_move.param.clone(), param_move.init.clone());
            self.emit_let(&copy)?;
            if let Some(drop) = &param_move.drop {
                self.push_defer(CleanupKind::NormalAndEh, drop.clone());
            }
            trace!(function = %self.name, param = %name, "materialized parameter");
        }
        Ok(())
    }
}

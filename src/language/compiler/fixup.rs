use super::*;

impl FunctionCodegen<'_> {
    /// Rewrites the tail of the deallocate statement
    ///
    /// ```text
    ///   %mem = coro.free(%frame)
    ///   <release %mem>
    /// ```
    ///
    /// into a release guarded by `%mem != null`, followed on both paths by
    /// `coro.end(%mem)`.
    pub(super) fn fixup_destroy(&mut self) -> Result<(), LoweringError> {
        let marker = self
            .frame_free
            .take()
            .ok_or(LoweringError::MissingFrameFree)?;

        let end_bb = self.builder.create_block("coro.teardown");
        if self.builder.is_live() {
            self.builder.build_br(end_bb);
        }
        let free_bb = self
            .builder
            .split_block_after(marker.block, marker.value, "coro.free");

        self.builder.position_at_end(marker.block);
        let null = self.builder.build_null();
        let heap = self.builder.build_cmp(CmpOp::Ne, marker.value, null);
        self.builder.build_cond_br(heap, free_bb, end_bb);

        self.builder.emit_block(end_bb);
        self.builder
            .build_coro(CoroIntrinsic::End, vec![marker.value]);
        trace!(
            function = %self.name,
            free = %self.builder.block_name(free_bb),
            "destroy path fixed up"
        );
        Ok(())
    }
}

//! Function builder with an insertion point.
//!
//! Blocks are created detached and enter the layout when emitted, so a block
//! can be branched to before its position is known. `alloca`s are hoisted to
//! the top of the entry block. Instructions whose operands are produced later
//! in emission order go through [`Builder::reserve_slot`].

use super::model::*;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("reserved slot %{value} in block `{block}` was never filled")]
    UnfilledSlot { block: String, value: u32 },
}

/// A reserved instruction position; see [`Builder::reserve_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a reserved slot must be filled before the function is finished"]
pub struct Slot {
    block: BlockId,
    value: ValueId,
}

impl Slot {
    pub fn value(&self) -> ValueId {
        self.value
    }
}

pub struct Builder {
    name: String,
    params: Vec<Param>,
    ret: IrType,
    blocks: Vec<Block>,
    layout: Vec<BlockId>,
    types: Vec<IrType>,
    current: Option<BlockId>,
    entry_allocas: usize,
    name_counts: HashMap<String, u32>,
    attrs: FunctionAttrs,
}

impl Builder {
    pub fn new(name: impl Into<String>, params: &[(String, IrType)], ret: IrType) -> Self {
        let mut builder = Self {
            name: name.into(),
            params: Vec::new(),
            ret,
            blocks: Vec::new(),
            layout: Vec::new(),
            types: Vec::new(),
            current: None,
            entry_allocas: 0,
            name_counts: HashMap::new(),
            attrs: FunctionAttrs::default(),
        };
        for (param, ty) in params {
            let value = builder.alloc_value(*ty);
            builder.params.push(Param {
                name: param.clone(),
                value,
                ty: *ty,
            });
        }
        let entry = builder.create_block("entry");
        builder.emit_block(entry);
        builder
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn set_coroutine(&mut self) {
        self.attrs.coroutine = true;
    }

    pub fn value_type(&self, value: ValueId) -> IrType {
        self.types
            .get(value.index())
            .copied()
            .unwrap_or_else(|| panic!("invalid value id {:?}", value))
    }

    /// Creates a block outside the layout; it is placed by [`Builder::emit_block`].
    pub fn create_block(&mut self, name: &str) -> BlockId {
        let count = self.name_counts.entry(name.to_string()).or_insert(0);
        let unique = if *count == 0 {
            name.to_string()
        } else {
            format!("{name}.{count}")
        };
        *count += 1;
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            name: unique,
            insts: Vec::new(),
            term: None,
            landing_pad: false,
        });
        id
    }

    /// Appends `block` to the layout and moves the insertion point there.
    /// A live insertion point falls through into it.
    pub fn emit_block(&mut self, block: BlockId) {
        if self.is_live() {
            self.build_br(block);
        }
        assert!(
            !self.layout.contains(&block),
            "block `{}` emitted twice",
            self.block(block).name
        );
        self.layout.push(block);
        self.current = Some(block);
    }

    pub fn mark_landing_pad(&mut self, block: BlockId) {
        self.block_mut(block).landing_pad = true;
    }

    pub fn block_name(&self, block: BlockId) -> &str {
        &self.block(block).name
    }

    pub fn is_emitted(&self, block: BlockId) -> bool {
        self.layout.contains(&block)
    }

    pub fn has_predecessors(&self, block: BlockId) -> bool {
        self.blocks.iter().any(|candidate| {
            candidate
                .term
                .as_ref()
                .is_some_and(|term| term.successors().contains(&block))
        })
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    /// Whether code emitted now is reachable from the current block.
    pub fn is_live(&self) -> bool {
        self.current
            .is_some_and(|block| self.block(block).term.is_none())
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn clear_insertion_point(&mut self) {
        self.current = None;
    }

    pub fn build_const(&mut self, value: i64, ty: IrType) -> ValueId {
        self.push_value(ty, InstKind::Const { value })
    }

    pub fn build_null(&mut self) -> ValueId {
        self.push_value(IrType::Ptr, InstKind::Null)
    }

    pub fn build_binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.value_type(lhs);
        self.push_value(ty, InstKind::Binary { op, lhs, rhs })
    }

    pub fn build_cmp(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push_value(IrType::I1, InstKind::Cmp { op, lhs, rhs })
    }

    /// Stack slot hoisted to the top of the entry block.
    pub fn build_alloca(&mut self, name: &str, slots: u32, storage: Storage) -> ValueId {
        let value = self.alloc_value(IrType::Ptr);
        let inst = Instruction {
            result: Some(value),
            ty: IrType::Ptr,
            kind: InstKind::Alloca {
                name: name.to_string(),
                slots,
                storage,
            },
        };
        let index = self.entry_allocas;
        let entry = self.entry();
        self.block_mut(entry).insts.insert(index, inst);
        self.entry_allocas += 1;
        value
    }

    pub fn build_field_addr(&mut self, base: ValueId, index: u32) -> ValueId {
        self.push_value(IrType::Ptr, InstKind::FieldAddr { base, index })
    }

    pub fn build_load(&mut self, ptr: ValueId, ty: IrType) -> ValueId {
        self.push_value(ty, InstKind::Load { ptr })
    }

    pub fn build_store(&mut self, ptr: ValueId, value: ValueId) {
        self.push(IrType::Void, InstKind::Store { ptr, value });
    }

    pub fn build_call(&mut self, callee: &str, args: Vec<ValueId>, ty: IrType) -> Option<ValueId> {
        self.push(
            ty,
            InstKind::Call {
                callee: callee.to_string(),
                args,
            },
        )
    }

    pub fn build_phi(&mut self, ty: IrType, incoming: Vec<(ValueId, BlockId)>) -> ValueId {
        self.push_value(ty, InstKind::Phi { incoming })
    }

    pub fn build_coro(&mut self, intrinsic: CoroIntrinsic, args: Vec<ValueId>) -> Option<ValueId> {
        debug_assert_eq!(args.len(), intrinsic.arity(), "{}", intrinsic.name());
        self.push(intrinsic.result_type(), InstKind::Coro { intrinsic, args })
    }

    /// Reserves an instruction position at the insertion point. Its result
    /// value exists immediately; the instruction itself is supplied by
    /// [`Builder::fill_slot`] once its operands have been emitted.
    pub fn reserve_slot(&mut self, ty: IrType) -> Slot {
        let block = self.insert_block();
        let value = self.alloc_value(ty);
        self.block_mut(block).insts.push(Instruction {
            result: Some(value),
            ty,
            kind: InstKind::Reserved,
        });
        Slot { block, value }
    }

    pub fn fill_slot(&mut self, slot: Slot, kind: InstKind) -> ValueId {
        let inst = self
            .block_mut(slot.block)
            .insts
            .iter_mut()
            .find(|inst| inst.result == Some(slot.value))
            .unwrap_or_else(|| panic!("slot %{} is not in its block", slot.value.0));
        assert!(
            matches!(inst.kind, InstKind::Reserved),
            "slot %{} filled twice",
            slot.value.0
        );
        inst.kind = kind;
        slot.value
    }

    /// Moves everything after the instruction defining `after`, terminator
    /// included, into a new block laid out right after `block`. Phis in the
    /// moved terminator's successors are rewired to the new block. The
    /// insertion point follows the moved code.
    pub fn split_block_after(&mut self, block: BlockId, after: ValueId, name: &str) -> BlockId {
        let index = self
            .block(block)
            .insts
            .iter()
            .position(|inst| inst.result == Some(after))
            .unwrap_or_else(|| panic!("%{} is not defined in `{}`", after.0, self.block(block).name));
        let tail = self.create_block(name);
        let moved: Vec<Instruction> = self.block_mut(block).insts.drain(index + 1..).collect();
        let term = self.block_mut(block).term.take();
        let successors = term.as_ref().map(Terminator::successors).unwrap_or_default();
        {
            let tail_block = self.block_mut(tail);
            tail_block.insts = moved;
            tail_block.term = term;
        }
        for successor in successors {
            for inst in &mut self.block_mut(successor).insts {
                if let InstKind::Phi { incoming } = &mut inst.kind {
                    for (_, pred) in incoming.iter_mut() {
                        if *pred == block {
                            *pred = tail;
                        }
                    }
                }
            }
        }
        let position = self
            .layout
            .iter()
            .position(|id| *id == block)
            .map(|pos| pos + 1)
            .unwrap_or(self.layout.len());
        self.layout.insert(position, tail);
        if self.current == Some(block) {
            self.current = Some(tail);
        }
        tail
    }

    pub fn build_br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn build_cond_br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn build_switch(&mut self, value: ValueId, default: BlockId, cases: Vec<(i64, BlockId)>) {
        self.terminate(Terminator::Switch {
            value,
            default,
            cases,
        });
    }

    pub fn build_invoke(
        &mut self,
        callee: &str,
        args: Vec<ValueId>,
        ty: IrType,
        normal: BlockId,
        unwind: BlockId,
    ) -> Option<ValueId> {
        let result = (ty != IrType::Void).then(|| self.alloc_value(ty));
        self.terminate(Terminator::Invoke {
            result,
            ty,
            callee: callee.to_string(),
            args,
            normal,
            unwind,
        });
        result
    }

    pub fn build_ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Ret(value));
    }

    pub fn build_resume(&mut self) {
        self.terminate(Terminator::Resume);
    }

    pub fn build_unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    pub fn finish(self) -> Result<Function, BuildError> {
        let mut blocks: Vec<Option<Block>> = self.blocks.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(self.layout.len());
        for id in self.layout {
            if let Some(block) = blocks[id.index()].take() {
                if let Some(inst) = block
                    .insts
                    .iter()
                    .find(|inst| matches!(inst.kind, InstKind::Reserved))
                {
                    return Err(BuildError::UnfilledSlot {
                        block: block.name.clone(),
                        value: inst.result.map(|value| value.0).unwrap_or_default(),
                    });
                }
                ordered.push(block);
            }
        }
        Ok(Function {
            name: self.name,
            params: self.params,
            ret: self.ret,
            blocks: ordered,
            attrs: self.attrs,
        })
    }

    fn terminate(&mut self, term: Terminator) {
        let block = self.insert_block();
        let slot = &mut self.block_mut(block).term;
        assert!(slot.is_none(), "block already terminated");
        *slot = Some(term);
    }

    fn push_value(&mut self, ty: IrType, kind: InstKind) -> ValueId {
        self.push(ty, kind)
            .unwrap_or_else(|| panic!("instruction of type {ty} produces no value"))
    }

    fn push(&mut self, ty: IrType, kind: InstKind) -> Option<ValueId> {
        let block = self.insert_block();
        let result = (ty != IrType::Void).then(|| self.alloc_value(ty));
        self.block_mut(block)
            .insts
            .push(Instruction { result, ty, kind });
        result
    }

    /// Block receiving new instructions; panics when there is none.
    pub fn insert_block(&self) -> BlockId {
        let block = self.current.expect("no insertion point");
        assert!(
            self.block(block).term.is_none(),
            "insertion point `{}` is already terminated",
            self.block(block).name
        );
        block
    }

    fn alloc_value(&mut self, ty: IrType) -> ValueId {
        let id = ValueId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    fn block(&self, block: BlockId) -> &Block {
        self.blocks
            .get(block.index())
            .unwrap_or_else(|| panic!("invalid block id {:?}", block))
    }

    fn block_mut(&mut self, block: BlockId) -> &mut Block {
        self.blocks
            .get_mut(block.index())
            .unwrap_or_else(|| panic!("invalid block id {:?}", block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocas_are_hoisted_into_entry() {
        let mut builder = Builder::new("f", &[], IrType::I64);
        let body = builder.create_block("body");
        builder.emit_block(body);
        let slot = builder.build_alloca("x", 1, Storage::Stack);
        let one = builder.build_const(1, IrType::I64);
        builder.build_store(slot, one);
        builder.build_ret(Some(one));
        let function = builder.finish().expect("finish");
        assert!(matches!(
            function.blocks[0].insts[0].kind,
            InstKind::Alloca { .. }
        ));
        assert_eq!(function.blocks[0].term, Some(Terminator::Br(body)));
    }

    #[test]
    fn reserved_slot_keeps_its_position() {
        let mut builder = Builder::new("f", &[], IrType::Void);
        let slot = builder.reserve_slot(IrType::I64);
        let two = builder.build_const(2, IrType::I64);
        builder.fill_slot(
            slot,
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: two,
                rhs: two,
            },
        );
        builder.build_ret(None);
        let function = builder.finish().expect("finish");
        let insts = &function.blocks[0].insts;
        assert_eq!(insts[0].result, Some(slot.value()));
        assert!(matches!(insts[0].kind, InstKind::Binary { .. }));
    }

    #[test]
    fn unfilled_slot_is_rejected() {
        let mut builder = Builder::new("f", &[], IrType::Void);
        let _slot = builder.reserve_slot(IrType::Ptr);
        builder.build_ret(None);
        assert!(matches!(
            builder.finish(),
            Err(BuildError::UnfilledSlot { .. })
        ));
    }

    #[test]
    fn split_moves_tail_and_rewires_phis() {
        let mut builder = Builder::new("f", &[], IrType::I64);
        let join = builder.create_block("join");
        let marker = builder.build_const(7, IrType::I64);
        let after = builder.build_const(8, IrType::I64);
        builder.build_br(join);
        builder.emit_block(join);
        let phi = builder.build_phi(IrType::I64, vec![(after, builder.entry())]);
        builder.build_ret(Some(phi));

        let entry = builder.entry();
        let tail = builder.split_block_after(entry, marker, "tail");
        builder.position_at_end(entry);
        builder.build_br(tail);

        let function = builder.finish().expect("finish");
        let names: Vec<&str> = function.blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["entry", "tail", "join"]);
        assert_eq!(function.blocks[0].insts.len(), 1);
        assert_eq!(function.blocks[1].insts[0].result, Some(after));
        assert_eq!(function.blocks[1].term, Some(Terminator::Br(join)));
        let InstKind::Phi { incoming } = &function.blocks[2].insts[0].kind else {
            panic!("expected phi");
        };
        assert_eq!(incoming[0].1, tail);
    }

    #[test]
    fn duplicate_block_names_are_disambiguated() {
        let mut builder = Builder::new("f", &[], IrType::Void);
        let first = builder.create_block("loop");
        let second = builder.create_block("loop");
        assert_eq!(builder.block_name(first), "loop");
        assert_eq!(builder.block_name(second), "loop.1");
    }
}

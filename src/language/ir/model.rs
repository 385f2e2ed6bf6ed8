//! Block-structured IR the lowering emits into.
//!
//! Values are numbered per function; blocks carry a debug name and are laid
//! out in emission order. Coroutine primitives are ordinary instructions so
//! a later pass can find and split on them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrType {
    I1,
    I8,
    I32,
    I64,
    Ptr,
    Token,
    Void,
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IrType::I1 => "i1",
            IrType::I8 => "i8",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::Ptr => "ptr",
            IrType::Token => "token",
            IrType::Void => "void",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Where an `alloca` lives once the coroutine is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Survives suspension; released with the coroutine frame.
    Frame,
    /// Owned by the activation that created it.
    Stack,
}

/// Coroutine primitives, in the argument order the splitting pass expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoroIntrinsic {
    /// `() -> ptr`: caller-provided frame storage, or null.
    Alloc,
    /// `(mem, alloc, align, promise, info) -> ptr`: the frame handle.
    Begin,
    /// `(frame) -> ptr`: memory to release, or null when not heap allocated.
    Free,
    /// `(frame)`: end of the current activation of the frame.
    End,
    /// `(final: i1) -> token`.
    Save,
    /// `(save) -> i8`: `0` resumed, `1` destroyed, anything else suspended.
    Suspend,
    /// `() -> ptr`: the current frame handle.
    Frame,
    /// `() -> i64`: frame size in bytes.
    Size,
}

impl CoroIntrinsic {
    pub fn name(self) -> &'static str {
        match self {
            CoroIntrinsic::Alloc => "llvm.coro.alloc",
            CoroIntrinsic::Begin => "llvm.coro.begin",
            CoroIntrinsic::Free => "llvm.coro.free",
            CoroIntrinsic::End => "llvm.coro.end",
            CoroIntrinsic::Save => "llvm.coro.save",
            CoroIntrinsic::Suspend => "llvm.coro.suspend",
            CoroIntrinsic::Frame => "llvm.coro.frame",
            CoroIntrinsic::Size => "llvm.coro.size",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            CoroIntrinsic::Alloc | CoroIntrinsic::Frame | CoroIntrinsic::Size => 0,
            CoroIntrinsic::Free
            | CoroIntrinsic::End
            | CoroIntrinsic::Save
            | CoroIntrinsic::Suspend => 1,
            CoroIntrinsic::Begin => 5,
        }
    }

    pub fn result_type(self) -> IrType {
        match self {
            CoroIntrinsic::Alloc
            | CoroIntrinsic::Begin
            | CoroIntrinsic::Free
            | CoroIntrinsic::Frame => IrType::Ptr,
            CoroIntrinsic::End => IrType::Void,
            CoroIntrinsic::Save => IrType::Token,
            CoroIntrinsic::Suspend => IrType::I8,
            CoroIntrinsic::Size => IrType::I64,
        }
    }
}

/// `coro.suspend` result values dispatched by the suspend switch.
pub const SUSPEND_RESUMED: i64 = 0;
pub const SUSPEND_DESTROYED: i64 = 1;
/// Anything outside the switch cases takes the default edge.
pub const SUSPEND_SUSPENDED: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    Const {
        value: i64,
    },
    Null,
    Binary {
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cmp {
        op: CmpOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Alloca {
        name: String,
        slots: u32,
        storage: Storage,
    },
    FieldAddr {
        base: ValueId,
        index: u32,
    },
    Load {
        ptr: ValueId,
    },
    Store {
        ptr: ValueId,
        value: ValueId,
    },
    Call {
        callee: String,
        args: Vec<ValueId>,
    },
    Phi {
        incoming: Vec<(ValueId, BlockId)>,
    },
    Coro {
        intrinsic: CoroIntrinsic,
        args: Vec<ValueId>,
    },
    /// Placeholder for an instruction whose operands are not known yet.
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub result: Option<ValueId>,
    pub ty: IrType,
    pub kind: InstKind,
}

impl Instruction {
    pub fn operands(&self) -> Vec<ValueId> {
        match &self.kind {
            InstKind::Const { .. } | InstKind::Null | InstKind::Alloca { .. } | InstKind::Reserved => {
                Vec::new()
            }
            InstKind::Binary { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::FieldAddr { base, .. } => vec![*base],
            InstKind::Load { ptr } => vec![*ptr],
            InstKind::Store { ptr, value } => vec![*ptr, *value],
            InstKind::Call { args, .. } | InstKind::Coro { args, .. } => args.clone(),
            InstKind::Phi { incoming } => incoming.iter().map(|(value, _)| *value).collect(),
        }
    }

    pub fn intrinsic(&self) -> Option<CoroIntrinsic> {
        match &self.kind {
            InstKind::Coro { intrinsic, .. } => Some(*intrinsic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Switch {
        value: ValueId,
        default: BlockId,
        cases: Vec<(i64, BlockId)>,
    },
    /// Call that may throw; the exception enters `unwind`.
    Invoke {
        result: Option<ValueId>,
        ty: IrType,
        callee: String,
        args: Vec<ValueId>,
        normal: BlockId,
        unwind: BlockId,
    },
    Ret(Option<ValueId>),
    /// Continue propagating the exception being unwound.
    Resume,
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Switch { default, cases, .. } => {
                let mut targets = vec![*default];
                targets.extend(cases.iter().map(|(_, block)| *block));
                targets
            }
            Terminator::Invoke { normal, unwind, .. } => vec![*normal, *unwind],
            Terminator::Ret(_) | Terminator::Resume | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Terminator::CondBr { cond, .. } => vec![*cond],
            Terminator::Switch { value, .. } => vec![*value],
            Terminator::Invoke { args, .. } => args.clone(),
            Terminator::Ret(Some(value)) => vec![*value],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub insts: Vec<Instruction>,
    pub term: Option<Terminator>,
    /// Entered only while an exception propagates.
    pub landing_pad: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: ValueId,
    pub ty: IrType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionAttrs {
    /// Contains coroutine primitives and must be split before codegen.
    pub coroutine: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: IrType,
    pub blocks: Vec<Block>,
    pub attrs: FunctionAttrs,
}

impl Function {
    pub fn entry(&self) -> BlockId {
        self.blocks[0].id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        self.blocks
            .iter()
            .find(|block| block.id == id)
            .unwrap_or_else(|| panic!("invalid block id {:?} in {}", id, self.name))
    }

    pub fn block_by_name(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.name == name)
    }

    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|block| {
                block
                    .term
                    .as_ref()
                    .is_some_and(|term| term.successors().contains(&id))
            })
            .map(|block| block.id)
            .collect()
    }

    /// Instruction defining `value`, if it is not a parameter or invoke result.
    pub fn definition(&self, value: ValueId) -> Option<&Instruction> {
        self.blocks
            .iter()
            .flat_map(|block| block.insts.iter())
            .find(|inst| inst.result == Some(value))
    }

    pub fn instructions(&self) -> impl Iterator<Item = (&Block, &Instruction)> {
        self.blocks
            .iter()
            .flat_map(|block| block.insts.iter().map(move |inst| (block, inst)))
    }

    pub fn intrinsic_calls(
        &self,
        intrinsic: CoroIntrinsic,
    ) -> impl Iterator<Item = (&Block, &Instruction)> {
        self.instructions()
            .filter(move |(_, inst)| inst.intrinsic() == Some(intrinsic))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }
}

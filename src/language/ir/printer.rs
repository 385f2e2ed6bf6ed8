//! Textual form of the IR, close to LLVM assembly.

use super::model::*;
use std::collections::HashMap;
use std::fmt::{self, Write};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, function) in self.functions.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = value_types(self);
        let names: HashMap<BlockId, &str> = self
            .blocks
            .iter()
            .map(|block| (block.id, block.name.as_str()))
            .collect();
        let printer = Printer {
            types: &types,
            names: &names,
        };

        let params = self
            .params
            .iter()
            .map(|param| format!("{} %{}", param.ty, param.value.0))
            .collect::<Vec<_>>()
            .join(", ");
        let attrs = if self.attrs.coroutine { " coroutine" } else { "" };
        writeln!(f, "define {} @{}({}){} {{", self.ret, self.name, params, attrs)?;
        for (index, block) in self.blocks.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            if block.landing_pad {
                writeln!(f, "{}:  ; landing pad", block.name)?;
            } else {
                writeln!(f, "{}:", block.name)?;
            }
            for inst in &block.insts {
                writeln!(f, "  {}", printer.instruction(inst))?;
            }
            match &block.term {
                Some(term) => writeln!(f, "  {}", printer.terminator(term))?,
                None => writeln!(f, "  <unterminated>")?,
            }
        }
        writeln!(f, "}}")
    }
}

fn value_types(function: &Function) -> HashMap<ValueId, IrType> {
    let mut types = HashMap::new();
    for param in &function.params {
        types.insert(param.value, param.ty);
    }
    for block in &function.blocks {
        for inst in &block.insts {
            if let Some(result) = inst.result {
                types.insert(result, inst.ty);
            }
        }
        if let Some(Terminator::Invoke {
            result: Some(result),
            ty,
            ..
        }) = &block.term
        {
            types.insert(*result, *ty);
        }
    }
    types
}

struct Printer<'a> {
    types: &'a HashMap<ValueId, IrType>,
    names: &'a HashMap<BlockId, &'a str>,
}

impl Printer<'_> {
    fn value(&self, value: ValueId) -> String {
        format!("%{}", value.0)
    }

    fn typed(&self, value: ValueId) -> String {
        match self.types.get(&value) {
            Some(ty) => format!("{ty} %{}", value.0),
            None => format!("? %{}", value.0),
        }
    }

    fn label(&self, block: BlockId) -> String {
        match self.names.get(&block) {
            Some(name) => format!("label %{name}"),
            None => format!("label %<bb{}>", block.0),
        }
    }

    fn block_name(&self, block: BlockId) -> String {
        match self.names.get(&block) {
            Some(name) => format!("%{name}"),
            None => format!("%<bb{}>", block.0),
        }
    }

    fn args(&self, args: &[ValueId]) -> String {
        args.iter()
            .map(|arg| self.typed(*arg))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn instruction(&self, inst: &Instruction) -> String {
        let mut out = String::new();
        if let Some(result) = inst.result {
            let _ = write!(out, "{} = ", self.value(result));
        }
        let body = match &inst.kind {
            InstKind::Const { value } => format!("const {} {}", inst.ty, value),
            InstKind::Null => "null ptr".to_string(),
            InstKind::Binary { op, lhs, rhs } => format!(
                "{} {}, {}",
                binary_name(*op),
                self.typed(*lhs),
                self.value(*rhs)
            ),
            InstKind::Cmp { op, lhs, rhs } => format!(
                "icmp {} {}, {}",
                cmp_name(*op),
                self.typed(*lhs),
                self.value(*rhs)
            ),
            InstKind::Alloca {
                name,
                slots,
                storage,
            } => {
                let storage = match storage {
                    Storage::Frame => "frame",
                    Storage::Stack => "stack",
                };
                format!("alloca [{slots} x i64] {storage} ; {name}")
            }
            InstKind::FieldAddr { base, index } => {
                format!("fieldaddr {}, {}", self.typed(*base), index)
            }
            InstKind::Load { ptr } => format!("load {}, {}", inst.ty, self.typed(*ptr)),
            InstKind::Store { ptr, value } => {
                format!("store {}, {}", self.typed(*value), self.typed(*ptr))
            }
            InstKind::Call { callee, args } => {
                format!("call {} @{}({})", inst.ty, callee, self.args(args))
            }
            InstKind::Phi { incoming } => {
                let edges = incoming
                    .iter()
                    .map(|(value, block)| {
                        format!("[ {}, {} ]", self.value(*value), self.block_name(*block))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("phi {} {}", inst.ty, edges)
            }
            InstKind::Coro { intrinsic, args } => format!(
                "call {} @{}({})",
                inst.ty,
                intrinsic.name(),
                self.args(args)
            ),
            InstKind::Reserved => "<reserved>".to_string(),
        };
        out.push_str(&body);
        out
    }

    fn terminator(&self, term: &Terminator) -> String {
        match term {
            Terminator::Br(target) => format!("br {}", self.label(*target)),
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => format!(
                "br {}, {}, {}",
                self.typed(*cond),
                self.label(*then_block),
                self.label(*else_block)
            ),
            Terminator::Switch {
                value,
                default,
                cases,
            } => {
                let ty = self.types.get(value).copied().unwrap_or(IrType::I8);
                let cases = cases
                    .iter()
                    .map(|(case, block)| format!("{ty} {case}, {}", self.label(*block)))
                    .collect::<Vec<_>>()
                    .join("  ");
                format!(
                    "switch {}, {} [ {} ]",
                    self.typed(*value),
                    self.label(*default),
                    cases
                )
            }
            Terminator::Invoke {
                result,
                ty,
                callee,
                args,
                normal,
                unwind,
            } => {
                let prefix = result
                    .map(|value| format!("{} = ", self.value(value)))
                    .unwrap_or_default();
                format!(
                    "{prefix}invoke {ty} @{callee}({}) to {} unwind {}",
                    self.args(args),
                    self.label(*normal),
                    self.label(*unwind)
                )
            }
            Terminator::Ret(Some(value)) => format!("ret {}", self.typed(*value)),
            Terminator::Ret(None) => "ret void".to_string(),
            Terminator::Resume => "resume".to_string(),
            Terminator::Unreachable => "unreachable".to_string(),
        }
    }
}

fn binary_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "sdiv",
        BinaryOp::Rem => "srem",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
    }
}

fn cmp_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "eq",
        CmpOp::Ne => "ne",
        CmpOp::Lt => "slt",
        CmpOp::Le => "sle",
        CmpOp::Gt => "sgt",
        CmpOp::Ge => "sge",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::ir::builder::Builder;
    use indoc::indoc;

    #[test]
    fn prints_blocks_and_instructions() {
        let mut builder = Builder::new("add1", &[("x".to_string(), IrType::I64)], IrType::I64);
        let x = builder.params()[0].value;
        let exit = builder.create_block("exit");
        let one = builder.build_const(1, IrType::I64);
        let sum = builder.build_binary(BinaryOp::Add, x, one);
        builder.build_br(exit);
        builder.emit_block(exit);
        builder.build_ret(Some(sum));
        let function = builder.finish().expect("finish");

        assert_eq!(
            function.to_string(),
            indoc! {"
                define i64 @add1(i64 %0) {
                entry:
                  %1 = const i64 1
                  %2 = add i64 %0, %1
                  br label %exit

                exit:
                  ret i64 %2
                }
            "}
        );
    }

    #[test]
    fn prints_coroutine_intrinsics_by_llvm_name() {
        let mut builder = Builder::new("c", &[], IrType::Ptr);
        builder.set_coroutine();
        let frame = builder
            .build_coro(CoroIntrinsic::Frame, Vec::new())
            .expect("frame value");
        builder.build_coro(CoroIntrinsic::End, vec![frame]);
        builder.build_ret(Some(frame));
        let text = builder.finish().expect("finish").to_string();
        assert!(text.starts_with("define ptr @c() coroutine {"));
        assert!(text.contains("%0 = call ptr @llvm.coro.frame()"));
        assert!(text.contains("call void @llvm.coro.end(ptr %0)"));
    }
}

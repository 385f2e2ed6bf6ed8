//! Structural checks run after lowering.

use super::model::*;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid IR in `{function}`{}: {message}", location(.block))]
pub struct VerifyError {
    pub function: String,
    pub block: Option<String>,
    pub message: String,
}

fn location(block: &Option<String>) -> String {
    block
        .as_ref()
        .map(|name| format!(" at `{name}`"))
        .unwrap_or_default()
}

pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for function in &module.functions {
        verify_function(function)?;
    }
    Ok(())
}

pub fn verify_function(function: &Function) -> Result<(), VerifyError> {
    let err = |block: Option<&Block>, message: String| VerifyError {
        function: function.name.clone(),
        block: block.map(|block| block.name.clone()),
        message,
    };

    if function.blocks.is_empty() {
        return Err(err(None, "function has no blocks".to_string()));
    }

    let mut block_ids = HashSet::new();
    for block in &function.blocks {
        if !block_ids.insert(block.id) {
            return Err(err(Some(block), format!("duplicate block {:?}", block.id)));
        }
    }

    let mut defined: HashSet<ValueId> = function.params.iter().map(|param| param.value).collect();
    for block in &function.blocks {
        for inst in &block.insts {
            if let Some(result) = inst.result {
                if !defined.insert(result) {
                    return Err(err(Some(block), format!("%{} defined twice", result.0)));
                }
            }
        }
        if let Some(Terminator::Invoke {
            result: Some(result),
            ..
        }) = &block.term
        {
            if !defined.insert(*result) {
                return Err(err(Some(block), format!("%{} defined twice", result.0)));
            }
        }
    }

    let mut predecessors: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for block in &function.blocks {
        let Some(term) = &block.term else {
            return Err(err(Some(block), "block has no terminator".to_string()));
        };
        for target in term.successors() {
            if !block_ids.contains(&target) {
                return Err(err(
                    Some(block),
                    format!("branch to block {:?} outside the function", target),
                ));
            }
            let preds = predecessors.entry(target).or_default();
            if !preds.contains(&block.id) {
                preds.push(block.id);
            }
        }
        for value in term.operands() {
            if !defined.contains(&value) {
                return Err(err(Some(block), format!("use of undefined %{}", value.0)));
            }
        }
    }

    for block in &function.blocks {
        for (index, inst) in block.insts.iter().enumerate() {
            for value in inst.operands() {
                if !defined.contains(&value) {
                    return Err(err(Some(block), format!("use of undefined %{}", value.0)));
                }
            }
            match &inst.kind {
                InstKind::Reserved => {
                    return Err(err(Some(block), "unfilled reserved slot".to_string()));
                }
                InstKind::Phi { incoming } => {
                    if inst_is_after_non_phi(block, index) {
                        return Err(err(Some(block), "phi after non-phi instruction".to_string()));
                    }
                    let preds = predecessors.get(&block.id).map(Vec::as_slice).unwrap_or(&[]);
                    if incoming.len() != preds.len()
                        || incoming.iter().any(|(_, pred)| !preds.contains(pred))
                    {
                        return Err(err(
                            Some(block),
                            format!(
                                "phi has {} incoming edges but block has {} predecessors",
                                incoming.len(),
                                preds.len()
                            ),
                        ));
                    }
                }
                InstKind::Coro { intrinsic, args } => {
                    if args.len() != intrinsic.arity() {
                        return Err(err(
                            Some(block),
                            format!(
                                "{} expects {} operands, found {}",
                                intrinsic.name(),
                                intrinsic.arity(),
                                args.len()
                            ),
                        ));
                    }
                    if *intrinsic != CoroIntrinsic::Frame
                        && *intrinsic != CoroIntrinsic::Size
                        && !function.attrs.coroutine
                    {
                        return Err(err(
                            Some(block),
                            format!("{} outside a coroutine", intrinsic.name()),
                        ));
                    }
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn inst_is_after_non_phi(block: &Block, index: usize) -> bool {
    block.insts[..index]
        .iter()
        .any(|inst| !matches!(inst.kind, InstKind::Phi { .. }))
}

use crate::language::ir::IrType;

/// Function provided by the runtime rather than defined in source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostFunction {
    pub name: &'static str,
    pub params: usize,
    pub ret: IrType,
}

pub const HOST_FUNCTIONS: &[HostFunction] = &[
    HostFunction {
        name: "malloc",
        params: 1,
        ret: IrType::Ptr,
    },
    HostFunction {
        name: "free",
        params: 1,
        ret: IrType::Void,
    },
    // Records its argument and returns it.
    HostFunction {
        name: "trace",
        params: 1,
        ret: IrType::I64,
    },
    HostFunction {
        name: "throw",
        params: 1,
        ret: IrType::Void,
    },
    // Non-zero while the coroutine has not reached its final suspend.
    HostFunction {
        name: "resume",
        params: 1,
        ret: IrType::I64,
    },
    HostFunction {
        name: "destroy",
        params: 1,
        ret: IrType::Void,
    },
    HostFunction {
        name: "done",
        params: 1,
        ret: IrType::I64,
    },
    HostFunction {
        name: "promise",
        params: 1,
        ret: IrType::I64,
    },
    HostFunction {
        name: "result",
        params: 1,
        ret: IrType::I64,
    },
];

pub fn host_function(name: &str) -> Option<&'static HostFunction> {
    HOST_FUNCTIONS.iter().find(|host| host.name == name)
}

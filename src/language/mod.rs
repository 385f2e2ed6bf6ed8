pub mod ast;
pub mod compiler;
pub mod desugar;
pub mod errors;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;

pub mod fs_atomic;
pub mod paths;
pub mod shell;
pub mod suggest;
pub mod text;

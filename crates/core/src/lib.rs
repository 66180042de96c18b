//! Class-file codec: decoding into a symbolic model, frame recomputation and re-encoding.

/// The class, field and method model.
pub mod class_ir;
pub mod constant_pool;
/// Class file to [`ClassUnit`].
pub mod decoder;
/// Descriptor and signature parsing and remapping.
pub mod descriptor;
/// [`ClassUnit`] back to a class file.
pub mod encoder;
/// Stack simulation and stack-map frame computation.
pub mod frames;
/// Symbolic instructions and method bodies.
pub mod insn;
pub mod mutf8;
pub mod opcode;
mod reader;

pub use class_ir::ClassUnit;
pub use decoder::decode_class;
pub use encoder::encode_class;

use thiserror::Error;

/// Error type for descriptor and generic-signature parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// The descriptor does not follow the field/method descriptor grammar.
    #[error("malformed descriptor `{descriptor}` at position {position}")]
    Malformed { descriptor: String, position: usize },
    /// The generic signature does not follow the signature grammar.
    #[error("malformed signature `{signature}` at position {position}")]
    MalformedSignature { signature: String, position: usize },
}

/// Custom error type for class-file decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of class data at offset {0}")]
    UnexpectedEof(usize),

    #[error("bad magic 0x{}, not a class file", hex::encode(.0))]
    BadMagic([u8; 4]),

    #[error("unknown constant pool tag {tag} at index {index}")]
    BadConstantTag { index: u16, tag: u8 },

    #[error("constant pool index {index} is not a {expected}")]
    BadConstantIndex { index: u16, expected: &'static str },

    #[error("invalid modified UTF-8 in constant {0}")]
    InvalidUtf8(u16),

    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("branch target {target} outside code of length {code_len}")]
    BadBranchTarget { target: i64, code_len: usize },

    #[error("malformed {name} attribute: {reason}")]
    BadAttribute { name: String, reason: String },

    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("could not read file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while inferring stack-map frames and max-stack.
#[derive(Debug, Error)]
pub enum FrameError {
    /// An instruction pops more values than the operand stack holds.
    #[error("operand stack underflow at instruction {0}")]
    StackUnderflow(usize),
    /// Two control-flow paths reach an instruction with different stack depths.
    #[error("stack height mismatch at instruction {index}: {expected} vs {found}")]
    StackHeightMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    /// Two control-flow paths push incompatible values at the same stack slot.
    #[error("incompatible stack values at instruction {0}")]
    IncompatibleStack(usize),
    /// A jump or table refers to a label that is not placed in the method.
    #[error("label L{0} is not placed in the instruction list")]
    UnknownLabel(u32),
    /// A local slot was read that lies outside max-locals.
    #[error("local slot {slot} out of range at instruction {index}")]
    LocalOutOfRange { index: usize, slot: usize },
    /// Execution can run past the last instruction.
    #[error("control falls off the end of the code")]
    FallsOffEnd,
    /// The body uses a construct frames cannot describe.
    #[error("unsupported instruction: {0}")]
    Unsupported(&'static str),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
}

/// Errors that can occur during the encoding process.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The method body does not fit the 65535-byte code limit.
    #[error("code of method {method} is too large ({size} bytes)")]
    CodeTooLarge { method: String, size: usize },
    /// More than 65535 constant-pool slots are needed.
    #[error("constant pool overflow")]
    ConstantPoolOverflow,
    /// A string does not fit a CONSTANT_Utf8 entry.
    #[error("string constant of {0} bytes exceeds the utf8 limit")]
    StringTooLong(usize),
    /// A value does not fit the width of its encoded field.
    #[error("{what} value {value} out of range")]
    OutOfRange { what: &'static str, value: i64 },
    /// A referenced label was never placed.
    #[error("label L{0} is not placed in the instruction list")]
    UnknownLabel(u32),
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    /// Frame computation failed for a modified method.
    #[error("frame computation failed in {method}: {source}")]
    Frames {
        method: String,
        #[source]
        source: FrameError,
    },
}

/// Error type for transform operations.
#[derive(Debug, Error)]
pub enum TransformError {
    /// A descriptor or signature could not be rewritten.
    #[error("descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),
    /// Declared max-locals stayed outside the valid range after repair.
    #[error("invalid max-locals {value} for {method}")]
    InvalidMaxLocals { method: String, value: usize },
    /// Control-flow obfuscation had to be abandoned for this class.
    #[error("flow obfuscation skipped for {class}: {reason}")]
    FlowSkipped { class: String, reason: String },
    #[error("generic error")]
    Generic(String),
}

impl TransformError {
    /// Returns true for the condition that asks the caller to retry without flow obfuscation.
    pub const fn is_flow_skipped(&self) -> bool {
        matches!(self, Self::FlowSkipped { .. })
    }
}

/// Errors produced while obfuscating a single class entry.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
    /// Flow obfuscation made the class unencodable; retry with flow disabled.
    #[error("flow obfuscation skipped for {class}: {reason}")]
    FlowSkipped { class: String, reason: String },
}

impl EngineError {
    /// Returns true if the failure is the retryable flow condition.
    pub const fn is_flow_skipped(&self) -> bool {
        matches!(
            self,
            Self::FlowSkipped { .. } | Self::Transform(TransformError::FlowSkipped { .. })
        )
    }
}

/// Errors that abort a whole archive run.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// File read/write error.
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    /// The container could not be read or written.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The crash artifact could not be produced.
    #[error("crash class generation failed: {0}")]
    Trap(#[from] EncodeError),
}

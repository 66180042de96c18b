//! JVM opcode constants and classification helpers.
//!
//! Opcodes are kept as plain `u8` values, the way they appear in a `Code` attribute. The
//! short forms (`iload_0`, `astore_3`, ...) and `wide` never appear in the instruction list:
//! the decoder folds them into `Insn::Var`/`Insn::Iinc` and the encoder picks the shortest
//! form again on the way out.
#![allow(missing_docs)]

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_M1: u8 = 0x02;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_1: u8 = 0x04;
pub const ICONST_2: u8 = 0x05;
pub const ICONST_3: u8 = 0x06;
pub const ICONST_4: u8 = 0x07;
pub const ICONST_5: u8 = 0x08;
pub const LCONST_0: u8 = 0x09;
pub const LCONST_1: u8 = 0x0a;
pub const FCONST_0: u8 = 0x0b;
pub const FCONST_1: u8 = 0x0c;
pub const FCONST_2: u8 = 0x0d;
pub const DCONST_0: u8 = 0x0e;
pub const DCONST_1: u8 = 0x0f;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;
pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
pub const ILOAD_0: u8 = 0x1a;
pub const ALOAD_3: u8 = 0x2d;
pub const IALOAD: u8 = 0x2e;
pub const LALOAD: u8 = 0x2f;
pub const FALOAD: u8 = 0x30;
pub const DALOAD: u8 = 0x31;
pub const AALOAD: u8 = 0x32;
pub const BALOAD: u8 = 0x33;
pub const CALOAD: u8 = 0x34;
pub const SALOAD: u8 = 0x35;
pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ASTORE: u8 = 0x3a;
pub const ISTORE_0: u8 = 0x3b;
pub const ASTORE_3: u8 = 0x4e;
pub const IASTORE: u8 = 0x4f;
pub const LASTORE: u8 = 0x50;
pub const FASTORE: u8 = 0x51;
pub const DASTORE: u8 = 0x52;
pub const AASTORE: u8 = 0x53;
pub const BASTORE: u8 = 0x54;
pub const CASTORE: u8 = 0x55;
pub const SASTORE: u8 = 0x56;
pub const POP: u8 = 0x57;
pub const POP2: u8 = 0x58;
pub const DUP: u8 = 0x59;
pub const DUP_X1: u8 = 0x5a;
pub const DUP_X2: u8 = 0x5b;
pub const DUP2: u8 = 0x5c;
pub const DUP2_X1: u8 = 0x5d;
pub const DUP2_X2: u8 = 0x5e;
pub const SWAP: u8 = 0x5f;
pub const IADD: u8 = 0x60;
pub const LADD: u8 = 0x61;
pub const FADD: u8 = 0x62;
pub const DADD: u8 = 0x63;
pub const ISUB: u8 = 0x64;
pub const LSUB: u8 = 0x65;
pub const FSUB: u8 = 0x66;
pub const DSUB: u8 = 0x67;
pub const IMUL: u8 = 0x68;
pub const LMUL: u8 = 0x69;
pub const FMUL: u8 = 0x6a;
pub const DMUL: u8 = 0x6b;
pub const IDIV: u8 = 0x6c;
pub const LDIV: u8 = 0x6d;
pub const FDIV: u8 = 0x6e;
pub const DDIV: u8 = 0x6f;
pub const IREM: u8 = 0x70;
pub const LREM: u8 = 0x71;
pub const FREM: u8 = 0x72;
pub const DREM: u8 = 0x73;
pub const INEG: u8 = 0x74;
pub const LNEG: u8 = 0x75;
pub const FNEG: u8 = 0x76;
pub const DNEG: u8 = 0x77;
pub const ISHL: u8 = 0x78;
pub const LSHL: u8 = 0x79;
pub const ISHR: u8 = 0x7a;
pub const LSHR: u8 = 0x7b;
pub const IUSHR: u8 = 0x7c;
pub const LUSHR: u8 = 0x7d;
pub const IAND: u8 = 0x7e;
pub const LAND: u8 = 0x7f;
pub const IOR: u8 = 0x80;
pub const LOR: u8 = 0x81;
pub const IXOR: u8 = 0x82;
pub const LXOR: u8 = 0x83;
pub const IINC: u8 = 0x84;
pub const I2L: u8 = 0x85;
pub const I2F: u8 = 0x86;
pub const I2D: u8 = 0x87;
pub const L2I: u8 = 0x88;
pub const L2F: u8 = 0x89;
pub const L2D: u8 = 0x8a;
pub const F2I: u8 = 0x8b;
pub const F2L: u8 = 0x8c;
pub const F2D: u8 = 0x8d;
pub const D2I: u8 = 0x8e;
pub const D2L: u8 = 0x8f;
pub const D2F: u8 = 0x90;
pub const I2B: u8 = 0x91;
pub const I2C: u8 = 0x92;
pub const I2S: u8 = 0x93;
pub const LCMP: u8 = 0x94;
pub const FCMPL: u8 = 0x95;
pub const FCMPG: u8 = 0x96;
pub const DCMPL: u8 = 0x97;
pub const DCMPG: u8 = 0x98;
pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IFLT: u8 = 0x9b;
pub const IFGE: u8 = 0x9c;
pub const IFGT: u8 = 0x9d;
pub const IFLE: u8 = 0x9e;
pub const IF_ICMPEQ: u8 = 0x9f;
pub const IF_ICMPNE: u8 = 0xa0;
pub const IF_ICMPLT: u8 = 0xa1;
pub const IF_ICMPGE: u8 = 0xa2;
pub const IF_ICMPGT: u8 = 0xa3;
pub const IF_ICMPLE: u8 = 0xa4;
pub const IF_ACMPEQ: u8 = 0xa5;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ARRAYLENGTH: u8 = 0xbe;
pub const ATHROW: u8 = 0xbf;
pub const CHECKCAST: u8 = 0xc0;
pub const INSTANCEOF: u8 = 0xc1;
pub const MONITORENTER: u8 = 0xc2;
pub const MONITOREXIT: u8 = 0xc3;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// `newarray` element type code for `byte[]`.
pub const T_BYTE: u8 = 8;

/// Operand layout of an opcode as it appears in the raw code array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operands.
    None,
    /// `bipush`, `newarray`: one signed/unsigned byte.
    Byte,
    /// `sipush`: one signed short.
    Short,
    /// `ldc` (u1 index), `ldc_w`/`ldc2_w` (u2 index).
    Ldc,
    /// Local-variable loads/stores and `ret` with a u1 slot.
    Var,
    /// Short forms with the slot folded into the opcode.
    ImplicitVar,
    /// `iinc`.
    Iinc,
    /// Two-byte signed branch offset.
    Jump,
    /// Four-byte signed branch offset.
    JumpWide,
    /// `tableswitch`.
    TableSwitch,
    /// `lookupswitch`.
    LookupSwitch,
    /// `getfield`, `putfield`, `getstatic`, `putstatic`.
    Field,
    /// `invokevirtual`, `invokespecial`, `invokestatic`, `invokeinterface`.
    Method,
    /// `invokedynamic`.
    InvokeDynamic,
    /// `new`, `anewarray`, `checkcast`, `instanceof`.
    Type,
    /// `multianewarray`.
    MultiANewArray,
    /// `wide` prefix.
    Wide,
}

/// Returns the operand layout for `op`, or `None` for undefined opcodes.
pub const fn operand_kind(op: u8) -> Option<OperandKind> {
    use OperandKind::*;
    Some(match op {
        0x00..=0x0f => None,
        BIPUSH | NEWARRAY => Byte,
        SIPUSH => Short,
        LDC | LDC_W | LDC2_W => Ldc,
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Var,
        ILOAD_0..=ALOAD_3 | ISTORE_0..=ASTORE_3 => ImplicitVar,
        IALOAD..=SALOAD | IASTORE..=LXOR => None,
        IINC => Iinc,
        I2L..=DCMPG => None,
        IFEQ..=JSR | IFNULL | IFNONNULL => Jump,
        GOTO_W | JSR_W => JumpWide,
        TABLESWITCH => TableSwitch,
        LOOKUPSWITCH => LookupSwitch,
        IRETURN..=RETURN => None,
        GETSTATIC..=PUTFIELD => Field,
        INVOKEVIRTUAL..=INVOKEINTERFACE => Method,
        INVOKEDYNAMIC => InvokeDynamic,
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Type,
        ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => None,
        WIDE => Wide,
        MULTIANEWARRAY => MultiANewArray,
        _ => return Option::None,
    })
}

/// Expands a short form (`iload_2`, `astore_0`) into its explicit opcode and slot.
pub const fn expand_implicit_var(op: u8) -> (u8, u16) {
    if op >= ISTORE_0 {
        let rel = op - ISTORE_0;
        (ISTORE + rel / 4, (rel % 4) as u16)
    } else {
        let rel = op - ILOAD_0;
        (ILOAD + rel / 4, (rel % 4) as u16)
    }
}

/// Short form for an explicit load/store with a slot in `0..=3`.
pub const fn implicit_var(op: u8, slot: u16) -> Option<u8> {
    if slot > 3 {
        return None;
    }
    match op {
        ILOAD..=ALOAD => Some(ILOAD_0 + (op - ILOAD) * 4 + slot as u8),
        ISTORE..=ASTORE => Some(ISTORE_0 + (op - ISTORE) * 4 + slot as u8),
        _ => None,
    }
}

/// True for every local-variable store (`istore` .. `astore`).
pub const fn is_store(op: u8) -> bool {
    matches!(op, ISTORE..=ASTORE)
}

/// True for the value returns and `return`.
pub const fn is_return(op: u8) -> bool {
    matches!(op, IRETURN..=RETURN)
}

/// True for conditional branches (everything that jumps or falls through).
pub const fn is_conditional_jump(op: u8) -> bool {
    matches!(op, IFEQ..=IF_ACMPNE | IFNULL | IFNONNULL)
}

/// True for instructions after which control never falls through.
pub const fn ends_flow(op: u8) -> bool {
    matches!(
        op,
        GOTO | GOTO_W | TABLESWITCH | LOOKUPSWITCH | ATHROW | RET | IRETURN..=RETURN
    )
}

/// Slot width of the value a load/store moves.
pub const fn var_width(op: u8) -> usize {
    match op {
        LLOAD | DLOAD | LSTORE | DSTORE => 2,
        _ => 1,
    }
}

/// Inverse condition of a conditional branch, used when widening to `goto_w`.
pub const fn invert_condition(op: u8) -> u8 {
    match op {
        IFNULL => IFNONNULL,
        IFNONNULL => IFNULL,
        // Conditions come in adjacent pairs starting at IFEQ.
        _ => {
            if (op - IFEQ) % 2 == 0 {
                op + 1
            } else {
                op - 1
            }
        }
    }
}

/// Lower-case mnemonic for display purposes.
pub fn mnemonic(op: u8) -> &'static str {
    const NAMES: [&str; 202] = [
        "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3",
        "iconst_4", "iconst_5", "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2",
        "dconst_0", "dconst_1", "bipush", "sipush", "ldc", "ldc_w", "ldc2_w", "iload", "lload",
        "fload", "dload", "aload", "iload_0", "iload_1", "iload_2", "iload_3", "lload_0",
        "lload_1", "lload_2", "lload_3", "fload_0", "fload_1", "fload_2", "fload_3", "dload_0",
        "dload_1", "dload_2", "dload_3", "aload_0", "aload_1", "aload_2", "aload_3", "iaload",
        "laload", "faload", "daload", "aaload", "baload", "caload", "saload", "istore", "lstore",
        "fstore", "dstore", "astore", "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0",
        "lstore_1", "lstore_2", "lstore_3", "fstore_0", "fstore_1", "fstore_2", "fstore_3",
        "dstore_0", "dstore_1", "dstore_2", "dstore_3", "astore_0", "astore_1", "astore_2",
        "astore_3", "iastore", "lastore", "fastore", "dastore", "aastore", "bastore", "castore",
        "sastore", "pop", "pop2", "dup", "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2",
        "swap", "iadd", "ladd", "fadd", "dadd", "isub", "lsub", "fsub", "dsub", "imul", "lmul",
        "fmul", "dmul", "idiv", "ldiv", "fdiv", "ddiv", "irem", "lrem", "frem", "drem", "ineg",
        "lneg", "fneg", "dneg", "ishl", "lshl", "ishr", "lshr", "iushr", "lushr", "iand",
        "land", "ior", "lor", "ixor", "lxor", "iinc", "i2l", "i2f", "i2d", "l2i", "l2f", "l2d",
        "f2i", "f2l", "f2d", "d2i", "d2l", "d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl", "fcmpg",
        "dcmpl", "dcmpg", "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq",
        "if_icmpne", "if_icmplt", "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq",
        "if_acmpne", "goto", "jsr", "ret", "tableswitch", "lookupswitch", "ireturn", "lreturn",
        "freturn", "dreturn", "areturn", "return", "getstatic", "putstatic", "getfield",
        "putfield", "invokevirtual", "invokespecial", "invokestatic", "invokeinterface",
        "invokedynamic", "new", "newarray", "anewarray", "arraylength", "athrow", "checkcast",
        "instanceof", "monitorenter", "monitorexit", "wide", "multianewarray", "ifnull",
        "ifnonnull", "goto_w", "jsr_w",
    ];
    NAMES.get(op as usize).copied().unwrap_or("<invalid>")
}

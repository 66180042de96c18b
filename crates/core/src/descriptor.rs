//! Field/method descriptors and generic signatures.
//!
//! Besides parsing descriptors into [`JavaType`]s for frame computation, this module rewrites
//! the class identities embedded in descriptors and signatures. Signatures are rewritten by
//! walking their grammar rather than by pattern matching on `L...;`, so type variables such as
//! `TLIST;` are never mistaken for class names.

use jarcloak_utils::errors::DescriptorError;

/// A parsed field type or method return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JavaType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Float,
    Long,
    Double,
    Void,
    /// A class or interface, by internal name.
    Object(String),
    /// An array, by its full descriptor (e.g. `[[I`).
    Array(String),
}

impl JavaType {
    /// Number of local/stack slots a value of this type occupies.
    pub const fn size(&self) -> usize {
        match self {
            Self::Void => 0,
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<JavaType>,
    /// `Void` for `V`.
    pub ret: JavaType,
}

impl MethodDescriptor {
    /// Total slot width of the parameters (without the receiver).
    pub fn param_slots(&self) -> usize {
        self.params.iter().map(JavaType::size).sum()
    }
}

fn malformed(descriptor: &str, position: usize) -> DescriptorError {
    DescriptorError::Malformed {
        descriptor: descriptor.to_string(),
        position,
    }
}

/// Parses one field type starting at byte `pos`, returning it and the position after it.
fn parse_type_at(desc: &str, pos: usize, allow_void: bool) -> Result<(JavaType, usize), DescriptorError> {
    let bytes = desc.as_bytes();
    let Some(&c) = bytes.get(pos) else {
        return Err(malformed(desc, pos));
    };
    let ty = match c {
        b'Z' => JavaType::Boolean,
        b'B' => JavaType::Byte,
        b'C' => JavaType::Char,
        b'S' => JavaType::Short,
        b'I' => JavaType::Int,
        b'F' => JavaType::Float,
        b'J' => JavaType::Long,
        b'D' => JavaType::Double,
        b'V' if allow_void => JavaType::Void,
        b'L' => {
            let end = desc[pos..]
                .find(';')
                .map(|i| pos + i)
                .ok_or_else(|| malformed(desc, pos))?;
            if end == pos + 1 {
                return Err(malformed(desc, pos));
            }
            return Ok((JavaType::Object(desc[pos + 1..end].to_string()), end + 1));
        }
        b'[' => {
            let mut end = pos;
            while bytes.get(end) == Some(&b'[') {
                end += 1;
            }
            if end - pos > 255 {
                return Err(malformed(desc, pos));
            }
            let (_, after) = parse_type_at(desc, end, false)?;
            return Ok((JavaType::Array(desc[pos..after].to_string()), after));
        }
        _ => return Err(malformed(desc, pos)),
    };
    Ok((ty, pos + 1))
}

/// Parses a complete field descriptor.
pub fn parse_field_descriptor(desc: &str) -> Result<JavaType, DescriptorError> {
    let (ty, end) = parse_type_at(desc, 0, false)?;
    if end != desc.len() {
        return Err(malformed(desc, end));
    }
    Ok(ty)
}

/// Parses a complete method descriptor.
pub fn parse_method_descriptor(desc: &str) -> Result<MethodDescriptor, DescriptorError> {
    if !desc.starts_with('(') {
        return Err(malformed(desc, 0));
    }
    let mut pos = 1;
    let mut params = Vec::new();
    while desc.as_bytes().get(pos) != Some(&b')') {
        let (ty, next) = parse_type_at(desc, pos, false)?;
        params.push(ty);
        pos = next;
    }
    let (ret, end) = parse_type_at(desc, pos + 1, true)?;
    if end != desc.len() {
        return Err(malformed(desc, end));
    }
    Ok(MethodDescriptor { params, ret })
}

/// Rewrites every class name inside a field or method descriptor.
///
/// `map` returns the replacement for an internal name, or `None` to keep it.
pub fn remap_descriptor<F>(desc: &str, map: &F) -> Result<String, DescriptorError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(desc.len());
    let mut pos = 0;
    let is_method = desc.starts_with('(');
    if is_method {
        out.push('(');
        pos = 1;
    }
    loop {
        if is_method && desc.as_bytes().get(pos) == Some(&b')') {
            out.push(')');
            pos += 1;
            let (_, end) = parse_type_at(desc, pos, true)?;
            push_remapped(&mut out, &desc[pos..end], map);
            pos = end;
            break;
        }
        let (_, end) = parse_type_at(desc, pos, false)?;
        push_remapped(&mut out, &desc[pos..end], map);
        pos = end;
        if !is_method {
            break;
        }
    }
    if pos != desc.len() {
        return Err(malformed(desc, pos));
    }
    Ok(out)
}

/// Appends one already-validated field type with its class name mapped.
fn push_remapped<F>(out: &mut String, ty: &str, map: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let dims = ty.bytes().take_while(|&b| b == b'[').count();
    let elem = &ty[dims..];
    out.push_str(&ty[..dims]);
    if let Some(name) = elem.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        out.push('L');
        out.push_str(&map(name).unwrap_or_else(|| name.to_string()));
        out.push(';');
    } else {
        out.push_str(elem);
    }
}

/// Rewrites a `CONSTANT_Class` name, which is an internal name or an array descriptor.
pub fn remap_class_constant<F>(name: &str, map: &F) -> Result<String, DescriptorError>
where
    F: Fn(&str) -> Option<String>,
{
    if name.starts_with('[') {
        remap_descriptor(name, map)
    } else {
        Ok(map(name).unwrap_or_else(|| name.to_string()))
    }
}

/// Rewrites every class name inside a class, method or field generic signature.
pub fn remap_signature<F>(signature: &str, map: &F) -> Result<String, DescriptorError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut w = SignatureWriter {
        sig: signature,
        pos: 0,
        out: String::with_capacity(signature.len()),
        map,
    };
    w.signature()?;
    Ok(w.out)
}

struct SignatureWriter<'a, F> {
    sig: &'a str,
    pos: usize,
    out: String,
    map: &'a F,
}

impl<F> SignatureWriter<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn err(&self) -> DescriptorError {
        DescriptorError::MalformedSignature {
            signature: self.sig.to_string(),
            position: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.sig.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<(), DescriptorError> {
        if self.peek() != Some(c) {
            return Err(self.err());
        }
        self.out.push(c as char);
        self.pos += 1;
        Ok(())
    }

    /// Reads an identifier up to (not including) any of `stops`.
    fn ident(&mut self, stops: &[u8]) -> Result<&str, DescriptorError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start || self.peek().is_none() {
            return Err(self.err());
        }
        Ok(&self.sig[start..self.pos])
    }

    fn signature(&mut self) -> Result<(), DescriptorError> {
        if self.peek() == Some(b'<') {
            self.type_params()?;
        }
        if self.peek() == Some(b'(') {
            self.expect(b'(')?;
            while self.peek() != Some(b')') {
                self.java_type()?;
            }
            self.expect(b')')?;
            if self.peek() == Some(b'V') {
                self.expect(b'V')?;
            } else {
                self.java_type()?;
            }
            while self.peek() == Some(b'^') {
                self.expect(b'^')?;
                self.reference_type()?;
            }
        } else {
            if self.peek().is_none() {
                return Err(self.err());
            }
            while self.peek().is_some() {
                self.reference_type()?;
            }
        }
        if self.pos != self.sig.len() {
            return Err(self.err());
        }
        Ok(())
    }

    fn type_params(&mut self) -> Result<(), DescriptorError> {
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            let name = self.ident(b":")?.to_string();
            self.out.push_str(&name);
            self.expect(b':')?;
            if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                self.reference_type()?;
            }
            while self.peek() == Some(b':') {
                self.expect(b':')?;
                self.reference_type()?;
            }
        }
        self.expect(b'>')
    }

    fn java_type(&mut self) -> Result<(), DescriptorError> {
        match self.peek() {
            Some(c @ (b'Z' | b'B' | b'C' | b'S' | b'I' | b'F' | b'J' | b'D')) => self.expect(c),
            _ => self.reference_type(),
        }
    }

    fn reference_type(&mut self) -> Result<(), DescriptorError> {
        match self.peek() {
            Some(b'L') => self.class_type(),
            Some(b'T') => {
                self.expect(b'T')?;
                let name = self.ident(b";")?.to_string();
                self.out.push_str(&name);
                self.expect(b';')
            }
            Some(b'[') => {
                self.expect(b'[')?;
                self.java_type()
            }
            _ => Err(self.err()),
        }
    }

    /// Renders type arguments into a detached buffer so the caller can place them.
    fn type_args(&mut self) -> Result<String, DescriptorError> {
        let saved = std::mem::take(&mut self.out);
        self.expect(b'<')?;
        while self.peek() != Some(b'>') {
            match self.peek() {
                Some(b'*') => self.expect(b'*')?,
                Some(c @ (b'+' | b'-')) => {
                    self.expect(c)?;
                    self.reference_type()?;
                }
                _ => self.reference_type()?,
            }
        }
        self.expect(b'>')?;
        Ok(std::mem::replace(&mut self.out, saved))
    }

    fn class_type(&mut self) -> Result<(), DescriptorError> {
        self.pos += 1; // 'L'
        let stops = b"<.;";
        let mut segments: Vec<(String, String)> = Vec::new();
        loop {
            let name = self.ident(stops)?.to_string();
            let args = if self.peek() == Some(b'<') {
                self.type_args()?
            } else {
                String::new()
            };
            segments.push((name, args));
            match self.peek() {
                Some(b'.') => self.pos += 1,
                Some(b';') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.err()),
            }
        }

        let (outer, outer_args) = &segments[0];
        let mut full = outer.clone();
        let mut mapped = (self.map)(outer).unwrap_or_else(|| outer.clone());
        let mut rendered = format!("{mapped}{outer_args}");
        for (name, args) in &segments[1..] {
            full = format!("{full}${name}");
            match (self.map)(&full) {
                Some(inner) => {
                    let prefix = format!("{mapped}$");
                    rendered = match inner.strip_prefix(&prefix) {
                        Some(suffix) => format!("{rendered}.{suffix}{args}"),
                        // The renamed inner class no longer nests under its renamed outer
                        // name, so it is written as a top-level class type.
                        None => format!("{inner}{args}"),
                    };
                    mapped = inner;
                }
                None => {
                    rendered = format!("{rendered}.{name}{args}");
                    mapped = format!("{mapped}${name}");
                }
            }
        }
        self.out.push('L');
        self.out.push_str(&rendered);
        self.out.push(';');
        Ok(())
    }
}

/// Package part of an internal name (`com/example` for `com/example/Foo`).
pub fn package_of(internal: &str) -> Option<&str> {
    internal.rfind('/').map(|i| &internal[..i])
}

/// Simple-name part of an internal name (`Foo` for `com/example/Foo`).
pub fn simple_name(internal: &str) -> &str {
    internal.rfind('/').map_or(internal, |i| &internal[i + 1..])
}

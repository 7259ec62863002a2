//! Minimal JVM class file reader.
//!
//! Only what the aspect analysis needs is decoded: access flags, super types,
//! members with their descriptors, annotations (visible and invisible),
//! declared exceptions and parameter names (`MethodParameters`, or the
//! `LocalVariableTable` of the method body when compiled with `-g`).

use std::collections::HashMap;

use crate::descriptor::{internal_to_binary, parse_field_descriptor, parse_method_descriptor, slot_size};
use crate::types::{ACC_STATIC, AnnotationInfo, AnnotationValue, ClassInfo, FieldInfo, MethodInfo};

const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassFormatError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid classfile magic: 0x{0:08x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("constant pool entry {index} is not a {expected}")]
    ConstantPoolTypeMismatch { index: u16, expected: &'static str },
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("malformed {0} attribute")]
    MalformedAttribute(&'static str),
}

type Result<T> = std::result::Result<T, ClassFormatError>;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(ClassFormatError::UnexpectedEof)?;
        let slice = self.bytes.get(self.pos..end).ok_or(ClassFormatError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_u1(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u2(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u4(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    /// Entries the reader never dereferences (member refs, handles, ...).
    Opaque,
    /// Second slot of a long or double.
    Unusable,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);
        while entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let len = reader.read_u2()? as usize;
                    Constant::Utf8(decode_modified_utf8(reader.read_bytes(len)?))
                }
                3 => Constant::Integer(reader.read_u4()? as i32),
                4 => Constant::Float(f32::from_bits(reader.read_u4()?)),
                5 | 6 => {
                    let hi = reader.read_u4()? as u64;
                    let lo = reader.read_u4()? as u64;
                    let bits = (hi << 32) | lo;
                    let value = if tag == 5 {
                        Constant::Long(bits as i64)
                    } else {
                        Constant::Double(f64::from_bits(bits))
                    };
                    entries.push(value);
                    Constant::Unusable
                }
                7 => Constant::Class(reader.read_u2()?),
                8 => Constant::String(reader.read_u2()?),
                9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.read_u4()?;
                    Constant::Opaque
                }
                15 => {
                    reader.read_u1()?;
                    reader.read_u2()?;
                    Constant::Opaque
                }
                16 | 19 | 20 => {
                    reader.read_u2()?;
                    Constant::Opaque
                }
                other => return Err(ClassFormatError::InvalidConstantPoolTag(other)),
            };
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(ClassFormatError::InvalidConstantPoolIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(s) => Ok(s.as_str()),
            _ => Err(ClassFormatError::ConstantPoolTypeMismatch {
                index,
                expected: "Utf8",
            }),
        }
    }

    fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class(name_index) => Ok(internal_to_binary(self.utf8(*name_index)?)),
            _ => Err(ClassFormatError::ConstantPoolTypeMismatch {
                index,
                expected: "Class",
            }),
        }
    }
}

/// Decodes the JVM's modified UTF-8, falling back to lossy UTF-16 assembly.
fn decode_modified_utf8(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i] as u16;
        if b & 0x80 == 0 {
            units.push(b);
            i += 1;
        } else if b & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            units.push(((b & 0x1F) << 6) | (bytes[i + 1] as u16 & 0x3F));
            i += 2;
        } else if b & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            units.push(((b & 0x0F) << 12) | ((bytes[i + 1] as u16 & 0x3F) << 6) | (bytes[i + 2] as u16 & 0x3F));
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    String::from_utf16_lossy(&units)
}

#[derive(Default)]
struct Attributes {
    annotations: Vec<AnnotationInfo>,
    exceptions: Vec<String>,
    parameter_names: Option<Vec<String>>,
    local_variables: HashMap<usize, String>,
}

fn parse_attributes(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Attributes> {
    let count = reader.read_u2()? as usize;
    let mut attrs = Attributes::default();
    for _ in 0..count {
        let name = cp.utf8(reader.read_u2()?)?;
        let len = reader.read_u4()? as usize;
        let mut sub = Reader::new(reader.read_bytes(len)?);
        match name {
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                let num = sub.read_u2()?;
                for _ in 0..num {
                    attrs.annotations.push(parse_annotation(&mut sub, cp)?);
                }
            }
            "Exceptions" => {
                let num = sub.read_u2()?;
                for _ in 0..num {
                    attrs.exceptions.push(cp.class_name(sub.read_u2()?)?);
                }
            }
            "MethodParameters" => {
                let num = sub.read_u1()?;
                let mut names = Vec::with_capacity(num as usize);
                for _ in 0..num {
                    let name_index = sub.read_u2()?;
                    sub.read_u2()?;
                    if name_index == 0 {
                        names.clear();
                        break;
                    }
                    names.push(cp.utf8(name_index)?.to_string());
                }
                if names.len() == num as usize {
                    attrs.parameter_names = Some(names);
                }
            }
            "Code" => {
                sub.read_u2()?;
                sub.read_u2()?;
                let code_len = sub.read_u4()? as usize;
                sub.read_bytes(code_len)?;
                let handlers = sub.read_u2()? as usize;
                sub.read_bytes(handlers * 8)?;
                let nested = parse_code_attributes(&mut sub, cp)?;
                attrs.local_variables = nested;
            }
            _ => {}
        }
    }
    Ok(attrs)
}

/// Slot → name for variables live at pc 0, i.e. the method parameters.
fn parse_code_attributes(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<HashMap<usize, String>> {
    let count = reader.read_u2()? as usize;
    let mut locals = HashMap::new();
    for _ in 0..count {
        let name = cp.utf8(reader.read_u2()?)?;
        let len = reader.read_u4()? as usize;
        let mut sub = Reader::new(reader.read_bytes(len)?);
        if name != "LocalVariableTable" {
            continue;
        }
        let entries = sub.read_u2()?;
        for _ in 0..entries {
            let start_pc = sub.read_u2()?;
            sub.read_u2()?;
            let name_index = sub.read_u2()?;
            sub.read_u2()?;
            let slot = sub.read_u2()? as usize;
            if start_pc == 0 {
                locals.insert(slot, cp.utf8(name_index)?.to_string());
            }
        }
    }
    Ok(locals)
}

fn parse_annotation(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<AnnotationInfo> {
    let type_name = parse_field_descriptor(cp.utf8(reader.read_u2()?)?)?;
    let pairs = reader.read_u2()?;
    let mut values = Vec::with_capacity(pairs as usize);
    for _ in 0..pairs {
        let name = cp.utf8(reader.read_u2()?)?.to_string();
        values.push((name, parse_element_value(reader, cp)?));
    }
    Ok(AnnotationInfo { type_name, values })
}

fn parse_element_value(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<AnnotationValue> {
    let tag = reader.read_u1()? as char;
    let value = match tag {
        'B' | 'I' | 'S' | 'J' => {
            let index = reader.read_u2()?;
            match cp.get(index)? {
                Constant::Integer(v) => AnnotationValue::Int(*v as i64),
                Constant::Long(v) => AnnotationValue::Int(*v),
                _ => return Err(ClassFormatError::MalformedAttribute("RuntimeVisibleAnnotations")),
            }
        }
        'C' => match cp.get(reader.read_u2()?)? {
            Constant::Integer(v) => AnnotationValue::Char(char::from_u32(*v as u32).unwrap_or('\u{FFFD}')),
            _ => return Err(ClassFormatError::MalformedAttribute("RuntimeVisibleAnnotations")),
        },
        'Z' => match cp.get(reader.read_u2()?)? {
            Constant::Integer(v) => AnnotationValue::Bool(*v != 0),
            _ => return Err(ClassFormatError::MalformedAttribute("RuntimeVisibleAnnotations")),
        },
        'F' | 'D' => match cp.get(reader.read_u2()?)? {
            Constant::Float(v) => AnnotationValue::Float(*v as f64),
            Constant::Double(v) => AnnotationValue::Float(*v),
            _ => return Err(ClassFormatError::MalformedAttribute("RuntimeVisibleAnnotations")),
        },
        's' => AnnotationValue::String(cp.utf8(reader.read_u2()?)?.to_string()),
        'e' => {
            let type_name = parse_field_descriptor(cp.utf8(reader.read_u2()?)?)?;
            let constant = cp.utf8(reader.read_u2()?)?.to_string();
            AnnotationValue::Enum { type_name, constant }
        }
        'c' => {
            let desc = cp.utf8(reader.read_u2()?)?;
            if desc == "V" {
                AnnotationValue::Class("void".to_string())
            } else {
                AnnotationValue::Class(parse_field_descriptor(desc)?)
            }
        }
        '@' => AnnotationValue::Annotation(Box::new(parse_annotation(reader, cp)?)),
        '[' => {
            let num = reader.read_u2()?;
            let mut items = Vec::with_capacity(num as usize);
            for _ in 0..num {
                items.push(parse_element_value(reader, cp)?);
            }
            AnnotationValue::Array(items)
        }
        _ => return Err(ClassFormatError::MalformedAttribute("RuntimeVisibleAnnotations")),
    };
    Ok(value)
}

fn parse_method(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<MethodInfo> {
    let access_flags = reader.read_u2()?;
    let name = cp.utf8(reader.read_u2()?)?.to_string();
    let (parameter_types, return_type) = parse_method_descriptor(cp.utf8(reader.read_u2()?)?)?;
    let attrs = parse_attributes(reader, cp)?;

    let parameter_names = attrs.parameter_names.or_else(|| {
        if attrs.local_variables.is_empty() {
            return None;
        }
        let mut slot = if access_flags & ACC_STATIC != 0 { 0 } else { 1 };
        let mut names = Vec::with_capacity(parameter_types.len());
        for ty in &parameter_types {
            names.push(attrs.local_variables.get(&slot)?.clone());
            slot += slot_size(ty);
        }
        Some(names)
    });

    Ok(MethodInfo {
        name,
        access_flags,
        parameter_types,
        return_type,
        exceptions: attrs.exceptions,
        parameter_names,
        annotations: attrs.annotations,
    })
}

fn parse_field(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<FieldInfo> {
    let access_flags = reader.read_u2()?;
    let name = cp.utf8(reader.read_u2()?)?.to_string();
    let field_type = parse_field_descriptor(cp.utf8(reader.read_u2()?)?)?;
    let attrs = parse_attributes(reader, cp)?;
    Ok(FieldInfo {
        name,
        access_flags,
        field_type,
        annotations: attrs.annotations,
    })
}

/// Decodes a class file into the structural model.
pub fn parse_class(bytes: &[u8]) -> Result<ClassInfo> {
    let mut reader = Reader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != MAGIC {
        return Err(ClassFormatError::InvalidMagic(magic));
    }
    reader.read_u2()?;
    reader.read_u2()?;
    let cp = ConstantPool::parse(&mut reader)?;

    let access_flags = reader.read_u2()?;
    let name = cp.class_name(reader.read_u2()?)?;
    let super_index = reader.read_u2()?;
    let super_name = if super_index == 0 {
        None
    } else {
        Some(cp.class_name(super_index)?)
    };

    let interface_count = reader.read_u2()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(cp.class_name(reader.read_u2()?)?);
    }

    let field_count = reader.read_u2()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        fields.push(parse_field(&mut reader, &cp)?);
    }

    let method_count = reader.read_u2()?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        methods.push(parse_method(&mut reader, &cp)?);
    }

    let attrs = parse_attributes(&mut reader, &cp)?;

    Ok(ClassInfo {
        name,
        access_flags,
        super_name,
        interfaces,
        methods,
        fields,
        annotations: attrs.annotations,
    })
}

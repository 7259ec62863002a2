//! Test-only class file writer and fixture helpers.

#![allow(dead_code)]

use anyhow::Result;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_ABSTRACT: u16 = 0x0400;

pub fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir().join(format!("aop-model-it-{}-{nanos}-{name}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[derive(Debug, Clone)]
pub struct Annotation {
    type_name: String,
    strings: Vec<(String, String)>,
}

impl Annotation {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            strings: Vec::new(),
        }
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.strings.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
struct Method {
    access: u16,
    name: String,
    descriptor: String,
    annotations: Vec<Annotation>,
}

/// Builds a minimal class file: constant pool, super types, methods and
/// runtime-visible annotations with string values.
#[derive(Debug, Clone)]
pub struct ClassFile {
    name: String,
    access: u16,
    super_name: Option<String>,
    interfaces: Vec<String>,
    methods: Vec<Method>,
    annotations: Vec<Annotation>,
}

impl ClassFile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            access: ACC_PUBLIC,
            super_name: Some("java.lang.Object".to_string()),
            interfaces: Vec::new(),
            methods: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn interface(name: &str) -> Self {
        Self {
            access: ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT,
            ..Self::new(name)
        }
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = Some(super_name.to_string());
        self
    }

    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn method(self, name: &str, descriptor: &str) -> Self {
        self.method_with(ACC_PUBLIC, name, descriptor, Vec::new())
    }

    pub fn method_with(mut self, access: u16, name: &str, descriptor: &str, annotations: Vec<Annotation>) -> Self {
        self.methods.push(Method {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            annotations,
        });
        self
    }

    pub fn entry_name(&self) -> String {
        format!("{}.class", self.name.replace('.', "/"))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cp = ConstantPool::default();
        let this_class = cp.class(&self.name);
        let super_class = self.super_name.as_deref().map_or(0, |s| cp.class(s));
        let interfaces: Vec<u16> = self.interfaces.iter().map(|i| cp.class(i)).collect();

        let mut body = Vec::new();
        put_u2(&mut body, self.access);
        put_u2(&mut body, this_class);
        put_u2(&mut body, super_class);
        put_u2(&mut body, interfaces.len() as u16);
        for index in interfaces {
            put_u2(&mut body, index);
        }
        put_u2(&mut body, 0);

        put_u2(&mut body, self.methods.len() as u16);
        for method in &self.methods {
            put_u2(&mut body, method.access);
            put_u2(&mut body, cp.utf8(&method.name));
            put_u2(&mut body, cp.utf8(&method.descriptor));
            write_annotation_attributes(&mut body, &mut cp, &method.annotations);
        }
        write_annotation_attributes(&mut body, &mut cp, &self.annotations);

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        put_u2(&mut out, 0);
        put_u2(&mut out, 52);
        put_u2(&mut out, cp.count());
        out.extend_from_slice(&cp.bytes);
        out.extend_from_slice(&body);
        out
    }

    pub fn write_to(&self, classes_dir: &Path) -> Result<()> {
        let path = classes_dir.join(self.entry_name());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

pub fn write_jar(path: &Path, classes: &[ClassFile]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for class in classes {
        zip.start_file(class.entry_name(), options)?;
        zip.write_all(&class.to_bytes())?;
    }
    zip.finish()?;
    Ok(())
}

fn write_annotation_attributes(out: &mut Vec<u8>, cp: &mut ConstantPool, annotations: &[Annotation]) {
    if annotations.is_empty() {
        put_u2(out, 0);
        return;
    }
    let mut attr = Vec::new();
    put_u2(&mut attr, annotations.len() as u16);
    for annotation in annotations {
        let descriptor = format!("L{};", annotation.type_name.replace('.', "/"));
        put_u2(&mut attr, cp.utf8(&descriptor));
        put_u2(&mut attr, annotation.strings.len() as u16);
        for (name, value) in &annotation.strings {
            put_u2(&mut attr, cp.utf8(name));
            attr.push(b's');
            put_u2(&mut attr, cp.utf8(value));
        }
    }
    put_u2(out, 1);
    put_u2(out, cp.utf8("RuntimeVisibleAnnotations"));
    out.extend_from_slice(&(attr.len() as u32).to_be_bytes());
    out.extend_from_slice(&attr);
}

#[derive(Default)]
struct ConstantPool {
    bytes: Vec<u8>,
    next: u16,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl ConstantPool {
    fn allocate(&mut self) -> u16 {
        self.next += 1;
        self.next
    }

    fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8.get(value) {
            return *index;
        }
        let index = self.allocate();
        self.bytes.push(1);
        put_u2(&mut self.bytes, value.len() as u16);
        self.bytes.extend_from_slice(value.as_bytes());
        self.utf8.insert(value.to_string(), index);
        index
    }

    fn class(&mut self, binary_name: &str) -> u16 {
        if let Some(index) = self.classes.get(binary_name) {
            return *index;
        }
        let name_index = self.utf8(&binary_name.replace('.', "/"));
        let index = self.allocate();
        self.bytes.push(7);
        put_u2(&mut self.bytes, name_index);
        self.classes.insert(binary_name.to_string(), index);
        index
    }

    fn count(&self) -> u16 {
        self.next + 1
    }
}

fn put_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

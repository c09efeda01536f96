//! Method signatures and modifiers

use std::collections::BTreeMap;

use tally_codec::{CodecError, CodecResult, TaggedReader, TaggedRecord, TaggedWriter};

use crate::record::Record;

// Canonical keyword order used in normalized signatures.
static KEYWORDS: [(u64, &str); 11] = [
    (Modifiers::PUBLIC, "public"),
    (Modifiers::PROTECTED, "protected"),
    (Modifiers::PRIVATE, "private"),
    (Modifiers::ABSTRACT, "abstract"),
    (Modifiers::STATIC, "static"),
    (Modifiers::FINAL, "final"),
    (Modifiers::TRANSIENT, "transient"),
    (Modifiers::VOLATILE, "volatile"),
    (Modifiers::SYNCHRONIZED, "synchronized"),
    (Modifiers::NATIVE, "native"),
    (Modifiers::STRICTFP, "strictfp"),
];

/// Modifier bits and annotation names of a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Bitwise OR of the `Modifiers::*` flags
    pub mask: u64,
    /// Annotation names without the leading `@`
    pub annotations: Vec<String>,
}

impl Modifiers {
    /// `public`
    pub const PUBLIC: u64 = 0x0001;
    /// `private`
    pub const PRIVATE: u64 = 0x0002;
    /// `protected`
    pub const PROTECTED: u64 = 0x0004;
    /// `static`
    pub const STATIC: u64 = 0x0008;
    /// `final`
    pub const FINAL: u64 = 0x0010;
    /// `synchronized`
    pub const SYNCHRONIZED: u64 = 0x0020;
    /// `volatile`
    pub const VOLATILE: u64 = 0x0040;
    /// `transient`
    pub const TRANSIENT: u64 = 0x0080;
    /// `native`
    pub const NATIVE: u64 = 0x0100;
    /// `abstract`
    pub const ABSTRACT: u64 = 0x0400;
    /// `strictfp`
    pub const STRICTFP: u64 = 0x0800;

    /// Modifiers with the given mask and no annotations.
    pub fn from_mask(mask: u64) -> Self {
        Modifiers {
            mask,
            annotations: Vec::new(),
        }
    }

    /// Returns `true` if every bit of `flag` is set.
    pub fn has(&self, flag: u64) -> bool {
        self.mask & flag == flag
    }

    /// Returns `true` if the `deprecated` annotation is present.
    pub fn is_deprecated(&self) -> bool {
        self.annotations.iter().any(|a| a == "Deprecated")
    }

    /// Keywords for the set bits, in canonical order.
    pub fn keywords(&self) -> impl Iterator<Item = &'static str> + '_ {
        KEYWORDS
            .iter()
            .filter(move |(flag, _)| self.has(*flag))
            .map(|(_, kw)| *kw)
    }
}

impl TaggedRecord<Record> for Modifiers {
    const TYPE_NAME: &'static str = "Modifiers";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_u64(self.mask)?;
        write_strings(out, &self.annotations)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(Modifiers {
            mask: input.read_u64()?,
            annotations: read_strings(input)?,
        })
    }

    fn into_record(self) -> Record {
        Record::Modifiers(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::Modifiers(v) => Ok(v),
            other => Err(other),
        }
    }
}

/// Formal parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Declared type
    pub type_name: String,
    /// Parameter name
    pub name: String,
}

impl Parameter {
    /// New parameter.
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Parameter {
            type_name: type_name.into(),
            name: name.into(),
        }
    }
}

impl TaggedRecord<Record> for Parameter {
    const TYPE_NAME: &'static str = "Parameter";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_str(&self.type_name)?;
        out.write_str(&self.name)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        Ok(Parameter {
            type_name: input.read_str()?,
            name: input.read_str()?,
        })
    }

    fn into_record(self) -> Record {
        Record::Parameter(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::Parameter(v) => Ok(v),
            other => Err(other),
        }
    }
}

/// Declared shape of a method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSignature {
    /// Simple name
    pub name: String,
    /// Generic type parameters, e.g. `<T extends Comparable<T>>`
    pub type_params: Option<String>,
    /// Return type, `None` for constructors
    pub return_type: Option<String>,
    /// Modifiers and annotations
    pub modifiers: Modifiers,
    /// Documentation tags (`@since`, `@deprecated`, ...) with their values
    pub tags: BTreeMap<String, Vec<String>>,
    /// Formal parameters
    pub parameters: Vec<Parameter>,
    /// Declared thrown types
    pub throws: Vec<String>,
}

impl MethodSignature {
    /// Signature with a name and return type only.
    pub fn new(name: impl Into<String>, return_type: Option<&str>) -> Self {
        MethodSignature {
            name: name.into(),
            return_type: return_type.map(str::to_string),
            ..Default::default()
        }
    }

    /// Text matched by method contexts:
    /// `modifiers [type params] [return type] name(type name, ...) [throws A, B]`.
    pub fn normalized(&self) -> String {
        let mut parts: Vec<&str> = self.modifiers.keywords().collect();
        if let Some(tp) = self.type_params.as_deref() {
            parts.push(tp);
        }
        if let Some(rt) = self.return_type.as_deref() {
            parts.push(rt);
        }
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{} {}", p.type_name, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut text = parts.join(" ");
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&self.name);
        text.push('(');
        text.push_str(&params);
        text.push(')');
        if !self.throws.is_empty() {
            text.push_str(" throws ");
            text.push_str(&self.throws.join(", "));
        }
        text
    }

    /// Returns `true` if the method is deprecated by annotation or doc tag.
    pub fn is_deprecated(&self) -> bool {
        self.modifiers.is_deprecated() || self.tags.contains_key("deprecated")
    }
}

pub(crate) fn write_strings(out: &mut TaggedWriter<'_, Record>, values: &[String]) -> CodecResult<()> {
    out.write_int(values.len() as i32)?;
    for v in values {
        out.write_str(v)?;
    }
    Ok(())
}

pub(crate) fn read_strings(input: &mut TaggedReader<'_, Record>) -> CodecResult<Vec<String>> {
    let count = input.read_int()?;
    if count < 0 {
        return Err(CodecError::InvalidLength {
            what: "string list",
            length: count as i64,
        });
    }
    let mut values = Vec::with_capacity((count as usize).min(256));
    for _ in 0..count {
        values.push(input.read_str()?);
    }
    Ok(values)
}

impl TaggedRecord<Record> for MethodSignature {
    const TYPE_NAME: &'static str = "MethodSignature";

    fn write_body(&self, out: &mut TaggedWriter<'_, Record>) -> CodecResult<()> {
        out.write_str(&self.name)?;
        out.write_utf(self.type_params.as_deref())?;
        out.write_utf(self.return_type.as_deref())?;
        out.write_record(&self.modifiers)?;
        out.write_int(self.tags.len() as i32)?;
        for (tag, values) in &self.tags {
            out.write_str(tag)?;
            write_strings(out, values)?;
        }
        out.write_list(&self.parameters)?;
        write_strings(out, &self.throws)
    }

    fn read_body(input: &mut TaggedReader<'_, Record>) -> CodecResult<Self> {
        let name = input.read_str()?;
        let type_params = input.read_utf()?;
        let return_type = input.read_utf()?;
        let modifiers = input.read_required::<Modifiers>()?;
        let tag_count = input.read_int()?;
        if tag_count < 0 {
            return Err(CodecError::InvalidLength {
                what: "signature tags",
                length: tag_count as i64,
            });
        }
        let mut tags = BTreeMap::new();
        for _ in 0..tag_count {
            let tag = input.read_str()?;
            tags.insert(tag, read_strings(input)?);
        }
        Ok(MethodSignature {
            name,
            type_params,
            return_type,
            modifiers,
            tags,
            parameters: input.read_list()?,
            throws: read_strings(input)?,
        })
    }

    fn into_record(self) -> Record {
        Record::MethodSignature(self)
    }

    fn from_record(record: Record) -> Result<Self, Record> {
        match record {
            Record::MethodSignature(v) => Ok(v),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_signature_orders_modifiers() {
        let mut sig = MethodSignature::new("copy", Some("int"));
        sig.modifiers = Modifiers::from_mask(Modifiers::STATIC | Modifiers::PUBLIC | Modifiers::FINAL);
        sig.type_params = Some("<T>".into());
        sig.parameters = vec![Parameter::new("T[]", "src"), Parameter::new("int", "len")];
        sig.throws = vec!["IOException".into()];
        assert_eq!(
            sig.normalized(),
            "public static final <T> int copy(T[] src, int len) throws IOException"
        );
    }

    #[test]
    fn constructor_has_no_return_type() {
        let sig = MethodSignature::new("Point", None);
        assert_eq!(sig.normalized(), "Point()");
    }

    #[test]
    fn deprecation_from_annotation_or_tag() {
        let mut sig = MethodSignature::new("old", Some("void"));
        assert!(!sig.is_deprecated());
        sig.tags.insert("deprecated".into(), vec!["use new".into()]);
        assert!(sig.is_deprecated());
        let mut m = Modifiers::default();
        m.annotations.push("Deprecated".into());
        assert!(m.is_deprecated());
    }
}
